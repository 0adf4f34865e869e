//! register ペイロード（クライアントの識別情報）

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtoError;

/// register メッセージで送られるクライアントの識別情報
///
/// `uuid` と `name` 以外（os, hostname, user, mac など）は
/// broker にとって意味を持たない値の袋としてそのまま保持する。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// クライアントの UUID（Client Registry のキー）
    pub uuid: String,
    /// 表示名
    pub name: String,
    /// ホストのメタデータ
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl ClientInfo {
    /// メタデータなしの識別情報を作る
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        ClientInfo {
            uuid: uuid.into(),
            name: name.into(),
            metadata: Map::new(),
        }
    }

    /// メタデータを追加する
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// register メッセージのペイロードから取り出す
    ///
    /// # エラー
    /// - `ProtoError::InvalidRegistration`: uuid / name がない、空、または文字列でない
    pub fn from_payload(payload: Value) -> Result<Self, ProtoError> {
        let info: ClientInfo =
            serde_json::from_value(payload).map_err(|e| ProtoError::InvalidRegistration(e.to_string()))?;
        if info.uuid.is_empty() {
            return Err(ProtoError::InvalidRegistration("empty uuid".to_string()));
        }
        Ok(info)
    }

    /// register メッセージのペイロードに変換する
    pub fn to_payload(&self) -> Value {
        // String キーの Map なので失敗しない
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
