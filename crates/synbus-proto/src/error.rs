//! synbus-proto エラー型

use thiserror::Error;

/// メッセージのデコードエラー
#[derive(Error, Debug)]
pub enum ProtoError {
    /// UTF-8 / JSON として解釈できない（接続を閉じる）
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    /// JSON オブジェクトではない（接続を閉じる）
    #[error("Message is not a JSON object")]
    NotAnObject,
    /// 必須フィールドがない・型が違う（メッセージを読み飛ばす）
    #[error("Missing or invalid field: {0}")]
    MissingField(&'static str),
    /// チャンネル名が不正（空セグメントなど）
    #[error("Invalid channel name: {0:?}")]
    InvalidChannel(String),
    /// register のペイロードが不正
    #[error("Invalid registration payload: {0}")]
    InvalidRegistration(String),
}

impl ProtoError {
    /// 接続を閉じるべき構造レベルの破損か
    ///
    /// JSON として壊れている場合のみ致命的。フィールド欠落などは
    /// そのメッセージを捨てて接続は維持する。
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtoError::Malformed(_) | ProtoError::NotAnObject)
    }
}
