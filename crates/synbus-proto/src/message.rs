//! アプリケーションメッセージ
//!
//! ## JSON 形式
//! ```json
//! {"channel": "jobs.run", "msg_id": "…uuid…", "payload": {"n": 1}, "matched_channel": "jobs.*"}
//! ```
//! `matched_channel` はワイルドカード購読経由で配送された場合のみ付く。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::channel;
use crate::error::ProtoError;

/// publish / 配送される 1 件のメッセージ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// publish されたチャンネル（リテラル）
    pub channel: String,
    /// publish ごとに生成されるグローバルに一意な ID
    pub msg_id: String,
    /// 任意の構造化データ
    #[serde(default)]
    pub payload: Value,
    /// ワイルドカードでマッチした場合の購読パターン
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_channel: Option<String>,
}

impl Message {
    /// 新しい msg_id（UUIDv4）でメッセージを作る
    pub fn new(channel: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self::with_id(channel, Uuid::new_v4().to_string(), payload)
    }

    /// msg_id を指定してメッセージを作る
    pub fn with_id(channel: impl Into<String>, msg_id: impl Into<String>, payload: impl Into<Value>) -> Self {
        Message {
            channel: channel.into(),
            msg_id: msg_id.into(),
            payload: payload.into(),
            matched_channel: None,
        }
    }

    /// `msg_id` に対するリプライ用メッセージを作る
    pub fn reply_to(msg_id: &str, payload: impl Into<Value>) -> Self {
        Self::new(channel::reply_channel(msg_id), payload)
    }

    /// ワイルドカードパターン経由の配送用に注釈を付けたコピーを返す
    pub fn with_match(&self, pattern: &str) -> Self {
        Message {
            matched_channel: Some(pattern.to_string()),
            ..self.clone()
        }
    }

    /// 受信側のローカル配送に使うチャンネル（マッチしたパターン優先）
    pub fn dispatch_channel(&self) -> &str {
        self.matched_channel.as_deref().unwrap_or(&self.channel)
    }

    /// このメッセージへのリプライが届くチャンネル
    pub fn reply_channel(&self) -> String {
        channel::reply_channel(&self.msg_id)
    }

    /// JSON バイト列にエンコードする
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// 復号済みのフレーム本体からデコードする
    ///
    /// # エラー
    /// - `ProtoError::Malformed` / `NotAnObject`: JSON として壊れている（致命的）
    /// - `ProtoError::MissingField`: `channel`（空文字含む）や `msg_id` がない
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtoError> {
        let value: Value = serde_json::from_slice(bytes)?;
        let Value::Object(mut object) = value else {
            return Err(ProtoError::NotAnObject);
        };

        let channel = match take_string(&mut object, "channel") {
            Some(channel) if !channel.is_empty() => channel,
            _ => return Err(ProtoError::MissingField("channel")),
        };
        let msg_id = take_string(&mut object, "msg_id").ok_or(ProtoError::MissingField("msg_id"))?;
        let payload = object.remove("payload").unwrap_or(Value::Null);
        let matched_channel = match object.remove("matched_channel") {
            None | Some(Value::Null) => None,
            Some(Value::String(pattern)) => Some(pattern),
            Some(_) => return Err(ProtoError::MissingField("matched_channel")),
        };

        Ok(Message {
            channel,
            msg_id,
            payload,
            matched_channel,
        })
    }
}

fn take_string(object: &mut Map<String, Value>, key: &'static str) -> Option<String> {
    match object.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_generates_unique_ids() {
        let a = Message::new("jobs.run", json!({"n": 1}));
        let b = Message::new("jobs.run", json!({"n": 1}));
        assert_ne!(a.msg_id, b.msg_id);
        assert!(a.matched_channel.is_none());
    }

    #[test]
    fn test_encode_omits_absent_match() {
        let msg = Message::with_id("a.b", "id-1", "x");
        let text = String::from_utf8(msg.encode().unwrap()).unwrap();
        assert!(!text.contains("matched_channel"));

        let annotated = msg.with_match("a.*");
        let text = String::from_utf8(annotated.encode().unwrap()).unwrap();
        assert!(text.contains("\"matched_channel\":\"a.*\""));
        // 元のチャンネルは保たれる
        assert_eq!(annotated.channel, "a.b");
    }

    #[test]
    fn test_decode_roundtrip_with_match() {
        let msg = Message::with_id("jobs.run", "id-2", json!({"n": 1})).with_match("jobs.*");
        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.dispatch_channel(), "jobs.*");
    }

    #[test]
    fn test_decode_missing_payload_is_null() {
        let decoded = Message::decode(br#"{"channel":"a","msg_id":"1"}"#).unwrap();
        assert_eq!(decoded.payload, Value::Null);
        assert_eq!(decoded.dispatch_channel(), "a");
    }

    #[test]
    fn test_decode_missing_channel_not_fatal() {
        let err = Message::decode(br#"{"msg_id":"1","payload":2}"#).unwrap_err();
        assert!(matches!(err, ProtoError::MissingField("channel")));
        assert!(!err.is_fatal());

        let err = Message::decode(br#"{"channel":"","msg_id":"1"}"#).unwrap_err();
        assert!(matches!(err, ProtoError::MissingField("channel")));

        let err = Message::decode(br#"{"channel":"a"}"#).unwrap_err();
        assert!(matches!(err, ProtoError::MissingField("msg_id")));
    }

    #[test]
    fn test_decode_malformed_is_fatal() {
        let err = Message::decode(b"{not json").unwrap_err();
        assert!(err.is_fatal());

        let err = Message::decode(b"[1,2,3]").unwrap_err();
        assert!(matches!(err, ProtoError::NotAnObject));
        assert!(err.is_fatal());

        let err = Message::decode(&[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_reply_helpers() {
        let msg = Message::with_id("jobs.run", "abc", Value::Null);
        assert_eq!(msg.reply_channel(), "__abc");

        let reply = Message::reply_to(&msg.msg_id, "ack");
        assert_eq!(reply.channel, "__abc");
        assert_eq!(reply.payload, json!("ack"));
    }
}
