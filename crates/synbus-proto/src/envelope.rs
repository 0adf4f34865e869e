//! メッセージ種別の判定
//!
//! ワイヤ上では制御メッセージも通常の `Message` と同じ形をしている:
//!
//! ```text
//! Register    : channel == "register", payload = ClientInfo
//! Subscribe   : payload == "subscribe"   (channel = 購読パターン)
//! Unsubscribe : payload == "unsubscribe" (channel = 購読パターン)
//! Publish     : それ以外
//! ```
//!
//! デコード時に一度だけ判定し、以降はタグ付き enum で扱う。

use serde_json::Value;

use crate::channel::{self, REGISTER_CHANNEL};
use crate::error::ProtoError;
use crate::message::Message;
use crate::register::ClientInfo;

const SUBSCRIBE: &str = "subscribe";
const UNSUBSCRIBE: &str = "unsubscribe";

/// デコード済みメッセージの種別
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// クライアント登録
    Register(ClientInfo),
    /// 送信元接続の購読セットにパターンを追加
    Subscribe(String),
    /// 送信元接続の購読セットからパターンを削除
    Unsubscribe(String),
    /// 通常の publish（fan-out 対象）
    Publish(Message),
}

impl Envelope {
    /// フレーム本体をデコードして種別を判定する
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtoError> {
        Self::classify(Message::decode(bytes)?)
    }

    /// デコード済みメッセージの種別を判定する
    ///
    /// # エラー
    /// - `ProtoError::InvalidRegistration`: register のペイロード不正
    /// - `ProtoError::InvalidChannel`: チャンネル名不正
    pub fn classify(message: Message) -> Result<Self, ProtoError> {
        if message.channel == REGISTER_CHANNEL {
            return ClientInfo::from_payload(message.payload).map(Envelope::Register);
        }

        channel::validate(&message.channel)?;

        match message.payload.as_str() {
            Some(SUBSCRIBE) => Ok(Envelope::Subscribe(message.channel)),
            Some(UNSUBSCRIBE) => Ok(Envelope::Unsubscribe(message.channel)),
            _ => Ok(Envelope::Publish(message)),
        }
    }

    /// ワイヤに載せる `Message` に変換する
    pub fn into_message(self) -> Message {
        match self {
            Envelope::Register(info) => Message::new(REGISTER_CHANNEL, info.to_payload()),
            Envelope::Subscribe(pattern) => Message::new(pattern, Value::from(SUBSCRIBE)),
            Envelope::Unsubscribe(pattern) => Message::new(pattern, Value::from(UNSUBSCRIBE)),
            Envelope::Publish(message) => message,
        }
    }
}
