//! synbus-session エラー型

use synbus_crypto::CryptoError;
use synbus_transport::TransportError;
use thiserror::Error;

/// セッション層のエラー
///
/// `NotEstablished` 以外はすべて接続を閉じるべきエラー。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// 鍵交換・復号の失敗
    #[error("Crypto failure: {0}")]
    Crypto(#[from] CryptoError),
    /// フレーミングの失敗（上限超過）
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),
    /// ハンドシェイク状態に合わないフレームを受信した
    #[error("Protocol violation: {0}")]
    ProtocolViolation(&'static str),
    /// 受動側でハンドシェイク完了前に送信しようとした
    #[error("Session is not established")]
    NotEstablished,
}

impl SessionError {
    /// 接続を閉じるべきか
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::NotEstablished)
    }
}
