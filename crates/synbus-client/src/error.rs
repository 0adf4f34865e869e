//! synbus-client エラー型

use synbus_proto::ProtoError;
use synbus_session::SessionError;
use thiserror::Error;

/// クライアントのエラー
#[derive(Error, Debug)]
pub enum ClientError {
    /// ハンドシェイク・復号・フレーミングの失敗（接続は閉じられる）
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    /// メッセージのエンコード・デコード失敗、不正なチャンネル名
    #[error("Protocol error: {0}")]
    Proto(#[from] ProtoError),
    /// ローカルに購読していないチャンネルの購読解除
    #[error("Not subscribed to {0:?}")]
    NotSubscribed(String),
    /// broker が接続を閉じた
    #[error("Disconnected by broker")]
    Disconnected,
    /// クライアントのタスクが既に終了している
    #[error("Client is closed")]
    Closed,
    /// 接続・読み書きの失敗
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
