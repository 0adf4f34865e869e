//! # synbus-proto
//!
//! synbus のメッセージ定義とエンコード/デコードユーティリティ。
//!
//! ## メッセージの役割
//!
//! すべてのアプリケーションフレームは復号後に 1 つの JSON オブジェクトになる:
//! - `channel`: publish 先のチャンネル（ドット区切り階層名）
//! - `msg_id`: publish ごとに一意な ID
//! - `payload`: 任意の構造化データ
//! - `matched_channel`: ワイルドカード購読経由の配送時のみ
//!
//! 登録・購読・購読解除も同じ形で送られ、[`Envelope`] で種別を判定する。

pub mod channel;
pub mod envelope;
pub mod error;
pub mod message;
pub mod register;

pub use envelope::Envelope;
pub use error::ProtoError;
pub use message::Message;
pub use register::ClientInfo;

/// ペイロード値の型（JSON）
pub use serde_json::Value;
