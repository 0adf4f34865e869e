//! # synbus-client
//!
//! synbus broker のクライアント。
//!
//! - [`ClientSession`]: I/O を持たない状態機械（購読ハンドラ・配送回数の上限・register）
//! - [`Client`]: tokio の TCP ドライバ
//!
//! ## リクエスト／リプライ
//!
//! ```text
//! request("jobs.run", payload)
//!   → subscribe("__<msg_id>", limit = 1)
//!   → publish("jobs.run", payload)          msg_id を付けて送る
//! 応答側: respond(msg_id, reply)
//!   → publish("__<msg_id>", reply)
//! ```
//!
//! ワイヤ上の新しいプリミティブはなく、pub/sub の上の約束事だけで実現している。

pub mod client;
pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod net;
pub mod subscriptions;

pub use client::ClientSession;
pub use config::ClientConfig;
pub use error::ClientError;
pub use net::Client;
pub use subscriptions::{Dispatch, Handler, Limit, LocalSubscriptions};
