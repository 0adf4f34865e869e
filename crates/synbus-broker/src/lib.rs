//! # synbus-broker
//!
//! synbus の broker。クライアントの登録、購読の管理、publish の fan-out を行う。
//!
//! ## 構成
//!
//! - [`router::Broker`]: I/O を持たない状態機械（Client Registry と購読集合の唯一の所有者）
//! - [`server`]: tokio の TCP ドライバ。単一の broker タスクが `Broker` を動かす
//! - [`config::BrokerConfig`]: デフォルト → JSON ファイル → 環境変数 の順で読み込む
//!
//! ## メッセージの扱い
//!
//! ```text
//! register    → Client Registry に uuid → 接続 を登録（同じ uuid は置き換え）
//! subscribe   → 送信元接続の購読集合に追加
//! unsubscribe → 送信元接続の購読集合から削除
//! それ以外    → 登録済み全接続へ fan-out（接続ごとに最も具体的な一致 1 つ）
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod registry;
pub mod router;
pub mod server;
pub mod subscriptions;

pub use config::BrokerConfig;
pub use error::{BrokerError, ConfigError};
pub use registry::{ClientRegistry, ConnId};
pub use router::{Broker, BrokerAction};
pub use subscriptions::SubscriptionSet;
