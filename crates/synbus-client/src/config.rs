//! クライアントの設定

use serde::{Deserialize, Serialize};
use synbus_transport::DEFAULT_MAX_FRAME_LEN;

/// 接続先 broker とクライアント名
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// broker のホスト（デフォルト `"127.0.0.1"`）
    pub host: String,
    /// broker のポート（デフォルト 8891）
    pub port: u16,
    /// register で送る表示名（UUID の導出にも使う）
    pub name: String,
    /// ループバック接続ではハンドシェイクを省略する（broker 側と揃えること）
    pub trust_loopback: bool,
    /// 未完成フレームの上限
    pub max_frame_len: usize,
    /// 1 回の read で読む最大バイト数
    pub read_buffer_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8891,
            name: "synbus-client".into(),
            trust_loopback: true,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            read_buffer_len: 64 * 1024,
        }
    }
}
