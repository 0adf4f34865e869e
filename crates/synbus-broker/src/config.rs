//! broker の設定
//!
//! 読み込み順: デフォルト → JSON ファイル → 環境変数 → CLI フラグ（バイナリ側）

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use synbus_crypto::DEFAULT_RSA_BITS;
use synbus_transport::DEFAULT_MAX_FRAME_LEN;

use crate::error::ConfigError;

/// 待ち受けホスト
pub const ENV_HOST: &str = "SYNBUS_HOST";
/// 待ち受けポート
pub const ENV_PORT: &str = "SYNBUS_PORT";
/// ループバック接続の暗号化を省略するか
pub const ENV_TRUST_LOOPBACK: &str = "SYNBUS_TRUST_LOOPBACK";
/// 生成する RSA 鍵のビット数
pub const ENV_RSA_BITS: &str = "SYNBUS_RSA_BITS";
/// PKCS#8 PEM の秘密鍵ファイル
pub const ENV_PRIVATE_KEY: &str = "SYNBUS_PRIVATE_KEY";
/// ログレベル
pub const ENV_LOG: &str = "SYNBUS_LOG";

/// デフォルトの待ち受けポート
pub const DEFAULT_PORT: u16 = 8891;

/// 1 回の read で読む最大バイト数
pub const DEFAULT_READ_BUFFER_LEN: usize = 64 * 1024;

/// broker の設定
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// 待ち受けホスト（デフォルト `"127.0.0.1"`）
    pub host: String,
    /// 待ち受けポート（デフォルト 8891）
    pub port: u16,
    /// ループバック接続をハンドシェイクなしの平文で扱う
    pub trust_loopback: bool,
    /// 起動時に生成する RSA 鍵のビット数
    pub rsa_bits: usize,
    /// 指定時はこの PKCS#8 PEM を読み込み、鍵を生成しない
    pub private_key_path: Option<PathBuf>,
    /// 接続ごとの未完成フレーム上限
    pub max_frame_len: usize,
    /// 1 回の read で読む最大バイト数
    pub read_buffer_len: usize,
    /// `RUST_LOG` 未設定時のログレベル
    pub log_level: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            trust_loopback: true,
            rsa_bits: DEFAULT_RSA_BITS,
            private_key_path: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            read_buffer_len: DEFAULT_READ_BUFFER_LEN,
            log_level: "info".into(),
        }
    }
}

impl BrokerConfig {
    /// デフォルト（またはファイル）に環境変数を重ねて読み込む
    ///
    /// # エラー
    /// - `ConfigError::Read` / `ConfigError::Parse`: ファイルが読めない・不正
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// JSON ファイルから読み込む（省略したキーはデフォルト値）
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// プロセスの環境変数を適用する
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// 環境変数相当の上書きを適用する
    ///
    /// 解釈できない値は無視する。
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup(ENV_HOST).filter(|v| !v.is_empty()) {
            self.host = host;
        }
        if let Some(port) = lookup(ENV_PORT).and_then(|v| v.parse().ok()) {
            self.port = port;
        }
        if let Some(trust) = lookup(ENV_TRUST_LOOPBACK).and_then(|v| parse_bool(&v)) {
            self.trust_loopback = trust;
        }
        if let Some(bits) = lookup(ENV_RSA_BITS).and_then(|v| v.parse().ok()) {
            self.rsa_bits = bits;
        }
        if let Some(path) = lookup(ENV_PRIVATE_KEY).filter(|v| !v.is_empty()) {
            self.private_key_path = Some(PathBuf::from(path));
        }
        if let Some(level) = lookup(ENV_LOG).filter(|v| !v.is_empty()) {
            self.log_level = level;
        }
    }

    /// `host:port`
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
