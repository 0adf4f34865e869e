//! synbus-broker エラー型

use std::path::PathBuf;

use synbus_crypto::CryptoError;
use synbus_transport::TransportError;
use thiserror::Error;

/// 設定の読み込みエラー
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// broker の起動・実行エラー
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// 秘密鍵ファイルが読めない
    #[error("Failed to read private key {path:?}: {source}")]
    PrivateKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 鍵の生成・読み込み失敗
    #[error("Key setup failed: {0}")]
    Crypto(#[from] CryptoError),
    /// 公開鍵 DER を区切り子フレームで送れない
    #[error("Public key cannot be sent: {0}")]
    Transport(#[from] TransportError),
    /// bind / accept の失敗
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
