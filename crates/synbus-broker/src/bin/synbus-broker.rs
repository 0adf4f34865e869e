//! synbus broker
//!
//! Usage:
//!   synbus-broker [--config broker.json] [--host 0.0.0.0] [--port 8891]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use synbus_broker::{logging, server, BrokerConfig};

/// synbus pub/sub broker
#[derive(Parser, Debug)]
#[command(name = "synbus-broker", version)]
#[command(about = "Lightweight pub/sub message broker")]
struct Args {
    /// JSON 設定ファイル
    #[arg(long)]
    config: Option<PathBuf>,

    /// 待ち受けホスト
    #[arg(long)]
    host: Option<String>,

    /// 待ち受けポート
    #[arg(short, long)]
    port: Option<u16>,

    /// ループバック接続も暗号化する
    #[arg(long)]
    no_trust_loopback: bool,

    /// PKCS#8 PEM の秘密鍵（省略時は起動ごとに生成）
    #[arg(long)]
    private_key: Option<PathBuf>,

    /// ログレベル（RUST_LOG が優先）
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    /// CLI フラグを最後に重ねる
    fn apply(self, config: &mut BrokerConfig) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.no_trust_loopback {
            config.trust_loopback = false;
        }
        if let Some(path) = self.private_key {
            config.private_key_path = Some(path);
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match BrokerConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            logging::init_subscriber("info");
            tracing::error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    args.apply(&mut config);
    logging::init_subscriber(&config.log_level);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    match server::run(config, shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "broker stopped");
            ExitCode::FAILURE
        }
    }
}
