//! tracing subscriber の初期化

use tracing_subscriber::EnvFilter;

/// stderr へログを出す（標準出力は受信メッセージ用に空けておく）
///
/// `RUST_LOG` が設定されていればそちらを優先する。
pub fn init_subscriber(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .with_target(false)
        .try_init();
}
