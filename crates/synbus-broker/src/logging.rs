//! tracing subscriber の初期化

use tracing_subscriber::EnvFilter;

/// stderr へのコンパクトなログ出力を設定する
///
/// `RUST_LOG` が設定されていればそちらを優先する。
/// 二度目以降の呼び出しは何もしない。
pub fn init_subscriber(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}
