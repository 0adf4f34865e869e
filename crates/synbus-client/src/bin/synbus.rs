//! synbus command-line client
//!
//! Usage:
//!   synbus publish jobs.run '{"n": 1}' [--wait-reply]
//!   synbus subscribe 'jobs.*' [--count 10]

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::Value;
use synbus_client::{logging, Client, ClientConfig, ClientError};
use synbus_proto::{Message, ProtoError};
use tokio::sync::mpsc;

/// synbus broker client
#[derive(Parser, Debug)]
#[command(name = "synbus", version)]
#[command(about = "Publish to and subscribe on a synbus broker")]
struct Cli {
    /// broker のホスト
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// broker のポート
    #[arg(short, long, default_value_t = 8891)]
    port: u16,

    /// register で名乗る名前
    #[arg(long, default_value = "synbus-cli")]
    name: String,

    /// ループバック接続でも暗号化ハンドシェイクを行う
    #[arg(long)]
    no_trust_loopback: bool,

    /// ログレベル（RUST_LOG が優先）
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// JSON ペイロードを publish する
    Publish {
        channel: String,
        /// JSON 値（例: '{"n": 1}', '"text"'）
        payload: String,
        /// 最初のリプライを待って表示する
        #[arg(long)]
        wait_reply: bool,
    },
    /// 配送されたメッセージを 1 行 1 JSON で表示する
    Subscribe {
        pattern: String,
        /// この件数を受け取ったら終了する（0 = Ctrl-C まで）
        #[arg(short = 'n', long, default_value_t = 0)]
        count: u32,
    },
}

impl Cli {
    fn config(&self) -> ClientConfig {
        ClientConfig {
            host: self.host.clone(),
            port: self.port,
            name: self.name.clone(),
            trust_loopback: !self.no_trust_loopback,
            ..ClientConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_subscriber(&cli.log_level);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "synbus failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), ClientError> {
    let config = cli.config();

    match cli.command {
        Command::Publish {
            channel,
            payload,
            wait_reply,
        } => {
            let payload: Value = serde_json::from_str(&payload).map_err(ProtoError::from)?;
            let client = Client::connect(&config).await?;

            if wait_reply {
                let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
                let msg_id = client
                    .request(&channel, payload, move |reply| {
                        let _ = tx.send(reply.clone());
                    })
                    .await?;
                tracing::info!(%msg_id, "waiting for reply");

                tokio::select! {
                    reply = rx.recv() => {
                        if let Some(reply) = reply {
                            print_message(&reply)?;
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {}
                }
            } else {
                let msg_id = client.publish(&channel, payload).await?;
                tracing::info!(%msg_id, "published");
            }

            client.close().await
        }

        Command::Subscribe { pattern, count } => {
            let client = Client::connect(&config).await?;
            let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
            client
                .subscribe(&pattern, count, move |message| {
                    let _ = tx.send(message.clone());
                })
                .await?;

            let mut received = 0u32;
            loop {
                tokio::select! {
                    message = rx.recv() => {
                        let Some(message) = message else { break };
                        print_message(&message)?;
                        received += 1;
                        if count > 0 && received >= count {
                            break;
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }

            client.close().await
        }
    }
}

fn print_message(message: &Message) -> Result<(), ClientError> {
    let line = serde_json::to_string(message).map_err(ProtoError::from)?;
    println!("{line}");
    Ok(())
}
