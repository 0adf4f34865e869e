//! tokio による TCP ドライバ
//!
//! 1 つのタスクが `ClientSession` を所有し、ソケットの読み込みと API からの
//! コマンドを交互に処理する。購読ハンドラはこのタスク上で呼ばれる。

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use serde_json::Value;
use synbus_proto::{ClientInfo, Message};

use crate::client::ClientSession;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::host;
use crate::subscriptions::{Handler, Limit};

type Reply<T> = oneshot::Sender<Result<T, ClientError>>;

/// API からドライバタスクへのコマンド
enum Command {
    Subscribe { pattern: String, handler: Handler, limit: Limit, reply: Reply<()> },
    Unsubscribe { pattern: String, reply: Reply<()> },
    Publish { channel: String, payload: Value, reply: Reply<String> },
    Request { channel: String, payload: Value, handler: Handler, reply: Reply<String> },
    Respond { msg_id: String, payload: Value, reply: Reply<String> },
    /// 積まれた送信を書き切ってから閉じる
    Close,
}

/// broker に接続したクライアント
pub struct Client {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<Result<(), ClientError>>,
}

impl Client {
    /// 設定に従って broker に接続する
    ///
    /// 識別情報はホスト情報と `config.name` から作る。
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        Self::connect_as(config, host::client_info(&config.name)).await
    }

    /// 識別情報を指定して接続する
    pub async fn connect_as(config: &ClientConfig, info: ClientInfo) -> Result<Self, ClientError> {
        let stream = TcpStream::connect((config.host.as_str(), config.port)).await?;
        let peer = stream.peer_addr()?;
        let trusted = config.trust_loopback && peer.ip().is_loopback();
        tracing::info!(%peer, trusted, uuid = %info.uuid, "connected to broker");

        let mut session = ClientSession::new(info, trusted, config.max_frame_len);
        session.on_connect()?;

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(drive(stream, session, commands_rx, config.read_buffer_len));
        Ok(Client { commands, task })
    }

    /// チャンネルを購読する（`limit` = 0 で無制限）
    pub async fn subscribe(
        &self,
        pattern: &str,
        limit: Limit,
        handler: impl FnMut(&Message) + Send + 'static,
    ) -> Result<(), ClientError> {
        self.call(|reply| Command::Subscribe {
            pattern: pattern.to_string(),
            handler: Box::new(handler),
            limit,
            reply,
        })
        .await
    }

    pub async fn unsubscribe(&self, pattern: &str) -> Result<(), ClientError> {
        self.call(|reply| Command::Unsubscribe {
            pattern: pattern.to_string(),
            reply,
        })
        .await
    }

    /// publish して msg_id を返す
    pub async fn publish(&self, channel: &str, payload: Value) -> Result<String, ClientError> {
        self.call(|reply| Command::Publish {
            channel: channel.to_string(),
            payload,
            reply,
        })
        .await
    }

    /// リプライを 1 回だけ `on_reply` で受け取る publish
    pub async fn request(
        &self,
        channel: &str,
        payload: Value,
        on_reply: impl FnMut(&Message) + Send + 'static,
    ) -> Result<String, ClientError> {
        self.call(|reply| Command::Request {
            channel: channel.to_string(),
            payload,
            handler: Box::new(on_reply),
            reply,
        })
        .await
    }

    /// `msg_id` のリクエストに応答する
    pub async fn respond(&self, msg_id: &str, payload: Value) -> Result<String, ClientError> {
        self.call(|reply| Command::Respond {
            msg_id: msg_id.to_string(),
            payload,
            reply,
        })
        .await
    }

    /// 送信待ちを書き切ってから接続を閉じる
    pub async fn close(self) -> Result<(), ClientError> {
        let _ = self.commands.send(Command::Close);
        match self.task.await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Closed),
        }
    }

    async fn call<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, ClientError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| ClientError::Closed)?;
        response.await.map_err(|_| ClientError::Closed)?
    }
}

/// ドライバタスク本体
async fn drive(
    stream: TcpStream,
    mut session: ClientSession,
    mut commands: mpsc::UnboundedReceiver<Command>,
    read_buffer_len: usize,
) -> Result<(), ClientError> {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = vec![0u8; read_buffer_len.max(1)];
    let mut closing = false;

    flush(&mut session, &mut writer).await?;

    loop {
        if closing && session.is_established() {
            writer.shutdown().await?;
            tracing::debug!("client closed");
            return Ok(());
        }

        tokio::select! {
            read = reader.read(&mut buf) => {
                let n = read?;
                match session.on_receive(&buf[..n]) {
                    Ok(()) => {}
                    Err(ClientError::Disconnected) => {
                        tracing::info!("broker closed the connection");
                        return Ok(());
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "closing connection");
                        return Err(e);
                    }
                }
            }

            command = commands.recv(), if !closing => {
                match command {
                    Some(command) => closing = handle_command(&mut session, command),
                    // Client が drop された
                    None => closing = true,
                }
            }
        }

        flush(&mut session, &mut writer).await?;
    }
}

/// コマンドを実行する。閉じるべきなら `true`
fn handle_command(session: &mut ClientSession, command: Command) -> bool {
    match command {
        Command::Subscribe { pattern, handler, limit, reply } => {
            let _ = reply.send(session.subscribe(&pattern, handler, limit));
        }
        Command::Unsubscribe { pattern, reply } => {
            let _ = reply.send(session.unsubscribe(&pattern));
        }
        Command::Publish { channel, payload, reply } => {
            let _ = reply.send(session.publish(&channel, payload));
        }
        Command::Request { channel, payload, handler, reply } => {
            let _ = reply.send(session.request(&channel, payload, handler));
        }
        Command::Respond { msg_id, payload, reply } => {
            let _ = reply.send(session.respond(&msg_id, payload));
        }
        Command::Close => return true,
    }
    false
}

async fn flush(session: &mut ClientSession, writer: &mut OwnedWriteHalf) -> Result<(), ClientError> {
    for frame in session.take_outgoing() {
        writer.write_all(&frame).await?;
    }
    Ok(())
}
