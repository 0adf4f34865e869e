//! tokio による TCP ドライバ
//!
//! ```text
//! accept ─┐
//! reader ─┼─ ConnEvent ─▶ [broker タスク: Broker を単独所有] ─ BrokerAction ─▶ writer
//! writer ─┘
//! ```
//!
//! Client Registry と購読集合を変更するのは broker タスクだけ。
//! 接続ごとの reader / writer タスクはバイト列の受け渡しのみを行う。

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use synbus_crypto::ServerKeyPair;
use synbus_transport::{is_frameable, try_encode_frame, TransportError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::registry::ConnId;
use crate::router::{Broker, BrokerAction};

/// reader / writer タスクから broker タスクへのイベント
#[derive(Debug)]
enum ConnEvent {
    /// 読んだバイト列（空なら EOF）
    Received { conn: ConnId, bytes: Vec<u8> },
    /// 読み書きの失敗
    Closed { conn: ConnId },
}

/// broker タスクが保持する接続ごとのハンドル
struct ConnHandle {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    reader: JoinHandle<()>,
}

/// 鍵生成をやり直す上限
const MAX_KEYGEN_ATTEMPTS: usize = 4;

/// 設定に従ってサーバー鍵ペアを用意する
///
/// PEM が指定されていれば読み込み、なければ生成する。
///
/// 公開鍵 DER は平文フレームとして送るため、区切り子と衝突しないことを確かめる。
/// 生成する場合は衝突しない鍵が出るまで作り直す。
pub fn load_or_generate_keys(config: &BrokerConfig) -> Result<ServerKeyPair, BrokerError> {
    let keys = match &config.private_key_path {
        Some(path) => load_keys(path)?,
        None => generate_keys(config.rsa_bits)?,
    };
    check_frameable(&keys)?;
    Ok(keys)
}

fn generate_keys(bits: usize) -> Result<ServerKeyPair, BrokerError> {
    tracing::info!(bits, "generating RSA key pair");
    let mut keys = ServerKeyPair::generate(bits)?;
    for _ in 1..MAX_KEYGEN_ATTEMPTS {
        if is_frameable(keys.public_key_der()) {
            break;
        }
        tracing::debug!("public key collides with frame delimiter, regenerating");
        keys = ServerKeyPair::generate(bits)?;
    }
    Ok(keys)
}

fn check_frameable(keys: &ServerKeyPair) -> Result<(), TransportError> {
    try_encode_frame(keys.public_key_der()).map(|_| ())
}

fn load_keys(path: &Path) -> Result<ServerKeyPair, BrokerError> {
    let pem = std::fs::read_to_string(path).map_err(|source| BrokerError::PrivateKey {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), "loaded private key");
    Ok(ServerKeyPair::from_pkcs8_pem(&pem)?)
}

/// 設定どおりに bind して `shutdown` が完了するまで動かす
pub async fn run(config: BrokerConfig, shutdown: impl Future<Output = ()>) -> Result<(), BrokerError> {
    let keys = Arc::new(load_or_generate_keys(&config)?);
    let listener = TcpListener::bind(config.bind_addr()).await?;
    tracing::info!(addr = %listener.local_addr()?, trust_loopback = config.trust_loopback, "broker listening");

    let broker = Broker::new(keys, config.trust_loopback, config.max_frame_len);
    serve(listener, broker, config.read_buffer_len, shutdown).await
}

/// bind 済みのリスナーで broker を動かす
///
/// `shutdown` が完了すると全接続を閉じて戻る。
pub async fn serve(
    listener: TcpListener,
    mut broker: Broker,
    read_buffer_len: usize,
    shutdown: impl Future<Output = ()>,
) -> Result<(), BrokerError> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ConnEvent>();
    let mut handles: HashMap<ConnId, ConnHandle> = HashMap::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!(connections = handles.len(), "shutting down");
                break;
            }

            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(%peer, error = %e, "set_nodelay failed");
                }

                let (conn, actions) = broker.on_connect(peer);
                let (read_half, write_half) = stream.into_split();
                let (outbound, outbound_rx) = mpsc::unbounded_channel();

                let reader = tokio::spawn(read_loop(conn, read_half, read_buffer_len, event_tx.clone()));
                tokio::spawn(write_loop(conn, write_half, outbound_rx, event_tx.clone()));
                handles.insert(conn, ConnHandle { outbound, reader });

                apply_actions(&mut handles, actions);
            }

            Some(event) = event_rx.recv() => {
                let actions = match event {
                    ConnEvent::Received { conn, bytes } => broker.on_receive(conn, &bytes),
                    ConnEvent::Closed { conn } => {
                        broker.on_close(conn);
                        vec![BrokerAction::Close { conn }]
                    }
                };
                apply_actions(&mut handles, actions);
            }
        }
    }

    for (_, handle) in handles.drain() {
        handle.reader.abort();
    }
    Ok(())
}

fn apply_actions(handles: &mut HashMap<ConnId, ConnHandle>, actions: Vec<BrokerAction>) {
    for action in actions {
        match action {
            BrokerAction::Send { conn, bytes } => {
                let Some(handle) = handles.get(&conn) else {
                    continue;
                };
                if handle.outbound.send(bytes).is_err() {
                    tracing::debug!(%conn, "writer already gone");
                }
            }
            BrokerAction::Close { conn } => {
                // 送信キューを閉じると writer は残りを書き切ってから終了する
                if let Some(handle) = handles.remove(&conn) {
                    handle.reader.abort();
                }
            }
        }
    }
}

async fn read_loop(
    conn: ConnId,
    mut reader: OwnedReadHalf,
    read_buffer_len: usize,
    events: mpsc::UnboundedSender<ConnEvent>,
) {
    let mut buf = vec![0u8; read_buffer_len.max(1)];
    loop {
        match reader.read(&mut buf).await {
            Ok(n) => {
                let bytes = buf[..n].to_vec();
                if events.send(ConnEvent::Received { conn, bytes }).is_err() || n == 0 {
                    return;
                }
            }
            Err(e) => {
                tracing::debug!(%conn, error = %e, "read failed");
                let _ = events.send(ConnEvent::Closed { conn });
                return;
            }
        }
    }
}

async fn write_loop(
    conn: ConnId,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::UnboundedSender<ConnEvent>,
) {
    while let Some(bytes) = outbound.recv().await {
        if let Err(e) = writer.write_all(&bytes).await {
            tracing::debug!(%conn, error = %e, "write failed");
            let _ = events.send(ConnEvent::Closed { conn });
            return;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::net::SocketAddr;
    use std::sync::OnceLock;
    use std::time::Duration;
    use synbus_proto::{ClientInfo, Envelope, Message};
    use synbus_transport::{encode_frame, FrameDecoder, DEFAULT_MAX_FRAME_LEN};
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    fn test_keys() -> Arc<ServerKeyPair> {
        static KEYS: OnceLock<Arc<ServerKeyPair>> = OnceLock::new();
        KEYS.get_or_init(|| Arc::new(ServerKeyPair::generate(1024).unwrap()))
            .clone()
    }

    #[test]
    fn test_missing_private_key_file() {
        let config = BrokerConfig {
            private_key_path: Some("/nonexistent/synbus-key.pem".into()),
            ..BrokerConfig::default()
        };
        let err = load_or_generate_keys(&config).unwrap_err();
        assert!(matches!(err, BrokerError::PrivateKey { .. }));
    }

    #[tokio::test]
    async fn test_remote_peer_receives_public_key() {
        // 127.0.0.1 でも trust_loopback=false なら暗号化ハンドシェイクが始まる
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let broker = Broker::new(test_keys(), false, DEFAULT_MAX_FRAME_LEN);

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, broker, 1024, async {
            let _ = stop_rx.await;
        }));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let expected = synbus_transport::encode_frame(test_keys().public_key_der());
        let mut got = vec![0u8; expected.len()];
        stream.read_exact(&mut got).await.unwrap();
        assert_eq!(got, expected);

        let _ = stop_tx.send(());
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_garbage_key_closes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let broker = Broker::new(test_keys(), false, DEFAULT_MAX_FRAME_LEN);

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, broker, 1024, async {
            let _ = stop_rx.await;
        }));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"garbage\r\n\r\n").await.unwrap();

        // 公開鍵を読んだ後は EOF になる
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.ends_with(b"\r\n\r\n"));

        let _ = stop_tx.send(());
        server.await.unwrap().unwrap();
    }

    /// ループバックの平文 JSON で話す最小クライアント
    struct RawClient {
        uuid: String,
        stream: TcpStream,
        decoder: FrameDecoder,
        pending: VecDeque<Vec<u8>>,
    }

    impl RawClient {
        async fn connect(addr: SocketAddr, uuid: &str) -> Self {
            let stream = TcpStream::connect(addr).await.unwrap();
            let mut client = RawClient {
                uuid: uuid.to_string(),
                stream,
                decoder: FrameDecoder::new(),
                pending: VecDeque::new(),
            };
            client.send(Envelope::Register(ClientInfo::new(uuid, "raw"))).await;
            client
        }

        async fn send(&mut self, envelope: Envelope) {
            let body = envelope.into_message().encode().unwrap();
            self.stream.write_all(&encode_frame(&body)).await.unwrap();
        }

        async fn next_message(&mut self) -> Message {
            let mut buf = [0u8; 4096];
            loop {
                if let Some(frame) = self.pending.pop_front() {
                    return Message::decode(&frame).unwrap();
                }
                let n = self.stream.read(&mut buf).await.unwrap();
                assert!(n > 0, "broker closed the connection");
                self.pending.extend(self.decoder.push(&buf[..n]));
            }
        }

        /// 自分宛ての publish が戻るまで待つ（先に送ったものは処理済み）
        async fn sync(&mut self) {
            let channel = format!("ready.{}", self.uuid);
            self.send(Envelope::Subscribe(channel.clone())).await;
            self.send(Envelope::Publish(Message::new(channel.as_str(), json!("ping")))).await;
            let message = timeout(Duration::from_secs(5), self.next_message()).await.unwrap();
            assert_eq!(message.channel, channel);
        }
    }

    #[tokio::test]
    async fn test_fan_out_survives_vanished_subscriber() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let broker = Broker::new(test_keys(), true, DEFAULT_MAX_FRAME_LEN);

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, broker, 1024, async {
            let _ = stop_rx.await;
        }));

        let mut live = RawClient::connect(addr, "live").await;
        live.send(Envelope::Subscribe("x".into())).await;
        live.sync().await;

        let mut vanished = RawClient::connect(addr, "vanished").await;
        vanished.send(Envelope::Subscribe("x".into())).await;
        vanished.sync().await;
        drop(vanished);

        let mut publisher = RawClient::connect(addr, "pub").await;
        for n in 0..3 {
            publisher.send(Envelope::Publish(Message::new("x", json!(n)))).await;
        }

        for n in 0..3 {
            let message = timeout(Duration::from_secs(5), live.next_message()).await.unwrap();
            assert_eq!(message.payload, json!(n));
        }

        let _ = stop_tx.send(());
        server.await.unwrap().unwrap();
    }

    #[test]
    fn test_generated_key_is_frameable() {
        let config = BrokerConfig {
            rsa_bits: 1024,
            ..BrokerConfig::default()
        };
        let keys = load_or_generate_keys(&config).unwrap();
        assert!(is_frameable(keys.public_key_der()));
    }
}
