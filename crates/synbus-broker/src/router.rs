//! broker のコア状態機械
//!
//! 接続の受け付け・受信・切断イベントを受け取り、書き込み／切断アクションを返す。
//! Client Registry と各接続の購読集合はこの構造体だけが変更する。
//!
//! ## publish の fan-out
//!
//! ```text
//! jobs.run を publish
//!   → 候補 [jobs.run, jobs.*, *]
//!   → 登録済みの各接続で最初に購読している候補を探す
//!   → 完全一致ならそのまま、ワイルドカードなら matched_channel 付きで送信
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use synbus_crypto::ServerKeyPair;
use synbus_proto::channel::wildcard_candidates;
use synbus_proto::{ClientInfo, Envelope, Message};
use synbus_session::{SecureSession, SessionAction};

use crate::registry::{ClientRegistry, ConnId};
use crate::subscriptions::SubscriptionSet;

/// ドライバが実行するアクション
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerAction {
    /// フレーム（区切り子付き）を接続に書き込む
    Send { conn: ConnId, bytes: Vec<u8> },
    /// 接続を閉じる（先行する Send は書き込んでから）
    Close { conn: ConnId },
}

/// 1 接続分の状態
struct Connection {
    peer: SocketAddr,
    session: SecureSession,
    subscriptions: SubscriptionSet,
    info: Option<ClientInfo>,
}

/// broker 本体
pub struct Broker {
    keys: Arc<ServerKeyPair>,
    trust_loopback: bool,
    max_frame_len: usize,
    next_conn: u64,
    connections: HashMap<ConnId, Connection>,
    registry: ClientRegistry,
}

impl Broker {
    /// broker を生成する
    ///
    /// # 引数
    /// - `keys`: ハンドシェイクで使うサーバー鍵ペア
    /// - `trust_loopback`: ループバック接続の暗号化を省略するか
    /// - `max_frame_len`: 接続ごとの未完成フレーム上限
    pub fn new(keys: Arc<ServerKeyPair>, trust_loopback: bool, max_frame_len: usize) -> Self {
        Broker {
            keys,
            trust_loopback,
            max_frame_len,
            next_conn: 1,
            connections: HashMap::new(),
            registry: ClientRegistry::new(),
        }
    }

    /// 新しい接続を受け付ける
    ///
    /// 暗号化する接続なら公開鍵の送信アクションを返す。
    pub fn on_connect(&mut self, peer: SocketAddr) -> (ConnId, Vec<BrokerAction>) {
        let conn = ConnId(self.next_conn);
        self.next_conn += 1;

        let trusted = self.trust_loopback && peer.ip().is_loopback();
        let mut session = SecureSession::passive(self.keys.clone(), trusted, self.max_frame_len);
        let started = match session.start() {
            Ok(actions) => actions,
            Err(e) => {
                tracing::warn!(%conn, %peer, error = %e, "refusing connection");
                return (conn, vec![BrokerAction::Close { conn }]);
            }
        };

        tracing::info!(%conn, %peer, trusted, "client connected");
        self.connections.insert(
            conn,
            Connection {
                peer,
                session,
                subscriptions: SubscriptionSet::new(),
                info: None,
            },
        );

        let mut actions = Vec::new();
        self.apply_session_actions(conn, started, &mut actions);
        (conn, actions)
    }

    /// 接続から読んだバイト列を処理する
    ///
    /// 空のバイト列は相手の切断を意味し、接続を破棄する。
    pub fn on_receive(&mut self, conn: ConnId, bytes: &[u8]) -> Vec<BrokerAction> {
        if bytes.is_empty() {
            self.on_close(conn);
            return vec![BrokerAction::Close { conn }];
        }

        let Some(connection) = self.connections.get_mut(&conn) else {
            tracing::debug!(%conn, "data for unknown connection");
            return Vec::new();
        };

        let peer = connection.peer;
        let received = connection.session.receive(bytes);

        // エラーより前に届いたフレームは処理してから閉じる
        let mut actions = Vec::new();
        self.apply_session_actions(conn, received.actions, &mut actions);
        if let Some(e) = received.error {
            // 復号後のメッセージで既に閉じている場合もある
            if self.on_close(conn) {
                tracing::warn!(%conn, %peer, error = %e, "closing connection");
                actions.push(BrokerAction::Close { conn });
            }
        }
        actions
    }

    /// 接続を破棄する（Client Registry からも外す）
    ///
    /// # 戻り値
    /// 接続が存在した場合 `true`
    pub fn on_close(&mut self, conn: ConnId) -> bool {
        let Some(connection) = self.connections.remove(&conn) else {
            return false;
        };

        if let Some(info) = &connection.info {
            if self.registry.unregister(&info.uuid, conn) {
                tracing::info!(%conn, uuid = %info.uuid, name = %info.name, "client unregistered");
            }
        }
        tracing::info!(%conn, peer = %connection.peer, "client disconnected");
        true
    }

    /// 接続数
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Client Registry
    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// 接続の購読集合
    pub fn subscriptions(&self, conn: ConnId) -> Option<&SubscriptionSet> {
        self.connections.get(&conn).map(|c| &c.subscriptions)
    }

    /// 接続が登録した識別情報
    pub fn client_info(&self, conn: ConnId) -> Option<&ClientInfo> {
        self.connections.get(&conn).and_then(|c| c.info.as_ref())
    }

    // ===== Private メソッド =====

    fn apply_session_actions(&mut self, conn: ConnId, session_actions: Vec<SessionAction>, actions: &mut Vec<BrokerAction>) {
        for action in session_actions {
            match action {
                SessionAction::Transmit(bytes) => actions.push(BrokerAction::Send { conn, bytes }),
                SessionAction::Established => tracing::debug!(%conn, "session established"),
                SessionAction::Deliver(body) => {
                    if !self.handle_body(conn, &body, actions) {
                        // 以降のフレームは処理しない
                        self.on_close(conn);
                        actions.push(BrokerAction::Close { conn });
                        return;
                    }
                }
            }
        }
    }

    /// 復号済みフレームを処理する。接続を閉じるべきなら `false`
    fn handle_body(&mut self, conn: ConnId, body: &[u8], actions: &mut Vec<BrokerAction>) -> bool {
        let envelope = match Envelope::decode(body) {
            Ok(envelope) => envelope,
            Err(e) if e.is_fatal() => {
                tracing::warn!(%conn, error = %e, "malformed message");
                return false;
            }
            Err(e) => {
                tracing::debug!(%conn, error = %e, "skipping message");
                return true;
            }
        };

        match envelope {
            Envelope::Register(info) => self.register(conn, info),
            Envelope::Subscribe(pattern) => {
                if let Some(connection) = self.connections.get_mut(&conn) {
                    tracing::debug!(%conn, %pattern, "subscribe");
                    connection.subscriptions.subscribe(pattern);
                }
            }
            Envelope::Unsubscribe(pattern) => {
                if let Some(connection) = self.connections.get_mut(&conn) {
                    tracing::debug!(%conn, %pattern, "unsubscribe");
                    connection.subscriptions.unsubscribe(&pattern);
                }
            }
            Envelope::Publish(message) => self.publish(&message, actions),
        }
        true
    }

    fn register(&mut self, conn: ConnId, info: ClientInfo) {
        let Some(connection) = self.connections.get_mut(&conn) else {
            return;
        };

        // 同じ接続が別の UUID で登録し直した場合は古い対応を外す
        if let Some(previous) = connection.info.take() {
            if previous.uuid != info.uuid {
                self.registry.unregister(&previous.uuid, conn);
            }
        }

        if let Some(replaced) = self.registry.register(info.uuid.clone(), conn) {
            tracing::info!(%conn, %replaced, uuid = %info.uuid, "registration replaced");
        }
        tracing::info!(%conn, uuid = %info.uuid, name = %info.name, "client registered");
        connection.info = Some(info);
    }

    /// 登録済みの全接続へ fan-out する
    ///
    /// 送信失敗はログに残して残りの購読者への配送を続ける。
    fn publish(&mut self, message: &Message, actions: &mut Vec<BrokerAction>) {
        let candidates = wildcard_candidates(&message.channel);
        // パターンごとにエンコード結果を使い回す
        let mut encoded: HashMap<String, Vec<u8>> = HashMap::new();

        let targets: Vec<ConnId> = self.registry.connections().collect();
        for target in targets {
            let Some(connection) = self.connections.get_mut(&target) else {
                continue;
            };
            let Some(pattern) = connection.subscriptions.find_match(&candidates) else {
                continue;
            };

            if !encoded.contains_key(pattern) {
                let annotated = if pattern == message.channel {
                    message.encode()
                } else {
                    message.with_match(pattern).encode()
                };
                match annotated {
                    Ok(bytes) => {
                        encoded.insert(pattern.to_string(), bytes);
                    }
                    Err(e) => {
                        tracing::warn!(channel = %message.channel, error = %e, "failed to encode message");
                        return;
                    }
                }
            }
            let Some(plaintext) = encoded.get(pattern) else {
                continue;
            };

            match connection.session.send(plaintext.clone()) {
                Ok(Some(bytes)) => actions.push(BrokerAction::Send { conn: target, bytes }),
                Ok(None) => {}
                Err(e) => tracing::warn!(conn = %target, error = %e, "lost a client"),
            }
        }

        tracing::trace!(channel = %message.channel, msg_id = %message.msg_id, "published");
    }
}
