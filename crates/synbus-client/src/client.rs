//! クライアント側の状態機械
//!
//! 送信すべきフレームは内部に溜め、ドライバが `take_outgoing` で取り出して書き込む。
//! ハンドシェイク完了前の送信はセッション層で積まれ、完了時に順番どおり送られる。

use serde_json::Value;
use synbus_proto::channel;
use synbus_proto::{ClientInfo, Envelope, Message};
use synbus_session::{SecureSession, SessionAction};

use crate::error::ClientError;
use crate::subscriptions::{Dispatch, Handler, Limit, LocalSubscriptions};

/// broker との 1 接続分のクライアント状態
pub struct ClientSession {
    info: ClientInfo,
    session: SecureSession,
    subscriptions: LocalSubscriptions,
    registered: bool,
    outgoing: Vec<Vec<u8>>,
}

impl ClientSession {
    /// # 引数
    /// - `info`: register で送る識別情報
    /// - `trusted`: ハンドシェイクを省略する（ループバック）
    /// - `max_frame_len`: 未完成フレームの上限
    pub fn new(info: ClientInfo, trusted: bool, max_frame_len: usize) -> Self {
        ClientSession {
            info,
            session: SecureSession::active(trusted, max_frame_len),
            subscriptions: LocalSubscriptions::new(),
            registered: false,
            outgoing: Vec::new(),
        }
    }

    /// 接続直後に呼ぶ（信頼接続なら即座に register を送る）
    pub fn on_connect(&mut self) -> Result<(), ClientError> {
        let actions = self.session.start()?;
        self.apply(actions)
    }

    /// broker から読んだバイト列を処理する
    ///
    /// 購読ハンドラはこの中から呼ばれる。
    ///
    /// # エラー
    /// - `ClientError::Disconnected`: 空のバイト列（broker の切断）
    /// - `ClientError::Session`: ハンドシェイク・復号の失敗
    /// - `ClientError::Proto`: JSON として壊れたメッセージ
    ///
    /// いずれも接続を閉じるべきエラー。エラーより前に届いたメッセージは配送済み。
    pub fn on_receive(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        if bytes.is_empty() {
            return Err(ClientError::Disconnected);
        }
        let received = self.session.receive(bytes);
        self.apply(received.actions)?;
        match received.error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// チャンネル（ワイルドカード可）を購読する
    ///
    /// `limit` 回配送されると自動的に購読解除する（0 = 無制限）。
    pub fn subscribe(&mut self, pattern: &str, handler: Handler, limit: Limit) -> Result<(), ClientError> {
        channel::validate(pattern)?;
        if self.subscriptions.insert(pattern, handler, limit) {
            tracing::debug!(%pattern, "subscription replaced");
        }
        self.send_envelope(Envelope::Subscribe(pattern.to_string()))
    }

    /// 購読を解除する
    ///
    /// # エラー
    /// - `ClientError::NotSubscribed`: ローカルに購読していない（何も送らない）
    pub fn unsubscribe(&mut self, pattern: &str) -> Result<(), ClientError> {
        if !self.subscriptions.remove(pattern) {
            return Err(ClientError::NotSubscribed(pattern.to_string()));
        }
        self.send_envelope(Envelope::Unsubscribe(pattern.to_string()))
    }

    /// publish する
    ///
    /// # 戻り値
    /// 生成した msg_id
    pub fn publish(&mut self, channel: &str, payload: Value) -> Result<String, ClientError> {
        channel::validate(channel)?;
        let message = Message::new(channel, payload);
        let msg_id = message.msg_id.clone();
        self.send_envelope(Envelope::Publish(message))?;
        Ok(msg_id)
    }

    /// リプライを 1 回だけ受け取る publish
    ///
    /// `__<msg_id>` への一回限りの購読を送ってから publish する。
    pub fn request(&mut self, channel: &str, payload: Value, on_reply: Handler) -> Result<String, ClientError> {
        channel::validate(channel)?;
        let message = Message::new(channel, payload);
        let msg_id = message.msg_id.clone();

        self.subscribe(&message.reply_channel(), on_reply, 1)?;
        self.send_envelope(Envelope::Publish(message))?;
        Ok(msg_id)
    }

    /// `msg_id` のリクエストに応答する
    pub fn respond(&mut self, msg_id: &str, payload: Value) -> Result<String, ClientError> {
        self.publish(&channel::reply_channel(msg_id), payload)
    }

    /// 書き込み待ちのフレームを取り出す
    pub fn take_outgoing(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outgoing)
    }

    /// ハンドシェイクが完了したか
    pub fn is_established(&self) -> bool {
        self.session.is_established()
    }

    /// register を送ったか
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn info(&self) -> &ClientInfo {
        &self.info
    }

    pub fn subscriptions(&self) -> &LocalSubscriptions {
        &self.subscriptions
    }

    // ===== Private メソッド =====

    fn apply(&mut self, actions: Vec<SessionAction>) -> Result<(), ClientError> {
        for action in actions {
            match action {
                SessionAction::Transmit(bytes) => self.outgoing.push(bytes),
                SessionAction::Established => {
                    tracing::debug!(uuid = %self.info.uuid, "session established, registering");
                    self.registered = true;
                    self.send_envelope(Envelope::Register(self.info.clone()))?;
                }
                SessionAction::Deliver(body) => self.deliver(&body)?,
            }
        }
        Ok(())
    }

    fn deliver(&mut self, body: &[u8]) -> Result<(), ClientError> {
        let message = match Message::decode(body) {
            Ok(message) => message,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                tracing::debug!(error = %e, "skipping message");
                return Ok(());
            }
        };

        match self.subscriptions.dispatch(&message) {
            Dispatch::Delivered => Ok(()),
            Dispatch::NoSubscriber => {
                tracing::debug!(channel = %message.dispatch_channel(), "no local subscriber");
                Ok(())
            }
            // 上限に達したので broker 側の購読も外す
            Dispatch::Exhausted(pattern) => self.send_envelope(Envelope::Unsubscribe(pattern)),
        }
    }

    fn send_envelope(&mut self, envelope: Envelope) -> Result<(), ClientError> {
        let message = envelope.into_message();
        let plaintext = message.encode()?;
        if let Some(frame) = self.session.send(plaintext)? {
            self.outgoing.push(frame);
        }
        Ok(())
    }
}
