//! ハンドシェイク状態機械と接続ごとの暗号化フレーミング
//!
//! バイト列を受け取り、送信すべきフレームと上位層に渡す平文を返す。
//! ソケット操作は呼び出し側（broker / client のドライバ）が担当する。

use std::collections::VecDeque;
use std::sync::Arc;

use synbus_crypto::{wrap_session_key, ServerKeyPair, SessionCipher};
use synbus_transport::{is_frameable, try_encode_frame, FrameDecoder};

use crate::error::SessionError;
use crate::ACK_CONTENT;

/// ハンドシェイクの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// 初期状態（受動側は公開鍵送信後もここに留まる）
    Unauthenticated,
    /// 能動側がラップしたセッション鍵を送った
    KeySent,
    /// 以降のフレームはセッション鍵で暗号化される
    Established,
}

/// `receive` / `start` の結果として呼び出し側が実行するアクション
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// 区切り子付きのフレームを相手に書き込む
    Transmit(Vec<u8>),
    /// 復号済みのアプリケーションフレーム本体
    Deliver(Vec<u8>),
    /// ハンドシェイクが完了した（信頼接続では `start` 直後）
    Established,
}

/// `receive` の結果
///
/// エラーが起きても、それより前のフレームから生じたアクションは失わない。
/// 呼び出し側は `actions` を実行してから接続を閉じる。
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Received {
    /// 到着順のアクション
    pub actions: Vec<SessionAction>,
    /// 接続を閉じるべきエラー（以降のフレームは処理していない）
    pub error: Option<SessionError>,
}

impl Received {
    /// アクションとエラーを `Result` にまとめる（エラー時はアクションを捨てる）
    pub fn into_result(self) -> Result<Vec<SessionAction>, SessionError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.actions),
        }
    }
}

/// 暗号文を作り直す上限（1 回あたりの失敗確率は約 2^-16）
const MAX_RESEAL_ATTEMPTS: usize = 8;

/// 接続の役割
enum Role {
    /// サーバー側: 公開鍵を送り、ラップされた鍵を受け取る
    Passive(Arc<ServerKeyPair>),
    /// クライアント側: 公開鍵を受け取り、セッション鍵を生成して返す
    Active,
}

/// 1 接続分のセキュアセッション
pub struct SecureSession {
    role: Role,
    state: HandshakeState,
    /// ループバック接続など暗号化を省略する接続
    trusted: bool,
    cipher: Option<SessionCipher>,
    decoder: FrameDecoder,
    /// 能動側でハンドシェイク完了前に積まれた平文（FIFO）
    outbox: VecDeque<Vec<u8>>,
}

impl SecureSession {
    /// サーバー側のセッションを生成する
    pub fn passive(keys: Arc<ServerKeyPair>, trusted: bool, max_frame_len: usize) -> Self {
        Self::with_role(Role::Passive(keys), trusted, max_frame_len)
    }

    /// クライアント側のセッションを生成する
    pub fn active(trusted: bool, max_frame_len: usize) -> Self {
        Self::with_role(Role::Active, trusted, max_frame_len)
    }

    fn with_role(role: Role, trusted: bool, max_frame_len: usize) -> Self {
        SecureSession {
            role,
            state: HandshakeState::Unauthenticated,
            trusted,
            cipher: None,
            decoder: FrameDecoder::with_max_frame_len(max_frame_len),
            outbox: VecDeque::new(),
        }
    }

    /// 現在のハンドシェイク状態
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// 暗号化を省略する接続か
    pub fn is_trusted(&self) -> bool {
        self.trusted
    }

    /// 送信できる状態か
    pub fn is_established(&self) -> bool {
        self.state == HandshakeState::Established
    }

    /// 接続直後に呼ぶ
    ///
    /// - 信頼接続: 即座に `Established`
    /// - 受動側: 公開鍵（DER）を平文で送る
    /// - 能動側: 何もしない（公開鍵の到着を待つ）
    ///
    /// # エラー
    /// - `SessionError::Transport`: 公開鍵 DER か積まれた平文がフレーム化できない
    pub fn start(&mut self) -> Result<Vec<SessionAction>, SessionError> {
        if self.trusted {
            self.state = HandshakeState::Established;
            let mut actions = self.flush_outbox()?;
            actions.push(SessionAction::Established);
            return Ok(actions);
        }

        match &self.role {
            Role::Passive(keys) => {
                tracing::debug!(der_len = keys.public_key_der().len(), "sending public key");
                Ok(vec![SessionAction::Transmit(try_encode_frame(keys.public_key_der())?)])
            }
            Role::Active => Ok(Vec::new()),
        }
    }

    /// 受信したバイト列を処理する
    ///
    /// フレームは到着順に処理し、最初のエラーで止める。
    /// 空フレームは読み飛ばされる。エラーはすべて接続を閉じるべきもの。
    pub fn receive(&mut self, chunk: &[u8]) -> Received {
        let frames = self.decoder.push(chunk);

        let mut received = Received::default();
        for frame in frames {
            if let Err(e) = self.handle_frame(frame, &mut received.actions) {
                received.error = Some(e);
                return received;
            }
        }
        if let Err(e) = self.decoder.check_limit() {
            received.error = Some(e.into());
        }
        received
    }

    /// 平文のアプリケーションフレームを送信用にする
    ///
    /// # 戻り値
    /// - `Ok(Some(bytes))`: そのまま書き込むフレーム
    /// - `Ok(None)`: 能動側でハンドシェイク完了待ちのため積んだ
    ///
    /// # エラー
    /// - `SessionError::NotEstablished`: 受動側でハンドシェイク未完了
    pub fn send(&mut self, plaintext: Vec<u8>) -> Result<Option<Vec<u8>>, SessionError> {
        if self.is_established() {
            return self.seal(&plaintext).map(Some);
        }
        match self.role {
            Role::Active => {
                self.outbox.push_back(plaintext);
                Ok(None)
            }
            Role::Passive(_) => Err(SessionError::NotEstablished),
        }
    }

    /// ハンドシェイク完了待ちで積まれている件数
    pub fn queued_len(&self) -> usize {
        self.outbox.len()
    }

    // ===== Private メソッド =====

    fn handle_frame(&mut self, frame: Vec<u8>, actions: &mut Vec<SessionAction>) -> Result<(), SessionError> {
        match self.state {
            HandshakeState::Established => {
                let body = match &self.cipher {
                    Some(cipher) if !self.trusted => cipher.decrypt(&frame)?,
                    _ => frame,
                };
                actions.push(SessionAction::Deliver(body));
            }

            HandshakeState::Unauthenticated => match &self.role {
                // 受動側: 最初のフレームはラップされたセッション鍵
                Role::Passive(keys) => {
                    let cipher = keys.unwrap_session_key(&frame)?;
                    let ack = frame_fresh(|| Ok(cipher.encrypt(ACK_CONTENT)))?;
                    self.cipher = Some(cipher);
                    self.state = HandshakeState::Established;
                    tracing::debug!("session key installed");
                    actions.push(SessionAction::Transmit(ack));
                    actions.push(SessionAction::Established);
                }
                // 能動側: 最初のフレームは相手の公開鍵
                Role::Active => {
                    let cipher = SessionCipher::generate();
                    // OAEP は乱択なのでラップし直せば別のバイト列になる
                    let wrapped = frame_fresh(|| Ok(wrap_session_key(&frame, &cipher)?))?;
                    self.cipher = Some(cipher);
                    self.state = HandshakeState::KeySent;
                    tracing::debug!(frame_len = wrapped.len(), "session key sent");
                    actions.push(SessionAction::Transmit(wrapped));
                }
            },

            // 能動側: ACK の到着のみが意味を持つ（内容は見ない）
            HandshakeState::KeySent => {
                if matches!(self.role, Role::Passive(_)) {
                    return Err(SessionError::ProtocolViolation("passive session in key-sent state"));
                }
                self.state = HandshakeState::Established;
                tracing::debug!(queued = self.outbox.len(), "handshake acknowledged");
                let flushed = self.flush_outbox()?;
                actions.extend(flushed);
                actions.push(SessionAction::Established);
            }
        }
        Ok(())
    }

    /// 積まれていた平文を送信順のまま暗号化して吐き出す
    fn flush_outbox(&mut self) -> Result<Vec<SessionAction>, SessionError> {
        let queued: Vec<Vec<u8>> = self.outbox.drain(..).collect();
        queued
            .iter()
            .map(|plaintext| self.seal(plaintext).map(SessionAction::Transmit))
            .collect()
    }

    /// Established 後の送信フレームを作る
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, SessionError> {
        match &self.cipher {
            Some(cipher) if !self.trusted => frame_fresh(|| Ok(cipher.encrypt(plaintext))),
            _ => Ok(try_encode_frame(plaintext)?),
        }
    }
}

/// フレーム化できる本体が出るまで `make` を呼び直す
///
/// `make` は呼ぶたびに新しい乱数（IV / OAEP シード）で本体を作ること。
fn frame_fresh(mut make: impl FnMut() -> Result<Vec<u8>, SessionError>) -> Result<Vec<u8>, SessionError> {
    let mut body = make()?;
    for _ in 1..MAX_RESEAL_ATTEMPTS {
        if is_frameable(&body) {
            break;
        }
        tracing::trace!(len = body.len(), "body collides with delimiter, resealing");
        body = make()?;
    }
    Ok(try_encode_frame(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;
    use synbus_crypto::CryptoError;
    use synbus_transport::{TransportError, DEFAULT_MAX_FRAME_LEN, FRAME_DELIMITER};

    /// 1024 ビット鍵はテスト専用（生成コストを抑える）
    fn test_keys() -> Arc<ServerKeyPair> {
        static KEYS: OnceLock<Arc<ServerKeyPair>> = OnceLock::new();
        KEYS.get_or_init(|| Arc::new(ServerKeyPair::generate(1024).unwrap()))
            .clone()
    }

    fn transmitted(actions: &[SessionAction]) -> Vec<Vec<u8>> {
        actions
            .iter()
            .filter_map(|a| match a {
                SessionAction::Transmit(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    fn delivered(actions: &[SessionAction]) -> Vec<Vec<u8>> {
        actions
            .iter()
            .filter_map(|a| match a {
                SessionAction::Deliver(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    /// 片側のアクションを相手側に流し込む
    fn pump(actions: &[SessionAction], peer: &mut SecureSession) -> Vec<SessionAction> {
        let mut out = Vec::new();
        for bytes in transmitted(actions) {
            out.extend(peer.receive(&bytes).into_result().unwrap());
        }
        out
    }

    fn handshake() -> (SecureSession, SecureSession) {
        let mut server = SecureSession::passive(test_keys(), false, DEFAULT_MAX_FRAME_LEN);
        let mut client = SecureSession::active(false, DEFAULT_MAX_FRAME_LEN);

        assert!(client.start().unwrap().is_empty());
        let hello = server.start().unwrap();
        let key_frame = pump(&hello, &mut client);
        assert_eq!(client.state(), HandshakeState::KeySent);
        let ack = pump(&key_frame, &mut server);
        assert_eq!(server.state(), HandshakeState::Established);
        let done = pump(&ack, &mut client);
        assert_eq!(client.state(), HandshakeState::Established);
        assert_eq!(done.last(), Some(&SessionAction::Established));

        (server, client)
    }

    #[test]
    fn test_full_handshake_and_exchange() {
        let (mut server, mut client) = handshake();

        let frame = client.send(b"{\"channel\":\"a\"}".to_vec()).unwrap().unwrap();
        // 暗号化されている
        assert!(!frame.windows(3).any(|w| w == b"\"a\""));
        let got = server.receive(&frame).into_result().unwrap();
        assert_eq!(delivered(&got), vec![b"{\"channel\":\"a\"}".to_vec()]);

        let frame = server.send(b"back".to_vec()).unwrap().unwrap();
        let got = client.receive(&frame).into_result().unwrap();
        assert_eq!(delivered(&got), vec![b"back".to_vec()]);
    }

    #[test]
    fn test_server_start_sends_public_key_in_plaintext() {
        let keys = test_keys();
        let mut server = SecureSession::passive(keys.clone(), false, DEFAULT_MAX_FRAME_LEN);
        let actions = server.start().unwrap();
        let mut expected = keys.public_key_der().to_vec();
        expected.extend_from_slice(FRAME_DELIMITER);
        assert_eq!(actions, vec![SessionAction::Transmit(expected)]);
        assert_eq!(server.state(), HandshakeState::Unauthenticated);
    }

    #[test]
    fn test_queued_sends_flushed_in_order_encrypted() {
        let mut server = SecureSession::passive(test_keys(), false, DEFAULT_MAX_FRAME_LEN);
        let mut client = SecureSession::active(false, DEFAULT_MAX_FRAME_LEN);

        // ハンドシェイク前の送信は積まれる
        assert_eq!(client.send(b"first".to_vec()).unwrap(), None);
        assert_eq!(client.send(b"second".to_vec()).unwrap(), None);
        assert_eq!(client.queued_len(), 2);

        let hello = server.start().unwrap();
        let key_frame = pump(&hello, &mut client);
        // KeySent 中もまだ積まれる
        assert_eq!(client.send(b"third".to_vec()).unwrap(), None);
        let ack = pump(&key_frame, &mut server);
        let flushed = pump(&ack, &mut client);

        assert_eq!(client.queued_len(), 0);
        let frames = transmitted(&flushed);
        assert_eq!(frames.len(), 3);
        for frame in &frames {
            assert!(!frame.windows(5).any(|w| w == b"first" || w == b"third"));
        }

        let mut bodies = Vec::new();
        for frame in frames {
            bodies.extend(delivered(&server.receive(&frame).into_result().unwrap()));
        }
        assert_eq!(bodies, vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]);
    }

    #[test]
    fn test_flush_precedes_established() {
        let mut server = SecureSession::passive(test_keys(), false, DEFAULT_MAX_FRAME_LEN);
        let mut client = SecureSession::active(false, DEFAULT_MAX_FRAME_LEN);
        client.send(b"queued".to_vec()).unwrap();

        let hello = server.start().unwrap();
        let key_frame = pump(&hello, &mut client);
        let ack = pump(&key_frame, &mut server);
        let flushed = pump(&ack, &mut client);

        assert!(matches!(flushed[0], SessionAction::Transmit(_)));
        assert_eq!(flushed[1], SessionAction::Established);
    }

    #[test]
    fn test_trusted_session_is_plaintext() {
        let mut server = SecureSession::passive(test_keys(), true, DEFAULT_MAX_FRAME_LEN);
        let mut client = SecureSession::active(true, DEFAULT_MAX_FRAME_LEN);

        assert_eq!(server.start().unwrap(), vec![SessionAction::Established]);
        assert_eq!(client.start().unwrap(), vec![SessionAction::Established]);

        let frame = client.send(b"plain".to_vec()).unwrap().unwrap();
        assert_eq!(frame, b"plain\r\n\r\n".to_vec());
        let got = server.receive(&frame).into_result().unwrap();
        assert_eq!(delivered(&got), vec![b"plain".to_vec()]);
    }

    #[test]
    fn test_trusted_active_flushes_queue_on_start() {
        let mut client = SecureSession::active(true, DEFAULT_MAX_FRAME_LEN);
        client.send(b"early".to_vec()).unwrap();
        let actions = client.start().unwrap();
        assert_eq!(
            actions,
            vec![
                SessionAction::Transmit(b"early\r\n\r\n".to_vec()),
                SessionAction::Established
            ]
        );
    }

    #[test]
    fn test_passive_send_before_established_fails() {
        let mut server = SecureSession::passive(test_keys(), false, DEFAULT_MAX_FRAME_LEN);
        server.start().unwrap();
        let err = server.send(b"too early".to_vec()).unwrap_err();
        assert_eq!(err, SessionError::NotEstablished);
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_bad_wrapped_key_is_fatal() {
        let mut server = SecureSession::passive(test_keys(), false, DEFAULT_MAX_FRAME_LEN);
        server.start().unwrap();
        let err = server.receive(b"not a wrapped key\r\n\r\n").into_result().unwrap_err();
        assert_eq!(err, SessionError::Crypto(CryptoError::KeyUnwrapFailed));
        assert!(err.is_fatal());
        assert_eq!(server.state(), HandshakeState::Unauthenticated);
    }

    #[test]
    fn test_bad_public_key_is_fatal() {
        let mut client = SecureSession::active(false, DEFAULT_MAX_FRAME_LEN);
        let err = client.receive(b"garbage key\r\n\r\n").into_result().unwrap_err();
        assert!(matches!(err, SessionError::Crypto(CryptoError::InvalidPublicKey(_))));
    }

    #[test]
    fn test_garbage_after_established_is_fatal() {
        let (mut server, _client) = handshake();
        // IV + 17 バイトの暗号文（ブロック長の倍数でない）
        let err = server.receive(b"0123456789abcdef0123456789abcdefX\r\n\r\n").into_result().unwrap_err();
        assert_eq!(err, SessionError::Crypto(CryptoError::MisalignedCiphertext(17)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_frames_split_across_reads() {
        let (mut server, mut client) = handshake();
        let frame = client.send(b"split me".to_vec()).unwrap().unwrap();

        let (head, tail) = frame.split_at(frame.len() / 2);
        assert!(server.receive(head).into_result().unwrap().is_empty());
        let got = server.receive(tail).into_result().unwrap();
        assert_eq!(delivered(&got), vec![b"split me".to_vec()]);
    }

    #[test]
    fn test_oversized_frame_is_fatal() {
        let mut server = SecureSession::passive(test_keys(), true, 8);
        server.start().unwrap();
        let err = server.receive(b"0123456789").into_result().unwrap_err();
        assert!(matches!(err, SessionError::Transport(TransportError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_frames_before_failure_are_kept() {
        let (mut server, mut client) = handshake();
        let mut chunk = client.send(b"good".to_vec()).unwrap().unwrap();
        chunk.extend_from_slice(b"0123456789abcdef0123456789abcdefX\r\n\r\n");
        chunk.extend(client.send(b"after".to_vec()).unwrap().unwrap());

        let received = server.receive(&chunk);
        assert_eq!(delivered(&received.actions), vec![b"good".to_vec()]);
        assert_eq!(received.error, Some(SessionError::Crypto(CryptoError::MisalignedCiphertext(17))));
    }

    #[test]
    fn test_frames_before_oversized_tail_are_kept() {
        let mut server = SecureSession::passive(test_keys(), true, 8);
        server.start().unwrap();
        let received = server.receive(b"ok\r\n\r\n0123456789");
        assert_eq!(delivered(&received.actions), vec![b"ok".to_vec()]);
        assert!(matches!(
            received.error,
            Some(SessionError::Transport(TransportError::FrameTooLarge { .. }))
        ));
    }

    #[test]
    fn test_reseal_when_body_ends_in_crlf() {
        let mut bodies = vec![b"iv-and-ct\r\n".to_vec(), b"iv-and-ct".to_vec()].into_iter();
        let frame = frame_fresh(|| Ok(bodies.next().unwrap())).unwrap();
        assert_eq!(frame, b"iv-and-ct\r\n\r\n".to_vec());
        assert!(bodies.next().is_none());
    }

    #[test]
    fn test_reseal_gives_up_eventually() {
        let err = frame_fresh(|| Ok(b"a\r\n\r\nb".to_vec())).unwrap_err();
        assert_eq!(err, SessionError::Transport(TransportError::Unframeable { len: 7 }));
    }

    #[test]
    fn test_sealed_frames_always_decode() {
        // 区切り子と衝突する暗号文は送られない
        let (mut server, mut client) = handshake();
        let mut stream = Vec::new();
        let mut expected = Vec::new();
        for i in 0..2000u32 {
            let body = i.to_be_bytes().to_vec();
            stream.extend(client.send(body.clone()).unwrap().unwrap());
            expected.push(body);
        }
        let got = server.receive(&stream).into_result().unwrap();
        assert_eq!(delivered(&got), expected);
    }

    #[test]
    fn test_trusted_unframeable_plaintext_rejected() {
        let mut client = SecureSession::active(true, DEFAULT_MAX_FRAME_LEN);
        client.start().unwrap();
        let err = client.send(b"line\r\n".to_vec()).unwrap_err();
        assert!(matches!(err, SessionError::Transport(TransportError::Unframeable { .. })));
    }
}
