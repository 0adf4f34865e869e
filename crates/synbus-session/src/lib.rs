//! # synbus-session
//!
//! 接続ごとのハンドシェイク状態機械。
//!
//! ## ハンドシェイク
//!
//! ```text
//! 受動側 (broker)                         能動側 (client)
//!   Unauthenticated                         Unauthenticated
//!     ── 公開鍵 DER (平文) ──────────────▶
//!                                           KeySent
//!     ◀──────── RSA-OAEP(セッション鍵) ──
//!   Established
//!     ── AES("hello") ───────────────────▶
//!                                           Established（積んだ送信を flush）
//! ```
//!
//! ループバックなど信頼する接続ではハンドシェイクを省略し、
//! `start` 直後から平文フレームで通信する。
//!
//! 状態機械は I/O を行わない。`start` / `receive` が返す
//! [`SessionAction`] を呼び出し側が実行する。

mod error;
mod session;

pub use error::SessionError;
pub use session::{HandshakeState, Received, SecureSession, SessionAction};

/// 受動側が鍵を受け取った後に返す ACK の内容（能動側は中身を見ない）
pub const ACK_CONTENT: &[u8] = b"hello";
