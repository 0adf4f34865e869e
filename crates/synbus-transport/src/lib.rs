//! # synbus-transport
//!
//! TCP バイトストリームのフレーミング層。
//!
//! TCP の read 境界はフレーム境界とは無関係なので、受信したバイト列を
//! 区切り子で分割し、末尾の未完成部分は次の read まで保持する。
//!
//! ## フレームの Wire Format
//!
//! ```text
//! [frame body: variable][\r\n\r\n]
//!
//! frame body:
//!   ハンドシェイク中 = 公開鍵 DER / ラップ済みセッション鍵 / ack
//!   確立後           = [iv: 16bytes][AES-128-CBC ciphertext]
//!   ループバック     = JSON メッセージ（平文）
//! ```

pub mod error;
pub mod frame;

pub use error::TransportError;
pub use frame::{encode_frame, is_frameable, try_encode_frame, FrameDecoder, DEFAULT_MAX_FRAME_LEN, FRAME_DELIMITER};
