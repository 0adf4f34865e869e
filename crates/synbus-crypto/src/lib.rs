//! # synbus-crypto
//!
//! synbus の接続ごとのセッション暗号とセッション鍵の受け渡しを実装するクレート。
//!
//! ## 暗号化仕様
//!
//! ```text
//! 暗号化フレーム本体（区切り子の前）:
//!   [iv: 16bytes][AES-128-CBC ciphertext: 16 の倍数]
//!
//! パディング: PKCS#7（最終バイトがパディング長を表す）
//!
//! セッション鍵（16バイト）の受け渡し:
//!   受動側が RSA 公開鍵 (DER) を送り、能動側が RSA-OAEP(SHA-256) で
//!   ラップした鍵を返す
//! ```

mod error;
mod keywrap;
mod session;

pub use error::{CryptoError, CryptoResult};
pub use keywrap::{wrap_session_key, ServerKeyPair, DEFAULT_RSA_BITS};
pub use session::SessionCipher;

/// セッション鍵の長さ（AES-128）
pub const KEY_LEN: usize = 16;

/// AES のブロック長 = IV の長さ
pub const BLOCK_LEN: usize = 16;

/// 暗号論的に安全な乱数バイト列を生成する
pub fn random_bytes<const N: usize>() -> [u8; N] {
    use rand::RngCore;
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}
