//! 暗号エラー型

use thiserror::Error;

/// 暗号操作のエラー
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// 鍵の長さが不正（16バイト以外）
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// 期待するバイト数
        expected: usize,
        /// 実際のバイト数
        actual: usize,
    },
    /// フレームが IV + 1 ブロックより短い
    #[error("Encrypted frame too short: {0} bytes")]
    FrameTooShort(usize),
    /// 暗号文がブロック長の倍数でない
    #[error("Ciphertext length {0} is not a multiple of the block size")]
    MisalignedCiphertext(usize),
    /// パディング検証に失敗（鍵違い・改ざん・破損）
    #[error("Invalid padding after decryption")]
    BadPadding,
    /// 公開鍵のフォーマットが不正
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
    /// 秘密鍵のフォーマットが不正
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),
    /// RSA 鍵生成に失敗
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),
    /// セッション鍵の暗号化（RSA-OAEP）に失敗
    #[error("Session key wrap failed")]
    KeyWrapFailed,
    /// セッション鍵の復号（RSA-OAEP）に失敗
    #[error("Session key unwrap failed")]
    KeyUnwrapFailed,
}

/// 暗号操作の Result 型
pub type CryptoResult<T> = Result<T, CryptoError>;
