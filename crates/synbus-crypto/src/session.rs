//! AES-128-CBC セッション暗号実装
//!
//! ハンドシェイクで確立したセッション鍵で、フレーム単位の暗号化/復号を行う。

use aes::Aes128;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::error::{CryptoError, CryptoResult};
use crate::{BLOCK_LEN, KEY_LEN};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// AES-128-CBC セッション暗号
///
/// 接続ごとに 1 つ生成され、ハンドシェイク完了後のすべてのフレームに使われる。
/// IV はフレームごとに新しく生成するので、同じ平文でも暗号文は毎回異なる。
#[derive(Clone)]
pub struct SessionCipher {
    key: [u8; KEY_LEN],
}

impl SessionCipher {
    /// 16 バイトの raw 鍵からセッション暗号を作る
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        SessionCipher { key }
    }

    /// 任意長のスライスから作る（RSA で受け取った鍵用）
    ///
    /// # エラー
    /// - `CryptoError::InvalidKeyLength`: 16 バイト以外
    pub fn from_slice(key: &[u8]) -> CryptoResult<Self> {
        let key: [u8; KEY_LEN] = key.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: key.len(),
        })?;
        Ok(Self::new(key))
    }

    /// ランダムな新しいセッション鍵を生成する（能動側が使う）
    pub fn generate() -> Self {
        Self::new(crate::random_bytes())
    }

    /// raw 鍵バイト列（RSA でラップして相手に送る）
    pub fn key_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    /// 平文を暗号化してフレーム本体を返す
    ///
    /// ## 出力構造
    /// ```text
    /// [iv: 16bytes][ciphertext: 16 の倍数]
    /// ```
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let iv: [u8; BLOCK_LEN] = crate::random_bytes();
        self.encrypt_with_iv(&iv, plaintext)
    }

    /// IV を指定して暗号化する（テスト・再現用）
    ///
    /// 同じ鍵で IV を使い回すと平文の先頭ブロックの一致が漏れる。
    pub fn encrypt_with_iv(&self, iv: &[u8; BLOCK_LEN], plaintext: &[u8]) -> Vec<u8> {
        let ciphertext =
            Aes128CbcEnc::new((&self.key).into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut frame = Vec::with_capacity(BLOCK_LEN + ciphertext.len());
        frame.extend_from_slice(iv);
        frame.extend_from_slice(&ciphertext);
        frame
    }

    /// フレーム本体（IV + 暗号文）を復号する
    ///
    /// # エラー
    /// - `CryptoError::FrameTooShort`: IV + 1 ブロック（32 バイト）未満
    /// - `CryptoError::MisalignedCiphertext`: 暗号文がブロック長の倍数でない
    /// - `CryptoError::BadPadding`: パディング検証失敗（鍵違い・改ざん）
    pub fn decrypt(&self, frame: &[u8]) -> CryptoResult<Vec<u8>> {
        // 空平文でもパディングで 1 ブロックになるので最低 32 バイト
        if frame.len() < BLOCK_LEN * 2 {
            return Err(CryptoError::FrameTooShort(frame.len()));
        }

        let (iv, ciphertext) = frame.split_at(BLOCK_LEN);
        if ciphertext.len() % BLOCK_LEN != 0 {
            return Err(CryptoError::MisalignedCiphertext(ciphertext.len()));
        }

        let iv: &[u8; BLOCK_LEN] = iv
            .try_into()
            .map_err(|_| CryptoError::FrameTooShort(frame.len()))?;

        Aes128CbcDec::new((&self.key).into(), iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::BadPadding)
    }
}

impl core::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // 鍵そのものはログに出さない
        f.write_str("SessionCipher(..)")
    }
}
