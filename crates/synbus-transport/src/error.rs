//! synbus-transport エラー型

use thiserror::Error;

/// トランスポート層のエラー
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// 区切り子が来ないまま受信バッファが上限を超えた
    #[error("Frame exceeds maximum length: {buffered} bytes buffered (limit {limit})")]
    FrameTooLarge {
        /// バッファ済みのバイト数
        buffered: usize,
        /// 上限
        limit: usize,
    },
    /// 区切り子で囲うと正しく取り出せない本体
    #[error("Frame body of {len} bytes cannot be delimited")]
    Unframeable {
        /// 本体のバイト数
        len: usize,
    },
}
