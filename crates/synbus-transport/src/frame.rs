//! フレーム分割と再組み立て
//!
//! ## Frame Wire Format
//! ```text
//! [body: variable][delimiter: b"\r\n\r\n"]
//! ```
//!
//! 1 回の read に複数フレームが含まれることも、1 フレームが複数の read に
//! 分かれることもある。区切り子そのものが read 境界をまたぐこともある。
//!
//! 本体が区切り子を含む場合に加え、本体が `\r\n` で終わる場合も
//! `..\r\n` + `\r\n\r\n` の 2 バイト手前で区切り子が一致してしまう。
//! 送信側は [`is_frameable`] を満たす本体だけを送る（暗号文は IV を変えて作り直す）。

use crate::error::TransportError;

/// フレーム区切り子
pub const FRAME_DELIMITER: &[u8] = b"\r\n\r\n";

/// 区切り子なしで保持できる最大バイト数（デフォルト 16 MiB）
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// 本体を区切り子で囲っても受信側で同じ本体として取り出せるか
///
/// 空の本体は読み飛ばされるので不可。
pub fn is_frameable(body: &[u8]) -> bool {
    !body.is_empty() && find_delimiter(body).is_none() && !body.ends_with(b"\r\n")
}

/// 本体を検査してからフレーム化する
///
/// # エラー
/// - `TransportError::Unframeable`: [`is_frameable`] を満たさない
pub fn try_encode_frame(body: &[u8]) -> Result<Vec<u8>, TransportError> {
    if !is_frameable(body) {
        return Err(TransportError::Unframeable { len: body.len() });
    }
    Ok(encode_frame(body))
}

/// フレーム本体に区切り子を付けて送信用バイト列にする
///
/// 本体の検査はしない。送信経路では [`try_encode_frame`] を使う。
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(body.len() + FRAME_DELIMITER.len());
    bytes.extend_from_slice(body);
    bytes.extend_from_slice(FRAME_DELIMITER);
    bytes
}

/// 受信バイト列からフレームを取り出すデコーダ
///
/// 接続ごとに 1 つ持ち、read のたびに `push` する。
/// 完成したフレームは到着順に返し、末尾の未完成部分は内部に保持する。
///
/// 空フレーム（区切り子の連続）は読み飛ばす。
#[derive(Debug)]
pub struct FrameDecoder {
    /// 前回までに受信した未完成フレーム
    buffer: Vec<u8>,
    /// 区切り子の探索を再開する位置（探索済みの範囲を再走査しない）
    scan_from: usize,
    /// 保持できる未完成フレームの上限
    max_frame_len: usize,
}

impl FrameDecoder {
    /// デフォルト上限（16 MiB）のデコーダを生成する
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// 未完成フレームの上限を指定して生成する
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        FrameDecoder {
            buffer: Vec::new(),
            scan_from: 0,
            max_frame_len,
        }
    }

    /// 新しく読んだバイト列を追加し、完成したフレームを返す
    ///
    /// # 戻り値
    /// 完成したフレーム本体（区切り子除く）のリスト。まだ揃っていなければ空。
    ///
    /// 上限超過でも完成済みのフレームは返す。呼び出し側はそれらを処理してから
    /// [`check_limit`](Self::check_limit) で接続を閉じるか判断する。
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        let mut search = self.scan_from;

        while let Some(pos) = find_delimiter(&self.buffer[search..]) {
            let end = search + pos;
            if end > start {
                frames.push(self.buffer[start..end].to_vec());
            }
            start = end + FRAME_DELIMITER.len();
            search = start;
        }

        self.buffer.drain(..start);
        // 区切り子の先頭 3 バイトだけが届いている可能性があるので少し手前から探す
        self.scan_from = self.buffer.len().saturating_sub(FRAME_DELIMITER.len() - 1);

        frames
    }

    /// 未完成フレームが上限内か
    ///
    /// # エラー
    /// - `TransportError::FrameTooLarge`: 区切り子が来ないまま上限を超えた
    pub fn check_limit(&self) -> Result<(), TransportError> {
        if self.buffer.len() > self.max_frame_len {
            return Err(TransportError::FrameTooLarge {
                buffered: self.buffer.len(),
                limit: self.max_frame_len,
            });
        }
        Ok(())
    }

    /// 保持している未完成フレームのバイト数
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// 未完成フレームを保持していないか
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn find_delimiter(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(FRAME_DELIMITER.len())
        .position(|window| window == FRAME_DELIMITER)
}
