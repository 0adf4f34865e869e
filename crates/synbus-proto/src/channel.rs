//! チャンネル名とワイルドカード
//!
//! チャンネルはドット区切りの階層名（例: `jobs.run.fast`）。
//! publish されたチャンネルに対し、購読パターンの候補を具体的な順に並べる:
//!
//! ```text
//! jobs.run.fast → [jobs.run.fast, jobs.run.*, jobs.*, *]
//! ```

use crate::error::ProtoError;

/// チャンネルの階層区切り
pub const SEPARATOR: char = '.';

/// ワイルドカードセグメント
pub const WILDCARD: &str = "*";

/// register メッセージのチャンネル
pub const REGISTER_CHANNEL: &str = "register";

/// リプライ用チャンネルの接頭辞（`__` + msg_id）
pub const REPLY_PREFIX: &str = "__";

/// チャンネル名が妥当か検証する
///
/// 空文字列や空セグメント（`a..b`, `.a`, `a.`）は不可。
pub fn validate(channel: &str) -> Result<(), ProtoError> {
    if channel.is_empty() || channel.split(SEPARATOR).any(str::is_empty) {
        return Err(ProtoError::InvalidChannel(channel.to_string()));
    }
    Ok(())
}

/// publish されたチャンネルにマッチしうる購読パターンを具体的な順に返す
///
/// 先頭が完全一致、以降は末尾を 1 段ずつ `*` に置き換えたもの、最後が `*`。
/// 購読者ごとに先頭から探して最初に見つかったパターンが採用される。
pub fn wildcard_candidates(channel: &str) -> Vec<String> {
    let segments: Vec<&str> = channel.split(SEPARATOR).collect();

    let mut candidates = Vec::with_capacity(segments.len() + 1);
    candidates.push(channel.to_string());

    for depth in (0..segments.len()).rev() {
        let pattern = if depth == 0 {
            WILDCARD.to_string()
        } else {
            format!("{}{}{}", segments[..depth].join("."), SEPARATOR, WILDCARD)
        };
        // `a.*` 自体を publish した場合などの重複を除く
        if !candidates.contains(&pattern) {
            candidates.push(pattern);
        }
    }

    candidates
}

/// msg_id に対するリプライ用チャンネル
pub fn reply_channel(msg_id: &str) -> String {
    format!("{REPLY_PREFIX}{msg_id}")
}

/// リプライ用チャンネルか
pub fn is_reply_channel(channel: &str) -> bool {
    channel.starts_with(REPLY_PREFIX)
}

/// パターンがワイルドカードか（最終セグメントが `*`）
pub fn is_wildcard(pattern: &str) -> bool {
    pattern == WILDCARD || pattern.ends_with(".*")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates_most_specific_first() {
        assert_eq!(
            wildcard_candidates("a.b.c"),
            vec!["a.b.c", "a.b.*", "a.*", "*"]
        );
    }

    #[test]
    fn test_candidates_single_segment() {
        assert_eq!(wildcard_candidates("jobs"), vec!["jobs", "*"]);
    }

    #[test]
    fn test_candidates_of_wildcard_channel_deduplicated() {
        assert_eq!(wildcard_candidates("a.*"), vec!["a.*", "*"]);
    }

    #[test]
    fn test_candidates_reply_channel() {
        let ch = reply_channel("5f0e-11");
        assert_eq!(wildcard_candidates(&ch), vec!["__5f0e-11".to_string(), "*".to_string()]);
    }

    #[test]
    fn test_validate() {
        assert!(validate("a").is_ok());
        assert!(validate("a.b.c").is_ok());
        assert!(validate("a.*").is_ok());
        assert!(validate("*").is_ok());

        assert!(validate("").is_err());
        assert!(validate("a..b").is_err());
        assert!(validate(".a").is_err());
        assert!(validate("a.").is_err());
    }

    #[test]
    fn test_reply_channel() {
        assert_eq!(reply_channel("abc"), "__abc");
        assert!(is_reply_channel("__abc"));
        assert!(!is_reply_channel("abc"));
    }

    #[test]
    fn test_is_wildcard() {
        assert!(is_wildcard("*"));
        assert!(is_wildcard("a.b.*"));
        assert!(!is_wildcard("a.b"));
        assert!(!is_wildcard("a*"));
    }
}
