//! 接続ごとの購読パターン集合

use std::collections::HashSet;

/// 1 接続が保持する購読パターン
///
/// broker 側では配送回数の上限を持たない（上限はクライアント側で管理し、
/// 使い切ったら unsubscribe が届く）。
#[derive(Debug, Default, Clone)]
pub struct SubscriptionSet {
    patterns: HashSet<String>,
}

impl SubscriptionSet {
    /// 空の集合を生成する
    pub fn new() -> Self {
        Self::default()
    }

    /// パターンを追加する（既にあれば何もしない）
    ///
    /// # 戻り値
    /// 新規に追加された場合 `true`
    pub fn subscribe(&mut self, pattern: impl Into<String>) -> bool {
        self.patterns.insert(pattern.into())
    }

    /// パターンを削除する（なければ何もしない）
    ///
    /// # 戻り値
    /// 削除された場合 `true`
    pub fn unsubscribe(&mut self, pattern: &str) -> bool {
        self.patterns.remove(pattern)
    }

    /// 候補（具体的な順）のうち最初に購読しているものを返す
    pub fn find_match<'a>(&self, candidates: &'a [String]) -> Option<&'a str> {
        candidates
            .iter()
            .find(|candidate| self.patterns.contains(candidate.as_str()))
            .map(String::as_str)
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.patterns.contains(pattern)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
