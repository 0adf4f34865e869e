//! クライアント側の購読（ハンドラと配送回数の上限）

use std::collections::HashMap;
use std::fmt;

use synbus_proto::Message;

/// 配送されたメッセージを受け取るハンドラ
pub type Handler = Box<dyn FnMut(&Message) + Send>;

/// 配送回数の上限（0 = 無制限）
pub type Limit = u32;

struct Subscription {
    handler: Handler,
    /// 残りの配送回数（0 = 無制限）
    remaining: Limit,
}

/// `dispatch` の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// 該当する購読がなかった
    NoSubscriber,
    /// ハンドラを呼んだ
    Delivered,
    /// ハンドラを呼び、上限に達したので購読を削除した
    Exhausted(String),
}

/// チャンネル（購読パターン）→ ハンドラ
#[derive(Default)]
pub struct LocalSubscriptions {
    entries: HashMap<String, Subscription>,
}

impl LocalSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 購読を追加する。同じチャンネルは（ハンドラ・上限ごと）置き換える
    ///
    /// # 戻り値
    /// 既存の購読を置き換えた場合 `true`
    pub fn insert(&mut self, channel: impl Into<String>, handler: Handler, limit: Limit) -> bool {
        self.entries
            .insert(channel.into(), Subscription { handler, remaining: limit })
            .is_some()
    }

    /// 購読を削除する
    pub fn remove(&mut self, channel: &str) -> bool {
        self.entries.remove(channel).is_some()
    }

    /// メッセージをハンドラに渡す
    ///
    /// `matched_channel` があればそちら、なければ `channel` で購読を探す。
    pub fn dispatch(&mut self, message: &Message) -> Dispatch {
        let channel = message.dispatch_channel();
        let Some(subscription) = self.entries.get_mut(channel) else {
            return Dispatch::NoSubscriber;
        };

        (subscription.handler)(message);

        match subscription.remaining {
            0 => Dispatch::Delivered,
            1 => {
                self.entries.remove(channel);
                Dispatch::Exhausted(channel.to_string())
            }
            _ => {
                subscription.remaining -= 1;
                Dispatch::Delivered
            }
        }
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.entries.contains_key(channel)
    }

    /// 残りの配送回数（0 = 無制限）
    pub fn remaining(&self, channel: &str) -> Option<Limit> {
        self.entries.get(channel).map(|s| s.remaining)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for LocalSubscriptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(channel, s)| (channel, s.remaining)))
            .finish()
    }
}
