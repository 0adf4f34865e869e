//! Client Registry: 登録済みクライアント UUID → 接続

use std::collections::HashMap;
use std::fmt;

/// broker 内での接続 ID（再利用しない）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// 登録済みクライアントの対応表
///
/// 同じ UUID での再登録は前のエントリを置き換える。
#[derive(Debug, Default)]
pub struct ClientRegistry {
    by_uuid: HashMap<String, ConnId>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// UUID を接続に対応付ける
    ///
    /// # 戻り値
    /// 置き換えられた以前の接続（同じ接続からの再登録なら `None`）
    pub fn register(&mut self, uuid: impl Into<String>, conn: ConnId) -> Option<ConnId> {
        self.by_uuid
            .insert(uuid.into(), conn)
            .filter(|previous| *previous != conn)
    }

    /// 接続が閉じたときに呼ぶ
    ///
    /// 同じ UUID が既に別の接続で再登録されていれば、そちらは残す。
    pub fn unregister(&mut self, uuid: &str, conn: ConnId) -> bool {
        if self.by_uuid.get(uuid) == Some(&conn) {
            self.by_uuid.remove(uuid);
            true
        } else {
            false
        }
    }

    pub fn lookup(&self, uuid: &str) -> Option<ConnId> {
        self.by_uuid.get(uuid).copied()
    }

    /// 登録済みの接続をすべて返す（順序は不定）
    pub fn connections(&self) -> impl Iterator<Item = ConnId> + '_ {
        self.by_uuid.values().copied()
    }

    pub fn len(&self) -> usize {
        self.by_uuid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uuid.is_empty()
    }
}
