//! State Store: the reconciled `LineKey -> MarketLine` mapping.
//!
//! Records are replaced wholesale on every merge; there is no delete path.
//! Writers take the write lock for a whole batch, so a reader never sees a
//! partially applied record (or batch).

use std::collections::BTreeMap;
use std::sync::Arc;

use lf_schemas::{LineKey, MarketLine};
use tokio::sync::RwLock;

/// Cheap-to-clone handle; clones share the same mapping.
#[derive(Clone, Debug, Default)]
pub struct LineStore {
    inner: Arc<RwLock<BTreeMap<LineKey, MarketLine>>>,
}

impl LineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last writer wins: `State[key] = line`.
    pub async fn merge(&self, key: LineKey, line: MarketLine) {
        self.inner.write().await.insert(key, line);
    }

    /// Merge records in iteration order under one write lock. Returns the
    /// number of records written.
    pub async fn merge_all<I>(&self, lines: I) -> usize
    where
        I: IntoIterator<Item = (LineKey, MarketLine)>,
    {
        let mut map = self.inner.write().await;
        let mut n = 0;
        for (key, line) in lines {
            map.insert(key, line);
            n += 1;
        }
        n
    }

    /// Discard everything and load `lines` (in order; later duplicates win).
    pub async fn replace_all<I>(&self, lines: I) -> usize
    where
        I: IntoIterator<Item = (LineKey, MarketLine)>,
    {
        let fresh: BTreeMap<LineKey, MarketLine> = lines.into_iter().collect();
        let n = fresh.len();
        *self.inner.write().await = fresh;
        n
    }

    /// Point-in-time copy of the whole mapping.
    pub async fn snapshot(&self) -> BTreeMap<LineKey, MarketLine> {
        self.inner.read().await.clone()
    }

    pub async fn get(&self, key: &LineKey) -> Option<MarketLine> {
        self.inner.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
