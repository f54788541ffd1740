//! Reconciliation cursor: the `since` bound for the next gap-fill.
//!
//! # Invariants
//!
//! - **Never regresses**: every mutation is a max.
//! - **Snapshots are checked first**: a snapshot older than the cursor is
//!   rejected and does not move it.
//! - **Pure, no IO**: the caller supplies every timestamp.

// ---------------------------------------------------------------------------
// Freshness decision
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotFreshness {
    /// At or after the cursor (or the cursor is unset).
    Fresh,
    /// Strictly older than the cursor.
    Stale { cursor_ms: i64, got_ms: i64 },
}

impl SnapshotFreshness {
    pub fn is_fresh(&self) -> bool {
        matches!(self, SnapshotFreshness::Fresh)
    }
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Monotonically non-decreasing "last updated" timestamp (epoch ms).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileCursor {
    last_updated_ms: Option<i64>,
}

impl ReconcileCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` until the first snapshot is accepted.
    pub fn get(&self) -> Option<i64> {
        self.last_updated_ms
    }

    /// Freshness of a snapshot taken at `snapshot_ms`, without mutating.
    pub fn check_snapshot(&self, snapshot_ms: i64) -> SnapshotFreshness {
        match self.last_updated_ms {
            Some(cursor_ms) if snapshot_ms < cursor_ms => SnapshotFreshness::Stale {
                cursor_ms,
                got_ms: snapshot_ms,
            },
            _ => SnapshotFreshness::Fresh,
        }
    }

    /// Check and, when fresh, move the cursor to `snapshot_ms`.
    pub fn accept_snapshot(&mut self, snapshot_ms: i64) -> SnapshotFreshness {
        let result = self.check_snapshot(snapshot_ms);
        if result.is_fresh() {
            self.last_updated_ms = Some(snapshot_ms);
        }
        result
    }

    /// Advance to `ts_ms` if it is newer. Returns `true` when the cursor moved.
    ///
    /// An unset cursor is not initialised here; only a snapshot does that.
    pub fn advance_to(&mut self, ts_ms: i64) -> bool {
        match self.last_updated_ms {
            Some(current) if ts_ms > current => {
                self.last_updated_ms = Some(ts_ms);
                true
            }
            _ => false,
        }
    }
}
