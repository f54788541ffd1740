//! lf-reconcile
//!
//! Snapshot & gap-fill reconciliation for the market line feed.
//!
//! Architectural decisions:
//! - The snapshot replaces the store wholesale and initialises the cursor.
//! - Gap-fill and live records share one merge: last writer wins per key.
//! - Live batches that arrive while a gap-fill is in flight are queued and
//!   merged after it, in arrival order.
//! - The cursor never regresses; a stale snapshot is rejected.
//!
//! [`ReconcileEngine`] and [`ReconcileCursor`] are pure. [`Reconciler`] adds
//! the IO (HTTP fetches, store writes) around them.

mod cursor;
mod engine;
mod reconciler;
mod store;

pub use cursor::{ReconcileCursor, SnapshotFreshness};
pub use engine::{GapFillPlan, LiveDisposition, ReconcileEngine};
pub use reconciler::{LineSource, ReconcileEvent, Reconciler, SnapshotSummary};
pub use store::LineStore;
