//! Pure reconciliation bookkeeping: when to gap-fill, from which cursor,
//! and which live batches must wait for it.
//!
//! Deterministic, no IO. The async [`Reconciler`](crate::Reconciler) feeds
//! protocol events in and performs whatever this engine decides.

use std::collections::VecDeque;

use lf_config::{GapFillPolicy, GapFillTrigger};
use lf_protocol::ProtocolEvent;
use lf_schemas::KeyedLines;

use crate::cursor::{ReconcileCursor, SnapshotFreshness};

/// A gap-fill the caller must now request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GapFillPlan {
    pub since_ms: i64,
}

/// What to do with a live batch right now.
#[derive(Debug, PartialEq)]
pub enum LiveDisposition {
    /// Merge immediately.
    Apply(KeyedLines),
    /// Queued behind the in-flight gap-fill.
    Buffered { queued: usize },
}

#[derive(Debug)]
pub struct ReconcileEngine {
    policy: GapFillPolicy,
    trigger: GapFillTrigger,
    cursor: ReconcileCursor,
    connections: u64,
    ran_this_connection: bool,
    ran_ever: bool,
    bridged_this_connection: bool,
    in_flight: Option<GapFillPlan>,
    buffered: VecDeque<KeyedLines>,
}

impl ReconcileEngine {
    pub fn new(policy: GapFillPolicy, trigger: GapFillTrigger) -> Self {
        Self {
            policy,
            trigger,
            cursor: ReconcileCursor::new(),
            connections: 0,
            ran_this_connection: false,
            ran_ever: false,
            bridged_this_connection: false,
            in_flight: None,
            buffered: VecDeque::new(),
        }
    }

    pub fn cursor(&self) -> &ReconcileCursor {
        &self.cursor
    }

    pub fn connections(&self) -> u64 {
        self.connections
    }

    pub fn in_flight(&self) -> Option<GapFillPlan> {
        self.in_flight
    }

    /// Check a snapshot timestamp and, if fresh, adopt it as the cursor.
    pub fn accept_snapshot(&mut self, snapshot_ms: i64) -> SnapshotFreshness {
        self.cursor.accept_snapshot(snapshot_ms)
    }

    /// A new connection is about to stream.
    pub fn begin_connection(&mut self) {
        self.connections += 1;
        self.ran_this_connection = false;
        self.bridged_this_connection = false;
    }

    /// Feed one protocol event; returns a plan when it is the configured
    /// gap-fill trigger and the policy allows a gap-fill on this connection.
    pub fn on_protocol_event(&mut self, event: &ProtocolEvent) -> Option<GapFillPlan> {
        let is_trigger = matches!(
            (self.trigger, event),
            (GapFillTrigger::StartSent, ProtocolEvent::SubscriptionStarted { .. })
                | (GapFillTrigger::StartAck, ProtocolEvent::Streaming { .. })
        );
        if !is_trigger || !self.gap_fill_allowed() {
            return None;
        }
        // Without a baseline there is nothing to bridge from.
        let since_ms = self.cursor.get()?;

        let plan = GapFillPlan { since_ms };
        self.ran_this_connection = true;
        self.ran_ever = true;
        self.in_flight = Some(plan);
        Some(plan)
    }

    fn gap_fill_allowed(&self) -> bool {
        if self.in_flight.is_some() || self.ran_this_connection {
            return false;
        }
        match self.policy {
            GapFillPolicy::EveryConnection => true,
            GapFillPolicy::FirstConnectionOnly => !self.ran_ever,
            GapFillPolicy::Disabled => false,
        }
    }

    /// Route a live batch: merge now, or queue while a gap-fill is in flight.
    pub fn on_live(&mut self, lines: KeyedLines) -> LiveDisposition {
        if self.in_flight.is_some() {
            self.buffered.push_back(lines);
            LiveDisposition::Buffered {
                queued: self.buffered.len(),
            }
        } else {
            LiveDisposition::Apply(lines)
        }
    }

    /// The in-flight gap-fill finished. `max_timestamp_ms` is the newest
    /// update it returned (`None` on failure or no timestamps); the cursor
    /// advances only on success. Returns the batches queued meanwhile, in
    /// arrival order, for the caller to merge next.
    pub fn finish_gap_fill(&mut self, succeeded: bool, max_timestamp_ms: Option<i64>) -> Vec<KeyedLines> {
        self.in_flight = None;
        if succeeded {
            self.bridged_this_connection = true;
            if let Some(ts) = max_timestamp_ms {
                self.cursor.advance_to(ts);
            }
        }
        self.buffered.drain(..).collect()
    }

    /// A live batch was merged. The cursor follows it only once a gap-fill
    /// on this connection has succeeded; until then it stays at the last
    /// bridged point.
    pub fn applied_live(&mut self, max_timestamp_ms: Option<i64>) {
        if !self.bridged_this_connection {
            return;
        }
        if let Some(ts) = max_timestamp_ms {
            self.cursor.advance_to(ts);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> ProtocolEvent {
        ProtocolEvent::SubscriptionStarted { id: "s".to_string() }
    }

    fn streaming() -> ProtocolEvent {
        ProtocolEvent::Streaming { id: "s".to_string() }
    }

    fn engine(policy: GapFillPolicy, trigger: GapFillTrigger) -> ReconcileEngine {
        let mut e = ReconcileEngine::new(policy, trigger);
        e.accept_snapshot(1_000);
        e
    }

    #[test]
    fn start_sent_trigger_plans_once_per_connection() {
        let mut e = engine(GapFillPolicy::EveryConnection, GapFillTrigger::StartSent);
        e.begin_connection();
        assert_eq!(e.on_protocol_event(&streaming()), None);
        assert_eq!(e.on_protocol_event(&started()), Some(GapFillPlan { since_ms: 1_000 }));
        e.finish_gap_fill(true, None);
        assert_eq!(e.on_protocol_event(&started()), None, "once per connection");

        e.begin_connection();
        assert!(e.on_protocol_event(&started()).is_some());
    }

    #[test]
    fn start_ack_trigger_waits_for_streaming() {
        let mut e = engine(GapFillPolicy::EveryConnection, GapFillTrigger::StartAck);
        e.begin_connection();
        assert_eq!(e.on_protocol_event(&started()), None);
        assert!(e.on_protocol_event(&streaming()).is_some());
    }

    #[test]
    fn first_connection_only_and_disabled() {
        let mut once = engine(GapFillPolicy::FirstConnectionOnly, GapFillTrigger::StartSent);
        once.begin_connection();
        assert!(once.on_protocol_event(&started()).is_some());
        once.finish_gap_fill(true, None);
        once.begin_connection();
        assert!(once.on_protocol_event(&started()).is_none());

        let mut never = engine(GapFillPolicy::Disabled, GapFillTrigger::StartSent);
        never.begin_connection();
        assert!(never.on_protocol_event(&started()).is_none());
    }

    #[test]
    fn no_cursor_means_no_gap_fill() {
        let mut e = ReconcileEngine::new(GapFillPolicy::EveryConnection, GapFillTrigger::StartSent);
        e.begin_connection();
        assert!(e.on_protocol_event(&started()).is_none());
    }

    #[test]
    fn live_batches_queue_behind_gap_fill_in_order() {
        let mut e = engine(GapFillPolicy::EveryConnection, GapFillTrigger::StartSent);
        e.begin_connection();
        e.on_protocol_event(&started());

        let a = KeyedLines { skipped: 1, ..KeyedLines::default() };
        let b = KeyedLines { skipped: 2, ..KeyedLines::default() };
        assert_eq!(e.on_live(a), LiveDisposition::Buffered { queued: 1 });
        assert_eq!(e.on_live(b), LiveDisposition::Buffered { queued: 2 });

        let drained = e.finish_gap_fill(true, Some(1_500));
        assert_eq!(drained.iter().map(|k| k.skipped).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(e.cursor().get(), Some(1_500));
        assert!(matches!(e.on_live(KeyedLines::default()), LiveDisposition::Apply(_)));
    }

    #[test]
    fn failed_gap_fill_does_not_move_cursor() {
        let mut e = engine(GapFillPolicy::EveryConnection, GapFillTrigger::StartSent);
        e.begin_connection();
        e.on_protocol_event(&started());
        e.finish_gap_fill(false, Some(9_999));
        assert_eq!(e.cursor().get(), Some(1_000));
    }

    #[test]
    fn live_moves_cursor_only_after_a_bridged_gap_fill() {
        let mut e = engine(GapFillPolicy::EveryConnection, GapFillTrigger::StartSent);
        e.begin_connection();
        e.applied_live(Some(1_200));
        assert_eq!(e.cursor().get(), Some(1_000), "nothing bridged yet");

        e.on_protocol_event(&started());
        e.finish_gap_fill(false, None);
        e.applied_live(Some(5_000));
        assert_eq!(e.cursor().get(), Some(1_000), "failed gap-fill leaves the window open");

        e.begin_connection();
        assert_eq!(e.on_protocol_event(&started()), Some(GapFillPlan { since_ms: 1_000 }));
        e.finish_gap_fill(true, Some(4_000));
        e.applied_live(Some(5_500));
        assert_eq!(e.cursor().get(), Some(5_500));

        e.begin_connection();
        e.applied_live(Some(7_000));
        assert_eq!(e.cursor().get(), Some(5_500), "bridging is per connection");
    }
}
