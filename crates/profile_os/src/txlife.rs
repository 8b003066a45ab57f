#![forbid(unsafe_code)]

//! Client-side lifecycle of a submitted transaction.
//!
//! The tracker owns at most one handle. A handle starts in PENDING_APPROVAL,
//! learns its transaction id once the transport issues one, and then follows
//! the network's status pushes. Pushes only ever move the phase forward;
//! EXPIRED and ERROR may interrupt any non-terminal phase, and SEALED, EXPIRED
//! and ERROR freeze the handle until `reset()` or the next submission.
//!
//! If the network stops delivering pushes the handle stays parked in its last
//! phase. There is no timeout.

use std::sync::Mutex;

use profile_kernel_contracts::txlife::{
    SubmissionTicket, TransactionId, TransactionSnapshot, TxPhase,
};
use profile_kernel_contracts::ReasonCodeId;
use tokio::sync::watch;

use crate::lock;

pub mod reason_codes {
    use profile_kernel_contracts::ReasonCodeId;

    pub const TX_IGNORED_STALE_TICKET: ReasonCodeId = ReasonCodeId(0x5458_0001);
    pub const TX_IGNORED_NOT_ADVANCING: ReasonCodeId = ReasonCodeId(0x5458_0002);
    pub const TX_IGNORED_TERMINAL: ReasonCodeId = ReasonCodeId(0x5458_0003);
}

/// Invoked once, with the sealed snapshot, the first time a handle reaches SEALED.
pub type SealedHook = Box<dyn FnOnce(&TransactionSnapshot) + Send>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    #[error("transaction {ticket:?} is still in flight (phase {phase})")]
    Busy {
        ticket: SubmissionTicket,
        phase: TxPhase,
    },
    #[error("{0}")]
    Misuse(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusStep {
    Advanced { from: TxPhase, to: TxPhase },
    Ignored { reason: ReasonCodeId },
}

impl StatusStep {
    pub fn reached_terminal(self) -> bool {
        matches!(self, Self::Advanced { to, .. } if to.is_terminal())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Recorded,
    /// The handle was dismissed or replaced before the id arrived.
    Stale,
}

struct LiveHandle {
    ticket: SubmissionTicket,
    id: Option<TransactionId>,
    phase: TxPhase,
    on_sealed: Option<SealedHook>,
}

struct TrackerState {
    next_ticket: u64,
    handle: Option<LiveHandle>,
}

impl TrackerState {
    fn snapshot(&self) -> TransactionSnapshot {
        match &self.handle {
            Some(h) => TransactionSnapshot {
                ticket: Some(h.ticket),
                phase: h.phase,
                transaction_id: h.id.clone(),
                in_progress: true,
            },
            None => TransactionSnapshot::idle(),
        }
    }

    fn live_mut(&mut self, ticket: SubmissionTicket) -> Option<&mut LiveHandle> {
        self.handle.as_mut().filter(|h| h.ticket == ticket)
    }
}

pub struct TransactionTracker {
    state: Mutex<TrackerState>,
    published: watch::Sender<TransactionSnapshot>,
}

impl TransactionTracker {
    pub fn new() -> Self {
        let (published, _) = watch::channel(TransactionSnapshot::idle());
        Self {
            state: Mutex::new(TrackerState {
                next_ticket: 1,
                handle: None,
            }),
            published,
        }
    }

    pub fn snapshot(&self) -> TransactionSnapshot {
        lock(&self.state).snapshot()
    }

    pub fn phase(&self) -> TxPhase {
        self.snapshot().phase
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.snapshot().transaction_id
    }

    /// True while a handle exists, including one parked in a terminal phase.
    pub fn in_progress(&self) -> bool {
        lock(&self.state).handle.is_some()
    }

    /// True while a handle exists and has not reached a terminal phase.
    pub fn is_pending(&self) -> bool {
        lock(&self.state)
            .handle
            .as_ref()
            .is_some_and(|h| !h.phase.is_terminal())
    }

    pub fn current_ticket(&self) -> Option<SubmissionTicket> {
        lock(&self.state).handle.as_ref().map(|h| h.ticket)
    }

    /// Receives every published snapshot. Dropping the receiver unsubscribes.
    pub fn watch(&self) -> watch::Receiver<TransactionSnapshot> {
        self.published.subscribe()
    }

    pub fn begin_submission(
        &self,
        on_sealed: Option<SealedHook>,
    ) -> Result<SubmissionTicket, TrackerError> {
        let (ticket, snapshot) = {
            let mut state = lock(&self.state);
            if let Some(h) = &state.handle {
                if !h.phase.is_terminal() {
                    tracing::debug!(ticket = h.ticket.0, phase = %h.phase, "submission rejected: busy");
                    return Err(TrackerError::Busy {
                        ticket: h.ticket,
                        phase: h.phase,
                    });
                }
            }
            let ticket = SubmissionTicket(state.next_ticket);
            state.next_ticket = state.next_ticket.saturating_add(1);
            // A terminal handle is replaced in place; watchers go straight to PENDING_APPROVAL.
            state.handle = Some(LiveHandle {
                ticket,
                id: None,
                phase: TxPhase::PendingApproval,
                on_sealed,
            });
            (ticket, state.snapshot())
        };
        tracing::info!(ticket = ticket.0, "transaction submission started");
        self.publish(snapshot);
        Ok(ticket)
    }

    pub fn attach_id(
        &self,
        ticket: SubmissionTicket,
        id: TransactionId,
    ) -> Result<AttachOutcome, TrackerError> {
        let snapshot = {
            let mut state = lock(&self.state);
            let Some(handle) = state.live_mut(ticket) else {
                tracing::debug!(ticket = ticket.0, tx_id = %id, "transaction id for dismissed handle");
                return Ok(AttachOutcome::Stale);
            };
            if let Some(existing) = &handle.id {
                tracing::error!(
                    ticket = ticket.0,
                    existing = %existing,
                    attempted = %id,
                    "transaction id attached twice"
                );
                return Err(TrackerError::Misuse("transaction id attached twice"));
            }
            tracing::info!(ticket = ticket.0, tx_id = %id, "transaction id attached");
            handle.id = Some(id);
            state.snapshot()
        };
        self.publish(snapshot);
        Ok(AttachOutcome::Recorded)
    }

    /// Classifies one raw network status and advances the handle when allowed.
    /// Never fails: malformed codes land in ERROR, stale or backward pushes are dropped.
    pub fn on_status_update(&self, ticket: SubmissionTicket, raw_status: i32) -> StatusStep {
        let target = TxPhase::from_raw_status(raw_status);
        let (step, snapshot, hook) = {
            let mut state = lock(&self.state);
            let Some(handle) = state.live_mut(ticket) else {
                tracing::debug!(ticket = ticket.0, raw_status, "status for dismissed handle ignored");
                return StatusStep::Ignored {
                    reason: reason_codes::TX_IGNORED_STALE_TICKET,
                };
            };
            let from = handle.phase;
            if !from.can_advance_to(target) {
                let reason = if from.is_terminal() {
                    reason_codes::TX_IGNORED_TERMINAL
                } else {
                    reason_codes::TX_IGNORED_NOT_ADVANCING
                };
                tracing::debug!(
                    ticket = ticket.0,
                    raw_status,
                    phase = %from,
                    target = %target,
                    "non-advancing status ignored"
                );
                return StatusStep::Ignored { reason };
            }
            handle.phase = target;
            let hook = if target == TxPhase::Sealed {
                handle.on_sealed.take()
            } else {
                None
            };
            (
                StatusStep::Advanced { from, to: target },
                state.snapshot(),
                hook,
            )
        };
        tracing::info!(
            ticket = ticket.0,
            raw_status,
            tx_id = snapshot.transaction_id.as_ref().map(|id| id.as_str()),
            phase = %snapshot.phase,
            "transaction phase advanced"
        );
        self.publish(snapshot.clone());
        if let Some(hook) = hook {
            hook(&snapshot);
        }
        step
    }

    /// Drops the handle for `ticket` if it is still live. Used when the
    /// transport refuses a submission so no orphaned handle remains.
    pub fn abandon(&self, ticket: SubmissionTicket) -> bool {
        let snapshot = {
            let mut state = lock(&self.state);
            if state.live_mut(ticket).is_none() {
                return false;
            }
            state.handle = None;
            state.snapshot()
        };
        tracing::info!(ticket = ticket.0, "transaction submission abandoned");
        self.publish(snapshot);
        true
    }

    /// Returns to NONE. The network-side transaction is unaffected; its
    /// remaining pushes are ignored and its sealed hook never runs.
    pub fn reset(&self) {
        let previous = {
            let mut state = lock(&self.state);
            state.handle.take()
        };
        if let Some(h) = previous {
            tracing::info!(ticket = h.ticket.0, phase = %h.phase, "transaction tracker reset");
            self.publish(TransactionSnapshot::idle());
        }
    }

    fn publish(&self, snapshot: TransactionSnapshot) {
        self.published.send_replace(snapshot);
    }
}

impl Default for TransactionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn tx_id(raw: &str) -> TransactionId {
        TransactionId::new(raw).unwrap()
    }

    fn counting_hook(count: &Arc<AtomicUsize>) -> SealedHook {
        let c = count.clone();
        Box::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn at_txlife_01_begin_enters_pending_approval_without_id() {
        let tracker = TransactionTracker::new();
        assert_eq!(tracker.phase(), TxPhase::None);
        assert!(!tracker.in_progress());
        let ticket = tracker.begin_submission(None).unwrap();
        let snap = tracker.snapshot();
        assert_eq!(snap.phase, TxPhase::PendingApproval);
        assert_eq!(snap.ticket, Some(ticket));
        assert!(snap.transaction_id.is_none());
        assert!(tracker.in_progress());
        assert!(tracker.is_pending());
    }

    #[test]
    fn at_txlife_02_attach_keeps_phase_until_first_push() {
        let tracker = TransactionTracker::new();
        let ticket = tracker.begin_submission(None).unwrap();
        assert_eq!(
            tracker.attach_id(ticket, tx_id("abc123")).unwrap(),
            AttachOutcome::Recorded
        );
        assert_eq!(tracker.phase(), TxPhase::PendingApproval);
        assert_eq!(tracker.transaction_id(), Some(tx_id("abc123")));
        tracker.on_status_update(ticket, 1);
        assert_eq!(tracker.phase(), TxPhase::Submitted);
    }

    #[test]
    fn at_txlife_03_double_attach_is_misuse() {
        let tracker = TransactionTracker::new();
        let ticket = tracker.begin_submission(None).unwrap();
        tracker.attach_id(ticket, tx_id("first")).unwrap();
        assert_eq!(
            tracker.attach_id(ticket, tx_id("second")),
            Err(TrackerError::Misuse("transaction id attached twice"))
        );
        assert_eq!(tracker.transaction_id(), Some(tx_id("first")));
    }

    #[test]
    fn at_txlife_04_busy_leaves_existing_handle_untouched() {
        let tracker = TransactionTracker::new();
        let ticket = tracker.begin_submission(None).unwrap();
        tracker.attach_id(ticket, tx_id("live")).unwrap();
        tracker.on_status_update(ticket, 2);
        let before = tracker.snapshot();
        let err = tracker.begin_submission(None).unwrap_err();
        assert_eq!(
            err,
            TrackerError::Busy {
                ticket,
                phase: TxPhase::Finalized
            }
        );
        assert_eq!(tracker.snapshot(), before);
    }

    #[test]
    fn at_txlife_05_sealed_then_backward_stays_sealed() {
        let tracker = TransactionTracker::new();
        let ticket = tracker.begin_submission(None).unwrap();
        tracker.on_status_update(ticket, 4);
        let step = tracker.on_status_update(ticket, 1);
        assert_eq!(
            step,
            StatusStep::Ignored {
                reason: reason_codes::TX_IGNORED_TERMINAL
            }
        );
        assert_eq!(tracker.phase(), TxPhase::Sealed);
    }

    #[test]
    fn at_txlife_06_sealed_hook_fires_exactly_once() {
        let tracker = TransactionTracker::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let ticket = tracker.begin_submission(Some(counting_hook(&fired))).unwrap();
        for raw in [1, 2, 3, 4, 4, 4, 3, 4] {
            tracker.on_status_update(ticket, raw);
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn at_txlife_07_backward_and_duplicate_pushes_are_ignored() {
        let tracker = TransactionTracker::new();
        let ticket = tracker.begin_submission(None).unwrap();
        tracker.on_status_update(ticket, 3);
        assert_eq!(
            tracker.on_status_update(ticket, 3),
            StatusStep::Ignored {
                reason: reason_codes::TX_IGNORED_NOT_ADVANCING
            }
        );
        tracker.on_status_update(ticket, 1);
        tracker.on_status_update(ticket, -1);
        assert_eq!(tracker.phase(), TxPhase::Executed);
    }

    #[test]
    fn at_txlife_08_unknown_code_maps_to_terminal_error() {
        let tracker = TransactionTracker::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let ticket = tracker.begin_submission(Some(counting_hook(&fired))).unwrap();
        tracker.on_status_update(ticket, 1);
        let step = tracker.on_status_update(ticket, 42);
        assert!(step.reached_terminal());
        tracker.on_status_update(ticket, 4);
        assert_eq!(tracker.phase(), TxPhase::Error);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn at_txlife_09_expired_reachable_from_pending_approval() {
        let tracker = TransactionTracker::new();
        let ticket = tracker.begin_submission(None).unwrap();
        tracker.on_status_update(ticket, 5);
        assert_eq!(tracker.phase(), TxPhase::Expired);
        assert!(!tracker.is_pending());
        assert!(tracker.in_progress());
    }

    #[test]
    fn at_txlife_10_reset_drops_hook_and_ignores_stale_pushes() {
        let tracker = TransactionTracker::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let old = tracker.begin_submission(Some(counting_hook(&fired))).unwrap();
        tracker.on_status_update(old, 1);
        tracker.reset();
        assert_eq!(tracker.snapshot(), TransactionSnapshot::idle());
        assert_eq!(
            tracker.on_status_update(old, 4),
            StatusStep::Ignored {
                reason: reason_codes::TX_IGNORED_STALE_TICKET
            }
        );
        assert_eq!(
            tracker.attach_id(old, tx_id("late")).unwrap(),
            AttachOutcome::Stale
        );
        let new = tracker.begin_submission(None).unwrap();
        assert_ne!(old, new);
        tracker.on_status_update(old, 4);
        assert_eq!(tracker.phase(), TxPhase::PendingApproval);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn at_txlife_11_new_submission_replaces_terminal_handle() {
        let tracker = TransactionTracker::new();
        let first = tracker.begin_submission(None).unwrap();
        tracker.attach_id(first, tx_id("one")).unwrap();
        tracker.on_status_update(first, 4);
        let second = tracker.begin_submission(None).unwrap();
        let snap = tracker.snapshot();
        assert_eq!(snap.ticket, Some(second));
        assert_eq!(snap.phase, TxPhase::PendingApproval);
        assert!(snap.transaction_id.is_none());
    }

    #[test]
    fn at_txlife_12_abandon_only_drops_matching_ticket() {
        let tracker = TransactionTracker::new();
        let ticket = tracker.begin_submission(None).unwrap();
        assert!(!tracker.abandon(SubmissionTicket(ticket.0 + 10)));
        assert!(tracker.abandon(ticket));
        assert_eq!(tracker.phase(), TxPhase::None);
        assert!(tracker.begin_submission(None).is_ok());
    }

    #[test]
    fn at_txlife_13_watchers_see_published_snapshots() {
        let tracker = TransactionTracker::new();
        let rx = tracker.watch();
        let ticket = tracker.begin_submission(None).unwrap();
        tracker.on_status_update(ticket, 2);
        assert_eq!(rx.borrow().phase, TxPhase::Finalized);
        tracker.reset();
        assert_eq!(rx.borrow().phase, TxPhase::None);
    }

    #[test]
    fn at_txlife_15_replacing_terminal_handle_publishes_one_snapshot() {
        let tracker = TransactionTracker::new();
        let first = tracker.begin_submission(None).unwrap();
        tracker.on_status_update(first, 4);
        let mut rx = tracker.watch();
        rx.borrow_and_update();
        let second = tracker.begin_submission(None).unwrap();
        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen.ticket, Some(second));
        assert_eq!(seen.phase, TxPhase::PendingApproval);
        assert!(!rx.has_changed().unwrap());
    }

    // Exhaustive over every sequence of up to four pushes drawn from a mixed alphabet.
    #[test]
    fn at_txlife_14_phase_is_monotonic_for_all_short_sequences() {
        const ALPHABET: [i32; 10] = [-3, -1, 0, 1, 2, 3, 4, 5, 6, 99];
        let mut sequences: Vec<Vec<i32>> = vec![Vec::new()];
        for _ in 0..4 {
            let mut next = Vec::new();
            for seq in &sequences {
                for raw in ALPHABET {
                    let mut s = seq.clone();
                    s.push(raw);
                    next.push(s);
                }
            }
            sequences.extend(next.iter().cloned());
            sequences = dedup(sequences);
        }
        for seq in sequences {
            let tracker = TransactionTracker::new();
            let fired = Arc::new(AtomicUsize::new(0));
            let ticket = tracker.begin_submission(Some(counting_hook(&fired))).unwrap();
            let mut prev = tracker.phase();
            let mut sealed_seen = false;
            for raw in &seq {
                let step = tracker.on_status_update(ticket, *raw);
                let now = tracker.phase();
                if now != prev {
                    assert!(prev.can_advance_to(now), "{seq:?}: {prev} -> {now}");
                    assert_eq!(step, StatusStep::Advanced { from: prev, to: now });
                }
                if prev.is_terminal() {
                    assert_eq!(now, prev, "{seq:?}: terminal phase moved");
                }
                sealed_seen |= now == TxPhase::Sealed;
                prev = now;
            }
            let expected = usize::from(sealed_seen);
            assert_eq!(fired.load(Ordering::SeqCst), expected, "{seq:?}");
        }
    }

    fn dedup(mut v: Vec<Vec<i32>>) -> Vec<Vec<i32>> {
        v.sort();
        v.dedup();
        v
    }
}
