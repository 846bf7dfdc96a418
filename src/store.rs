//! Synchronized case store.
//!
//! One [`CaseStore`] per client. Its contents belong to exactly one session
//! (a `(role, identifier)` pair) at a time; every sign-in or sign-out starts
//! a new epoch and hands a fresh [`StoreWriter`] to the session task. Writers
//! from an older epoch are silently ignored, so a subscription that has not
//! finished dying can never write into the next identity's view.
//!
//! Readers get cheap clones of [`CaseStoreReader`] and are notified of
//! changes through the underlying `tokio::sync::watch` channel.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::models::{Case, CaseStatus, SessionKey};
use crate::reconcile::{BatchSummary, CaseCollection, MergeOutcome};

/// Everything the store holds for the current session.
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    epoch: u64,
    owner: Option<SessionKey>,
    cases: CaseCollection,
    loading: bool,
}

impl StoreState {
    pub fn owner(&self) -> Option<&SessionKey> {
        self.owner.as_ref()
    }

    pub fn cases(&self) -> &CaseCollection {
        &self.cases
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }
}

// ═══════════════════════════════════════════════════════════
// Owner side
// ═══════════════════════════════════════════════════════════

/// Owner handle. Only the sync facade resets it; only session tasks write.
pub struct CaseStore {
    tx: Arc<watch::Sender<StoreState>>,
    epoch: AtomicU64,
}

impl Default for CaseStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CaseStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(StoreState::default());
        Self {
            tx: Arc::new(tx),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn reader(&self) -> CaseStoreReader {
        CaseStoreReader {
            rx: self.tx.subscribe(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Drop all contents and start a new epoch owned by `owner`.
    ///
    /// Any writer handed out before this call stops having an effect.
    pub fn reset(&self, owner: Option<SessionKey>, loading: bool) -> StoreWriter {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(epoch, owner = ?owner, "Store reset");
        self.tx.send_replace(StoreState {
            epoch,
            owner,
            cases: CaseCollection::new(),
            loading,
        });
        StoreWriter {
            tx: Arc::clone(&self.tx),
            epoch,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Writer side
// ═══════════════════════════════════════════════════════════

/// Write access for one epoch. Held by exactly one session task.
#[derive(Debug)]
pub struct StoreWriter {
    tx: Arc<watch::Sender<StoreState>>,
    epoch: u64,
}

impl StoreWriter {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether this writer still addresses the live session.
    pub fn is_current(&self) -> bool {
        self.tx.borrow().epoch == self.epoch
    }

    pub fn merge(&self, case: Case) -> MergeOutcome {
        let mut outcome = MergeOutcome::Unchanged;
        self.tx.send_if_modified(|state| {
            if state.epoch != self.epoch {
                return false;
            }
            outcome = state.cases.merge(case);
            outcome.changed()
        });
        outcome
    }

    pub fn merge_batch(&self, cases: Vec<Case>, superseded: &HashSet<String>) -> BatchSummary {
        let mut summary = BatchSummary::default();
        self.tx.send_if_modified(|state| {
            if state.epoch != self.epoch {
                return false;
            }
            summary = state.cases.merge_batch(cases, superseded);
            summary.changed()
        });
        summary
    }

    pub fn set_loading(&self, loading: bool) {
        self.tx.send_if_modified(|state| {
            if state.epoch != self.epoch || state.loading == loading {
                return false;
            }
            state.loading = loading;
            true
        });
    }
}

// ═══════════════════════════════════════════════════════════
// Reader side
// ═══════════════════════════════════════════════════════════

/// Per-status tallies for dashboards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub ready: usize,
    pub missing_information: usize,
    pub approved: usize,
    pub denied: usize,
    pub other: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.ready + self.missing_information + self.approved + self.denied + self.other
    }
}

/// Read-only view of the store. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct CaseStoreReader {
    rx: watch::Receiver<StoreState>,
}

impl CaseStoreReader {
    /// Ordered collection, newest arrivals first.
    pub fn cases(&self) -> Vec<Case> {
        self.rx.borrow().cases.as_slice().to_vec()
    }

    pub fn len(&self) -> usize {
        self.rx.borrow().cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.borrow().cases.is_empty()
    }

    pub fn is_loading(&self) -> bool {
        self.rx.borrow().loading
    }

    pub fn owner(&self) -> Option<SessionKey> {
        self.rx.borrow().owner.clone()
    }

    /// Full copy of the current state.
    pub fn snapshot(&self) -> StoreState {
        self.rx.borrow().clone()
    }

    pub fn find(&self, case_id: &str) -> Option<Case> {
        self.rx.borrow().cases.get(case_id).cloned()
    }

    /// A subject's cases, most recently created first. Cases without a
    /// parseable `created_at` sort last, keeping their store order.
    pub fn cases_for_subject(&self, subject_id: &str) -> Vec<Case> {
        let mut cases: Vec<Case> = self
            .rx
            .borrow()
            .cases
            .iter()
            .filter(|c| c.patient_id == subject_id)
            .cloned()
            .collect();
        cases.sort_by_key(|c| std::cmp::Reverse(c.created_at_utc()));
        cases
    }

    /// Cases waiting for a reviewer's decision, in store order.
    pub fn review_queue(&self) -> Vec<Case> {
        self.filtered(|c| c.status.is_awaiting_decision())
    }

    pub fn cases_with_status(&self, status: &CaseStatus) -> Vec<Case> {
        self.filtered(|c| &c.status == status)
    }

    pub fn status_counts(&self) -> StatusCounts {
        let state = self.rx.borrow();
        let mut counts = StatusCounts::default();
        for case in state.cases.iter() {
            match case.status {
                CaseStatus::Pending => counts.pending += 1,
                CaseStatus::ApprovedReady => counts.ready += 1,
                CaseStatus::MissingInformation => counts.missing_information += 1,
                CaseStatus::Approved => counts.approved += 1,
                CaseStatus::Denied => counts.denied += 1,
                CaseStatus::Other(_) => counts.other += 1,
            }
        }
        counts
    }

    /// Wait for the next change. Returns `false` once the store is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Mark the current state as seen so `changed()` waits for a newer one.
    pub fn mark_seen(&mut self) {
        self.rx.borrow_and_update();
    }

    fn filtered(&self, keep: impl Fn(&Case) -> bool) -> Vec<Case> {
        self.rx
            .borrow()
            .cases
            .iter()
            .filter(|c| keep(c))
            .cloned()
            .collect()
    }
}
