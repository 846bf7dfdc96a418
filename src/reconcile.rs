//! Reconciliation: merging incoming case records into the local ordered list.
//!
//! Rules, applied to every record whatever its source:
//! - unknown `case_id` → prepend (newest arrivals first)
//! - known `case_id` → replace in place, position unchanged
//!
//! The latest record for a `case_id` always wins (arrival order, no versions).
//! Merging the same record twice is a no-op the second time.

use std::collections::HashSet;

use crate::models::Case;

/// What a single merge did to the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
    Unchanged,
}

impl MergeOutcome {
    pub fn changed(self) -> bool {
        !matches!(self, MergeOutcome::Unchanged)
    }
}

/// Why a push frame was dropped instead of merged.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("Push frame is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("Push message has no usable case_id")]
    MissingCaseId,
    #[error("Push message is not a case record: {0}")]
    Malformed(String),
}

/// Decode one push frame into a case record.
///
/// Frames without a non-empty string `case_id` are rejected rather than
/// merged under a guessed key.
pub fn decode_push(frame: &str) -> Result<Case, PushError> {
    let value: serde_json::Value =
        serde_json::from_str(frame).map_err(|e| PushError::InvalidJson(e.to_string()))?;

    match value.get("case_id") {
        Some(serde_json::Value::String(id)) if !id.trim().is_empty() => {}
        _ => return Err(PushError::MissingCaseId),
    }

    serde_json::from_value(value).map_err(|e| PushError::Malformed(e.to_string()))
}

/// Ordered, de-duplicated case list. Newest arrivals first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaseCollection {
    cases: Vec<Case>,
}

impl CaseCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn as_slice(&self) -> &[Case] {
        &self.cases
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Case> {
        self.cases.iter()
    }

    pub fn get(&self, case_id: &str) -> Option<&Case> {
        self.cases.iter().find(|c| c.case_id == case_id)
    }

    pub fn contains(&self, case_id: &str) -> bool {
        self.position(case_id).is_some()
    }

    fn position(&self, case_id: &str) -> Option<usize> {
        self.cases.iter().position(|c| c.case_id == case_id)
    }

    /// Merge one record (insert-if-absent, replace-if-present).
    pub fn merge(&mut self, incoming: Case) -> MergeOutcome {
        match self.position(&incoming.case_id) {
            Some(idx) if self.cases[idx] == incoming => MergeOutcome::Unchanged,
            Some(idx) => {
                self.cases[idx] = incoming;
                MergeOutcome::Updated
            }
            None => {
                self.cases.insert(0, incoming);
                MergeOutcome::Inserted
            }
        }
    }

    /// Merge a bulk read so that new records keep the order they were
    /// returned in, ahead of what is already held.
    ///
    /// Records whose `case_id` is in `superseded` are skipped: a push for
    /// them arrived after the read was issued and is the more recent copy.
    /// Duplicate ids inside the batch resolve to the last occurrence.
    pub fn merge_batch(&mut self, batch: Vec<Case>, superseded: &HashSet<String>) -> BatchSummary {
        let mut summary = BatchSummary::default();
        let mut seen = HashSet::new();

        // Walk backwards so prepends leave the batch in its original order.
        let mut latest_first: Vec<Case> = Vec::with_capacity(batch.len());
        for case in batch.into_iter().rev() {
            if seen.insert(case.case_id.clone()) {
                latest_first.push(case);
            }
        }

        for case in latest_first {
            if superseded.contains(&case.case_id) {
                summary.skipped += 1;
                continue;
            }
            match self.merge(case) {
                MergeOutcome::Inserted => summary.inserted += 1,
                MergeOutcome::Updated => summary.updated += 1,
                MergeOutcome::Unchanged => summary.unchanged += 1,
            }
        }
        summary
    }

    pub fn clear(&mut self) {
        self.cases.clear();
    }
}

impl<'a> IntoIterator for &'a CaseCollection {
    type Item = &'a Case;
    type IntoIter = std::slice::Iter<'a, Case>;

    fn into_iter(self) -> Self::IntoIter {
        self.cases.iter()
    }
}

/// Counts from a [`CaseCollection::merge_batch`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

impl BatchSummary {
    pub fn changed(&self) -> bool {
        self.inserted + self.updated > 0
    }
}
