//! Snapshot loading: the bulk-read baseline taken each time a subscription opens.

use futures_util::future::try_join_all;

use crate::api::{ApiError, CaseApi};
use crate::models::{Case, CaseStatus, Role};

/// Statuses a role reads when its subscription opens.
///
/// Providers read nothing up front; their per-subject history is pulled on
/// demand. Reviewers read the work queue plus both terminal states.
pub fn snapshot_statuses(role: Role) -> Vec<CaseStatus> {
    match role {
        Role::Provider => Vec::new(),
        Role::Insurer => vec![
            CaseStatus::ApprovedReady,
            CaseStatus::Approved,
            CaseStatus::Denied,
        ],
    }
}

/// Read every status in parallel and concatenate the results in status order.
///
/// Any single failed read fails the whole snapshot; partial baselines are
/// never merged.
pub async fn load_snapshot<A: CaseApi>(api: &A, statuses: &[CaseStatus]) -> Result<Vec<Case>, ApiError> {
    if statuses.is_empty() {
        return Ok(Vec::new());
    }
    let batches = try_join_all(statuses.iter().map(move |status| api.cases_by_status(status))).await?;
    Ok(batches.into_iter().flatten().collect())
}
