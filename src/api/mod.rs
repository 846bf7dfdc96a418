//! Case service collaborators.
//!
//! Thin request/response helpers for creating cases, submitting decisions
//! and bulk reads. The sync engine consumes them through [`CaseApi`] so the
//! transport can be swapped in tests.

pub mod client;
pub mod error;
pub mod types;

pub use client::{CaseApi, HttpCaseApi};
pub use error::ApiError;
pub use types::{DecisionRequest, NewCaseRequest};
