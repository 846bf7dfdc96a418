//! Request bodies for the case service.

use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::models::Decision;

/// Body of `POST /create-pre-auth`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCaseRequest {
    pub provider_id: String,
    pub patient_id: String,
    pub procedure_code: String,
}

impl NewCaseRequest {
    pub fn new(
        provider_id: impl Into<String>,
        patient_id: impl Into<String>,
        procedure_code: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            patient_id: patient_id.into(),
            procedure_code: procedure_code.into(),
        }
    }

    /// Reject requests the server would refuse anyway.
    pub fn validate(&self) -> Result<(), ApiError> {
        for (field, value) in [
            ("provider_id", &self.provider_id),
            ("patient_id", &self.patient_id),
            ("procedure_code", &self.procedure_code),
        ] {
            if value.trim().is_empty() {
                return Err(ApiError::InvalidRequest(format!("{field} is required")));
            }
        }
        Ok(())
    }
}

/// Body of `POST /submit-decision`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub case_id: String,
    pub decision: Decision,
    #[serde(default)]
    pub notes: String,
}

impl DecisionRequest {
    pub fn new(case_id: impl Into<String>, decision: Decision, notes: impl Into<String>) -> Self {
        Self {
            case_id: case_id.into(),
            decision,
            notes: notes.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        if self.case_id.trim().is_empty() {
            return Err(ApiError::InvalidRequest("case_id is required".into()));
        }
        Ok(())
    }
}
