use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::enums::CaseStatus;

/// A pre-authorization request tracked through its status lifecycle.
///
/// Every push message carries one full `Case`; there are no partial updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub case_id: String,
    #[serde(default)]
    pub provider_id: String,
    #[serde(default)]
    pub patient_id: String,
    #[serde(default)]
    pub procedure_code: String,
    pub status: CaseStatus,
    /// Filled in by the backend's automated analysis step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<CaseAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_notes: Option<String>,
}

impl Case {
    /// Reviewer rationale, wherever the backend put it.
    pub fn decision_notes(&self) -> Option<&str> {
        self.decision_notes
            .as_deref()
            .or_else(|| self.analysis.as_ref()?.insurer_decision_notes.as_deref())
    }

    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        self.created_at.as_deref().and_then(parse_timestamp)
    }

    pub fn last_updated_utc(&self) -> Option<DateTime<Utc>> {
        self.last_updated.as_deref().and_then(parse_timestamp)
    }
}

/// Outcome of one screening criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionResult {
    pub met: bool,
    #[serde(default)]
    pub evidence: String,
}

/// Automated analysis attached to a case.
///
/// On the wire this is a flat JSON object: criterion names map to
/// `{met, evidence}` objects, alongside the optional reserved keys
/// `error` and `insurer_decision_notes`. Entries that are neither are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseAnalysis {
    pub criteria: BTreeMap<String, CriterionResult>,
    pub error: Option<String>,
    pub insurer_decision_notes: Option<String>,
}

impl CaseAnalysis {
    /// No criteria evaluated yet and no failure reported.
    pub fn is_pending(&self) -> bool {
        self.criteria.is_empty() && self.error.is_none()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn criteria(&self) -> impl Iterator<Item = (&str, &CriterionResult)> {
        self.criteria.iter().map(|(name, result)| (name.as_str(), result))
    }

    pub fn unmet_criteria(&self) -> Vec<&str> {
        self.criteria
            .iter()
            .filter(|(_, result)| !result.met)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Build from the flat wire object. Non-objects yield an empty analysis.
    pub fn from_value(value: serde_json::Value) -> Self {
        let serde_json::Value::Object(map) = value else {
            return Self::default();
        };

        let mut analysis = Self::default();
        for (key, value) in map {
            match key.as_str() {
                "error" => analysis.error = value_to_text(value),
                "insurer_decision_notes" => analysis.insurer_decision_notes = value_to_text(value),
                _ => {
                    if let Ok(result) = serde_json::from_value::<CriterionResult>(value) {
                        analysis.criteria.insert(key, result);
                    }
                }
            }
        }
        analysis
    }
}

fn value_to_text(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

impl Serialize for CaseAnalysis {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let extra = usize::from(self.error.is_some())
            + usize::from(self.insurer_decision_notes.is_some());
        let mut map = serializer.serialize_map(Some(self.criteria.len() + extra))?;
        for (name, result) in &self.criteria {
            map.serialize_entry(name, result)?;
        }
        if let Some(error) = &self.error {
            map.serialize_entry("error", error)?;
        }
        if let Some(notes) = &self.insurer_decision_notes {
            map.serialize_entry("insurer_decision_notes", notes)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CaseAnalysis {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(Self::from_value(value))
    }
}

/// Parse a backend timestamp.
///
/// Accepts RFC 3339 and naive ISO-8601 (`2025-10-12T09:30:00.123456`),
/// treating naive values as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
