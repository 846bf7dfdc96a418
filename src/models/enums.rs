use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Error returned when a wire string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid {field} value: {value:?}")]
    InvalidEnum { field: &'static str, value: String },
}

/// Macro to generate enum with as_str + std::str::FromStr pattern.
///
/// The first literal is the canonical wire form; any `| "alias"` literals are
/// accepted when parsing or deserializing.
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal $(| $alias:literal)*),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s $(, alias = $alias)*)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s $(| $alias)* => Ok(Self::$variant)),+,
                    _ => Err(ParseError::InvalidEnum {
                        field: stringify!($name),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(Role {
    Provider => "doctor" | "provider",
    Insurer => "insurer" | "reviewer",
});

str_enum!(Decision {
    Approved => "APPROVED",
    Denied => "DENIED",
});

impl Decision {
    /// Status the server moves a case to once this decision is recorded.
    pub fn resulting_status(self) -> CaseStatus {
        match self {
            Decision::Approved => CaseStatus::Approved,
            Decision::Denied => CaseStatus::Denied,
        }
    }
}

/// Case lifecycle state, always assigned by the server.
///
/// `PENDING → {APPROVED_READY | MISSING_INFORMATION} → {APPROVED | DENIED}`.
/// Statuses this client does not know are preserved verbatim in `Other`
/// so an unfamiliar backend value never causes a push to be dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CaseStatus {
    Pending,
    /// Automated pre-screening finished; queued for a human decision.
    ApprovedReady,
    MissingInformation,
    Approved,
    Denied,
    Other(String),
}

/// Wire spellings the backend has used for the ready-for-review state.
const READY_ALIASES: &[&str] = &["APPROVED_READY", "READY_FOR_REVIEW", "READY_FOR_DECISION"];

impl CaseStatus {
    pub fn as_str(&self) -> &str {
        match self {
            CaseStatus::Pending => "PENDING",
            CaseStatus::ApprovedReady => "APPROVED_READY",
            CaseStatus::MissingInformation => "MISSING_INFORMATION",
            CaseStatus::Approved => "APPROVED",
            CaseStatus::Denied => "DENIED",
            CaseStatus::Other(raw) => raw,
        }
    }

    /// Approved and denied cases never change status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CaseStatus::Approved | CaseStatus::Denied)
    }

    /// Whether the case sits in the reviewers' work queue.
    pub fn is_awaiting_decision(&self) -> bool {
        matches!(self, CaseStatus::ApprovedReady)
    }
}

impl From<&str> for CaseStatus {
    fn from(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_uppercase();
        match normalized.as_str() {
            "PENDING" => CaseStatus::Pending,
            s if READY_ALIASES.contains(&s) => CaseStatus::ApprovedReady,
            "MISSING_INFORMATION" | "MISSING_INFO" => CaseStatus::MissingInformation,
            "APPROVED" => CaseStatus::Approved,
            "DENIED" => CaseStatus::Denied,
            _ => CaseStatus::Other(raw.to_string()),
        }
    }
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CaseStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CaseStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(CaseStatus::from(raw.as_str()))
    }
}
