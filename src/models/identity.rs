use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::enums::Role;

/// An authenticated actor as handed over by the auth layer.
///
/// `role` is kept as the raw claim; identities whose role this client does
/// not recognize are valid but get no subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub role: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: role.into(),
        }
    }

    pub fn provider(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Provider.as_str())
    }

    pub fn insurer(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Insurer.as_str())
    }

    /// The identifier with surrounding whitespace removed. Topics and
    /// session keys are both derived from this.
    pub fn subject(&self) -> &str {
        self.user_id.trim()
    }

    /// Recognized role, if any.
    pub fn role(&self) -> Option<Role> {
        Role::from_str(self.role.trim()).ok()
    }

    /// Structured key for the per-session store. `None` for unrecognized roles.
    pub fn session_key(&self) -> Option<SessionKey> {
        Some(SessionKey {
            role: self.role()?,
            user_id: self.subject().to_string(),
        })
    }

    /// Whether both identities map to the same store session.
    /// Unrecognized roles only match an identical identity.
    pub fn same_session(&self, other: &Identity) -> bool {
        match (self.session_key(), other.session_key()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }
}

/// `(role, identifier)` pair that owns one synchronized store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub role: Role,
    pub user_id: String,
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.role, self.user_id)
    }
}
