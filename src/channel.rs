//! Channel resolution: which push topic an identity listens on.
//!
//! Providers get a private topic named after their own identifier.
//! Every insurer shares the single work-queue topic.

use serde::{Deserialize, Serialize};

use crate::models::{Identity, Role};

/// Topic shared by all reviewing actors.
pub const INSURER_QUEUE_TOPIC: &str = "insurer-queue";

/// Prefix of a provider's private topic.
const PROVIDER_TOPIC_PREFIX: &str = "provider-";

/// A push subscription topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic(String);

impl Topic {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether every reviewing actor receives this topic.
    pub fn is_shared(&self) -> bool {
        self.0 == INSURER_QUEUE_TOPIC
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolve the topic for an identity. `None` means "do not subscribe".
pub fn resolve_topic(identity: &Identity) -> Option<Topic> {
    match identity.role()? {
        Role::Provider => {
            let user_id = identity.subject();
            if user_id.is_empty() {
                return None;
            }
            Some(Topic(format!("{PROVIDER_TOPIC_PREFIX}{user_id}")))
        }
        Role::Insurer => Some(Topic(INSURER_QUEUE_TOPIC.to_string())),
    }
}
