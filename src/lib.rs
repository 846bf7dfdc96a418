pub mod api;
pub mod channel; // Topic resolution per identity
pub mod config;
pub mod connection; // Subscription state machine + session loop
pub mod models;
pub mod reconcile; // Merge rules for incoming case records
pub mod snapshot;
pub mod store;
pub mod sync; // CaseSync facade
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{ApiError, CaseApi, HttpCaseApi};
pub use channel::{resolve_topic, Topic};
pub use config::{ReconnectPolicy, SyncConfig};
pub use connection::{BackfillTicket, ConnectionState, Subscription};
pub use models::{Case, CaseAnalysis, CaseStatus, Decision, Identity, Role, SessionKey};
pub use store::{CaseStore, CaseStoreReader, StatusCounts};
pub use sync::{CaseSync, SetupError};
pub use transport::{CaseTransport, TransportError, WsTransport};

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();
}
