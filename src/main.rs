use preauth_sync::config::{self, SyncConfig};
use preauth_sync::CaseSync;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    preauth_sync::init_tracing();
    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = SyncConfig::from_env()?;
    let identity = config::identity_from_env()?;

    let sync = CaseSync::from_config(&config)?;
    let mut store = sync.store();
    let mut connection = sync.watch_connection();

    sync.sign_in(identity).await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *connection.borrow_and_update();
                tracing::info!(%state, "Connection state");
            }
            alive = store.changed() => {
                if !alive {
                    break;
                }
                let counts = store.status_counts();
                tracing::info!(
                    total = counts.total(),
                    pending = counts.pending,
                    ready = counts.ready,
                    approved = counts.approved,
                    denied = counts.denied,
                    loading = store.is_loading(),
                    "Store updated"
                );
            }
        }
    }

    tracing::info!("Shutting down");
    sync.sign_out().await;
    Ok(())
}
