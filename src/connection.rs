//! Streaming connection manager.
//!
//! One [`Subscription`] per signed-in identity. It owns a background task
//! that walks the connection state machine:
//!
//! ```text
//! Idle → Connecting → Open → Reconnecting → Connecting → ...
//!   any ─────────────────────────────────────────────→ Closed
//! ```
//!
//! The same task is the store's only writer for its session: push frames,
//! snapshot results and on-demand backfills are all merged from its loop,
//! one message at a time. Snapshot reads run on a helper task and report
//! back through the loop's command channel. On-demand reads register a
//! [`BackfillTicket`] before they start, so a push that lands while the read
//! is in flight is not reverted by the older copy it returns.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::api::{ApiError, CaseApi};
use crate::channel::Topic;
use crate::config::ReconnectPolicy;
use crate::models::{Case, CaseStatus, SessionKey};
use crate::reconcile::decode_push;
use crate::snapshot::{load_snapshot, snapshot_statuses};
use crate::store::StoreWriter;
use crate::transport::{CaseTransport, PushStream};

// ═══════════════════════════════════════════════════════════
// State
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Messages the session loop accepts besides push frames.
#[derive(Debug)]
enum SessionCommand {
    /// Open a ticket for an on-demand read that is about to start.
    BeginBackfill { reply: oneshot::Sender<u64> },
    /// On-demand read results to merge.
    Backfill { ticket: u64, cases: Vec<Case> },
    /// The read behind `ticket` failed or was given up.
    AbandonBackfill { ticket: u64 },
    /// A snapshot read finished. `generation` ties it to one `Open`.
    SnapshotLoaded {
        generation: u64,
        result: Result<Vec<Case>, ApiError>,
    },
}

// ═══════════════════════════════════════════════════════════
// Subscription handle
// ═══════════════════════════════════════════════════════════

/// Live subscription for one session. Dropping it stops the task;
/// [`Subscription::close`] additionally waits for it to finish.
pub struct Subscription {
    key: SessionKey,
    topic: Topic,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Spawn the session task. State transitions are published on `state_tx`.
    pub fn start<A, T>(
        key: SessionKey,
        topic: Topic,
        api: Arc<A>,
        transport: Arc<T>,
        writer: StoreWriter,
        policy: ReconnectPolicy,
        state_tx: Arc<watch::Sender<ConnectionState>>,
    ) -> Self
    where
        A: CaseApi,
        T: CaseTransport,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let state_rx = state_tx.subscribe();
        let session_id = uuid::Uuid::new_v4();

        let worker = SessionWorker {
            statuses: snapshot_statuses(key.role),
            topic: topic.clone(),
            api,
            transport,
            writer,
            policy,
            state_tx,
            shutdown_rx,
            commands_rx,
            commands_tx: commands_tx.clone(),
            snapshot: None,
            generation: 0,
            superseded: None,
            next_ticket: 0,
            backfills: HashMap::new(),
        };

        let span = tracing::info_span!("subscription", %topic, session = %key, %session_id);
        let task = tokio::spawn(worker.run().instrument(span));

        Self {
            key,
            topic,
            state_rx,
            shutdown_tx,
            commands: commands_tx,
            task: Some(task),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Register an on-demand read with the session loop. Call before issuing
    /// the read. `None` if the session has already stopped.
    pub async fn begin_backfill(&self) -> Option<BackfillTicket> {
        let (reply, registered) = oneshot::channel();
        self.commands.send(SessionCommand::BeginBackfill { reply }).ok()?;
        let id = registered.await.ok()?;
        Some(BackfillTicket {
            id,
            commands: self.commands.clone(),
            finished: false,
        })
    }

    /// Stop the session: cancel any retry timer, drop the live transport and
    /// wait until the task has exited. Nothing is merged afterwards.
    pub async fn close(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::error!(topic = %self.topic, error = %e, "Subscription task panicked");
                }
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = self.shutdown_tx.send(true);
            task.abort();
        }
    }
}

/// An on-demand read registered with a session loop.
///
/// Case ids pushed while the ticket is open are skipped when its results are
/// merged. Dropping an unfinished ticket releases it.
pub struct BackfillTicket {
    id: u64,
    commands: mpsc::UnboundedSender<SessionCommand>,
    finished: bool,
}

impl BackfillTicket {
    /// Hand the read results to the session loop for merging.
    /// Returns `false` if the session has stopped in the meantime.
    pub fn complete(mut self, cases: Vec<Case>) -> bool {
        self.finished = true;
        self.commands
            .send(SessionCommand::Backfill { ticket: self.id, cases })
            .is_ok()
    }
}

impl Drop for BackfillTicket {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.commands.send(SessionCommand::AbandonBackfill { ticket: self.id });
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Session loop
// ═══════════════════════════════════════════════════════════

/// Why the read loop of an open connection returned.
enum PumpExit {
    Shutdown,
    Dropped,
}

struct SessionWorker<A, T> {
    statuses: Vec<CaseStatus>,
    topic: Topic,
    api: Arc<A>,
    transport: Arc<T>,
    writer: StoreWriter,
    policy: ReconnectPolicy,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    shutdown_rx: watch::Receiver<bool>,
    commands_rx: mpsc::UnboundedReceiver<SessionCommand>,
    commands_tx: mpsc::UnboundedSender<SessionCommand>,
    snapshot: Option<JoinHandle<()>>,
    generation: u64,
    /// Case ids pushed while the current snapshot read is in flight.
    superseded: Option<HashSet<String>>,
    next_ticket: u64,
    /// Open backfill tickets and the case ids pushed since each was opened.
    backfills: HashMap<u64, HashSet<String>>,
}

/// Resolves once shutdown is requested or the handle is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

impl<A: CaseApi, T: CaseTransport> SessionWorker<A, T> {
    async fn run(mut self) {
        let mut attempt: u32 = 0;

        'session: loop {
            self.set_state(ConnectionState::Connecting);

            let transport = Arc::clone(&self.transport);
            let topic = self.topic.clone();
            let connect = transport.connect(&topic);
            tokio::pin!(connect);

            let connected = loop {
                tokio::select! {
                    biased;
                    _ = shutdown_requested(&mut self.shutdown_rx) => break 'session,
                    result = &mut connect => break result,
                    Some(command) = self.commands_rx.recv() => self.handle_command(command),
                }
            };

            match connected {
                Ok(stream) => {
                    attempt = 0;
                    self.set_state(ConnectionState::Open);
                    tracing::info!("Subscription open");
                    if let PumpExit::Shutdown = self.pump(stream).await {
                        break 'session;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Subscription connect failed");
                }
            }

            self.cancel_snapshot();
            attempt = attempt.saturating_add(1);
            let delay = self.policy.delay_for(attempt);
            self.set_state(ConnectionState::Reconnecting);
            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            tracing::info!(attempt, delay_ms, "Scheduling reconnect");

            let retry = tokio::time::sleep(delay);
            tokio::pin!(retry);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_requested(&mut self.shutdown_rx) => break 'session,
                    _ = &mut retry => break,
                    Some(command) = self.commands_rx.recv() => self.handle_command(command),
                }
            }
        }

        self.cancel_snapshot();
        self.set_state(ConnectionState::Closed);
        tracing::info!("Subscription closed");
    }

    /// Read frames until the connection drops or shutdown is requested.
    async fn pump(&mut self, mut stream: PushStream) -> PumpExit {
        self.begin_snapshot();

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown_rx) => return PumpExit::Shutdown,
                Some(command) = self.commands_rx.recv() => self.handle_command(command),
                frame = stream.next() => match frame {
                    Some(Ok(text)) => self.apply_push(&text),
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Subscription dropped");
                        return PumpExit::Dropped;
                    }
                    None => {
                        tracing::info!("Subscription closed by server");
                        return PumpExit::Dropped;
                    }
                },
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Connection state");
        }
    }

    fn begin_snapshot(&mut self) {
        self.generation += 1;

        if self.statuses.is_empty() {
            self.superseded = None;
            self.writer.set_loading(false);
            return;
        }

        self.writer.set_loading(true);
        self.superseded = Some(HashSet::new());

        let api = Arc::clone(&self.api);
        let statuses = self.statuses.clone();
        let reply = self.commands_tx.clone();
        let generation = self.generation;
        let handle = tokio::spawn(
            async move {
                let result = load_snapshot(api.as_ref(), &statuses).await;
                let _ = reply.send(SessionCommand::SnapshotLoaded { generation, result });
            }
            .in_current_span(),
        );
        self.snapshot = Some(handle);
    }

    fn cancel_snapshot(&mut self) {
        if let Some(handle) = self.snapshot.take() {
            handle.abort();
        }
        self.superseded = None;
    }

    fn apply_push(&mut self, frame: &str) {
        let case = match decode_push(frame) {
            Ok(case) => case,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed push message");
                return;
            }
        };

        if let Some(superseded) = self.superseded.as_mut() {
            superseded.insert(case.case_id.clone());
        }
        for pushed in self.backfills.values_mut() {
            pushed.insert(case.case_id.clone());
        }

        let case_id = case.case_id.clone();
        let status = case.status.clone();
        let outcome = self.writer.merge(case);
        tracing::debug!(case_id = %case_id, status = %status, ?outcome, "Push merged");
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::BeginBackfill { reply } => {
                self.next_ticket += 1;
                let ticket = self.next_ticket;
                self.backfills.insert(ticket, HashSet::new());
                if reply.send(ticket).is_err() {
                    self.backfills.remove(&ticket);
                }
            }
            SessionCommand::Backfill { ticket, cases } => {
                let pushed = self.backfills.remove(&ticket).unwrap_or_default();
                let count = cases.len();
                let summary = self.writer.merge_batch(cases, &pushed);
                tracing::debug!(ticket, count, ?summary, "Backfill merged");
            }
            SessionCommand::AbandonBackfill { ticket } => {
                self.backfills.remove(&ticket);
                tracing::debug!(ticket, "Backfill abandoned");
            }
            SessionCommand::SnapshotLoaded { generation, result } => {
                if generation != self.generation || self.snapshot.is_none() {
                    tracing::debug!(generation, "Ignoring stale snapshot result");
                    return;
                }
                self.snapshot = None;
                let superseded = self.superseded.take().unwrap_or_default();
                match result {
                    Ok(cases) => {
                        let count = cases.len();
                        let summary = self.writer.merge_batch(cases, &superseded);
                        tracing::info!(
                            count,
                            inserted = summary.inserted,
                            skipped = summary.skipped,
                            "Snapshot loaded"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Snapshot load failed");
                    }
                }
                self.writer.set_loading(false);
            }
        }
    }
}
