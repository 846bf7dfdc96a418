//! Test doubles shared by the unit tests: a case builder, an in-memory
//! `CaseApi`, a scripted `CaseTransport` and an axum mock of the case service.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::api::{ApiError, CaseApi, DecisionRequest, NewCaseRequest};
use crate::channel::{Topic, INSURER_QUEUE_TOPIC};
use crate::models::{Case, CaseStatus};
use crate::transport::{CaseTransport, PushStream, TransportError};

pub fn case(id: &str, patient_id: &str, status: CaseStatus) -> Case {
    Case {
        case_id: id.to_string(),
        provider_id: "dr.smith@clinic.test".to_string(),
        patient_id: patient_id.to_string(),
        procedure_code: "72148".to_string(),
        status,
        analysis: None,
        created_at: Some("2025-10-12T09:30:00Z".to_string()),
        last_updated: None,
        decision_notes: None,
    }
}

fn upsert(cases: &mut Vec<Case>, case: Case) {
    match cases.iter_mut().find(|c| c.case_id == case.case_id) {
        Some(existing) => *existing = case,
        None => cases.push(case),
    }
}

fn new_pending_case(request: &NewCaseRequest) -> Case {
    Case {
        case_id: uuid::Uuid::new_v4().to_string(),
        provider_id: request.provider_id.clone(),
        patient_id: request.patient_id.clone(),
        procedure_code: request.procedure_code.clone(),
        status: CaseStatus::Pending,
        analysis: None,
        created_at: Some(chrono::Utc::now().to_rfc3339()),
        last_updated: None,
        decision_notes: None,
    }
}

// ═══════════════════════════════════════════════════════════
// In-memory CaseApi
// ═══════════════════════════════════════════════════════════

pub struct MockCaseApi {
    cases: Mutex<Vec<Case>>,
    fail: AtomicBool,
    reads_open: watch::Sender<bool>,
    status_reads: AtomicUsize,
    subject_reads: AtomicUsize,
}

impl MockCaseApi {
    pub fn new() -> Self {
        let (reads_open, _) = watch::channel(true);
        Self {
            cases: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            reads_open,
            status_reads: AtomicUsize::new(0),
            subject_reads: AtomicUsize::new(0),
        }
    }

    pub fn insert(&self, case: Case) {
        upsert(&mut self.cases.lock().unwrap(), case);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Block bulk reads until [`MockCaseApi::release_reads`].
    pub fn hold_reads(&self) {
        self.reads_open.send_replace(false);
    }

    pub fn release_reads(&self) {
        self.reads_open.send_replace(true);
    }

    pub fn status_reads(&self) -> usize {
        self.status_reads.load(Ordering::SeqCst)
    }

    pub fn subject_reads(&self) -> usize {
        self.subject_reads.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> Result<(), ApiError> {
        let mut open = self.reads_open.subscribe();
        let _ = open.wait_for(|open| *open).await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(ApiError::Connection("mock".into()));
        }
        Ok(())
    }

    fn select(&self, keep: impl Fn(&Case) -> bool) -> Vec<Case> {
        self.cases
            .lock()
            .unwrap()
            .iter()
            .filter(|c| keep(c))
            .cloned()
            .collect()
    }
}

impl CaseApi for MockCaseApi {
    async fn create_case(&self, request: &NewCaseRequest) -> Result<Case, ApiError> {
        request.validate()?;
        let case = new_pending_case(request);
        self.insert(case.clone());
        Ok(case)
    }

    async fn submit_decision(&self, request: &DecisionRequest) -> Result<Case, ApiError> {
        request.validate()?;
        let mut cases = self.cases.lock().unwrap();
        let Some(case) = cases.iter_mut().find(|c| c.case_id == request.case_id) else {
            return Err(ApiError::Rejected {
                status: 404,
                detail: "Case not found".into(),
            });
        };
        case.status = request.decision.resulting_status();
        case.decision_notes = Some(request.notes.clone());
        Ok(case.clone())
    }

    async fn cases_by_subject(&self, subject_id: &str) -> Result<Vec<Case>, ApiError> {
        self.subject_reads.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        Ok(self.select(|c| c.patient_id == subject_id))
    }

    async fn cases_by_status(&self, status: &CaseStatus) -> Result<Vec<Case>, ApiError> {
        self.status_reads.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        Ok(self.select(|c| &c.status == status))
    }
}

// ═══════════════════════════════════════════════════════════
// Scripted transport
// ═══════════════════════════════════════════════════════════

/// Transport whose connect attempts are answered by the test.
pub struct ScriptedTransport {
    attempts: mpsc::UnboundedSender<ConnectAttempt>,
}

/// One pending `connect` call.
pub struct ConnectAttempt {
    topic: Topic,
    reply: oneshot::Sender<Result<PushStream, TransportError>>,
}

pub type PushFeed = mpsc::UnboundedSender<Result<String, TransportError>>;

impl ScriptedTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConnectAttempt>) {
        let (attempts, rx) = mpsc::unbounded_channel();
        (Self { attempts }, rx)
    }
}

impl ConnectAttempt {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Open the connection. Frames sent on the returned feed are delivered
    /// in order; dropping it closes the stream.
    pub fn accept(self) -> PushFeed {
        let (feed, rx) = mpsc::unbounded_channel();
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();
        let _ = self.reply.send(Ok(stream));
        feed
    }

    pub fn reject(self, reason: &str) {
        let _ = self.reply.send(Err(TransportError::Connect(reason.to_string())));
    }
}

impl CaseTransport for ScriptedTransport {
    async fn connect(&self, topic: &Topic) -> Result<PushStream, TransportError> {
        let (reply, answer) = oneshot::channel();
        self.attempts
            .send(ConnectAttempt {
                topic: topic.clone(),
                reply,
            })
            .map_err(|_| TransportError::Connect("script finished".into()))?;
        answer
            .await
            .map_err(|_| TransportError::Connect("attempt abandoned".into()))?
    }
}

// ═══════════════════════════════════════════════════════════
// Mock case service (HTTP + WebSocket)
// ═══════════════════════════════════════════════════════════

struct BackendState {
    cases: Mutex<Vec<Case>>,
    events: broadcast::Sender<(String, String)>,
    kick: broadcast::Sender<()>,
    ws_connections: AtomicUsize,
}

impl BackendState {
    fn publish(&self, topic: &str, case: &Case) {
        if let Ok(json) = serde_json::to_string(case) {
            let _ = self.events.send((topic.to_string(), json));
        }
    }

    /// Deliver to the submitting provider and, once past `PENDING`, to reviewers.
    fn fan_out(&self, case: &Case) {
        self.publish(&format!("provider-{}", case.provider_id), case);
        if case.status != CaseStatus::Pending {
            self.publish(INSURER_QUEUE_TOPIC, case);
        }
    }
}

/// Stand-in for the case service on `127.0.0.1:<random>`.
pub struct MockBackend {
    addr: SocketAddr,
    state: Arc<BackendState>,
    shutdown: oneshot::Sender<()>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let (events, _) = broadcast::channel(256);
        let (kick, _) = broadcast::channel(4);
        let state = Arc::new(BackendState {
            cases: Mutex::new(Vec::new()),
            events,
            kick,
            ws_connections: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/create-pre-auth", post(create_case))
            .route("/submit-decision", post(submit_decision))
            .route("/get-cases-by-patient/:subject_id", get(cases_by_patient))
            .route("/get-cases-by-status/:status", get(cases_by_status))
            .route("/ws/:topic", get(ws_upgrade))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, signal) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = signal.await;
                })
                .await;
        });

        Self {
            addr,
            state,
            shutdown,
        }
    }

    pub fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn insert(&self, case: Case) {
        upsert(&mut self.state.cases.lock().unwrap(), case);
    }

    pub fn case_count(&self) -> usize {
        self.state.cases.lock().unwrap().len()
    }

    pub fn ws_connections(&self) -> usize {
        self.state.ws_connections.load(Ordering::SeqCst)
    }

    /// Store `case` and deliver it on `topic` only.
    pub fn push(&self, topic: &str, case: Case) {
        self.insert(case.clone());
        self.state.publish(topic, &case);
    }

    /// Deliver an arbitrary text frame on `topic`.
    pub fn push_raw(&self, topic: &str, frame: &str) {
        let _ = self.state.events.send((topic.to_string(), frame.to_string()));
    }

    /// Server-side status change (e.g. analysis finished), fanned out like the real service.
    pub fn advance(&self, case_id: &str, status: CaseStatus) -> Option<Case> {
        let updated = {
            let mut cases = self.state.cases.lock().unwrap();
            let case = cases.iter_mut().find(|c| c.case_id == case_id)?;
            case.status = status;
            case.clone()
        };
        self.state.fan_out(&updated);
        Some(updated)
    }

    /// Close every open WebSocket.
    pub fn disconnect_all(&self) {
        let _ = self.state.kick.send(());
    }

    pub fn shutdown(self) {
        self.disconnect_all();
        let _ = self.shutdown.send(());
    }
}

type Shared = State<Arc<BackendState>>;

async fn create_case(State(state): Shared, Json(request): Json<NewCaseRequest>) -> impl IntoResponse {
    if let Err(e) = request.validate() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "detail": e.to_string() })),
        )
            .into_response();
    }
    let case = new_pending_case(&request);
    upsert(&mut state.cases.lock().unwrap(), case.clone());
    state.fan_out(&case);
    Json(case).into_response()
}

async fn submit_decision(State(state): Shared, Json(request): Json<DecisionRequest>) -> impl IntoResponse {
    let updated = {
        let mut cases = state.cases.lock().unwrap();
        match cases.iter_mut().find(|c| c.case_id == request.case_id) {
            Some(case) => {
                case.status = request.decision.resulting_status();
                case.decision_notes = Some(request.notes.clone());
                case.clone()
            }
            None => {
                return (
                    StatusCode::NOT_FOUND,
                    Json(serde_json::json!({ "detail": "Case not found" })),
                )
                    .into_response()
            }
        }
    };
    state.fan_out(&updated);
    Json(updated).into_response()
}

async fn cases_by_patient(State(state): Shared, Path(subject_id): Path<String>) -> Json<Vec<Case>> {
    let cases = state.cases.lock().unwrap();
    Json(cases.iter().filter(|c| c.patient_id == subject_id).cloned().collect())
}

async fn cases_by_status(State(state): Shared, Path(status): Path<String>) -> Json<Vec<Case>> {
    let status = CaseStatus::from(status.as_str());
    let cases = state.cases.lock().unwrap();
    Json(cases.iter().filter(|c| c.status == status).cloned().collect())
}

async fn ws_upgrade(ws: WebSocketUpgrade, Path(topic): Path<String>, State(state): Shared) -> impl IntoResponse {
    // Subscribe before the handshake completes so nothing published after
    // the client sees the connection open is missed.
    let events = state.events.subscribe();
    let kick = state.kick.subscribe();
    state.ws_connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| serve_topic(socket, topic, events, kick))
}

async fn serve_topic(
    mut socket: WebSocket,
    topic: String,
    mut events: broadcast::Receiver<(String, String)>,
    mut kick: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok((target, frame)) if target == topic => {
                    if socket.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = kick.recv() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
        }
    }
}
