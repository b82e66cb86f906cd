//! Pulse Gatekeeper: HTTP front end for live risk scoring
//!
//! Features:
//! - Explicit session lifecycle (create / list / delete)
//! - SIMD-JSON snapshot ingestion, one tick at a time per session
//! - Non-blocking alert forwarding to webhook sinks
//! - Hourly-rotated JSONL history written off the request path
//! - Prometheus metrics

use axum::{
    Json, Router,
    body::Bytes,
    extract::{FromRequest, Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use clap::Parser;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use once_cell::sync::Lazy;
use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, IntCounter, Opts, TextEncoder,
};
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use pulse_core::{
    AlertRecord, AttributionRecord, MetricSnapshot, MonitorSession, Phase, PipelineOutput,
    PulseConfig, PulseError, SessionRegistry, TickOutcome, forwarder::AlertForwarder,
};

// ============================================================================
// METRICS
// ============================================================================

pub static TICKS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("pulse_ticks_total", "Total snapshots ingested").unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static ALERTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    let c = CounterVec::new(
        Opts::new("pulse_alerts_total", "Total alerts fired"),
        &["severity"],
    )
    .unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static DROPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    let c = CounterVec::new(
        Opts::new(
            "pulse_dropped_total",
            "Alerts and history lines dropped due to backpressure",
        ),
        &["queue"],
    )
    .unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static SCORING_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    let h = Histogram::with_opts(HistogramOpts::new(
        "pulse_scoring_duration_seconds",
        "Histogram of per-tick processing latency",
    ))
    .unwrap();
    prometheus::register(Box::new(h.clone())).unwrap();
    h
});

pub static ACTIVE_SESSIONS: Lazy<Gauge> = Lazy::new(|| {
    let g = Gauge::new("pulse_active_sessions", "Number of live sessions").unwrap();
    prometheus::register(Box::new(g.clone())).unwrap();
    g
});

pub static RISK_SCORE: Lazy<GaugeVec> = Lazy::new(|| {
    let g = GaugeVec::new(
        Opts::new("pulse_risk_score", "Latest calibrated risk score per session"),
        &["session"],
    )
    .unwrap();
    prometheus::register(Box::new(g.clone())).unwrap();
    g
});

// ============================================================================
// DATA TYPES
// ============================================================================

/// External API: create a session
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSessionRequest {
    /// Session id; a UUID is generated when absent
    #[serde(default)]
    pub id: Option<String>,
    /// Fixed forest seed for this session
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub phase: Phase,
    pub last_score: Option<u8>,
    pub ticks: u64,
    pub alerts: usize,
    pub created_at: DateTime<Utc>,
}

impl SessionSummary {
    fn from_session(session: &MonitorSession) -> Self {
        Self {
            id: session.id().to_string(),
            phase: session.phase(),
            last_score: session
                .last_output()
                .filter(|o| o.is_scoring())
                .map(|o| o.score),
            ticks: session.ticks_seen(),
            alerts: session.alert_engine().log_len(),
            created_at: session.created_at(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    #[serde(flatten)]
    pub summary: SessionSummary,
    pub history_len: usize,
    pub output: Option<PipelineOutput>,
    pub attribution: Vec<AttributionRecord>,
}

/// One line of the JSONL history
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryLine<'a> {
    session: &'a str,
    snapshot: &'a MetricSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<&'a PipelineOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    alert: Option<&'a AlertRecord>,
}

/// Application state
#[derive(Clone)]
struct AppState {
    config: Arc<PulseConfig>,
    sessions: Arc<Mutex<SessionRegistry<MonitorSession>>>,
    forwarder: Arc<AlertForwarder>,
    history_tx: Option<Sender<String>>,
}

// ============================================================================
// ERRORS
// ============================================================================

struct ApiError(PulseError);

impl From<PulseError> for ApiError {
    fn from(e: PulseError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PulseError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            PulseError::SessionExists(_) | PulseError::OutOfOrderTick { .. } => {
                StatusCode::CONFLICT
            }
            PulseError::IncompleteSnapshot { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// SIMD-JSON EXTRACTOR
// ============================================================================

struct SimdJson<T>(T);

impl<T, S> FromRequest<S> for SimdJson<T>
where
    T: for<'de> Deserialize<'de> + Send,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| e.into_response())?;
        let mut bytes_vec = bytes.to_vec();

        let val = simd_json::from_slice::<T>(&mut bytes_vec).map_err(|e| {
            (StatusCode::BAD_REQUEST, format!("Invalid JSON: {}", e)).into_response()
        })?;

        Ok(SimdJson(val))
    }
}

// ============================================================================
// HISTORY WRITER
// ============================================================================

struct HistoryWriter;

impl HistoryWriter {
    fn open_hourly(dir: &FsPath, hour: &str) -> std::io::Result<BufWriter<std::fs::File>> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("history_{}.jsonl", hour)))?;
        Ok(BufWriter::with_capacity(64 * 1024, file))
    }

    fn spawn(dir: PathBuf, rx: Receiver<String>) -> std::io::Result<thread::JoinHandle<()>> {
        std::fs::create_dir_all(&dir)?;
        let mut current_hour = Utc::now().format("%Y%m%d%H").to_string();
        let mut buffer = Self::open_hourly(&dir, &current_hour)?;

        thread::Builder::new()
            .name("pulse-history".into())
            .spawn(move || {
                info!(dir = %dir.display(), "History writer active.");

                while let Ok(line) = rx.recv() {
                    let now_hour = Utc::now().format("%Y%m%d%H").to_string();
                    if now_hour != current_hour {
                        let _ = buffer.flush();
                        match Self::open_hourly(&dir, &now_hour) {
                            Ok(next) => {
                                buffer = next;
                                current_hour = now_hour;
                            }
                            Err(e) => {
                                error!(error = %e, "History rotation failed, stopping writer");
                                return;
                            }
                        }
                    }

                    if let Err(e) = buffer.write_all(line.as_bytes()) {
                        warn!(error = %e, "History write failed");
                    }
                    // Flush once the burst is drained
                    if rx.is_empty() {
                        let _ = buffer.flush();
                    }
                }

                let _ = buffer.flush();
                info!("History writer stopped.");
            })
    }
}

fn record_history(state: &AppState, line: &HistoryLine<'_>) {
    let Some(tx) = &state.history_tx else {
        return;
    };
    let json = match serde_json::to_string(line) {
        Ok(json) => json + "\n",
        Err(e) => {
            warn!(error = %e, "Failed to encode history line");
            return;
        }
    };
    match tx.try_send(json) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
            DROPPED_TOTAL.with_label_values(&["history"]).inc();
        }
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn create_session(
    State(state): State<AppState>,
    SimdJson(req): SimdJson<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionSummary>), ApiError> {
    let id = req.id.unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut pipeline = state.config.pipeline.clone();
    if let Some(seed) = req.seed {
        pipeline.forest.seed = Some(seed);
    }
    let session = MonitorSession::new(
        id.clone(),
        state.config.session.clone(),
        pipeline,
        state.config.alerts.clone(),
    );
    let summary = SessionSummary::from_session(&session);

    let mut sessions = state.sessions.lock().await;
    if let Some((evicted, _)) = sessions.create(id.clone(), session)? {
        warn!(session = %evicted, "Registry full, evicted least recently used session");
        let _ = RISK_SCORE.remove_label_values(&[evicted.as_str()]);
    }
    ACTIVE_SESSIONS.set(sessions.len() as f64);
    drop(sessions);

    info!(session = %id, seed = ?req.seed, "Session created.");
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let mut sessions = state.sessions.lock().await;
    let session = sessions.remove(&id)?;
    ACTIVE_SESSIONS.set(sessions.len() as f64);
    drop(sessions);

    let _ = RISK_SCORE.remove_label_values(&[id.as_str()]);
    info!(
        session = %id,
        ticks = session.ticks_seen(),
        alerts = session.alert_engine().log_len(),
        "Session ended."
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    let sessions = state.sessions.lock().await;
    let mut list: Vec<SessionSummary> = sessions
        .iter()
        .map(|(_, s)| SessionSummary::from_session(s))
        .collect();
    list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Json(list)
}

async fn ingest_tick(
    State(state): State<AppState>,
    Path(id): Path<String>,
    SimdJson(snapshot): SimdJson<MetricSnapshot>,
) -> Result<Json<TickOutcome>, ApiError> {
    let timer = SCORING_LATENCY.start_timer();

    let outcome = {
        let mut sessions = state.sessions.lock().await;
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| PulseError::SessionNotFound(id.clone()))?;
        session.ingest(snapshot)?
    };
    TICKS_TOTAL.inc();

    if let Some(output) = outcome.output.as_ref().filter(|o| o.is_scoring()) {
        RISK_SCORE
            .with_label_values(&[id.as_str()])
            .set(output.score as f64);
    }

    if let Some(alert) = &outcome.alert {
        ALERTS_TOTAL
            .with_label_values(&[alert.severity.as_str()])
            .inc();
        warn!(
            session = %id,
            severity = %alert.severity,
            score = alert.score,
            "{}",
            alert.message
        );
        if state.forwarder.try_send(alert.clone()).is_err() {
            DROPPED_TOTAL.with_label_values(&["alerts"]).inc();
        }
    }

    record_history(
        &state,
        &HistoryLine {
            session: &id,
            snapshot: &snapshot,
            output: outcome.output.as_ref(),
            alert: outcome.alert.as_ref(),
        },
    );

    timer.observe_duration();
    Ok(Json(outcome))
}

async fn session_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionStatus>, ApiError> {
    let sessions = state.sessions.lock().await;
    let session = sessions
        .get(&id)
        .ok_or_else(|| PulseError::SessionNotFound(id.clone()))?;

    Ok(Json(SessionStatus {
        summary: SessionSummary::from_session(session),
        history_len: session.history().len(),
        output: session.last_output().cloned(),
        attribution: session.last_attribution().to_vec(),
    }))
}

async fn session_alerts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<AlertRecord>>, ApiError> {
    let sessions = state.sessions.lock().await;
    let session = sessions
        .get(&id)
        .ok_or_else(|| PulseError::SessionNotFound(id.clone()))?;
    Ok(Json(session.alerts().cloned().collect()))
}

async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }
    String::from_utf8_lossy(&buffer).into_owned().into_response()
}

async fn health_handler() -> &'static str {
    "OK"
}

// ============================================================================
// MAIN
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "gatekeeper")]
#[command(about = "Live service-health risk scoring over HTTP")]
struct Args {
    /// TOML config file (defaults to $PULSE_CONFIG, then built-in defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the bind address from the config
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => PulseConfig::load(path).expect("Failed to load config"),
        None => PulseConfig::load_or_default(),
    };
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    config.validate().expect("Invalid config");

    info!("Initializing Pulse Gatekeeper");

    // Initialize metrics
    let _ = &*TICKS_TOTAL;
    let _ = &*ALERTS_TOTAL;
    let _ = &*DROPPED_TOTAL;
    let _ = &*SCORING_LATENCY;
    let _ = &*ACTIVE_SESSIONS;
    let _ = &*RISK_SCORE;

    info!(
        max_sessions = config.registry.max_sessions,
        scoring_every = config.session.scoring_every,
        baseline_ticks = config.pipeline.baseline_ticks_needed,
        "Session registry configured."
    );

    // History channel
    let (history_tx, history_handle) = match &config.server.history_dir {
        Some(dir) => {
            let (tx, rx) = bounded::<String>(config.server.history_channel_capacity);
            let handle =
                HistoryWriter::spawn(dir.clone(), rx).expect("Failed to start history writer");
            (Some(tx), Some(handle))
        }
        None => {
            info!("History persistence disabled.");
            (None, None)
        }
    };

    let forwarder = Arc::new(AlertForwarder::new(config.forwarder.clone()));
    let shutdown = CancellationToken::new();

    let state = AppState {
        config: Arc::new(config.clone()),
        sessions: Arc::new(Mutex::new(SessionRegistry::with_config(
            config.registry.clone(),
        ))),
        forwarder: forwarder.clone(),
        history_tx,
    };

    // Periodic gauge refresh
    let refresher = {
        let sessions = state.sessions.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let count = sessions.lock().await.len();
                        ACTIVE_SESSIONS.set(count as f64);
                    }
                }
            }
        })
    };

    let app = Router::new()
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/{id}", axum::routing::delete(delete_session))
        .route("/sessions/{id}/ticks", post(ingest_tick))
        .route("/sessions/{id}/status", get(session_status))
        .route("/sessions/{id}/alerts", get(session_alerts))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state.clone());

    let addr = config.server.bind_addr.clone();
    let listener = TcpListener::bind(&addr).await.expect("Failed to bind port");

    info!(addr = %addr, "Gatekeeper listening.");
    info!("Endpoints:");
    info!("  POST   /sessions              - Create a session");
    info!("  GET    /sessions              - List sessions");
    info!("  DELETE /sessions/{{id}}         - End a session");
    info!("  POST   /sessions/{{id}}/ticks   - Ingest one snapshot");
    info!("  GET    /sessions/{{id}}/status  - Latest score and attribution");
    info!("  GET    /sessions/{{id}}/alerts  - Alert log");
    info!("  GET    /metrics               - Prometheus metrics");
    info!("  GET    /health                - Health check");

    let token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down... (Waiting for queues to drain)");
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        })
        .await
        .expect("Server crash");

    shutdown.cancel();
    let _ = refresher.await;

    let ended = state.sessions.lock().await.drain();
    info!(sessions = ended.len(), "Sessions ended.");
    drop(state);

    match Arc::try_unwrap(forwarder) {
        Ok(forwarder) => forwarder.shutdown().await,
        Err(_) => warn!("Alert forwarder still shared; skipping drain"),
    }
    info!("Alert queue drained.");

    if let Some(handle) = history_handle {
        if handle.join().is_err() {
            error!("History writer panicked");
        }
    }
    info!("History flushed. Goodbye.");
}
