//! HTTP emulator of the Cloud KMS `generateRandomBytes` endpoint.
//!
//! Serves `POST /v1/{location}:generateRandomBytes` with the same JSON shapes
//! as the real service, so clients can be exercised end to end without
//! credentials or network access. Faults (short responses, error statuses) can
//! be injected, and every request is recorded for assertions.
//!
//! ```no_run
//! use kmsrand_emulator::{ByteMode, EmulatorConfig};
//!
//! let emulator = kmsrand_emulator::spawn(EmulatorConfig {
//!     byte_mode: ByteMode::Counter,
//!     ..EmulatorConfig::default()
//! })?;
//! println!("emulator at {}", emulator.endpoint());
//! # Ok::<(), std::io::Error>(())
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;

use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::Json,
    routing::{get, post},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use log::{debug, error, info};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, oneshot};

/// Smallest length the emulator accepts, matching the real service.
pub const MIN_LENGTH: i32 = 8;

/// Default largest length, matching the real service.
pub const DEFAULT_MAX_LENGTH: i32 = 1024;

const METHOD_SUFFIX: &str = ":generateRandomBytes";
const PROTECTION_LEVELS: &[&str] = &["SOFTWARE", "HSM", "EXTERNAL", "EXTERNAL_VPC"];

/// How response bytes are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteMode {
    /// Thread-local CSPRNG output.
    #[default]
    Random,
    /// Byte `i` of every response is `i as u8`.
    Counter,
}

/// Emulator behaviour.
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    /// Required bearer token. `None` accepts any request.
    pub access_token: Option<String>,
    /// Largest accepted `lengthBytes`.
    pub max_length: i32,
    pub byte_mode: ByteMode,
    /// Return this many bytes fewer than requested.
    pub short_by: usize,
    /// Answer every valid request with this HTTP status and canonical name.
    pub fail_with: Option<(u16, String)>,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            max_length: DEFAULT_MAX_LENGTH,
            byte_mode: ByteMode::Random,
            short_by: 0,
            fail_with: None,
        }
    }
}

/// A request as seen by the emulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub location: String,
    pub length_bytes: i32,
    pub protection_level: Option<String>,
    pub user_agent: Option<String>,
}

/// Shared server state.
struct AppState {
    config: EmulatorConfig,
    requests: Mutex<Vec<RecordedRequest>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateParams {
    #[serde(default)]
    length_bytes: i32,
    #[serde(default)]
    protection_level: Option<String>,
}

#[derive(Serialize)]
struct GenerateResponse {
    data: String,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: u16,
    message: String,
    status: String,
}

type ApiError = (StatusCode, Json<ErrorEnvelope>);

fn api_error(code: StatusCode, status: &str, message: impl Into<String>) -> ApiError {
    (
        code,
        Json(ErrorEnvelope {
            error: ErrorBody {
                code: code.as_u16(),
                message: message.into(),
                status: status.to_string(),
            },
        }),
    )
}

fn invalid_argument(message: impl Into<String>) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", message)
}

/// `projects/<p>/locations/<l>` with non-empty segments.
fn is_valid_location(location: &str) -> bool {
    let parts: Vec<&str> = location.split('/').collect();
    matches!(
        parts.as_slice(),
        ["projects", project, "locations", loc] if !project.is_empty() && !loc.is_empty()
    )
}

fn generate_bytes(mode: ByteMode, n: usize) -> Vec<u8> {
    match mode {
        ByteMode::Counter => (0..n).map(|i| i as u8).collect(),
        ByteMode::Random => {
            let mut buf = vec![0u8; n];
            rand::rng().fill_bytes(&mut buf);
            buf
        }
    }
}

async fn handle_generate(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<GenerateResponse>, ApiError> {
    let Some(location) = name.strip_suffix(METHOD_SUFFIX) else {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("unknown method for {name}"),
        ));
    };

    if let Some(expected) = &state.config.access_token {
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented != Some(expected.as_str()) {
            return Err(api_error(
                StatusCode::UNAUTHORIZED,
                "UNAUTHENTICATED",
                "Request had invalid authentication credentials.",
            ));
        }
    }

    let params: GenerateParams = serde_json::from_slice(&body)
        .map_err(|e| invalid_argument(format!("Invalid JSON payload received. {e}")))?;

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.requests.lock().await.push(RecordedRequest {
        location: location.to_string(),
        length_bytes: params.length_bytes,
        protection_level: params.protection_level.clone(),
        user_agent,
    });
    debug!(
        "generateRandomBytes location={location} length={} level={:?}",
        params.length_bytes, params.protection_level
    );

    if !is_valid_location(location) {
        return Err(invalid_argument(format!(
            "Resource name [{location}] does not match any known resource name pattern."
        )));
    }

    match params.protection_level.as_deref() {
        Some(level) if PROTECTION_LEVELS.contains(&level) => {}
        Some(level) => return Err(invalid_argument(format!("Invalid protection_level {level}."))),
        None => return Err(invalid_argument("protection_level must be specified.")),
    }

    let max = state.config.max_length;
    if params.length_bytes < MIN_LENGTH || params.length_bytes > max {
        return Err(invalid_argument(format!(
            "length_bytes must be between {MIN_LENGTH} and {max}, got {}.",
            params.length_bytes
        )));
    }

    if let Some((code, status)) = &state.config.fail_with {
        let code = StatusCode::from_u16(*code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return Err(api_error(code, status, "Injected failure."));
    }

    let n = (params.length_bytes as usize).saturating_sub(state.config.short_by);
    let data = generate_bytes(state.config.byte_mode, n);
    Ok(Json(GenerateResponse {
        data: STANDARD.encode(data),
    }))
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let requests = state.requests.lock().await.len();
    Json(serde_json::json!({
        "status": "ok",
        "requests": requests,
    }))
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/{*name}", post(handle_generate))
        .route("/health", get(handle_health))
        .with_state(state)
}

/// Router for embedding the emulator in an existing axum application.
pub fn router(config: EmulatorConfig) -> Router {
    build_router(Arc::new(AppState {
        config,
        requests: Mutex::new(Vec::new()),
    }))
}

/// Start the emulator on `127.0.0.1` with an ephemeral port, on its own
/// thread and runtime. The server stops when the handle is dropped.
pub fn spawn(config: EmulatorConfig) -> std::io::Result<EmulatorHandle> {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    std_listener.set_nonblocking(true)?;
    let addr = std_listener.local_addr()?;

    let state = Arc::new(AppState {
        config,
        requests: Mutex::new(Vec::new()),
    });
    let app = build_router(Arc::clone(&state));
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let thread = std::thread::Builder::new()
        .name("kms-emulator".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                let listener = match tokio::net::TcpListener::from_std(std_listener) {
                    Ok(l) => l,
                    Err(e) => {
                        error!("kms emulator failed to register listener: {e}");
                        return;
                    }
                };
                let shutdown = async {
                    let _ = shutdown_rx.await;
                };
                if let Err(e) = axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown)
                    .await
                {
                    error!("kms emulator stopped: {e}");
                }
            });
        })?;

    info!("kms emulator listening on {addr}");
    Ok(EmulatorHandle {
        addr,
        state,
        shutdown: Some(shutdown_tx),
        thread: Some(thread),
    })
}

/// Running emulator.
pub struct EmulatorHandle {
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl EmulatorHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL to configure clients with.
    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Requests received so far, oldest first.
    ///
    /// Must not be called from inside an async runtime.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.blocking_lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.blocking_lock().len()
    }

    /// Stop serving and wait for the server thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
            debug!("kms emulator on {} stopped", self.addr);
        }
    }
}

impl Drop for EmulatorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
