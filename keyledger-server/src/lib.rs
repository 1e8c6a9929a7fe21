//! HTTP API for the key ledger.
//!
//! Ledger calls block on SQLite, so every handler runs its call on the
//! blocking pool under a deadline taken when the request arrived.

use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use keyledger_core::{
    Deadline, ErrorBody, ErrorKind, IssueKeyRequest, IssueKeyResponse, KeyLedger, KeySigner,
    LedgerError, RedeemCodeRequest, RedeemCodeResponse, ValidateKeyRequest, ValidateKeyResponse,
};
use keyledger_types::PricingTier;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Shared state behind every route.
pub struct AppState {
    pub ledger: KeyLedger,
    /// Budget for one ledger call, queueing on the blocking pool included.
    pub request_timeout: Duration,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// A ledger error rendered as `{"kind", "message"}` with a matching status.
#[derive(Debug)]
pub struct ApiError(pub LedgerError);

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(LedgerError::Validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind());
        if status.is_server_error() {
            warn!(kind = self.0.kind().code(), error = %self.0, "Request failed");
        }
        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

/// HTTP status for each error kind.
#[must_use]
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
        ErrorKind::InsufficientBalance => StatusCode::PAYMENT_REQUIRED,
        ErrorKind::InvalidKey => StatusCode::UNAUTHORIZED,
        ErrorKind::KeyExpired | ErrorKind::CodeExpired => StatusCode::GONE,
        ErrorKind::DeviceLimitReached
        | ErrorKind::CodeExhausted
        | ErrorKind::AlreadyRedeemed
        | ErrorKind::AccountExists => StatusCode::CONFLICT,
        ErrorKind::InvalidCode | ErrorKind::AccountNotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::GenerationExhausted | ErrorKind::StorageFault => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Runs a ledger call on the blocking pool.
async fn run<T, F>(state: Arc<AppState>, call: F) -> Result<Json<T>, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&KeyLedger, Deadline) -> Result<T, LedgerError> + Send + 'static,
{
    let deadline = Deadline::after(state.request_timeout);
    let joined = tokio::task::spawn_blocking(move || call(&state.ledger, deadline)).await;
    match joined {
        Ok(result) => Ok(Json(result?)),
        Err(e) => {
            error!(error = %e, "Ledger worker panicked");
            Err(LedgerError::Storage("request worker failed".to_string()).into())
        }
    }
}

async fn issue_key_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<IssueKeyRequest>, JsonRejection>,
) -> Result<Json<IssueKeyResponse>, ApiError> {
    let Json(req) = body?;
    run(state, move |ledger, deadline| ledger.issue_key(&req, deadline)).await
}

async fn validate_key_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ValidateKeyRequest>, JsonRejection>,
) -> Result<Json<ValidateKeyResponse>, ApiError> {
    let Json(req) = body?;
    run(state, move |ledger, deadline| ledger.validate_key(&req, deadline)).await
}

async fn redeem_code_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RedeemCodeRequest>, JsonRejection>,
) -> Result<Json<RedeemCodeResponse>, ApiError> {
    let Json(req) = body?;
    run(state, move |ledger, deadline| ledger.redeem_code(&req, deadline)).await
}

async fn pricing_handler(State(state): State<Arc<AppState>>) -> Json<Vec<PricingTier>> {
    Json(state.ledger.pricing().to_vec())
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Build the HTTP API router over the given state.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/keys", post(issue_key_handler))
        .route("/api/v1/keys/validate", post(validate_key_handler))
        .route("/api/v1/codes/redeem", post(redeem_code_handler))
        .route("/api/v1/pricing", get(pricing_handler))
        .route("/api/v1/health", get(health_handler))
        .with_state(state)
}

/// Loads the Ed25519 signing seed at `path`, generating and saving a new one
/// on first start.
pub fn load_or_generate_signer(path: &Path) -> anyhow::Result<KeySigner> {
    if path.exists() {
        info!("Loading signing key from {:?}", path);
        let bytes = fs::read(path).context("Failed to read signing key file")?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .context("Signing key file must hold a 32-byte seed")?;
        Ok(KeySigner::from_seed(seed))
    } else {
        info!("Generating new signing key at {:?}", path);
        let signer = KeySigner::generate();
        write_secret(path, &signer.seed())?;
        Ok(signer)
    }
}

/// Creates `path` readable by its owner only and writes `bytes` to it.
fn write_secret(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .context("Failed to create signing key file")?;
    file.write_all(bytes)
        .context("Failed to write signing key file")?;
    file.sync_all().context("Failed to sync signing key file")?;
    Ok(())
}
