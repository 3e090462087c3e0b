//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/documents/{name}` | Ingest the raw request body as document `name` |
//! | `POST` | `/query` | Answer `{query, k?}` |
//! | `GET` | `/chunks/{id}` | Fetch one lexical document |
//! | `DELETE` | `/chunks/{id}` | Delete one lexical document |
//! | `POST` | `/repair` | Re-index chunks missing from the lexical index |
//! | `GET` | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Every failure is answered with a JSON body and a status derived from the
//! error kind:
//!
//! ```json
//! { "error": "unsupported file type: exe" }
//! ```
//!
//! | Error | Status |
//! |-------|--------|
//! | `InvalidInput` | 400 |
//! | `UnsupportedFileType` | 415 |
//! | `EmptyDocument` | 422 |
//! | `PayloadTooLarge` | 413 |
//! | `ModelUnavailable` | 503 |
//! | anything else | 500 |

use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, JsonRejection},
        DefaultBodyLimit, Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::RagError;
use crate::models::{IngestReport, LexicalDocument, QueryResult};
use crate::repair::{repair, RepairReport};
use crate::services::Services;

/// Starts the HTTP server on `[server].bind` and runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Services::from_config(config).await?;
    let app = router(services);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the router over `services`. The body limit comes from
/// `services.settings.max_upload_bytes`.
pub fn router(services: Services) -> Router {
    let body_limit = services.settings.max_upload_bytes;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/documents/{name}", post(handle_ingest))
        .route("/query", post(handle_query))
        .route("/chunks/{id}", get(handle_get_chunk).delete(handle_delete_chunk))
        .route("/repair", post(handle_repair))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(services)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

fn status_for(err: &RagError) -> StatusCode {
    match err {
        RagError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        RagError::UnsupportedFileType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        RagError::EmptyDocument(_) => StatusCode::UNPROCESSABLE_ENTITY,
        RagError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        RagError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        RagError::IndexWrite(_)
        | RagError::IndexRead(_)
        | RagError::Cache(_)
        | RagError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        Self {
            status: status_for(&err),
            message: err.to_string(),
        }
    }
}

impl From<BytesRejection> for AppError {
    fn from(rejection: BytesRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /documents/{name} ============

async fn handle_ingest(
    State(services): State<Services>,
    Path(name): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<IngestReport>, AppError> {
    let body = body?;
    let report = services.ingestion().ingest(&name, &body).await?;
    Ok(Json(report))
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    k: Option<usize>,
}

async fn handle_query(
    State(services): State<Services>,
    request: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResult>, AppError> {
    let Json(request) = request?;
    let result = services.query().query(&request.query, request.k).await?;
    Ok(Json(result))
}

// ============ /chunks/{id} ============

async fn handle_get_chunk(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> Result<Json<LexicalDocument>, AppError> {
    match services.get_chunk(&id).await? {
        Some(doc) => Ok(Json(doc)),
        None => Err(AppError {
            status: StatusCode::NOT_FOUND,
            message: format!("chunk not found: {}", id),
        }),
    }
}

#[derive(Serialize)]
struct DeleteResponse {
    deleted: bool,
}

async fn handle_delete_chunk(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let deleted = services.delete_chunk(&id).await?;
    Ok(Json(DeleteResponse { deleted }))
}

// ============ POST /repair ============

async fn handle_repair(State(services): State<Services>) -> Result<Json<RepairReport>, AppError> {
    Ok(Json(repair(&services).await?))
}
