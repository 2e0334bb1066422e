use crate::documents::DocumentStore;
use crate::error::ApiError;
use crate::protocol::{ChatRequest, DocumentDetail, DocumentInfo, HealthResponse};
use crate::session::SessionEngine;
use crate::sse;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use futures::StreamExt;
use std::error::Error;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::trace::TraceLayer;

const TRACING_TARGET: &str = "docchat::server";

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

pub struct ServerConfig {
    pub listen: String,
    pub cors_origins: Vec<String>,
}

#[derive(Clone)]
pub struct AppState {
    engine: SessionEngine,
    documents: DocumentStore,
}

impl AppState {
    pub fn new(engine: SessionEngine, documents: DocumentStore) -> Self {
        Self { engine, documents }
    }
}

type ServerResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

pub async fn run(config: ServerConfig, state: AppState) -> ServerResult<()> {
    let app = router(state).layer(cors_layer(&config.cors_origins)?);

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    tracing::info!(
        target: TRACING_TARGET,
        listen = %config.listen,
        cors_origins = ?config.cors_origins,
        "docchat server listening"
    );
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/", get(root))
        .route("/api/documents", get(list_documents))
        .route("/api/documents/:doc_id", get(get_document))
        .route("/api/chat/stream", post(chat_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> ServerResult<CorsLayer> {
    if origins.iter().any(|origin| origin.trim() == "*") {
        return Err("wildcard CORS origin cannot be combined with credentials".into());
    }

    let origins = origins
        .iter()
        .map(|origin| HeaderValue::from_str(origin))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request()))
}

async fn root() -> Json<HealthResponse> {
    Json(HealthResponse {
        message: "Document Chatbot API".to_string(),
        status: "running".to_string(),
    })
}

async fn list_documents(
    State(state): State<AppState>,
) -> Result<Json<Vec<DocumentInfo>>, ApiError> {
    let documents = state.documents.list().await?;
    tracing::debug!(target: TRACING_TARGET, count = documents.len(), "documents listed");
    Ok(Json(documents))
}

async fn get_document(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> Result<Json<DocumentDetail>, ApiError> {
    state
        .documents
        .get(&doc_id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

/// Streams one chat session as AG-UI events. Malformed bodies are rejected
/// here, before any stream is opened; every later failure arrives in-band as
/// a `RUN_FINISHED` error event.
async fn chat_stream(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;

    tracing::debug!(
        target: TRACING_TARGET,
        doc_ids = ?request.doc_ids,
        "chat stream requested"
    );

    let frames = state
        .engine
        .run(request.message, request.doc_ids)
        .map(|event| sse::frame(&event).map_err(std::io::Error::from));

    let headers = [
        (CONTENT_TYPE, sse::CONTENT_TYPE),
        (CACHE_CONTROL, "no-cache"),
        (CONNECTION, "keep-alive"),
        (X_ACCEL_BUFFERING, "no"),
    ];

    Ok((headers, Body::from_stream(frames)).into_response())
}
