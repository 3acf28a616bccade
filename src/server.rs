//! Axum router and raw-hyper serving loop.
//!
//! Grounded in `proxy/server.rs`'s `AxumServer::start`: same
//! `TcpListener` + `hyper::server::conn::http1` + `TowerToHyperService`
//! serving pattern, `DefaultBodyLimit`, `TraceLayer`, and a CORS layer.
//! The route table itself is narrowed to the two client-facing dialects
//! (Claude, OpenAI) plus a health check — the teacher's Gemini-native
//! `/v1beta/*` passthrough routes and its `/v1/responses` and
//! `/v1/completions` legacy-compatibility aliases are dropped since
//! Upstream is never a client-facing dialect here.

use crate::config::ProxyConfig;
use crate::error::{AppError, AppResult};
use crate::executor::{Executor, ExecutorResponse};
use crate::mappers::claude::models::ClaudeRequest;
use crate::mappers::openai::models::OpenAIRequest;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::StreamExt;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub executor: Arc<Executor>,
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Rejects requests whose bearer token / `x-api-key` doesn't match the
/// configured `api_key`, mirroring the teacher's `auth_middleware` but
/// actually enforcing the check instead of always letting requests through.
async fn auth_middleware(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Result<Response, StatusCode> {
    let headers = request.headers();
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .or_else(|| headers.get("x-api-key").and_then(|h| h.to_str().ok()));

    match presented {
        Some(key) if key == state.config.api_key => Ok(next.run(request).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/messages", post(handle_messages))
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/health", get(health_check))
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(cors_layer())
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Response {
    let account_count = state
        .executor
        .accounts()
        .list()
        .map(|v| v.len())
        .unwrap_or(0);
    Json(serde_json::json!({
        "status": "ok",
        "accounts_loaded": account_count,
    }))
    .into_response()
}

async fn handle_messages(
    State(state): State<AppState>,
    Json(req): Json<ClaudeRequest>,
) -> Response {
    match state.executor.handle_claude(req).await {
        Ok(ExecutorResponse::Buffered(value)) => Json(value).into_response(),
        Ok(ExecutorResponse::Streaming(stream)) => sse_from_byte_stream(stream),
        Err(e) => app_error_response(e),
    }
}

async fn handle_chat_completions(
    State(state): State<AppState>,
    Json(req): Json<OpenAIRequest>,
) -> Response {
    match state.executor.handle_openai(req).await {
        Ok(ExecutorResponse::Buffered(value)) => Json(value).into_response(),
        Ok(ExecutorResponse::Streaming(stream)) => sse_from_byte_stream(stream),
        Err(e) => app_error_response(e),
    }
}

/// Both dialect streams already yield fully-formed `data: ...\n\n` SSE
/// frames (see `mappers::claude::create_claude_sse_stream` /
/// `mappers::openai::create_openai_sse_stream`), so we pass the raw bytes
/// through rather than re-wrapping them in axum's `Event` builder.
fn sse_from_byte_stream(
    stream: std::pin::Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, String>> + Send>>,
) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, "text/event-stream".parse().unwrap());
    headers.insert(header::CACHE_CONTROL, "no-cache".parse().unwrap());
    let body = axum::body::Body::from_stream(
        stream.map(|r| r.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))),
    );
    (headers, body).into_response()
}

fn app_error_response(e: AppError) -> Response {
    e.into_response()
}

/// Binds `addr` and serves `app` with raw hyper/http1, matching the
/// teacher's connection-handling loop (no graceful shutdown channel here:
/// the process is killed rather than drained, per the CLI entry point).
pub async fn serve(app: Router, host: &str, port: u16) -> AppResult<()> {
    use hyper::server::conn::http1;
    use hyper_util::rt::TokioIo;
    use hyper_util::service::TowerToHyperService;

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::Config(format!("failed to bind {addr}: {e}")))?;

    tracing::info!("listening on http://{addr}");

    loop {
        let (stream, _) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!("failed to accept connection: {e}");
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let service = TowerToHyperService::new(app.clone());
        tokio::task::spawn(async move {
            if let Err(err) = http1::Builder::new()
                .serve_connection(io, service)
                .with_upgrades()
                .await
            {
                tracing::debug!("connection closed: {err:?}");
            }
        });
    }
}
