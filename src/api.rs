//! Read-only HTTP API over stored entries.
//!
//! - `GET /api/news?limit=N` - newest entries first; a missing or
//!   non-positive limit uses the store's default
//! - `GET /api/health` - liveness plus the ingestion settings
//!
//! Every route is wrapped in request logging and an allow-all CORS layer
//! that answers `OPTIONS` preflights itself.

use axum::{
    extract::{ConnectInfo, Query, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::feed::Entry;
use crate::storage::{EntryStore, StoreError};

/// Serves recent entries straight from the store.
#[derive(Clone)]
pub struct NewsService {
    store: Arc<dyn EntryStore>,
}

impl NewsService {
    pub fn new(store: Arc<dyn EntryStore>) -> Self {
        Self { store }
    }

    /// Returns up to `limit` entries, newest first. The limit is passed to the
    /// store untouched, so `limit <= 0` gets the store's default.
    pub async fn get_news(&self, limit: i64) -> Result<Vec<Entry>, StoreError> {
        self.store.get_recent(limit).await
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "Request failed");
        let body = ErrorBody {
            error: "failed to load news".to_string(),
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub news: NewsService,
    pub feeds: usize,
    pub interval: Duration,
}

#[derive(Debug, Deserialize)]
struct NewsQuery {
    limit: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Health {
    pub status: String,
    pub feeds: usize,
    pub interval_secs: u64,
}

async fn get_news(
    State(state): State<ApiState>,
    Query(query): Query<NewsQuery>,
) -> Result<Json<Vec<Entry>>, ApiError> {
    let entries = state.news.get_news(query.limit.unwrap_or(0)).await?;
    Ok(Json(entries))
}

async fn health(State(state): State<ApiState>) -> Json<Health> {
    Json(Health {
        status: "ok".to_string(),
        feeds: state.feeds,
        interval_secs: state.interval.as_secs(),
    })
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/news", get(get_news))
        .route("/api/health", get(health))
        .layer(middleware::from_fn(log_requests))
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

async fn log_requests(request: Request, next: Next) -> Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let span = tracing::info_span!(
        "http",
        method = %request.method(),
        path = %request.uri().path(),
        remote_addr = %remote_addr,
        user_agent = %user_agent,
    );

    span.in_scope(|| tracing::info!("Request started"));

    let start = Instant::now();
    let response = next.run(request).await;

    span.in_scope(|| {
        tracing::info!(
            status = response.status().as_u16(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Request completed"
        );
    });
    response
}

async fn cors(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    response
}

/// Serves `router` on `listener` until `shutdown` is cancelled, then drains
/// open connections.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(address = %addr, "API listening");
    }
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;
    tracing::info!("API server stopped");
    Ok(())
}
