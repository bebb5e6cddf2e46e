use crate::api::{CreateBookRequest, Envelope, UpdatedBook};
use crate::error::StoreError;
use crate::model::WordBookOverview;
use crate::store::{BookStore, DirectoryStore, Document, RecordStore, StateFile};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info, warn};

type SharedState = Arc<AppState>;

const RECORD_FILE: &str = "db.json";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BookStore>,
    pub legacy: Option<Arc<StateFile>>,
}

/// On-disk layout of the book store.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum StoreBackend {
    /// One `<id>.json` file per book.
    #[default]
    Files,
    /// Every book inside a single `db.json`.
    Records,
}

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub addr: SocketAddr,
    pub data_dir: PathBuf,
    pub backend: StoreBackend,
    pub body_limit: usize,
    /// Front-end build served for every non-API path, with `index.html` fallback.
    pub static_dir: Option<PathBuf>,
    /// Enables `/api/state` over this file.
    pub legacy_state: Option<PathBuf>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 7000)),
            data_dir: PathBuf::from("data"),
            backend: StoreBackend::default(),
            body_limit: 2 * 1024 * 1024,
            static_dir: None,
            legacy_state: None,
        }
    }
}

impl WebConfig {
    pub fn open_store(&self) -> Result<Arc<dyn BookStore>, StoreError> {
        let store: Arc<dyn BookStore> = match self.backend {
            StoreBackend::Files => Arc::new(DirectoryStore::open(&self.data_dir)?),
            StoreBackend::Records => Arc::new(RecordStore::open(self.data_dir.join(RECORD_FILE))?),
        };
        Ok(store)
    }

    pub fn app_state(&self) -> Result<AppState, StoreError> {
        Ok(AppState {
            store: self.open_store()?,
            legacy: self
                .legacy_state
                .as_ref()
                .map(|path| Arc::new(StateFile::new(path))),
        })
    }
}

#[derive(Debug, Error)]
pub enum WebError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub async fn serve(config: WebConfig) -> Result<(), WebError> {
    info!(%config.addr, "Binding HTTP listener");
    let listener = TcpListener::bind(config.addr).await?;
    serve_on(listener, &config, shutdown_signal()).await
}

/// Runs the server on an already bound listener until `shutdown` resolves.
pub async fn serve_on<F>(listener: TcpListener, config: &WebConfig, shutdown: F) -> Result<(), WebError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let state = Arc::new(config.app_state()?);
    let router = build_router(state, config);
    info!(
        addr = %listener.local_addr()?,
        data = %config.data_dir.display(),
        backend = ?config.backend,
        legacy = config.legacy_state.is_some(),
        "Serving word books"
    );
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("HTTP server exited");
    Ok(())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => ApiError::not_found("no such book."),
            StoreError::InvalidId(_) | StoreError::Document(_) => {
                ApiError::bad_request(err.to_string())
            }
            StoreError::Io(_) | StoreError::Json(_) => {
                error!(error = %err, "store failure");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: err.to_string(),
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(Envelope::<()>::failure(self.message))).into_response()
    }
}

pub fn build_router(state: SharedState, config: &WebConfig) -> Router {
    let api = Router::new()
        .route("/ping", get(ping))
        .route("/books", get(list_books).post(create_book))
        .route(
            "/books/:id",
            get(get_book).post(update_book).delete(delete_book),
        )
        .route("/state", get(get_state).post(put_state))
        .fallback(unknown_endpoint);
    let router = Router::new().nest("/api", api);
    let router = match &config.static_dir {
        Some(dir) => router.fallback_service(
            ServeDir::new(dir).fallback(ServeFile::new(dir.join("index.html"))),
        ),
        None => router,
    };
    router
        .with_state(state)
        .layer(DefaultBodyLimit::max(config.body_limit))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn ping() -> Json<Envelope<&'static str>> {
    Json(Envelope::ok("pong"))
}

async fn unknown_endpoint() -> ApiError {
    ApiError::not_found("no such endpoint.")
}

async fn list_books(
    State(state): State<SharedState>,
) -> Result<Json<Envelope<Vec<WordBookOverview>>>, ApiError> {
    Ok(Json(Envelope::ok(state.store.list()?)))
}

async fn get_book(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<Document>>, ApiError> {
    Ok(Json(Envelope::ok(state.store.get(&id)?)))
}

async fn create_book(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<Envelope<WordBookOverview>>, ApiError> {
    let request: CreateBookRequest = parse_body(&body)?;
    Ok(Json(Envelope::ok(state.store.create_from_template(&request)?)))
}

async fn update_book(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Envelope<UpdatedBook>>, ApiError> {
    let doc = checked_document(&body, &id)?;
    state.store.update(&id, doc)?;
    info!(book_id = %id, "book saved");
    Ok(Json(Envelope::ok(UpdatedBook { id })))
}

async fn delete_book(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<()>>, ApiError> {
    state.store.delete(&id)?;
    info!(book_id = %id, "book deleted");
    Ok(Json(Envelope::empty()))
}

async fn get_state(State(state): State<SharedState>) -> Result<Json<Envelope<Document>>, ApiError> {
    let legacy = legacy_file(&state)?;
    let doc = legacy
        .read()
        .map_err(|err| match err {
            StoreError::NotFound(_) => ApiError::not_found("no saved state."),
            other => other.into(),
        })?;
    Ok(Json(Envelope::ok(doc)))
}

async fn put_state(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<Envelope<()>>, ApiError> {
    let legacy = legacy_file(&state)?;
    let doc = checked_document(&body, "state")?;
    legacy.write(doc)?;
    Ok(Json(Envelope::empty()))
}

fn legacy_file(state: &AppState) -> Result<&StateFile, ApiError> {
    state
        .legacy
        .as_deref()
        .ok_or_else(|| ApiError::not_found("legacy state is disabled."))
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|err| ApiError::bad_request(format!("invalid body: {err}")))
}

fn checked_document(body: &[u8], id: &str) -> Result<Document, ApiError> {
    let value: Value = parse_body(body)?;
    Document::new(value).map_err(|err| {
        warn!(book_id = %id, error = %err, "rejected document");
        ApiError::bad_request(err.to_string())
    })
}
