use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_stream::stream;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use jsonpath_core::StoreError;
use jsonpath_kernel::{JsonStore, StoreBuilder};
use jsonpath_storage::DbConfig;

#[derive(Debug, Parser)]
#[command(name = "jsonpath-server")]
#[command(about = "Firebase-Realtime-Database-style JSON path storage over Postgres")]
struct Cli {
    #[arg(long, default_value = "localhost")]
    host: String,
    #[arg(long, default_value_t = 8666)]
    port: u16,
    #[arg(long, default_value = "config.json")]
    config: PathBuf,
}

#[derive(Debug, Deserialize)]
struct AppConfig {
    db: DbConfig,
}

#[derive(Clone)]
struct AppState {
    store: Arc<JsonStore>,
}

#[derive(Debug, Deserialize)]
struct CreateDbRequest {
    db_name: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    body: Value,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: json!({ "error": message.into() }),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidPath(message) => Self {
                status: StatusCode::BAD_REQUEST,
                body: json!({ "error": message }),
            },
            StoreError::NotFound(name) => Self {
                status: StatusCode::NOT_FOUND,
                body: json!({ "error": format!("logical database {name:?} not found") }),
            },
            StoreError::AlreadyExists(_) => Self {
                status: StatusCode::BAD_REQUEST,
                body: json!({ "reason": "db with the same name already exists" }),
            },
            StoreError::ClosedStore => Self {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: json!({ "error": "storage has been closed" }),
            },
            StoreError::StoreFailure(message) => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: json!({ "error": message }),
            },
            StoreError::SubscriptionClosed => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: json!({ "error": "subscription closed" }),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    let raw_config = tokio::fs::read_to_string(&cli.config)
        .await
        .with_context(|| format!("failed to read config file {:?}", cli.config))?;
    let app_config: AppConfig =
        serde_json::from_str(&raw_config).context("failed to parse config file")?;

    let store = StoreBuilder::new(app_config.db)
        .build()
        .await
        .context("failed to connect to storage")?;
    let state = AppState {
        store: Arc::new(store),
    };

    let app = Router::new()
        .route("/createdb", post(create_db))
        .route("/deletedb", axum::routing::delete(delete_db))
        .route("/database/{ldb}", get(get_whole))
        .route(
            "/database/{ldb}/{*path}",
            get(get_path)
                .put(put_path)
                .patch(patch_path)
                .post(post_path)
                .delete(delete_path)
                .head(method_not_allowed),
        )
        .route("/database_events/{ldb}", get(stream_whole))
        .route("/database_events/{ldb}/{*path}", get(stream_path))
        .with_state(state.clone())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cli.host, cli.port))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "jsonpath-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.store.close();
    Ok(())
}

async fn create_db(
    State(state): State<AppState>,
    Json(request): Json<CreateDbRequest>,
) -> ApiResult<StatusCode> {
    state.store.create_ldb(&request.db_name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_db(
    State(state): State<AppState>,
    Json(request): Json<CreateDbRequest>,
) -> ApiResult<StatusCode> {
    state.store.delete_ldb(&request.db_name).await?;
    Ok(StatusCode::OK)
}

async fn get_whole(Path(ldb): Path<String>, State(state): State<AppState>) -> ApiResult<Json<Value>> {
    match state.store.get(&ldb, None).await {
        Ok(value) => Ok(Json(value)),
        Err(StoreError::NotFound(_)) => Ok(Json(Value::Null)),
        Err(err) => Err(err.into()),
    }
}

async fn get_path(
    Path((ldb, path)): Path<(String, String)>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    match state.store.get(&ldb, Some(&path)).await {
        Ok(value) => Ok(Json(value)),
        Err(StoreError::NotFound(_)) => Ok(Json(Value::Null)),
        Err(err) => Err(err.into()),
    }
}

async fn put_path(
    Path((ldb, path)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(value): Json<Value>,
) -> ApiResult<Json<Value>> {
    let echoed = state.store.put(&ldb, &path, value).await?;
    Ok(Json(echoed))
}

async fn patch_path(
    Path((ldb, path)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(value): Json<Value>,
) -> ApiResult<Json<Value>> {
    if !value.is_object() {
        return Err(ApiError::bad_request("patch body must be a JSON object"));
    }
    let echoed = state.store.patch(&ldb, &path, value).await?;
    Ok(Json(echoed))
}

async fn post_path(
    Path((ldb, path)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(value): Json<Value>,
) -> ApiResult<Json<Value>> {
    let (push_id, echoed) = state.store.post(&ldb, Some(&path), value).await?;
    let mut body = serde_json::Map::with_capacity(1);
    body.insert(push_id, echoed);
    Ok(Json(Value::Object(body)))
}

async fn delete_path(
    Path((ldb, path)): Path<(String, String)>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    state.store.delete(&ldb, &path).await?;
    Ok(Json(Value::Bool(true)))
}

async fn method_not_allowed() -> StatusCode {
    StatusCode::METHOD_NOT_ALLOWED
}

async fn stream_whole(
    Path(ldb): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>> {
    build_sse(state, ldb, None).await
}

async fn stream_path(
    Path((ldb, path)): Path<(String, String)>,
    State(state): State<AppState>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>> {
    build_sse(state, ldb, Some(path)).await
}

async fn build_sse(
    state: AppState,
    ldb: String,
    path: Option<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>> {
    let subscription = state.store.subscribe(&ldb, path.as_deref()).await?;

    let stream = stream! {
        let mut records = subscription.into_stream().await;
        while let Some(record) = records.next().await {
            let payload = serde_json::to_string(&record)
                .unwrap_or_else(|error| json!({ "error": error.to_string() }).to_string());
            yield Ok(Event::default().data(payload));
        }
        drop(subscription);
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    {
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(error) => {
                    tracing::error!(%error, "failed to install SIGTERM handler");
                }
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}
