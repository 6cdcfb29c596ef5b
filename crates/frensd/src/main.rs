use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use frens_core::event::RawBlock;
use frens_core::felt::Felt;
use frens_core::history::HistoryRecord;
use frens_core::io::blocklog;
use frens_core::io::config::ProjectionConfig;
use frens_core::ledger::StatusFilter;
use frens_core::query::{self, HistoryFilter, Page};
use frens_core::store::{MemoryStore, Store, StoreError};
use frens_core::world::{BlockRecord, Building, Land, Token};
use frens_core::Dispatcher;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "frensd", about = "Frens lands projection daemon")]
struct Args {
    /// NDJSON block log to project.
    #[arg(long, value_name = "PATH")]
    events: PathBuf,

    /// Projection config JSON. Defaults apply when omitted.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Snapshot to resume from if present, and to write on shutdown.
    #[arg(long, value_name = "PATH")]
    snapshot: Option<PathBuf>,

    /// Address to bind (defaults to 127.0.0.1).
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on for HTTP and WebSocket clients.
    #[arg(long, default_value_t = 8787)]
    port: u16,

    /// Milliseconds to sleep between blocks.
    #[arg(long, default_value_t = 250u64)]
    block_ms: u64,
}

type Projection = Arc<Mutex<Dispatcher<MemoryStore>>>;

#[derive(Clone)]
struct AppState {
    projection: Projection,
    tx: broadcast::Sender<String>,
}

/// Read-side failure mapped onto an HTTP status.
#[derive(Debug)]
enum ApiError {
    NotFound(String),
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
            ApiError::Store(StoreError::UnknownCollection(name)) => {
                (StatusCode::NOT_FOUND, format!("unknown collection {name}"))
            }
            ApiError::Store(err) => {
                error!(%err, "store read failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        }
        .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn found<T>(value: Option<T>, what: impl FnOnce() -> String) -> ApiResult<T> {
    value.map(Json).ok_or_else(|| ApiError::NotFound(what()))
}

#[derive(Debug, Default, Deserialize)]
struct BuildingQuery {
    #[serde(default)]
    status: StatusFilter,
}

/// `?owner=&skip=&limit=` for the land and token listings.
#[derive(Debug, Default, Deserialize)]
struct OwnerQuery {
    owner: Option<Felt>,
    skip: Option<usize>,
    limit: Option<usize>,
}

impl OwnerQuery {
    fn page(&self) -> Page {
        Page {
            skip: self.skip.unwrap_or(0),
            limit: self.limit.unwrap_or(query::DEFAULT_LIMIT),
        }
    }
}

fn load_store(args: &Args) -> Result<MemoryStore> {
    match &args.snapshot {
        Some(path) if path.exists() => {
            info!(?path, "resuming from snapshot");
            MemoryStore::load_from_path(path)
        }
        _ => Ok(MemoryStore::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ProjectionConfig::load_from_path(path)?,
        None => ProjectionConfig::default(),
    };
    let blocks = blocklog::load_from_path(&args.events)?;
    let store = load_store(&args)?;
    let dispatcher = Dispatcher::new(store, config)?;

    let (tx, _rx) = broadcast::channel::<String>(128);
    let projection: Projection = Arc::new(Mutex::new(dispatcher));
    let state = AppState {
        projection: Arc::clone(&projection),
        tx: tx.clone(),
    };

    // Spawn ingest task.
    let ingest_handle = Arc::clone(&projection);
    let block_pause = Duration::from_millis(args.block_ms);
    tokio::spawn(async move { ingest(ingest_handle, blocks, tx, block_pause).await });

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", args.bind, args.port))?;

    info!(%addr, "starting frensd");
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(path) = &args.snapshot {
        let dispatcher = projection.lock().await;
        dispatcher.store().save_to_path(path)?;
        info!(?path, "snapshot written");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "failed to listen for shutdown signal");
    }
}

/// Feed blocks to the dispatcher one at a time, broadcasting every applied
/// history record. Blocks the store already holds are skipped.
async fn ingest(
    projection: Projection,
    blocks: Vec<RawBlock>,
    tx: broadcast::Sender<String>,
    pause: Duration,
) {
    let resume_after = {
        let dispatcher = projection.lock().await;
        match dispatcher.store().blocks() {
            Ok(stored) => stored.last().map(|block| block.number),
            Err(err) => {
                error!(%err, "failed to read stored blocks");
                return;
            }
        }
    };

    for block in blocks {
        if resume_after.is_some_and(|last| block.number <= last) {
            continue;
        }
        let report = {
            let mut dispatcher = projection.lock().await;
            dispatcher.ingest_block(&block)
        };
        let report = match report {
            Ok(report) => report,
            Err(err) => {
                error!(block = block.number, %err, "ingest halted");
                return;
            }
        };

        for record in &report.applied {
            match record.to_ndjson() {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        tracing::trace!(block = report.number, "no subscribers for record");
                    }
                }
                Err(err) => warn!(%err, "failed to serialize history record"),
            }
        }
        sleep(pause).await;
    }
    info!("block log drained");
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/lands", get(list_lands))
        .route("/lands/:land_id", get(get_land))
        .route("/lands/:land_id/grid", get(get_grid))
        .route("/lands/:land_id/buildings", get(list_buildings))
        .route("/lands/:land_id/buildings/:building_uid", get(get_building))
        .route("/history/:collection", get(list_history))
        .route("/tokens", get(list_tokens))
        .route("/tokens/:token_id", get(get_token))
        .route("/tokens/:token_id/transfers", get(list_transfers))
        .route("/inits/:land_id", get(get_init))
        .route("/blocks", get(list_blocks))
        .route("/stream", get(ws_handler))
        .with_state(state)
}

async fn list_lands(
    State(state): State<AppState>,
    Query(params): Query<OwnerQuery>,
) -> ApiResult<Vec<Land>> {
    let dispatcher = state.projection.lock().await;
    Ok(Json(query::lands(
        dispatcher.store(),
        params.owner.as_ref(),
        params.page(),
    )?))
}

async fn get_land(State(state): State<AppState>, Path(land_id): Path<Felt>) -> ApiResult<Land> {
    let dispatcher = state.projection.lock().await;
    found(query::land(dispatcher.store(), &land_id)?, || {
        format!("land {land_id}")
    })
}

async fn get_grid(
    State(state): State<AppState>,
    Path(land_id): Path<Felt>,
) -> ApiResult<Vec<Vec<u64>>> {
    let dispatcher = state.projection.lock().await;
    let grid = query::grid(dispatcher.store(), &land_id)?;
    found(grid.map(|grid| grid.as_rows().to_vec()), || {
        format!("land {land_id}")
    })
}

async fn list_buildings(
    State(state): State<AppState>,
    Path(land_id): Path<Felt>,
    Query(params): Query<BuildingQuery>,
) -> ApiResult<Vec<Building>> {
    let dispatcher = state.projection.lock().await;
    Ok(Json(query::buildings(
        dispatcher.store(),
        &land_id,
        params.status,
    )?))
}

async fn get_building(
    State(state): State<AppState>,
    Path((land_id, building_uid)): Path<(Felt, Felt)>,
) -> ApiResult<Building> {
    let dispatcher = state.projection.lock().await;
    found(
        query::building(dispatcher.store(), &land_id, &building_uid)?,
        || format!("building {building_uid} on land {land_id}"),
    )
}

async fn list_history(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(filter): Query<HistoryFilter>,
) -> ApiResult<Vec<HistoryRecord>> {
    let dispatcher = state.projection.lock().await;
    Ok(Json(query::history(dispatcher.store(), &collection, &filter)?))
}

async fn list_tokens(
    State(state): State<AppState>,
    Query(params): Query<OwnerQuery>,
) -> ApiResult<Vec<Token>> {
    let dispatcher = state.projection.lock().await;
    Ok(Json(query::tokens(
        dispatcher.store(),
        params.owner.as_ref(),
        params.page(),
    )?))
}

async fn get_token(State(state): State<AppState>, Path(token_id): Path<Felt>) -> ApiResult<Token> {
    let dispatcher = state.projection.lock().await;
    found(query::token(dispatcher.store(), &token_id)?, || {
        format!("token {token_id}")
    })
}

async fn list_transfers(
    State(state): State<AppState>,
    Path(token_id): Path<Felt>,
    Query(page): Query<Page>,
) -> ApiResult<Vec<HistoryRecord>> {
    let dispatcher = state.projection.lock().await;
    Ok(Json(query::transfers(dispatcher.store(), &token_id, page)?))
}

async fn get_init(
    State(state): State<AppState>,
    Path(land_id): Path<Felt>,
) -> ApiResult<HistoryRecord> {
    let dispatcher = state.projection.lock().await;
    found(query::init_record(dispatcher.store(), &land_id)?, || {
        format!("init record for land {land_id}")
    })
}

async fn list_blocks(
    State(state): State<AppState>,
    Query(page): Query<Page>,
) -> ApiResult<Vec<BlockRecord>> {
    let dispatcher = state.projection.lock().await;
    Ok(Json(query::blocks(dispatcher.store(), page)?))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| async move { handle_socket(socket, state.tx.subscribe()).await })
}

async fn handle_socket(socket: WebSocket, mut rx: broadcast::Receiver<String>) {
    let (mut sender, mut receiver) = socket.split();
    loop {
        tokio::select! {
            line = rx.recv() => match line {
                Ok(line) => {
                    if sender.send(Message::Text(line)).await.is_err() {
                        debug!("websocket client disconnected");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "websocket client lagging; records dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                    debug!("websocket client closed");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }
}
