//! HTTP read API over the chain, with per-IP rate limiting and CORS.
//!
//! Every endpoint reads through the coordinator so queries observe a
//! consistent tip. A token bucket allows 2 requests per second per client
//! IP; excess traffic gets 429. CORS admits any origin for GET, POST, and
//! OPTIONS with a `Content-Type` header. Address and hash parameters are
//! validated before touching the chain: malformed input is 400, absent
//! entities are 404, storage failures are 500.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::{header, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use beck_core::address::Address;
use beck_core::amount::Amount;
use beck_core::error::{BeckError, ChainError};
use beck_core::types::{Block, Hash256, Transaction};

use crate::chain::HistoryItem;
use crate::coordinator::{MiningCoordinator, TxDetails};

/// Requests allowed per second per client IP.
const RATE_LIMIT_PER_SEC: f64 = 2.0;

/// Maximum burst size of the token bucket.
const RATE_LIMIT_BURST: f64 = 2.0;

// ── Rate limiting ────────────────────────────────────────────────────────────

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket rate limiter keyed by client IP.
pub struct RateLimiter {
    buckets: Mutex<HashMap<IpAddr, Bucket>>,
    rate: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(rate: f64, burst: f64) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            rate,
            burst,
        }
    }

    /// Take one token for `ip`; `false` when the bucket is empty.
    pub fn try_acquire(&self, ip: IpAddr) -> bool {
        self.acquire_at(ip, Instant::now())
    }

    fn acquire_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(ip).or_insert(Bucket {
            tokens: self.burst,
            last_refill: now,
        });
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.last_refill = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

// ── State and errors ─────────────────────────────────────────────────────────

/// Shared state for the read API.
#[derive(Clone)]
pub struct ApiState {
    coordinator: Arc<MiningCoordinator>,
    limiter: Arc<RateLimiter>,
}

impl ApiState {
    pub fn new(coordinator: Arc<MiningCoordinator>) -> Self {
        Self {
            coordinator,
            limiter: Arc::new(RateLimiter::new(RATE_LIMIT_PER_SEC, RATE_LIMIT_BURST)),
        }
    }
}

enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::BadRequest(m) | Self::NotFound(m) | Self::Internal(m) => m.clone(),
        };
        (self.status(), Json(json!({ "error": message }))).into_response()
    }
}

impl From<BeckError> for ApiError {
    fn from(e: BeckError) -> Self {
        match &e {
            BeckError::Chain(ChainError::TxNotFound)
            | BeckError::Chain(ChainError::BlockNotFound) => Self::NotFound(e.to_string()),
            BeckError::Chain(ChainError::InsufficientFunds { .. })
            | BeckError::Address(_)
            | BeckError::Amount(_)
            | BeckError::Crypto(_)
            | BeckError::Transaction(_)
            | BeckError::Validation(_) => Self::BadRequest(e.to_string()),
            _ => Self::Internal(e.to_string()),
        }
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn parse_address(s: &str) -> Result<Address, ApiError> {
    s.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid address: {s}")))
}

fn parse_tx_hash(s: &str) -> Result<Hash256, ApiError> {
    if s.len() != 64 {
        return Err(ApiError::BadRequest("hash must be 64 hex characters".into()));
    }
    Hash256::from_hex(s).ok_or_else(|| ApiError::BadRequest("invalid hex in hash".into()))
}

// ── DTOs ─────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BalanceResponse {
    address: String,
    balance: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionDto {
    tx_id: String,
    from: String,
    to: String,
    amount: String,
    fee: String,
    block_height: u64,
    timestamp: i64,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryDto {
    tx_id: String,
    from: String,
    to: String,
    amount: String,
    fee: String,
    block_height: u64,
    timestamp: i64,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BlockDto {
    height: u64,
    hash: String,
    prev_block_hash: String,
    timestamp: i64,
    nonce: i64,
    difficulty: u32,
    transactions: Vec<TransactionDto>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TxDetailsDto {
    tx_id: String,
    from: String,
    to: String,
    amount: String,
    fee: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    block_height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<i64>,
    status: String,
}

#[derive(Deserialize)]
struct SendRequest {
    private_key: String,
    from: String,
    to: String,
    amount: String,
    fee: String,
}

fn tx_dto(tx: &Transaction, block_height: u64, timestamp: i64) -> TransactionDto {
    let kind = if tx.is_coinbase() { "mining_reward" } else { "transfer" };
    TransactionDto {
        tx_id: tx.id.to_string(),
        from: tx.from.to_string(),
        to: tx.to.to_string(),
        amount: tx.amount.to_string(),
        fee: tx.fee.to_string(),
        block_height,
        timestamp,
        kind: kind.to_string(),
    }
}

fn history_dto(item: &HistoryItem) -> HistoryDto {
    HistoryDto {
        tx_id: item.tx_id.to_string(),
        from: item.from.to_string(),
        to: item.to.to_string(),
        amount: item.amount.to_string(),
        fee: item.fee.to_string(),
        block_height: item.block_height,
        timestamp: item.timestamp,
        kind: item.kind.as_str().to_string(),
    }
}

fn block_dto(block: &Block) -> BlockDto {
    BlockDto {
        height: block.height,
        hash: block.hash.to_string(),
        prev_block_hash: block.prev_block_hash.to_string(),
        timestamp: block.timestamp,
        nonce: block.nonce,
        difficulty: block.difficulty,
        transactions: block
            .transactions
            .iter()
            .map(|tx| tx_dto(tx, block.height, block.timestamp))
            .collect(),
    }
}

// ── Middleware and router ────────────────────────────────────────────────────

async fn rate_limit(
    State(state): State<ApiState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    if state.limiter.try_acquire(peer.ip()) {
        next.run(request).await
    } else {
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "rate limit exceeded" })),
        )
            .into_response()
    }
}

/// Build the read-API router.
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/balance/{addr}", get(get_balance))
        .route("/transactions", get(get_all_transactions))
        .route("/history/{addr}", get(get_history))
        .route("/blocks", get(get_blocks))
        .route("/block/{hash}", get(get_block))
        .route("/transaction/{id}", get(get_transaction))
        .route("/transaction", post(post_transaction))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(cors)
        .with_state(state)
}

/// Serve the read API on `addr` until the process exits.
pub async fn serve(state: ApiState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "read API listening");
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn get_balance(
    State(state): State<ApiState>,
    Path(addr): Path<String>,
) -> ApiResult<BalanceResponse> {
    let address = parse_address(&addr)?;
    let balance = state.coordinator.read(|chain| chain.balance(&address))?;
    Ok(Json(BalanceResponse {
        address: address.to_string(),
        balance: balance.to_string(),
    }))
}

async fn get_all_transactions(
    State(state): State<ApiState>,
) -> ApiResult<serde_json::Value> {
    let all = state.coordinator.read(|chain| chain.all_transactions())?;
    let transactions: Vec<TransactionDto> = all
        .iter()
        .map(|(tx, height, timestamp)| tx_dto(tx, *height, *timestamp))
        .collect();
    Ok(Json(json!({ "transactions": transactions })))
}

async fn get_history(
    State(state): State<ApiState>,
    Path(addr): Path<String>,
) -> ApiResult<serde_json::Value> {
    let address = parse_address(&addr)?;
    let history = state.coordinator.read(|chain| chain.history(&address))?;
    let items: Vec<HistoryDto> = history.iter().map(history_dto).collect();
    Ok(Json(json!({ "address": address.to_string(), "history": items })))
}

async fn get_blocks(State(state): State<ApiState>) -> ApiResult<serde_json::Value> {
    let blocks = state.coordinator.read(|chain| chain.blocks())?;
    let dtos: Vec<BlockDto> = blocks.iter().map(block_dto).collect();
    Ok(Json(json!({ "blocks": dtos })))
}

async fn get_block(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
) -> ApiResult<BlockDto> {
    let hash = parse_tx_hash(&hash)?;
    let block = state
        .coordinator
        .read(|chain| chain.find_block(&hash))?
        .ok_or_else(|| ApiError::NotFound("block not found".into()))?;
    Ok(Json(block_dto(&block)))
}

async fn get_transaction(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<TxDetailsDto> {
    let id = parse_tx_hash(&id)?;
    let details = state
        .coordinator
        .transaction_details(&id)?
        .ok_or_else(|| ApiError::NotFound("transaction not found".into()))?;

    let dto = match details {
        TxDetails::Confirmed {
            tx,
            block_height,
            timestamp,
        } => TxDetailsDto {
            tx_id: tx.id.to_string(),
            from: tx.from.to_string(),
            to: tx.to.to_string(),
            amount: tx.amount.to_string(),
            fee: tx.fee.to_string(),
            block_height: Some(block_height),
            timestamp: Some(timestamp),
            status: "confirmed".into(),
        },
        TxDetails::Pending { tx } => TxDetailsDto {
            tx_id: tx.id.to_string(),
            from: tx.from.to_string(),
            to: tx.to.to_string(),
            amount: tx.amount.to_string(),
            fee: tx.fee.to_string(),
            block_height: None,
            timestamp: None,
            status: "pending".into(),
        },
    };
    Ok(Json(dto))
}

async fn post_transaction(
    State(state): State<ApiState>,
    Json(request): Json<SendRequest>,
) -> ApiResult<serde_json::Value> {
    let from = parse_address(&request.from)?;
    let to = parse_address(&request.to)?;
    let amount: Amount = request
        .amount
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid amount: {}", request.amount)))?;
    let fee: Amount = request
        .fee
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid fee: {}", request.fee)))?;

    let id = state
        .coordinator
        .submit_transaction(&request.private_key, from, to, amount, fee)?;
    Ok(Json(json!({ "txId": id.to_string() })))
}
