use axum::{
    Json, Router,
    body::Bytes,
    extract::{FromRequest, Path, Query, Request, State},
    http::HeaderMap,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::warn;

use crate::{
    errors::EngineError,
    orderbook::ModifyOutcome,
    orders::{Order, OrderId, Side},
    price::Price,
    state::AppState,
    symbol::Symbol,
    trade::Trade,
};

/// `axum::Json` extractor that logs a truncated body preview plus the serde
/// error on deserialization failure, so a malformed order shows up in the
/// logs instead of vanishing into a bare 422.
pub struct LoggedJson<T>(pub T);

impl<S, T> FromRequest<S> for LoggedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = EngineError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let method = req.method().clone();
        let uri = req.uri().clone();
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| EngineError::Validation(e.to_string()))?;

        match serde_json::from_slice::<T>(&bytes) {
            Ok(val) => Ok(LoggedJson(val)),
            Err(e) => {
                let preview = String::from_utf8_lossy(&bytes);
                let preview = &preview[..preview.len().min(4096)];
                warn!(
                    error = %e,
                    %method,
                    %uri,
                    body_preview = %preview,
                    "request body rejected"
                );
                Err(EngineError::Validation(e.to_string()))
            }
        }
    }
}

/// `X-API-Key` check for write paths (§6, §7 `UNAUTHORIZED`). A no-op when
/// `Config::api_key` is unset, per "empty disables auth".
async fn require_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = &state.config.api_key {
        let provided = headers.get("X-API-Key").and_then(|v| v.to_str().ok());
        if provided != Some(expected.as_str()) {
            return EngineError::Unauthorized.into_response();
        }
    }
    next.run(request).await
}

#[derive(Debug, Deserialize)]
pub struct NewOrderRequest {
    pub user_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: u64,
    pub price: Price,
}

#[derive(Debug, Serialize)]
pub struct OrderAck {
    pub order_id: OrderId,
    pub status: crate::orders::OrderStatus,
    pub trades: Vec<Trade>,
}

async fn create_order(
    State(state): State<AppState>,
    LoggedJson(payload): LoggedJson<NewOrderRequest>,
) -> Result<Json<OrderAck>, EngineError> {
    let (order, trades) = state
        .engine
        .submit(
            payload.user_id,
            payload.symbol,
            payload.side,
            payload.quantity,
            payload.price,
        )
        .await?;
    Ok(Json(OrderAck {
        order_id: order.order_id,
        status: order.status,
        trades,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SymbolQuery {
    symbol: Symbol,
}

async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
    Query(_q): Query<SymbolQuery>,
) -> Result<Json<Order>, EngineError> {
    let order = state.engine.get_order(order_id).await?;
    Ok(Json(order))
}

async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
    Query(q): Query<SymbolQuery>,
) -> Result<Json<serde_json::Value>, EngineError> {
    state.engine.cancel(q.symbol, order_id).await?;
    Ok(Json(json!({ "order_id": order_id, "status": "CANCELLED" })))
}

#[derive(Debug, Deserialize)]
pub struct ModifyRequest {
    pub quantity: Option<u64>,
    pub price: Option<Price>,
}

#[derive(Debug, Serialize)]
pub struct ModifyAck {
    pub order_id: OrderId,
    #[serde(flatten)]
    pub outcome: ModifyOutcome,
}

async fn modify_order(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
    Query(q): Query<SymbolQuery>,
    LoggedJson(payload): LoggedJson<ModifyRequest>,
) -> Result<Json<ModifyAck>, EngineError> {
    let outcome = state
        .engine
        .modify(q.symbol, order_id, payload.quantity, payload.price)
        .await?;
    Ok(Json(ModifyAck { order_id, outcome }))
}

async fn list_user_orders(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Order>>, EngineError> {
    Ok(Json(state.engine.list_user_orders(&user_id).await?))
}

fn default_limit() -> usize {
    100
}

#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    symbol: Symbol,
    #[serde(default = "default_limit")]
    limit: usize,
    after: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TradesPage {
    pub items: Vec<Trade>,
    pub next: Option<String>,
}

async fn list_trades(
    State(state): State<AppState>,
    Query(q): Query<TradesQuery>,
) -> Result<Json<TradesPage>, EngineError> {
    let limit = q.limit.min(1000);
    let (items, next) = state.engine.list_trades(q.symbol, q.after, limit).await?;
    Ok(Json(TradesPage { items, next }))
}

#[derive(Debug, Serialize)]
pub struct MarketResponse {
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    pub last_trade: Option<Trade>,
}

async fn get_market(
    State(state): State<AppState>,
    Path(symbol): Path<Symbol>,
) -> Result<Json<MarketResponse>, EngineError> {
    let summary = state.engine.market_summary(&symbol).await;
    let (trades, _) = state.engine.list_trades(symbol, None, 1).await?;
    Ok(Json(MarketResponse {
        best_bid: summary.best_bid,
        best_ask: summary.best_ask,
        last_trade: trades.into_iter().next(),
    }))
}

fn default_depth_levels() -> usize {
    10
}

#[derive(Debug, Deserialize)]
pub struct DepthQuery {
    #[serde(default = "default_depth_levels")]
    levels: usize,
}

async fn get_depth(
    State(state): State<AppState>,
    Path(symbol): Path<Symbol>,
    Query(q): Query<DepthQuery>,
) -> Json<crate::engine::DepthSnapshot> {
    Json(state.engine.depth(&symbol, q.levels).await)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Constructs the application's `Router` (§6). Write paths (`POST`,
/// `DELETE`, `PUT` on `/orders`) sit behind [`require_api_key`]; reads do
/// not.
pub fn router(state: AppState) -> Router {
    let writes = Router::new()
        .route("/orders", post(create_order))
        .route("/orders/{id}", delete(cancel_order))
        .route("/orders/{id}", put(modify_order))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    let reads = Router::new()
        .route("/orders/{id}", get(get_order))
        .route("/orders/user/{user_id}", get(list_user_orders))
        .route("/trades", get(list_trades))
        .route("/market/{symbol}", get(get_market))
        .route("/market/{symbol}/depth", get(get_depth))
        .route("/health", get(health));

    writes
        .merge(reads)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(false))
                .on_response(DefaultOnResponse::new().level(tracing::Level::INFO)),
        )
        .with_state(state)
}
