use crate::{
    AggregatorError,
    stream_manager::{AddOutcome, StreamManager},
};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Deserialize)]
struct CoinQuery {
    symbol: String,
    id: String,
}

/// Build the control plane router.
pub fn router(manager: Arc<StreamManager>) -> Router {
    Router::new()
        .route("/coin", get(subscribe).delete(unsubscribe))
        .with_state(manager)
}

/// Serve the control plane until the token cancels; binding failures are startup
/// failures returned to the caller.
pub async fn serve(
    token: CancellationToken,
    manager: Arc<StreamManager>,
    addr: String,
) -> Result<(), AggregatorError> {
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(AggregatorError::Bind)?;
    info!(addr, "control plane listening");

    axum::serve(listener, router(manager))
        .with_graceful_shutdown(token.cancelled_owned())
        .await
        .map_err(AggregatorError::Serve)
}

async fn subscribe(
    State(manager): State<Arc<StreamManager>>,
    Query(query): Query<CoinQuery>,
) -> Response {
    let user_id: u64 = match query.id.parse() {
        Ok(user_id) => user_id,
        Err(parse_error) => return bad_request(parse_error),
    };

    let status = match manager.add_coin(query.symbol.into(), user_id) {
        AddOutcome::Started => "started",
        AddOutcome::AlreadySubscribed => "already subscribed",
    };

    (StatusCode::OK, Json(json!({ "status": status }))).into_response()
}

async fn unsubscribe(
    State(manager): State<Arc<StreamManager>>,
    Query(query): Query<CoinQuery>,
) -> Response {
    let user_id: u64 = match query.id.parse() {
        Ok(user_id) => user_id,
        Err(parse_error) => return bad_request(parse_error),
    };

    manager.delete_coin(&query.symbol.into(), user_id);
    (StatusCode::OK, Json(json!({ "status": "deleted" }))).into_response()
}

fn bad_request(parse_error: std::num::ParseIntError) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": parse_error.to_string() })),
    )
        .into_response()
}
