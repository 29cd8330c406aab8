//! Server status and utility endpoints.

use crate::api::AppState;
use crate::divvyd::amount::drops_to_xdv;
use crate::error::{RestError, RestResult};
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

const API_DOCUMENTATION_URL: &str = "https://xdv.io/build/divvy-rest/";

#[derive(Debug, Serialize)]
pub struct ServerStatusResponse {
    pub success: bool,
    pub api_documentation_url: &'static str,
    pub divvyd_server_url: String,
    pub divvyd_server_status: JsonValue,
}

/// GET /v1/server
pub async fn server_status(
    State(state): State<AppState>,
) -> RestResult<Json<ServerStatusResponse>> {
    let status = state.monitor.status().await?;
    Ok(Json(ServerStatusResponse {
        success: true,
        api_documentation_url: API_DOCUMENTATION_URL,
        divvyd_server_url: status.divvyd_server_url,
        divvyd_server_status: status.divvyd_server_status,
    }))
}

#[derive(Debug, Serialize)]
pub struct ConnectedResponse {
    pub success: bool,
    pub connected: bool,
}

/// GET /v1/server/connected
///
/// Reaching the handler proves connectivity; an unready upstream is a
/// connection error like everywhere else.
pub async fn connected(State(state): State<AppState>) -> RestResult<Json<ConnectedResponse>> {
    state.monitor.ensure_ready().map_err(RestError::from)?;
    Ok(Json(ConnectedResponse {
        success: true,
        connected: true,
    }))
}

#[derive(Debug, Serialize)]
pub struct FeeResponse {
    pub success: bool,
    /// Current open-ledger fee, in XDV.
    pub fee: String,
}

/// GET /v1/transaction-fee
pub async fn transaction_fee(State(state): State<AppState>) -> RestResult<Json<FeeResponse>> {
    state.monitor.ensure_ready().map_err(RestError::from)?;
    let drops = state.monitor.transaction_fee_drops().await?;
    Ok(Json(FeeResponse {
        success: true,
        fee: drops_to_xdv(&drops.to_string())?,
    }))
}

#[derive(Debug, Serialize)]
pub struct UuidResponse {
    pub success: bool,
    pub uuid: String,
}

/// GET /v1/uuid
///
/// A convenience source of client resource ids for callers without a UUID
/// generator of their own.
pub async fn new_uuid() -> Json<UuidResponse> {
    Json(UuidResponse {
        success: true,
        uuid: Uuid::new_v4().to_string(),
    })
}
