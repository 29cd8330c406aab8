//! HTTP surface: routing and handlers for the v1 API.

pub mod accounts;
pub mod info;
pub mod orders;
pub mod payments;

use crate::divvyd::monitor::ConnectionMonitor;
use crate::divvyd::NodeClient;
use crate::services::PaymentService;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub client: NodeClient,
    pub monitor: Arc<ConnectionMonitor>,
    pub payments: Arc<PaymentService>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/server", get(info::server_status))
        .route("/v1/server/connected", get(info::connected))
        .route("/v1/transaction-fee", get(info::transaction_fee))
        .route("/v1/uuid", get(info::new_uuid))
        .route(
            "/v1/accounts/{account}/payments",
            get(payments::list_payments).post(payments::submit_payment),
        )
        .route(
            "/v1/accounts/{account}/payments/paths/{destination}/{destination_amount}",
            get(payments::find_paths),
        )
        .route(
            "/v1/accounts/{account}/payments/{identifier}",
            get(payments::get_payment),
        )
        .route("/v1/accounts/{account}/balances", get(accounts::balances))
        .route(
            "/v1/accounts/{account}/trustlines",
            get(accounts::trustlines),
        )
        .route("/v1/accounts/{account}/orders", get(orders::account_orders))
        .route("/v1/orderbook/{base}/{counter}", get(orders::orderbook))
        .with_state(state)
}
