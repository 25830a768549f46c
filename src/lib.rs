pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod processor;
pub mod services;
pub mod startup;
pub mod utils;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::config::Config;
use crate::middleware::auth::{require_api_key, ApiKeyAuthenticator};
use crate::middleware::request_logger::{request_logger_middleware, RequestLogSettings};
use crate::processor::ProcessorGateway;
use crate::services::{
    CompensationHandler, PollPolicy, Sleeper, StatusPoller, TokioSleeper, TransactionCoordinator,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub authenticator: ApiKeyAuthenticator,
    pub gateway: Arc<dyn ProcessorGateway>,
    pub coordinator: Arc<TransactionCoordinator>,
    pub poller: Arc<StatusPoller>,
    pub compensation: Arc<CompensationHandler>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: Config, gateway: Arc<dyn ProcessorGateway>) -> Self {
        Self::with_sleeper(config, gateway, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(
        config: Config,
        gateway: Arc<dyn ProcessorGateway>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let coordinator = Arc::new(TransactionCoordinator::new(
            Arc::clone(&gateway),
            config.default_currency.clone(),
        ));
        let poller = Arc::new(StatusPoller::with_sleeper(
            Arc::clone(&coordinator),
            PollPolicy::from_config(&config),
            sleeper,
        ));
        let compensation = Arc::new(CompensationHandler::new(
            Arc::clone(&gateway),
            Arc::clone(&coordinator),
        ));

        AppState {
            authenticator: ApiKeyAuthenticator::new(config.api_key.clone()),
            config: Arc::new(config),
            gateway,
            coordinator,
            poller,
            compensation,
            start_time: Instant::now(),
        }
    }
}

fn cors_layer(config: &Config) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match &config.cors_allowed_origins {
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| origin.parse().ok())
                .collect();
            layer.allow_origin(AllowOrigin::list(origins))
        }
        None => layer.allow_origin(Any),
    }
}

pub fn create_app(state: AppState) -> Router {
    use handlers::payments;

    let privileged = Router::new()
        .route("/get-reader-id", get(payments::get_reader_id))
        .route("/create_connection_token", post(payments::create_connection_token))
        .route("/create_payment_intent", post(payments::create_payment_intent))
        .route("/collect_payment_method", post(payments::collect_payment_method))
        .route("/check_payment_status", get(payments::check_payment_status))
        .route("/await_payment_status", get(payments::await_payment_status))
        .route("/cancel_payment", post(payments::cancel_payment))
        .route("/refund_payment", post(payments::refund_payment))
        .route_layer(axum::middleware::from_fn_with_state(
            state.authenticator.clone(),
            require_api_key,
        ));

    let log_settings = RequestLogSettings {
        log_body: state.config.log_request_body,
    };
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/get-api-key", get(payments::get_api_key))
        .route("/webhook", post(handlers::webhook::webhook))
        .merge(privileged)
        .layer(axum::middleware::from_fn_with_state(
            log_settings,
            request_logger_middleware,
        ))
        .layer(cors)
        .with_state(state)
}
