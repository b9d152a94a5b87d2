//! Generic API structures and handlers
//!
//! Response envelope, body parsing, rejection handling, CORS and the
//! [`ApiServer`] that assembles every route.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};
use warp::hyper::body::Bytes;
use warp::{http::{Method, StatusCode}, Filter, Rejection, Reply};

use crate::batch::BatchCommitter;
use crate::bridge::BridgeRelay;
use crate::config::Config;
use crate::error::{ErrorCode, RelayError, RelayResult};
use crate::ledger_relay::LedgerRelay;
use crate::payment::PaymentOrchestrator;

// ============================================================================
// SHARED REQUEST/RESPONSE STRUCTURES
// ============================================================================

/// Response envelope of every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// 0 on success, the error code otherwise
    pub code: u16,
    /// Response data (if successful)
    pub data: Option<T>,
    /// Error message (if failed)
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: ErrorCode::Success.as_u16(),
            data: Some(data),
            error: None,
        }
    }
}

/// Serializes a relay result, turning failures into a [`RelayRejection`].
pub fn reply<T: Serialize>(result: RelayResult<T>) -> Result<warp::reply::Json, Rejection> {
    match result {
        Ok(data) => Ok(warp::reply::json(&ApiResponse::ok(data))),
        Err(e) => Err(warp::reject::custom(RelayRejection(e))),
    }
}

// ============================================================================
// WARP FILTER HELPERS
// ============================================================================

/// Injects a shared service into request handlers.
pub fn with_service<T: Send + Sync + ?Sized + 'static>(
    service: Arc<T>,
) -> impl Filter<Extract = (Arc<T>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || service.clone())
}

/// Parses the request body as JSON, rejecting with [`JsonDeserializeError`].
pub fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::bytes().and_then(|body: Bytes| async move {
        serde_json::from_slice::<T>(&body).map_err(|e| {
            debug!("Rejected body {}: {}", String::from_utf8_lossy(&body), e);
            warp::reject::custom(JsonDeserializeError(format!("Invalid JSON: {}", e)))
        })
    })
}

// ============================================================================
// CUSTOM REJECTION TYPES
// ============================================================================

/// Custom rejection for JSON deserialization errors
#[derive(Debug)]
pub struct JsonDeserializeError(pub String);

impl warp::reject::Reject for JsonDeserializeError {}

/// A relay operation failed.
#[derive(Debug)]
pub struct RelayRejection(pub RelayError);

impl warp::reject::Reject for RelayRejection {}

fn status_of(err: &RelayError) -> StatusCode {
    match err {
        RelayError::Validation(_) | RelayError::Expired { .. } => StatusCode::BAD_REQUEST,
        RelayError::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
        RelayError::InsufficientBalance { .. } | RelayError::ChainRevert(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        RelayError::IllegalState { .. } => StatusCode::CONFLICT,
        RelayError::UnknownId(_) => StatusCode::NOT_FOUND,
        RelayError::SignerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        RelayError::Infrastructure(_) => StatusCode::BAD_GATEWAY,
        RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ============================================================================
// CORS CONFIGURATION
// ============================================================================

/// Creates a CORS filter based on the configured allowed origins.
fn create_cors_filter(allowed_origins: &[String]) -> warp::cors::Builder {
    let methods = vec![Method::GET, Method::POST, Method::OPTIONS];

    if allowed_origins.contains(&"*".to_string()) {
        warp::cors()
            .allow_any_origin()
            .allow_methods(methods.clone())
            .allow_headers(vec!["content-type", "authorization"])
    } else {
        let origins: Vec<&str> = allowed_origins.iter().map(|s| s.as_str()).collect();
        warp::cors()
            .allow_origins(origins)
            .allow_methods(methods)
            .allow_headers(vec!["content-type", "authorization"])
    }
}

// ============================================================================
// REJECTION HANDLER
// ============================================================================

/// Global rejection handler for all API routes.
///
/// Converts every rejection into the response envelope with the matching
/// HTTP status and error code.
pub async fn handle_rejection(rej: Rejection) -> Result<impl Reply, std::convert::Infallible> {
    let (status, code, message) = if let Some(RelayRejection(err)) = rej.find::<RelayRejection>() {
        if matches!(err, RelayError::Infrastructure(_) | RelayError::Internal(_)) {
            error!("Request failed: {}", err);
        }
        (status_of(err), err.code(), err.to_string())
    } else if let Some(err) = rej.find::<JsonDeserializeError>() {
        (StatusCode::BAD_REQUEST, ErrorCode::Validation, err.0.clone())
    } else if let Some(err) = rej.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, ErrorCode::Validation, format!("Invalid JSON: {}", err))
    } else if rej.is_not_found() {
        (StatusCode::NOT_FOUND, ErrorCode::UnknownId, "Endpoint not found".to_string())
    } else if rej.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, ErrorCode::Validation, "Method not allowed".to_string())
    } else {
        error!("Unhandled rejection: {:?}", rej);
        (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::Internal, "Internal server error".to_string())
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ApiResponse::<()> {
            code: code.as_u16(),
            data: None,
            error: Some(message),
        }),
        status,
    ))
}

// ============================================================================
// API SERVER IMPLEMENTATION
// ============================================================================

/// Services the routes delegate to.
#[derive(Clone)]
pub struct RelayServices {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub ledger: Arc<LedgerRelay>,
    pub bridge: Arc<BridgeRelay>,
    pub batch: Arc<BatchCommitter>,
}

/// REST API server of the relay.
pub struct ApiServer {
    /// Service configuration
    config: Arc<Config>,
    services: RelayServices,
}

impl ApiServer {
    /// Creates a new API server.
    ///
    /// # Arguments
    ///
    /// * `config` - Service configuration
    /// * `services` - Orchestrator and relays the routes call into
    pub fn new(config: Config, services: RelayServices) -> Self {
        Self {
            config: Arc::new(config),
            services,
        }
    }

    /// Starts the API server and begins handling HTTP requests.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Server stopped
    /// * `Err(anyhow::Error)` - Invalid listen address
    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting API server on {}:{}",
            self.config.api.host, self.config.api.port
        );

        let routes = self.create_routes();

        let addr: std::net::SocketAddr = format!("{}:{}", self.config.api.host, self.config.api.port)
            .parse()
            .context("Failed to parse API server address")?;

        warp::serve(routes).run(addr).await;

        Ok(())
    }

    /// Creates all API routes for the server.
    pub(crate) fn create_routes(
        &self,
    ) -> impl Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone {
        use super::{batch, bridge, ledger, payment};

        let health = warp::path("health").and(warp::get()).map(|| {
            warp::reply::json(&ApiResponse::ok("Loyalty relay is running".to_string()))
        });

        health
            .or(payment::routes(self.services.orchestrator.clone()))
            .or(ledger::routes(self.services.ledger.clone()))
            .or(bridge::routes(self.services.bridge.clone()))
            .or(batch::routes(self.services.batch.clone()))
            .with(create_cors_filter(&self.config.api.cors_origins))
            .recover(handle_rejection)
    }

    /// Public method for testing - exposes routes for integration tests
    #[allow(dead_code)] // Used by tests
    pub fn test_routes(&self) -> impl Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone {
        self.create_routes()
    }
}
