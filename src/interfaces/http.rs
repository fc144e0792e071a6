use crate::application::callbacks::CallbackNotice;
use crate::application::engine::StatusView;
use crate::application::runtime::EngineRuntime;
use crate::domain::transaction::CheckoutId;
use crate::error::{PaymentError, Result};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthView {
    pub status: String,
    pub durable_reachable: bool,
    pub mirror_backlog: usize,
}

struct ApiError(PaymentError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PaymentError::NotFound(_) => StatusCode::NOT_FOUND,
            PaymentError::ValidationError(_) | PaymentError::InvalidTransition { .. } => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        let body = json!({ "status": "error", "message": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

impl From<PaymentError> for ApiError {
    fn from(e: PaymentError) -> Self {
        Self(e)
    }
}

type AppState = Arc<EngineRuntime>;

async fn receive_callback(
    State(runtime): State<AppState>,
    Json(notice): Json<CallbackNotice>,
) -> Response {
    info!(checkout_id = %notice.checkout_id, "Received payment callback");
    let queued = runtime
        .queue()
        .map(|queue| queue.enqueue(notice))
        .unwrap_or_else(|| Err(PaymentError::Config("callback queue closed".to_string())));
    match queued {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "success" }))).into_response(),
        Err(e) => {
            error!(error = %e, "Callback could not be queued");
            let body = json!({ "status": "error", "message": e.to_string() });
            (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
        }
    }
}

async fn check_status(
    State(runtime): State<AppState>,
    Path(checkout_id): Path<String>,
) -> std::result::Result<Json<StatusView>, ApiError> {
    let view = runtime
        .engine()
        .status(&CheckoutId::new(checkout_id))
        .await?;
    Ok(Json(view))
}

async fn cancel_payment(
    State(runtime): State<AppState>,
    Path(checkout_id): Path<String>,
) -> std::result::Result<Json<StatusView>, ApiError> {
    let tx = runtime
        .engine()
        .cancel(&CheckoutId::new(checkout_id))
        .await?;
    Ok(Json(StatusView::from(&tx)))
}

async fn payment_history(
    State(runtime): State<AppState>,
    Path(username): Path<String>,
) -> std::result::Result<Json<Vec<StatusView>>, ApiError> {
    Ok(Json(runtime.engine().history(&username).await?))
}

async fn health(State(runtime): State<AppState>) -> Json<HealthView> {
    let connectivity = runtime.connectivity();
    Json(HealthView {
        status: "ok".to_string(),
        durable_reachable: connectivity.is_reachable(),
        mirror_backlog: connectivity.mirror_backlog(),
    })
}

pub fn router(runtime: Arc<EngineRuntime>) -> Router {
    let payment_routes = Router::new()
        .route("/callback", post(receive_callback))
        .route("/check/{checkout_id}", get(check_status))
        .route("/cancel/{checkout_id}", post(cancel_payment))
        .route("/history/{username}", get(payment_history));

    Router::new()
        .route("/health", get(health))
        .nest("/payment", payment_routes)
        .with_state(runtime)
}

/// Serves the payment routes on `listener` until `shutdown` resolves.
pub async fn serve(
    runtime: Arc<EngineRuntime>,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "Callback listener ready");
    axum::serve(listener, router(runtime))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
