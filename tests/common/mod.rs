#![allow(dead_code)]

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use paysync::application::runtime::EngineRuntime;
use paysync::config::EngineConfig;
use paysync::infrastructure::in_memory::InMemoryDurableStore;
use paysync::infrastructure::lipia::LipiaGateway;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

pub const API_KEY: &str = "test-key";

/// How the fake STK endpoint answers.
#[derive(Clone, Debug)]
pub enum GatewayMode {
    Deferred(&'static str),
    Success {
        checkout_id: &'static str,
        reference: &'static str,
    },
    Slow(Duration),
    ServerError,
}

#[derive(Clone)]
struct FakeState {
    mode: GatewayMode,
    calls: Arc<AtomicUsize>,
    last_body: Arc<Mutex<Option<Value>>>,
}

/// A fake STK push API listening on an ephemeral port.
pub struct FakeGateway {
    pub base_url: String,
    calls: Arc<AtomicUsize>,
    last_body: Arc<Mutex<Option<Value>>>,
}

impl FakeGateway {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_body(&self) -> Option<Value> {
        self.last_body.lock().unwrap().clone()
    }
}

async fn request_stk(
    State(state): State<FakeState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.calls.fetch_add(1, Ordering::SeqCst);
    *state.last_body.lock().unwrap() = Some(body);

    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {}", API_KEY));
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    match state.mode {
        GatewayMode::Deferred(id) => Json(json!({
            "message": "STK push sent",
            "data": { "CheckoutRequestID": id }
        }))
        .into_response(),
        GatewayMode::Success {
            checkout_id,
            reference,
        } => Json(json!({
            "message": "callback received successfully",
            "data": { "CheckoutRequestID": checkout_id, "refference": reference }
        }))
        .into_response(),
        GatewayMode::Slow(delay) => {
            tokio::time::sleep(delay).await;
            Json(json!({ "data": { "CheckoutRequestID": "TOO-LATE" } })).into_response()
        }
        GatewayMode::ServerError => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

pub async fn spawn_gateway(mode: GatewayMode) -> FakeGateway {
    let calls = Arc::new(AtomicUsize::new(0));
    let last_body = Arc::new(Mutex::new(None));
    let state = FakeState {
        mode,
        calls: calls.clone(),
        last_body: last_body.clone(),
    };
    let app = Router::new()
        .route("/api/request/stk", post(request_stk))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeGateway {
        base_url: format!("http://{}/api", addr),
        calls,
        last_body,
    }
}

pub fn test_config(gateway_url: &str) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.gateway.base_url = gateway_url.to_string();
    config.gateway.api_key = API_KEY.to_string();
    config.gateway.timeout_ms = 300;
    config.gateway.callback_url = "http://127.0.0.1:5000/payment/callback".to_string();
    config.store.op_timeout_ms = 200;
    config.store.retry_delay_ms = 20;
    config.store.max_retry_delay_ms = 100;
    config
}

/// Builds a runtime against `durable` and connects it once.
pub async fn connected_runtime(
    config: &EngineConfig,
    durable: InMemoryDurableStore,
) -> Arc<EngineRuntime> {
    let gateway = LipiaGateway::new(
        &config.gateway.base_url,
        &config.gateway.api_key,
        config.gateway.timeout(),
    )
    .unwrap();
    let runtime = Arc::new(EngineRuntime::assemble(
        config,
        Arc::new(durable),
        Arc::new(gateway),
    ));
    assert!(runtime.supervisor().reconnect_once().await.unwrap());
    runtime
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
