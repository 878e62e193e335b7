//! In-process stand-in for the KV cache gateway.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Debug, Deserialize)]
struct PutBody {
    value: String,
    #[allow(dead_code)]
    ttl: u64,
}

#[derive(Clone)]
pub struct GatewayState {
    healthy: bool,
    store: Arc<Mutex<HashMap<String, String>>>,
    puts: Arc<AtomicU64>,
}

impl GatewayState {
    /// Number of distinct keys written.
    pub fn stored_keys(&self) -> usize {
        self.store.lock().unwrap().len()
    }

    /// Number of PUT requests received.
    pub fn puts(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }
}

async fn ping(State(state): State<GatewayState>) -> StatusCode {
    if state.healthy {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

async fn put_key(
    State(state): State<GatewayState>,
    Path(key): Path<String>,
    Json(body): Json<PutBody>,
) -> StatusCode {
    state.puts.fetch_add(1, Ordering::Relaxed);
    if !state.healthy {
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    let previous = state.store.lock().unwrap().insert(key, body.value);
    if previous.is_some() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    }
}

async fn get_key(
    State(state): State<GatewayState>,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if !state.healthy {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let store = state.store.lock().unwrap();
    store
        .get(&key)
        .map(|value| Json(serde_json::json!({ "key": key, "value": value })))
        .ok_or(StatusCode::NOT_FOUND)
}

pub struct StubGateway {
    pub base_url: String,
    pub state: GatewayState,
}

/// Start a gateway on an ephemeral port. `healthy = false` fails every call.
pub async fn spawn_gateway(healthy: bool) -> StubGateway {
    let state = GatewayState {
        healthy,
        store: Arc::new(Mutex::new(HashMap::new())),
        puts: Arc::new(AtomicU64::new(0)),
    };

    let app = Router::new()
        .route("/ping", get(ping))
        .route("/kv/:key", get(get_key).put(put_key))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    StubGateway {
        base_url: format!("http://{addr}"),
        state,
    }
}
