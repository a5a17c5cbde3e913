//! Mock capability services
//!
//! Real HTTP servers on ephemeral ports, one per mock service, with a
//! programmable responder per invocation path. Every received body is
//! recorded so tests can assert on the exact typed parameters the
//! capability client sent.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::IntoResponse;
use axum::Router;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Responder for one invocation path: body in, `(status, body)` out.
pub type Responder = Arc<dyn Fn(&Value) -> (u16, Value) + Send + Sync>;

#[derive(Clone)]
struct MockState {
    responders: Arc<HashMap<String, Responder>>,
    received: Arc<Mutex<Vec<(String, Value)>>>,
}

/// One running mock service.
pub struct MockService {
    /// Base address, e.g. `http://127.0.0.1:49172`.
    pub address: String,
    received: Arc<Mutex<Vec<(String, Value)>>>,
    server: JoinHandle<()>,
}

impl MockService {
    /// Start a service with the given path → responder table.
    pub async fn start(responders: Vec<(&str, Responder)>) -> Self {
        let table: HashMap<String, Responder> = responders
            .into_iter()
            .map(|(path, responder)| (path.to_string(), responder))
            .collect();
        let received = Arc::new(Mutex::new(Vec::new()));
        let state = MockState {
            responders: Arc::new(table),
            received: Arc::clone(&received),
        };
        let app = Router::new().fallback(dispatch).with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("ephemeral port");
        let address = format!("http://{}", listener.local_addr().expect("local addr"));
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            address,
            received,
            server,
        }
    }

    /// A responder that always answers `200` with `body`.
    pub fn ok(body: Value) -> Responder {
        Arc::new(move |_| (200, body.clone()))
    }

    /// Every `(path, body)` pair received so far, in arrival order.
    pub fn received(&self) -> Vec<(String, Value)> {
        self.received.lock().clone()
    }

    /// Bodies received on one path.
    pub fn received_on(&self, path: &str) -> Vec<Value> {
        self.received
            .lock()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, body)| body.clone())
            .collect()
    }
}

impl Drop for MockService {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn dispatch(State(state): State<MockState>, uri: Uri, body: Bytes) -> impl IntoResponse {
    let path = uri.path().to_string();
    let parsed: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    state.received.lock().push((path.clone(), parsed.clone()));

    match state.responders.get(&path) {
        Some(responder) => {
            let (status, body) = responder(&parsed);
            (
                StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                axum::Json(body),
            )
        }
        None => (
            StatusCode::NOT_FOUND,
            axum::Json(serde_json::json!({"error": format!("no responder for '{path}'")})),
        ),
    }
}
