//! HTTP and WebSocket endpoint using Axum.
//!
//! | Route          | Purpose                                          |
//! |----------------|--------------------------------------------------|
//! | `GET /health`  | liveness probe                                   |
//! | `GET /mounted` | status of every mounted dataset                  |
//! | `GET /row`     | one row, `?path=<p>&index=<i>`                   |
//! | `POST /command`| one command envelope in, one response out        |
//! | `GET /ws`      | WebSocket; text frames are command envelopes     |
//!
//! Cross-origin `GET` and `POST` are allowed from any origin.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

use dmount_core::{DatasetSummary, Row};
use dmount_protocol::{CommandEnvelope, Response};

use super::{bind, Dispatcher, ServerError};

/// Shared handler state.
#[derive(Clone)]
pub struct HttpState {
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
}

/// Query string of `GET /row`.
///
/// `index` is kept as text so that a non-numeric value can be reported
/// verbatim.
#[derive(Debug, Deserialize)]
pub struct RowQuery {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub index: String,
}

/// Builds the router.
pub fn router(dispatcher: Arc<Dispatcher>, shutdown: CancellationToken) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/mounted", get(mounted))
        .route("/row", get(row))
        .route("/command", post(command))
        .route("/ws", get(ws_upgrade))
        .with_state(HttpState {
            dispatcher,
            shutdown,
        })
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST]),
        )
}

/// HTTP endpoint.
pub struct HttpServer {
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
}

impl HttpServer {
    /// Binds to `addr`; use port 0 for an ephemeral port.
    pub async fn bind(
        addr: SocketAddr,
        dispatcher: Arc<Dispatcher>,
        shutdown: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = bind(addr).await?;
        Ok(Self {
            listener,
            router: router(dispatcher, shutdown.clone()),
            shutdown,
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::Serve(e.to_string()))
    }

    /// Serves requests until shutdown.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr()?, "HTTP server listening");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(self.shutdown.cancelled_owned())
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn mounted(State(state): State<HttpState>) -> Json<Vec<DatasetSummary>> {
    Json(state.dispatcher.registry().status().await)
}

async fn row(
    State(state): State<HttpState>,
    Query(query): Query<RowQuery>,
) -> Result<Json<Row>, (StatusCode, String)> {
    let index: i64 = query.index.trim().parse().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            format!("invalid index: {}", query.index),
        )
    })?;

    state
        .dispatcher
        .registry()
        .get_row(&query.path, index)
        .await
        .map(Json)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

async fn command(
    State(state): State<HttpState>,
    Json(request): Json<CommandEnvelope>,
) -> Json<Response> {
    Json(state.dispatcher.dispatch(&request).await)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<HttpState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

/// Serves one WebSocket until the client closes it or the daemon stops.
///
/// Binary frames are ignored; pings are answered by the transport.
async fn serve_socket(mut socket: WebSocket, state: HttpState) {
    debug!("WebSocket opened");

    loop {
        let message = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            message = socket.recv() => message,
        };

        let text = match message {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!(error = %e, "WebSocket receive failed");
                break;
            }
        };

        let response = state.dispatcher.dispatch_frame(&text).await;
        if socket.send(Message::Text(response.to_frame())).await.is_err() {
            break;
        }
    }

    debug!("WebSocket closed");
}
