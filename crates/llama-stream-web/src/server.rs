//! HTTP server: shared state, routing and the accept loop.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use log::{info, warn};

use llama_stream_config::ServerConfig;
use llama_stream_engine::SessionRegistry;

use crate::auth::Credentials;
use crate::generation_queue::GenerationQueue;
use crate::response_helpers::{cors_preflight, json_error, unauthorized};
use crate::routes;
use crate::shutdown;

/// State shared by every connection.
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub queue: GenerationQueue,
    /// `None` rejects every generate request.
    pub credentials: Option<Credentials>,
    pub event_buffer: usize,
}

impl AppState {
    /// Spawns the generation worker, so it must run inside a tokio runtime.
    pub fn new(registry: Arc<SessionRegistry>, config: &ServerConfig) -> Self {
        let credentials = Credentials::from_config(&config.auth);
        if credentials.is_none() {
            warn!("[HTTP] No credentials configured, every generate request will be rejected");
        }
        Self {
            queue: GenerationQueue::spawn(registry.clone(), config.queue_capacity),
            registry,
            credentials,
            event_buffer: config.event_buffer,
        }
    }
}

pub async fn handle_request(req: Request<Body>, state: Arc<AppState>) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    info!("[HTTP] {method} {path}");

    let response = match (&method, path.as_str()) {
        (&Method::OPTIONS, _) => cors_preflight(),

        (&Method::GET, "/health") => routes::health::handle(&state.registry),

        (&Method::POST, "/generate") => match &state.credentials {
            Some(credentials) if credentials.authorize(&req) => routes::generate::handle(req, &state).await,
            _ => {
                warn!("[HTTP] Rejected request with bad credentials");
                unauthorized("Incorrect username or password")
            }
        },

        _ => json_error(StatusCode::NOT_FOUND, "Not found"),
    };
    Ok(response)
}

/// Serve until `signal` resolves, then cancel generation and drain connections.
pub async fn serve<F>(addr: SocketAddr, state: Arc<AppState>, signal: F) -> hyper::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let make_svc = make_service_fn({
        let state = state.clone();
        move |_conn| {
            let state = state.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| handle_request(req, state.clone()))) }
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    info!("Server starting on http://{addr}");
    info!("  POST /generate  - Stream a model reply as NDJSON");
    info!("  GET  /health    - Health check");

    server
        .with_graceful_shutdown(shutdown::shutdown_on(signal, state.registry.clone()))
        .await
}
