// Streaming generation route handler

use hyper::body::Bytes;
use hyper::{Body, Request, Response, StatusCode};
use log::{debug, info};
use tokio::sync::mpsc;

use crate::generation_queue::GenerationJob;
use crate::request_parsing::parse_generate_request;
use crate::response_helpers::{json_error, ndjson_stream};
use crate::server::AppState;

pub async fn handle(req: Request<Body>, state: &AppState) -> Response<Body> {
    let request = match parse_generate_request(req.into_body()).await {
        Ok(request) => request,
        Err(response) => return response,
    };
    info!(
        "[HTTP] Generate: {} messages, {} tools",
        request.messages.len(),
        request.tools().len()
    );

    let (events, mut rx) = mpsc::channel(state.event_buffer);
    if let Err(e) = state.queue.submit(GenerationJob { request, events }).await {
        return json_error(StatusCode::SERVICE_UNAVAILABLE, &e);
    }

    let (mut sender, body) = Body::channel();

    // Forward events as NDJSON lines until generation ends or the client leaves.
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if sender.send_data(Bytes::from(event.to_ndjson())).await.is_err() {
                debug!("[HTTP] Client disconnected");
                break;
            }
        }
    });

    ndjson_stream(body)
}
