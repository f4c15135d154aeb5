// Request body parsing for the generate route

use hyper::{Body, Response, StatusCode};
use log::{debug, error};
use serde::de::DeserializeOwned;

use llama_stream_types::GenerateRequest;

use crate::response_helpers::json_error;

/// Parse a JSON request body into a typed structure.
///
/// On failure the `Err` side is a ready-to-send 400 response.
pub async fn parse_json_body<T: DeserializeOwned>(body: Body) -> Result<T, Response<Body>> {
    let body_bytes = hyper::body::to_bytes(body)
        .await
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "Failed to read request body"))?;

    if let Ok(body_str) = std::str::from_utf8(&body_bytes) {
        if !body_str.is_empty() {
            debug!("[HTTP] Body: {body_str}");
        }
    }

    serde_json::from_slice::<T>(&body_bytes).map_err(|e| {
        error!("[HTTP] JSON parsing error: {e}");
        json_error(StatusCode::BAD_REQUEST, "Invalid JSON format")
    })
}

/// Parse and pre-check a generation request.
pub async fn parse_generate_request(body: Body) -> Result<GenerateRequest, Response<Body>> {
    let request: GenerateRequest = parse_json_body(body).await?;
    if request.messages.is_empty() {
        return Err(json_error(StatusCode::BAD_REQUEST, "No messages provided"));
    }
    Ok(request)
}
