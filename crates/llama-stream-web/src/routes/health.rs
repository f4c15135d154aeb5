// Health check route handler

use hyper::{Body, Response, StatusCode};
use serde_json::json;

use llama_stream_engine::SessionRegistry;

use crate::response_helpers::json_response;

pub fn handle(registry: &SessionRegistry) -> Response<Body> {
    json_response(
        StatusCode::OK,
        &json!({
            "status": "ok",
            "generating": registry.is_generating(),
            "shutting_down": registry.is_shutting_down(),
        }),
    )
}
