// HTTP response helpers shared by the route handlers

use hyper::http::response::Builder;
use hyper::{Body, Response, StatusCode};
use serde::Serialize;
use serde_json::json;

/// Standard CORS headers
const CORS_ORIGIN: &str = "*";
const CORS_METHODS: &str = "GET, POST, OPTIONS";
const CORS_HEADERS: &str = "content-type, authorization";

pub const NDJSON_CONTENT_TYPE: &str = "text/event-stream";

fn with_cors(builder: Builder) -> Builder {
    builder
        .header("access-control-allow-origin", CORS_ORIGIN)
        .header("access-control-allow-methods", CORS_METHODS)
        .header("access-control-allow-headers", CORS_HEADERS)
}

fn finish(builder: Builder, body: Body) -> Response<Body> {
    builder.body(body).unwrap_or_else(|e| {
        log::error!("[HTTP] Failed to build response: {e}");
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response
    })
}

/// Build a JSON response with CORS headers
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| r#"{"error":"Serialization failed"}"#.to_string());
    let builder = with_cors(Response::builder().status(status).header("content-type", "application/json"));
    finish(builder, Body::from(json))
}

/// Build a JSON error response
pub fn json_error(status: StatusCode, message: &str) -> Response<Body> {
    json_response(status, &json!({ "error": message }))
}

/// 401 asking the client for Basic credentials
pub fn unauthorized(message: &str) -> Response<Body> {
    let mut response = json_error(StatusCode::UNAUTHORIZED, message);
    response
        .headers_mut()
        .insert("www-authenticate", hyper::header::HeaderValue::from_static("Basic"));
    response
}

/// Build an empty response with CORS headers
pub fn empty_response(status: StatusCode) -> Response<Body> {
    finish(with_cors(Response::builder().status(status)), Body::empty())
}

/// CORS preflight response
pub fn cors_preflight() -> Response<Body> {
    empty_response(StatusCode::OK)
}

/// Streaming response carrying one JSON object per line.
pub fn ndjson_stream(body: Body) -> Response<Body> {
    let builder = with_cors(
        Response::builder()
            .status(StatusCode::OK)
            .header("content-type", NDJSON_CONTENT_TYPE)
            .header("cache-control", "no-cache")
            .header("x-accel-buffering", "no"),
    );
    finish(builder, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_error() {
        let response = json_error(StatusCode::BAD_REQUEST, "Test error");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn test_json_error_escapes_quotes() {
        let response = json_error(StatusCode::BAD_REQUEST, r#"Error "quoted""#);
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["error"], r#"Error "quoted""#);
    }

    #[test]
    fn test_unauthorized_asks_for_basic() {
        let response = unauthorized("nope");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()["www-authenticate"], "Basic");
    }

    #[test]
    fn test_stream_headers() {
        let response = ndjson_stream(Body::empty());
        assert_eq!(response.headers()["content-type"], NDJSON_CONTENT_TYPE);
        assert_eq!(response.headers()["cache-control"], "no-cache");
    }
}
