//! Response builders shared by the handlers

use serde::Serialize;
use serde_json::json;
use tracing::warn;
use warp::http::header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE};
use warp::http::{HeaderValue, StatusCode};
use warp::hyper::Body;
use warp::reply::Response;
use warp::Reply;

use crate::error::EduDropError;

/// Cache policy for raw public files
pub const LONG_CACHE: &str = "public, max-age=31536000, immutable";

/// JSON body with an explicit status
pub fn json_status<T: Serialize>(body: &T, status: StatusCode) -> Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}

/// `{ "error": ... }` with the status mapped from `err`
pub fn json_error(err: &EduDropError) -> Response {
    let status = err.status_code();
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    }
    json_status(&json!({ "error": err.public_message() }), status)
}

/// Plain-text status body, used by the raw file endpoint
pub fn plain_status(status: StatusCode) -> Response {
    let text = status.canonical_reason().unwrap_or("Error");
    warp::reply::with_status(text.to_string(), status).into_response()
}

/// ZIP bytes offered as a download named `filename`
pub fn zip_attachment(bytes: Vec<u8>, filename: &str) -> Response {
    let mut response = Response::new(Body::from(bytes));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/zip"));

    let disposition = format!("attachment; filename=\"{}\"", filename.replace('"', ""));
    match HeaderValue::from_str(&disposition) {
        Ok(value) => {
            headers.insert(CONTENT_DISPOSITION, value);
        }
        Err(e) => warn!(filename = %filename, error = %e, "cannot encode archive name"),
    }
    response
}

/// Raw file bytes with a fixed content type and long-lived caching
pub fn file_bytes(bytes: Vec<u8>, content_type: &'static str) -> Response {
    let mut response = Response::new(Body::from(bytes));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(LONG_CACHE));
    response
}
