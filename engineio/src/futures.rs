//! Small response-builder helpers shared by the polling and websocket
//! request paths.

use http::{HeaderValue, Response, StatusCode};

use crate::body::ResponseBody;
use crate::errors::TransportError;
use crate::transport::ws::compute_accept_key;

pub const ACCESS_CONTROL_ALLOW_ORIGIN: &str = "*";
pub const ACCESS_CONTROL_ALLOW_METHODS: &str = "GET, POST";
pub const ACCESS_CONTROL_MAX_AGE: &str = "86400";

pub fn http_response<B>(
    status: StatusCode,
    content_type: &str,
    body: impl Into<bytes::Bytes>,
) -> Result<Response<ResponseBody<B>>, http::Error> {
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, content_type)
        .header(
            http::header::ACCESS_CONTROL_ALLOW_ORIGIN,
            ACCESS_CONTROL_ALLOW_ORIGIN,
        )
        .body(ResponseBody::new(body))
}

pub fn options_response<B>() -> Result<Response<ResponseBody<B>>, http::Error> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header(
            http::header::ACCESS_CONTROL_ALLOW_ORIGIN,
            ACCESS_CONTROL_ALLOW_ORIGIN,
        )
        .header(
            http::header::ACCESS_CONTROL_ALLOW_METHODS,
            ACCESS_CONTROL_ALLOW_METHODS,
        )
        .header("Access-Control-Max-Age", ACCESS_CONTROL_MAX_AGE)
        .body(ResponseBody::empty())
}

pub fn error_response<B>(status: u16, reason: &str) -> Result<Response<ResponseBody<B>>, http::Error> {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST);
    http_response(status, "text/plain", reason.to_string())
}

/// `101 Switching Protocols` response to a websocket upgrade request.
pub fn ws_response<B>(client_key: &str) -> Result<Response<ResponseBody<B>>, TransportError> {
    let accept = compute_accept_key(client_key)?;
    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(http::header::CONNECTION, "upgrade")
        .header(http::header::UPGRADE, "websocket")
        .header(
            "Sec-WebSocket-Accept",
            HeaderValue::from_str(&accept).map_err(|_| TransportError::UpgradeRequestInvalid)?,
        )
        .body(ResponseBody::empty())
        .map_err(|_| TransportError::UpgradeRequestInvalid)
}
