//! The three exception taxonomies: connect errors, transport errors, and
//! websocket-handshake errors. They are logically distinct (raised by
//! different layers) but structurally identical: each
//! carries an HTTP-ish `(status_code, reason_phrase)` pair and an
//! `is_success` flag, exposed through the shared [`EngineError`] trait.

use thiserror::Error;

/// Shared supertype behaviour for all three exception taxonomies.
pub trait EngineError {
    fn status_code(&self) -> u16;
    fn reason_phrase(&self) -> &'static str;
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code())
    }
}

/// Raised by the server dispatcher before or around a session: invalid
/// path, method, query, session identifier, or transport mismatch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("could not determine the client's remote address")]
    IpAddressUnobtainable,
    #[error("the request path does not match the server's configured path")]
    ServerPathInvalid,
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("clients without an active connection must use GET")]
    GetExpected,
    #[error("the EIO query parameter is missing or out of range")]
    ProtocolVersionInvalid,
    #[error("the requested protocol version is not supported by this server")]
    ProtocolVersionUnsupported,
    #[error("the transport query parameter is missing or not a known transport")]
    TransportUnknown,
    #[error("the requested transport is not enabled on this server")]
    TransportUnavailable,
    #[error("clients with an active connection must provide the 'sid' parameter")]
    SessionIdentifierRequired,
    #[error("the 'sid' parameter is not expected on an initial handshake")]
    SessionIdentifierUnexpected,
    #[error("the 'sid' parameter does not identify a known session")]
    SessionIdentifierInvalid,
    #[error("a websocket upgrade was requested but no upgrade is pending")]
    UpgradeRequestUnexpected,
    #[error("GET is not valid on the session's current transport")]
    GetRequestUnexpected,
    #[error("POST is not valid on the session's current transport")]
    PostRequestUnexpected,
}

impl EngineError for ConnectError {
    fn status_code(&self) -> u16 {
        match self {
            ConnectError::ServerPathInvalid => 403,
            ConnectError::MethodNotAllowed => 405,
            _ => 400,
        }
    }

    fn reason_phrase(&self) -> &'static str {
        match self {
            ConnectError::IpAddressUnobtainable => "Could not determine the client's remote address.",
            ConnectError::ServerPathInvalid => "The request path does not match the server's configured path.",
            ConnectError::MethodNotAllowed => "Method not allowed.",
            ConnectError::GetExpected => "Clients without an active connection must use the 'GET' method.",
            ConnectError::ProtocolVersionInvalid => "The 'EIO' parameter is missing or out of range.",
            ConnectError::ProtocolVersionUnsupported => "The requested protocol version is not supported by this server.",
            ConnectError::TransportUnknown => "The 'transport' parameter is missing or not a recognised transport.",
            ConnectError::TransportUnavailable => "The requested transport is not enabled on this server.",
            ConnectError::SessionIdentifierRequired => "Clients with an active connection must provide the 'sid' parameter.",
            ConnectError::SessionIdentifierUnexpected => "The 'sid' parameter is not expected on an initial handshake.",
            ConnectError::SessionIdentifierInvalid => "The 'sid' parameter does not identify a known session.",
            ConnectError::UpgradeRequestUnexpected => "An upgrade was requested but the session is not eligible to upgrade.",
            ConnectError::GetRequestUnexpected => "GET is not valid on the session's current transport.",
            ConnectError::PostRequestUnexpected => "POST is not valid on the session's current transport.",
        }
    }
}

/// Non-failure closures use status 200: they terminate the HTTP request
/// successfully even though the session is going away.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    #[error("the client requested closure")]
    RequestedClosure,
    #[error("the server is shutting down")]
    ServerClosing,
    #[error("the transport reported an error")]
    TransportError,
    #[error("the heartbeat timed out")]
    HeartbeatTimeout,
    #[error("the upgrade timed out")]
    UpgradeTimeout,
    #[error("the websocket closed without a graceful handshake")]
    ClosedForcefully,
}

/// Raised inside a transport: illegal packets, heartbeat violations,
/// upgrade protocol violations, content-length/type mismatches, forced
/// closure, requested closure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("received a packet that is not legal to be sent by the client")]
    PacketIllegal,
    #[error("received an unexpected heartbeat")]
    HeartbeatUnexpected,
    #[error("the heartbeat timed out")]
    HeartbeatTimeout,
    #[error("the transport has already been probed")]
    TransportAlreadyProbed,
    #[error("a probe was sent on the origin transport instead of the probe transport")]
    TransportIsOrigin,
    #[error("the transport has already been upgraded")]
    TransportAlreadyUpgraded,
    #[error("an upgrade packet was received before the transport was probed")]
    TransportNotProbed,
    #[error("the declared content length does not match the actual body length")]
    ContentLengthDisparity,
    #[error("the content length exceeds the configured maximum payload size")]
    ContentLengthLimitExceeded,
    #[error("failed to read the request body")]
    ReadingBodyFailed,
    #[error("failed to decode the request body as UTF-8")]
    DecodingBodyFailed,
    #[error("failed to decode one or more packets in the request body")]
    DecodingPacketsFailed,
    #[error("the declared content type does not match the implicit content type")]
    ContentTypeDifferentToImplicit,
    #[error("the declared content type does not match the specified content type")]
    ContentTypeDifferentToSpecified,
    #[error("a GET request is already in flight for this transport")]
    DuplicateGetRequest,
    #[error("a POST request is already in flight for this transport")]
    DuplicatePostRequest,
    #[error("the websocket upgrade request is invalid")]
    UpgradeRequestInvalid,
    #[error("received a websocket frame of an unsupported type")]
    UnknownDataType,
    #[error("the websocket closed without a graceful handshake")]
    ClosedForcefully,
    #[error("the connection was closed while an upgrade was in flight")]
    ConnectionClosedDuringUpgrade,
    #[error("the client requested closure")]
    RequestedClosure,
    #[error("the server is shutting down")]
    ServerClosing,
}

impl EngineError for TransportError {
    fn status_code(&self) -> u16 {
        match self {
            TransportError::RequestedClosure | TransportError::ServerClosing => 200,
            TransportError::ConnectionClosedDuringUpgrade => 500,
            _ => 400,
        }
    }

    fn reason_phrase(&self) -> &'static str {
        match self {
            TransportError::PacketIllegal => "Received a packet that is not legal to be sent by the client.",
            TransportError::HeartbeatUnexpected => "Received an unexpected heartbeat.",
            TransportError::HeartbeatTimeout => "The heartbeat timed out.",
            TransportError::TransportAlreadyProbed => "The transport has already been probed.",
            TransportError::TransportIsOrigin => "A probe was sent on the origin transport.",
            TransportError::TransportAlreadyUpgraded => "The transport has already been upgraded.",
            TransportError::TransportNotProbed => "An upgrade packet was received before the transport was probed.",
            TransportError::ContentLengthDisparity => "The declared content length does not match the actual body length.",
            TransportError::ContentLengthLimitExceeded => "The content length exceeds the configured maximum payload size.",
            TransportError::ReadingBodyFailed => "Failed to read the request body.",
            TransportError::DecodingBodyFailed => "Failed to decode the request body as UTF-8.",
            TransportError::DecodingPacketsFailed => "Failed to decode one or more packets in the request body.",
            TransportError::ContentTypeDifferentToImplicit => "The declared content type does not match the implicit content type.",
            TransportError::ContentTypeDifferentToSpecified => "The declared content type does not match the specified content type.",
            TransportError::DuplicateGetRequest => "A GET request is already in flight for this transport.",
            TransportError::DuplicatePostRequest => "A POST request is already in flight for this transport.",
            TransportError::UpgradeRequestInvalid => "The websocket upgrade request is invalid.",
            TransportError::UnknownDataType => "Received a websocket frame of an unsupported type.",
            TransportError::ClosedForcefully => "The websocket closed without a graceful handshake.",
            TransportError::ConnectionClosedDuringUpgrade => "The connection was closed while an upgrade was in flight.",
            TransportError::RequestedClosure => "The client requested closure.",
            TransportError::ServerClosing => "The server is shutting down.",
        }
    }
}

impl From<TransportError> for DisconnectReason {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::RequestedClosure => DisconnectReason::RequestedClosure,
            TransportError::ServerClosing => DisconnectReason::ServerClosing,
            TransportError::HeartbeatTimeout => DisconnectReason::HeartbeatTimeout,
            TransportError::ClosedForcefully => DisconnectReason::ClosedForcefully,
            _ => DisconnectReason::TransportError,
        }
    }
}

/// Specialization of [`TransportError`] using WebSocket close codes rather
/// than HTTP status codes (1000 success, 1008 policy violation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsTransportError(pub TransportError);

impl WsTransportError {
    pub fn close_code(&self) -> u16 {
        if self.0.is_success() {
            1000
        } else {
            1008
        }
    }
}

impl From<TransportError> for WsTransportError {
    fn from(err: TransportError) -> Self {
        WsTransportError(err)
    }
}

impl std::fmt::Display for WsTransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for WsTransportError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_iff_2xx() {
        assert!(TransportError::RequestedClosure.is_success());
        assert!(TransportError::ServerClosing.is_success());
        assert!(!TransportError::PacketIllegal.is_success());
        assert!(!ConnectError::MethodNotAllowed.is_success());
    }

    #[test]
    fn ws_close_codes() {
        assert_eq!(
            WsTransportError::from(TransportError::RequestedClosure).close_code(),
            1000
        );
        assert_eq!(
            WsTransportError::from(TransportError::TransportAlreadyUpgraded).close_code(),
            1008
        );
    }
}
