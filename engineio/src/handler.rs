//! Application-facing callbacks. The handler is the one external
//! collaborator the dispatcher talks to on every state transition; it is
//! stored once on the server, never on a socket: everything above the
//! transport/session/dispatcher layer is left to the embedding application.

use std::sync::Arc;

use bytes::Bytes;

use crate::errors::{ConnectError, DisconnectReason, TransportError};
use crate::socket::Socket;

pub trait EngineIoHandler: Send + Sync + 'static {
    /// A new session has just completed its handshake (or completed a
    /// websocket-only shortcut handshake).
    fn on_connect(&self, _socket: Arc<Socket>) {}

    /// A session is going away. Called at most once per session.
    fn on_disconnect(&self, _socket: Arc<Socket>, _reason: DisconnectReason) {}

    fn on_message(&self, _socket: Arc<Socket>, _message: String) {}

    fn on_binary(&self, _socket: Arc<Socket>, _data: Bytes) {}

    /// A request failed before (or without) resolving to an existing
    /// client; surfaced only when the failure could not be attributed to a
    /// live session.
    fn on_connect_error(&self, _error: ConnectError) {}

    /// A transport-level exception on an existing session, whether or not
    /// it proves fatal.
    fn on_transport_exception(&self, _socket: Arc<Socket>, _error: TransportError) {}
}
