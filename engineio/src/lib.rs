//! Server-side implementation of the Engine.IO v4 wire protocol as a
//! `tower::Service`: packet codec, long-polling and WebSocket transports,
//! session lifecycle, and the upgrade coordinator. The HTTP listener,
//! logging sink, and the client-side counterpart are all out of scope —
//! mount [`EngineIoServer`] behind whatever `hyper`-compatible server you
//! like.

pub mod body;
pub mod config;
pub mod errors;
pub mod futures;
pub mod handler;
pub mod heart;
pub mod packet;
pub mod query;
pub mod registry;
pub mod request;
pub mod service;
pub mod sid;
pub mod socket;
pub mod transport;
pub mod upgrade;

pub use config::{EngineIoConfig, EngineIoConfigBuilder};
pub use errors::{ConnectError, DisconnectReason, EngineError, TransportError, WsTransportError};
pub use handler::EngineIoHandler;
pub use packet::{OpenPacket, Packet};
pub use registry::ClientRegistry;
pub use request::ConnectRequest;
pub use service::EngineIoServer;
pub use sid::{RandomSidGenerator, Sid, SidGenerator};
pub use socket::{SessionEvents, Socket};
pub use transport::{TransportHandle, TransportType};
