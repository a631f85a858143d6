//! Transport base: the shared vocabulary and the shared receive/process
//! pipeline used by both the polling and the websocket transport.

pub mod polling;
pub mod ws;

use std::sync::Arc;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::TransportError;
use crate::packet::Packet;
use crate::socket::SessionEvents;

pub use polling::PollingTransport;
pub use ws::WsTransport;

/// The two wire transports this protocol understands, and the (static, not
/// configuration-driven) upgrade graph between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    Polling,
    Websocket,
}

impl TransportType {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportType::Polling => "polling",
            TransportType::Websocket => "websocket",
        }
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "polling" => Some(TransportType::Polling),
            "websocket" => Some(TransportType::Websocket),
            _ => None,
        }
    }

    /// Static upgrade graph: polling -> {websocket}; websocket -> {}.
    pub fn upgrade_targets(self) -> &'static [TransportType] {
        match self {
            TransportType::Polling => &[TransportType::Websocket],
            TransportType::Websocket => &[],
        }
    }

    pub fn can_upgrade_to(self, other: TransportType) -> bool {
        self.upgrade_targets().contains(&other)
    }
}

impl Serialize for TransportType {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TransportType {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let name = String::deserialize(d)?;
        TransportType::by_name(&name).ok_or_else(|| de::Error::custom(format!("unknown transport '{name}'")))
    }
}

/// A live handle on whichever concrete transport a [`crate::socket::Socket`]
/// currently owns (or is probing). Kept as a small closed enum rather than a
/// `dyn Trait` object: the two transports have different receive/offload
/// call shapes (HTTP request/response vs. a framed socket loop), so the
/// common surface is deliberately thin.
#[derive(Clone)]
pub enum TransportHandle {
    Polling(Arc<PollingTransport>),
    Ws(Arc<WsTransport>),
}

impl TransportHandle {
    pub fn transport_type(&self) -> TransportType {
        match self {
            TransportHandle::Polling(_) => TransportType::Polling,
            TransportHandle::Ws(_) => TransportType::Websocket,
        }
    }

    /// Queue (polling) or immediately write (websocket) a packet destined
    /// for the client. There is no reply channel: delivery for polling
    /// happens on the next GET.
    pub fn send(&self, packet: Packet) -> Result<(), TransportError> {
        match self {
            TransportHandle::Polling(t) => t.send(packet),
            TransportHandle::Ws(t) => t.send(packet),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            TransportHandle::Polling(t) => t.is_closed(),
            TransportHandle::Ws(t) => t.is_closed(),
        }
    }

    /// Attach the session-level event forwarder. Called exactly once per
    /// transport, from `Socket::set_transport`, before the transport is
    /// published as current (or as the upgrade probe).
    pub fn attach(&self, events: Arc<dyn SessionEvents>) {
        match self {
            TransportHandle::Polling(t) => t.attach(events),
            TransportHandle::Ws(t) => t.attach(events),
        }
    }

    /// Idempotent teardown: cancels the heart, marks closed, drops the
    /// event forwarder. Never blocks on network I/O. `close_code` is the
    /// websocket close code to send (ignored by the polling transport,
    /// which has no equivalent concept).
    pub fn dispose(&self, close_code: u16) {
        match self {
            TransportHandle::Polling(t) => t.dispose(),
            TransportHandle::Ws(t) => t.dispose(close_code),
        }
    }

    /// Drain any buffered-but-unsent packets so they can be replayed onto a
    /// freshly published transport during an upgrade. Only polling ever
    /// buffers; websocket returns an empty vec.
    pub fn drain_buffer(&self) -> Vec<Packet> {
        match self {
            TransportHandle::Polling(t) => t.drain_buffer(),
            TransportHandle::Ws(_) => Vec::new(),
        }
    }

    /// Identity comparison: used by the upgrade coordinator to tell which
    /// concrete transport instance a packet arrived on (origin vs. probe).
    pub fn ptr_eq(&self, other: &TransportHandle) -> bool {
        match (self, other) {
            (TransportHandle::Polling(a), TransportHandle::Polling(b)) => Arc::ptr_eq(a, b),
            (TransportHandle::Ws(a), TransportHandle::Ws(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Starts this transport's heart. Only ever called on the transport a
    /// session has just made current: the heart lives on the transport, but
    /// a probe transport stays silent until it wins the upgrade.
    pub fn start_heart(&self, interval: std::time::Duration, timeout: std::time::Duration) {
        match self {
            TransportHandle::Polling(t) => t.start_heart(interval, timeout),
            TransportHandle::Ws(t) => t.start_heart(interval, timeout),
        }
    }

    pub fn is_expecting_heartbeat(&self) -> bool {
        match self {
            TransportHandle::Polling(t) => t.is_expecting_heartbeat(),
            TransportHandle::Ws(t) => t.is_expecting_heartbeat(),
        }
    }

    pub fn reset_heart(&self) {
        match self {
            TransportHandle::Polling(t) => t.reset_heart(),
            TransportHandle::Ws(t) => t.reset_heart(),
        }
    }
}

/// Outcome of running a freshly decoded packet list through the shared
/// legality sweep. Built up by [`crate::socket::Socket::ingest_packets`]
/// and consumed by the service dispatcher to drive handler callbacks.
#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub messages: Vec<String>,
    pub binaries: Vec<bytes::Bytes>,
    pub is_closing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrade_graph_is_static() {
        assert!(TransportType::Polling.can_upgrade_to(TransportType::Websocket));
        assert!(!TransportType::Websocket.can_upgrade_to(TransportType::Polling));
        assert!(!TransportType::Polling.can_upgrade_to(TransportType::Polling));
    }

    #[test]
    fn by_name_round_trips() {
        for t in [TransportType::Polling, TransportType::Websocket] {
            assert_eq!(TransportType::by_name(t.as_str()), Some(t));
        }
        assert_eq!(TransportType::by_name("bogus"), None);
    }
}
