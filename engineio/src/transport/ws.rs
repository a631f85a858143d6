//! WebSocket transport: handshake key derivation and frame I/O.
//!
//! The actual socket pump (reading/writing `tokio-tungstenite` frames) is
//! driven by [`crate::service`]; this module owns the protocol-level state -
//! the outbound packet queue, the heart, and the handshake math - so it can
//! be unit tested without a live socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha1::{Digest, Sha1};
use tokio::sync::mpsc;

use crate::errors::TransportError;
use crate::heart::Heart;
use crate::packet::Packet;
use crate::socket::SessionEvents;

/// RFC 6455 magic GUID used to derive `Sec-WebSocket-Accept`.
const WS_MAGIC: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// A frame about to be written to the underlying socket: binary packets go
/// out as raw bytes, everything else as an encoded text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Binary(bytes::Bytes),
    /// Carries the websocket close code the transport was disposed with
    /// (1000 on a clean closure, 1008 on a protocol/policy violation).
    Close(u16),
}

impl From<Packet> for OutboundFrame {
    fn from(packet: Packet) -> Self {
        match packet {
            Packet::Binary(b) => OutboundFrame::Binary(b),
            // Sending the engine.io close packet over an already-healthy
            // connection is a benign, server-initiated closure.
            Packet::Close => OutboundFrame::Close(1000),
            other => OutboundFrame::Text(other.encode()),
        }
    }
}

pub struct WsTransport {
    outbound_tx: mpsc::UnboundedSender<OutboundFrame>,
    outbound_rx: StdMutex<Option<mpsc::UnboundedReceiver<OutboundFrame>>>,
    closed: AtomicBool,
    heart: StdMutex<Option<Heart>>,
    events: StdMutex<Option<Arc<dyn SessionEvents>>>,
}

impl WsTransport {
    pub fn new() -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            outbound_tx,
            outbound_rx: StdMutex::new(Some(outbound_rx)),
            closed: AtomicBool::new(false),
            heart: StdMutex::new(None),
            events: StdMutex::new(None),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn attach(&self, events: Arc<dyn SessionEvents>) {
        *self.events.lock().unwrap() = Some(events);
    }

    pub fn start_heart(self: &Arc<Self>, interval: Duration, timeout: Duration) {
        let tick_transport = Arc::downgrade(self);
        let timeout_transport = Arc::downgrade(self);
        let heart = Heart::spawn(
            interval,
            timeout,
            move || {
                if let Some(t) = tick_transport.upgrade() {
                    let _ = t.send(Packet::Ping { probe: false });
                }
            },
            move || {
                if let Some(t) = timeout_transport.upgrade() {
                    t.report_exception(TransportError::HeartbeatTimeout);
                }
            },
        );
        *self.heart.lock().unwrap() = Some(heart);
    }

    pub fn is_expecting_heartbeat(&self) -> bool {
        self.heart
            .lock()
            .unwrap()
            .as_ref()
            .map(|h| h.is_expecting_heartbeat())
            .unwrap_or(false)
    }

    pub fn reset_heart(&self) {
        if let Some(h) = self.heart.lock().unwrap().as_ref() {
            h.reset();
        }
    }

    fn report_exception(&self, err: TransportError) {
        if let Some(events) = self.events.lock().unwrap().clone() {
            events.on_transport_exception(err);
        }
    }

    /// `send(packet)`: if binary, queue the raw bytes to be written as a
    /// binary frame; else queue the encoded packet string as a text frame.
    pub fn send(&self, packet: Packet) -> Result<(), TransportError> {
        if self.is_closed() {
            return Ok(());
        }
        let _ = self.outbound_tx.send(packet.into());
        Ok(())
    }

    /// Taken exactly once by the socket pump task.
    pub fn take_outbound(&self) -> Option<mpsc::UnboundedReceiver<OutboundFrame>> {
        self.outbound_rx.lock().unwrap().take()
    }

    /// Forced closure: the underlying socket completed while this
    /// transport wasn't marked closed.
    pub fn report_forced_closure(&self) {
        if !self.is_closed() {
            self.report_exception(TransportError::ClosedForcefully);
        }
    }

    /// `close_code` is the websocket close code to send with the teardown
    /// frame: 1000 for a clean closure, 1008 for a protocol/policy
    /// violation. See [`crate::errors::WsTransportError::close_code`].
    pub fn dispose(&self, close_code: u16) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut heart) = self.heart.lock().unwrap().take() {
            heart.stop();
        }
        *self.events.lock().unwrap() = None;
        let _ = self.outbound_tx.send(OutboundFrame::Close(close_code));
    }
}

/// `receive(data)`: an incoming websocket text frame is decoded with the
/// packet codec; a binary frame is wrapped with no further decoding.
/// Anything else (ping/pong/close websocket-protocol frames are handled by
/// the transport's frame pump, never reach here).
pub enum IncomingFrame {
    Text(String),
    Binary(bytes::Bytes),
}

pub fn decode_incoming(frame: IncomingFrame) -> Result<Packet, TransportError> {
    match frame {
        IncomingFrame::Text(s) => {
            Packet::decode(&s).map_err(|_| TransportError::DecodingPacketsFailed)
        }
        IncomingFrame::Binary(b) => Ok(Packet::from_binary_frame(b)),
    }
}

/// Derive `Sec-WebSocket-Accept` from the raw client `Sec-WebSocket-Key`
/// header value. Fails if the key does not decode to exactly 16 bytes.
pub fn compute_accept_key(client_key: &str) -> Result<String, TransportError> {
    let decoded = STANDARD
        .decode(client_key.trim())
        .map_err(|_| TransportError::UpgradeRequestInvalid)?;
    if decoded.len() != 16 {
        return Err(TransportError::UpgradeRequestInvalid);
    }
    let mut hasher = Sha1::new();
    hasher.update(client_key.trim().as_bytes());
    hasher.update(WS_MAGIC.as_bytes());
    let digest = hasher.finalize();
    Ok(STANDARD.encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_rfc6455_example() {
        // The canonical example from RFC 6455 §1.3.
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let accept = compute_accept_key(key).unwrap();
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn rejects_key_not_sixteen_bytes() {
        // "abc" decodes to 2 bytes, not 16.
        assert_eq!(
            compute_accept_key("YWJj"),
            Err(TransportError::UpgradeRequestInvalid)
        );
    }

    #[test]
    fn rejects_non_base64_key() {
        assert_eq!(
            compute_accept_key("not base64!!"),
            Err(TransportError::UpgradeRequestInvalid)
        );
    }

    #[test]
    fn binary_outgoing_bypasses_base64_encoding() {
        let frame: OutboundFrame = Packet::Binary(bytes::Bytes::from_static(b"\x00\x01")).into();
        assert_eq!(
            frame,
            OutboundFrame::Binary(bytes::Bytes::from_static(b"\x00\x01"))
        );
    }

    #[test]
    fn decode_incoming_binary_has_no_base64() {
        let packet =
            decode_incoming(IncomingFrame::Binary(bytes::Bytes::from_static(b"\x01\x02"))).unwrap();
        assert_eq!(packet, Packet::Binary(bytes::Bytes::from_static(b"\x01\x02")));
    }

    #[test]
    fn decode_incoming_rejects_malformed_text_frame() {
        assert_eq!(
            decode_incoming(IncomingFrame::Text("z".into())),
            Err(TransportError::DecodingPacketsFailed)
        );
    }
}
