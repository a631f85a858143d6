//! HTTP long-polling transport: GET offload, POST ingest, per-verb locks.
//!
//! The get/post locks are at-most-one-in-flight gates, not data
//! protection: a second concurrent request of the same verb fails
//! immediately rather than waiting.

pub mod payload;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::config::EngineIoConfig;
use crate::errors::TransportError;
use crate::heart::Heart;
use crate::packet::Packet;
use crate::socket::SessionEvents;

pub use payload::{ContentKind, DecodedPayload, EncodedPayload};

pub struct PollingTransport {
    config: Arc<EngineIoConfig>,
    buffer: StdMutex<VecDeque<Packet>>,
    get_lock: AsyncMutex<()>,
    post_lock: AsyncMutex<()>,
    closed: AtomicBool,
    heart: StdMutex<Option<Heart>>,
    events: StdMutex<Option<Arc<dyn SessionEvents>>>,
}

impl PollingTransport {
    pub fn new(config: Arc<EngineIoConfig>) -> Arc<Self> {
        Arc::new(Self {
            config,
            buffer: StdMutex::new(VecDeque::new()),
            get_lock: AsyncMutex::new(()),
            post_lock: AsyncMutex::new(()),
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

    /// `send(packet)`: append to the buffer. There is no push to the
    /// client; delivery happens on the next GET.
    pub fn send(&self, packet: Packet) -> Result<(), TransportError> {
        if self.is_closed() {
            return Ok(());
        }
        self.buffer.lock().unwrap().push_back(packet);
        Ok(())
    }

    pub fn drain_buffer(&self) -> Vec<Packet> {
        self.buffer.lock().unwrap().drain(..).collect()
    }

    /// Idempotent: marks closed and stops the heart. Never touches network
    /// I/O.
    pub fn dispose(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut heart) = self.heart.lock().unwrap().take() {
            heart.stop();
        }
        *self.events.lock().unwrap() = None;
    }

    /// Drains pending packets into a response body, respecting the
    /// configured max payload size.
    pub fn offload(&self) -> Result<EncodedPayload, TransportError> {
        let _guard = self
            .get_lock
            .try_lock()
            .map_err(|_| TransportError::DuplicateGetRequest)?;

        let mut buffer = self.buffer.lock().unwrap();
        if buffer.is_empty() {
            return Ok(EncodedPayload::empty());
        }

        let max_payload = self.config.max_payload;
        let mut shipped = Vec::new();
        let mut total: u64 = 0;
        while let Some(next) = buffer.front() {
            let next_len = next.encoded_len() as u64;
            // Separator byte between packets; the first packet in a chunk
            // carries none. Always ship at least one packet, even if it
            // alone would overshoot the limit; otherwise stop before
            // overshooting.
            let overhead = if shipped.is_empty() { 0 } else { 1 };
            if !shipped.is_empty() && total + next_len + overhead > max_payload {
                break;
            }
            total += next_len;
            shipped.push(buffer.pop_front().unwrap());
        }
        drop(buffer);

        Ok(payload::encode_chunk(&shipped))
    }

    /// Decodes a client-sent polling body.
    /// HTTP-specific parsing (content-length/content-type bookkeeping) is
    /// done here; the shared legality sweep lives on `Socket`. The returned
    /// guard holds the POST gate open: callers must keep it alive through
    /// the legality sweep and event emission, not just the decode, so a
    /// second POST can't race the first one's effects.
    pub fn receive(
        &self,
        body: &[u8],
        declared_content_length: Option<u64>,
        declared_content_type: Option<&str>,
    ) -> Result<(AsyncMutexGuard<'_, ()>, DecodedPayload), TransportError> {
        let guard = self
            .post_lock
            .try_lock()
            .map_err(|_| TransportError::DuplicatePostRequest)?;

        let actual_len = body.len() as u64;
        let expected_len = declared_content_length.unwrap_or(actual_len);
        if expected_len != actual_len {
            return Err(TransportError::ContentLengthDisparity);
        }
        if expected_len > self.config.max_payload {
            return Err(TransportError::ContentLengthLimitExceeded);
        }

        let payload = payload::decode_chunk(body, declared_content_type)?;
        Ok((guard, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn transport() -> Arc<PollingTransport> {
        PollingTransport::new(Arc::new(EngineIoConfig::builder().build().unwrap()))
    }

    #[test]
    fn offload_on_empty_buffer_is_text_plain() {
        let t = transport();
        let payload = t.offload().unwrap();
        assert!(payload.body.is_empty());
        assert_eq!(payload.content_type, "text/plain");
    }

    #[test]
    fn offload_ships_at_least_one_packet_even_if_oversized() {
        // artificially tiny limit: smaller than the first packet alone
        let tiny_config = Arc::new(EngineIoConfig::builder().max_payload(4).build().unwrap());
        let t = PollingTransport::new(tiny_config);
        t.send(Packet::Message("x".repeat(100))).unwrap();
        t.send(Packet::Message("y".into())).unwrap();
        let payload = t.offload().unwrap();
        // exactly one packet shipped despite the limit
        assert_eq!(payload.body.split(|b| *b == 0x1E).count(), 1);
        assert_eq!(t.drain_buffer().len(), 1);
    }

    #[test]
    fn offload_chunk_limit_matches_documented_halving_behaviour() {
        // N packets each encoding to 2 bytes ("4x"); limit N bytes.
        // total + next + 1 > limit stops roughly at N/2 packets.
        let n: u64 = 20;
        let config = Arc::new(EngineIoConfig::builder().max_payload(n).build().unwrap());
        let t = PollingTransport::new(config);
        for _ in 0..n {
            t.send(Packet::Message("x".into())).unwrap();
        }
        let payload = t.offload().unwrap();
        let shipped = payload.body.split(|b| *b == 0x1E).count();
        assert!(shipped >= (n as usize) / 2 - 1 && shipped <= (n as usize) / 2 + 1);
        assert!(!t.drain_buffer().is_empty());
    }

    #[test]
    fn duplicate_get_rejected_while_in_flight() {
        let t = transport();
        let guard = t.get_lock.try_lock().unwrap();
        assert_eq!(t.offload(), Err(TransportError::DuplicateGetRequest));
        drop(guard);
        assert!(t.offload().is_ok());
    }

    #[test]
    fn duplicate_post_rejected_while_in_flight() {
        let t = transport();
        let guard = t.post_lock.try_lock().unwrap();
        assert_eq!(
            t.receive(b"4hi", None, None).unwrap_err(),
            TransportError::DuplicatePostRequest
        );
        drop(guard);
        assert!(t.receive(b"4hi", None, None).is_ok());
    }

    #[test]
    fn receive_rejects_content_length_disparity() {
        let t = transport();
        assert_eq!(
            t.receive(b"4hi", Some(100), None).unwrap_err(),
            TransportError::ContentLengthDisparity
        );
    }

    #[test]
    fn receive_rejects_oversized_body() {
        let config = Arc::new(EngineIoConfig::builder().max_payload(2).build().unwrap());
        let t = PollingTransport::new(config);
        assert_eq!(
            t.receive(b"4hi", None, None).unwrap_err(),
            TransportError::ContentLengthLimitExceeded
        );
    }

    #[test]
    fn receive_holds_post_lock_in_returned_guard() {
        let t = transport();
        let (_guard, _payload) = t.receive(b"4hi", None, None).unwrap();
        // the lock is still held: a second POST is rejected until the
        // guard is dropped.
        assert_eq!(
            t.receive(b"4hi", None, None).unwrap_err(),
            TransportError::DuplicatePostRequest
        );
    }

    #[test]
    fn binary_content_type_priority_over_json_and_text() {
        let t = transport();
        t.send(Packet::Binary(Bytes::from_static(b"x"))).unwrap();
        t.send(Packet::Message("hi".into())).unwrap();
        let payload = t.offload().unwrap();
        assert_eq!(payload.content_type, "application/octet-stream");
    }
}
