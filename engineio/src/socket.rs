//! Session (Socket) lifecycle: transport ownership, upgrade state,
//! disposal ordering.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};

use crate::config::EngineIoConfig;
use crate::errors::{DisconnectReason, TransportError};
use crate::sid::Sid;
use crate::transport::{IngestOutcome, TransportHandle};
use crate::upgrade::{UpgradeState, UpgradeStatus};

/// The async-originated half of transport->session event forwarding: the
/// heart's timeout and a websocket's forced closure happen on a background
/// task, not inside a request handler, so they need an actual subscription
/// rather than a direct call. Everything else (onReceive, onMessage,
/// onHeartbeat, onUpgrade, ...) is synchronous and handled as a return
/// value from `Socket::ingest_packets`, consumed directly by the service
/// dispatcher.
pub trait SessionEvents: Send + Sync {
    fn on_transport_exception(&self, err: TransportError);
}

pub struct Socket {
    pub id: Sid,
    pub ip: IpAddr,
    config: Arc<EngineIoConfig>,
    transport: StdRwLock<TransportHandle>,
    upgrade: StdMutex<UpgradeState>,
    disposing: AtomicBool,
}

impl Socket {
    pub fn new(
        id: Sid,
        ip: IpAddr,
        config: Arc<EngineIoConfig>,
        initial_transport: TransportHandle,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            ip,
            config,
            transport: StdRwLock::new(initial_transport),
            upgrade: StdMutex::new(UpgradeState::default()),
            disposing: AtomicBool::new(false),
        })
    }

    pub fn current_transport(&self) -> TransportHandle {
        self.transport.read().unwrap().clone()
    }

    pub fn is_disposing(&self) -> bool {
        self.disposing.load(Ordering::SeqCst)
    }

    pub fn is_upgrading(&self) -> bool {
        self.upgrade.lock().unwrap().is_upgrading()
    }

    pub fn config(&self) -> &Arc<EngineIoConfig> {
        &self.config
    }

    /// `none -> initiated`: a valid websocket-upgrade GET on a polling
    /// session. The probe transport is wired up and timed.
    pub fn begin_upgrade(self: &Arc<Self>, probe: TransportHandle, events: Arc<dyn SessionEvents>) {
        probe.attach(events);
        let weak = Arc::downgrade(self);
        self.upgrade
            .lock()
            .unwrap()
            .mark_initiated(probe, self.config.upgrade_timeout, move || {
                if let Some(session) = weak.upgrade() {
                    session.abandon_upgrade(DisconnectReason::UpgradeTimeout);
                }
            });
    }

    /// Upgrade timeout (or any other abandonment): dispose the probe and
    /// reset to `none`, without touching the origin transport. The probe
    /// never carried application data, so its closure is always clean.
    fn abandon_upgrade(self: &Arc<Self>, _reason: DisconnectReason) {
        let probe = self.upgrade.lock().unwrap().reset();
        if let Some(probe) = probe {
            probe.dispose(1000);
        }
    }

    /// The shared receive/process pipeline: run decoded packets through the
    /// legality sweep, applying transport and upgrade-state side effects as
    /// it goes and stopping at the first illegal packet.
    pub fn ingest_packets(
        self: &Arc<Self>,
        from: &TransportHandle,
        packets: Vec<crate::packet::Packet>,
    ) -> Result<IngestOutcome, TransportError> {
        use crate::packet::Packet;

        let mut outcome = IngestOutcome::default();
        for packet in packets {
            match packet {
                Packet::Open(_) | Packet::Noop => return Err(TransportError::PacketIllegal),
                Packet::Ping { probe: false } => return Err(TransportError::PacketIllegal),
                Packet::Ping { probe: true } => {
                    self.handle_probe_ping(from)?;
                }
                Packet::Pong { probe: true } => return Err(TransportError::PacketIllegal),
                Packet::Pong { probe: false } => {
                    if !from.is_expecting_heartbeat() {
                        return Err(TransportError::HeartbeatUnexpected);
                    }
                    from.reset_heart();
                }
                Packet::Close => {
                    outcome.is_closing = true;
                }
                Packet::Upgrade => {
                    self.handle_upgrade_packet(from)?;
                }
                Packet::Message(s) => outcome.messages.push(s),
                Packet::Binary(b) => outcome.binaries.push(b),
            }
        }
        Ok(outcome)
    }

    /// `initiated -> probed`, or one of the two rejection cases below.
    fn handle_probe_ping(&self, from: &TransportHandle) -> Result<(), TransportError> {
        // Open Question (a), resolved: a probe ping over polling is
        // illegal outright.
        if matches!(from, TransportHandle::Polling(_)) {
            return Err(TransportError::PacketIllegal);
        }

        let mut upgrade = self.upgrade.lock().unwrap();
        if let Some(probe) = upgrade.probe() {
            if probe.ptr_eq(from) {
                if upgrade.status() == UpgradeStatus::Probed {
                    return Err(TransportError::TransportAlreadyProbed);
                }
                upgrade.mark_probed();
                drop(upgrade);
                return from.send(crate::packet::Packet::Pong { probe: true });
            }
        }
        drop(upgrade);

        let current = self.transport.read().unwrap();
        if current.ptr_eq(from) {
            return Err(TransportError::TransportIsOrigin);
        }
        // A probe ping on a websocket transport unrelated to any upgrade
        // in flight (e.g. a pure websocket session) is treated the same
        // way: it is, in effect, the origin.
        Err(TransportError::TransportIsOrigin)
    }

    /// `probed -> none` (complete), or one of the two rejection cases
    /// below.
    fn handle_upgrade_packet(self: &Arc<Self>, from: &TransportHandle) -> Result<(), TransportError> {
        // Open Question (b), resolved: an upgrade packet over polling is
        // illegal outright.
        if matches!(from, TransportHandle::Polling(_)) {
            return Err(TransportError::PacketIllegal);
        }

        if self.transport.read().unwrap().ptr_eq(from) {
            return Err(TransportError::TransportAlreadyUpgraded);
        }

        let status = {
            let upgrade = self.upgrade.lock().unwrap();
            match upgrade.probe() {
                Some(p) if p.ptr_eq(from) => Some(upgrade.status()),
                _ => None,
            }
        };

        match status {
            Some(UpgradeStatus::Probed) => {
                self.complete_upgrade(from.clone());
                Ok(())
            }
            _ => Err(TransportError::TransportNotProbed),
        }
    }

    /// Atomically replace `transport` with the probe: buffered packets on
    /// the old transport are replayed into the new one before the old
    /// transport is disposed, and before the new one is published, so
    /// observers never see a half-wired state.
    fn complete_upgrade(self: &Arc<Self>, probe: TransportHandle) {
        self.upgrade.lock().unwrap().mark_complete();

        let old = self.transport.read().unwrap().clone();
        for packet in old.drain_buffer() {
            let _ = probe.send(packet);
        }

        {
            let mut guard = self.transport.write().unwrap();
            *guard = probe.clone();
        }
        probe.start_heart(self.config.ping_interval, self.config.ping_timeout);

        old.dispose(1000);
    }

    /// Publishes the initial transport at handshake time. There is no
    /// previous transport to replay from or dispose.
    pub fn attach_initial_transport(self: &Arc<Self>, events: Arc<dyn SessionEvents>) {
        let current = self.current_transport();
        current.attach(events);
        current.start_heart(self.config.ping_interval, self.config.ping_timeout);
    }

    /// Idempotent disposal: mark disposing, dispose the current transport,
    /// tear down any in-flight upgrade (reset state, dispose the probe),
    /// and report whether this call actually performed the disposal (so
    /// the caller emits `onClose`/`on_disconnect` exactly once).
    /// `close_code` is the websocket close code to send if the current (or
    /// probe) transport is a websocket; see
    /// [`crate::errors::WsTransportError::close_code`].
    pub fn dispose(self: &Arc<Self>, close_code: u16) -> bool {
        if self.disposing.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.current_transport().dispose(close_code);

        let probe = self.upgrade.lock().unwrap().reset();
        if let Some(probe) = probe {
            probe.dispose(close_code);
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineIoConfig;
    use crate::packet::Packet;
    use crate::transport::{PollingTransport, WsTransport};
    use std::net::{IpAddr, Ipv4Addr};

    struct NullEvents;
    impl SessionEvents for NullEvents {
        fn on_transport_exception(&self, _err: TransportError) {}
    }

    fn new_socket() -> Arc<Socket> {
        let config = Arc::new(EngineIoConfig::builder().build().unwrap());
        let transport = TransportHandle::Polling(PollingTransport::new(config.clone()));
        let socket = Socket::new(
            Sid::new("sid-1".to_string()),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            config,
            transport,
        );
        socket.attach_initial_transport(Arc::new(NullEvents));
        socket
    }

    #[tokio::test]
    async fn dispose_is_idempotent() {
        let socket = new_socket();
        assert!(socket.dispose(1000));
        assert!(!socket.dispose(1000));
    }

    #[tokio::test]
    async fn rejects_open_and_noop_from_client() {
        let socket = new_socket();
        let transport = socket.current_transport();
        assert_eq!(
            socket.ingest_packets(&transport, vec![Packet::Noop]),
            Err(TransportError::PacketIllegal)
        );
        assert_eq!(
            socket.ingest_packets(
                &transport,
                vec![crate::packet::Packet::Open(crate::packet::OpenPacket {
                    sid: "x".into(),
                    upgrades: vec![],
                    ping_interval: 1,
                    ping_timeout: 1,
                    max_payload: 1,
                })]
            ),
            Err(TransportError::PacketIllegal)
        );
    }

    #[tokio::test]
    async fn rejects_non_probe_ping_from_client() {
        let socket = new_socket();
        let transport = socket.current_transport();
        assert_eq!(
            socket.ingest_packets(&transport, vec![Packet::Ping { probe: false }]),
            Err(TransportError::PacketIllegal)
        );
    }

    #[tokio::test]
    async fn rejects_probe_pong_from_client() {
        let socket = new_socket();
        let transport = socket.current_transport();
        assert_eq!(
            socket.ingest_packets(&transport, vec![Packet::Pong { probe: true }]),
            Err(TransportError::PacketIllegal)
        );
    }

    #[tokio::test]
    async fn unexpected_pong_without_ping_fails() {
        let socket = new_socket();
        let transport = socket.current_transport();
        assert_eq!(
            socket.ingest_packets(&transport, vec![Packet::Pong { probe: false }]),
            Err(TransportError::HeartbeatUnexpected)
        );
    }

    #[tokio::test]
    async fn close_packet_marks_outcome_closing() {
        let socket = new_socket();
        let transport = socket.current_transport();
        let outcome = socket
            .ingest_packets(&transport, vec![Packet::Close])
            .unwrap();
        assert!(outcome.is_closing);
    }

    #[tokio::test]
    async fn probe_ping_over_polling_is_illegal() {
        let socket = new_socket();
        let transport = socket.current_transport();
        assert_eq!(
            socket.ingest_packets(&transport, vec![Packet::Ping { probe: true }]),
            Err(TransportError::PacketIllegal)
        );
    }

    #[tokio::test]
    async fn upgrade_over_polling_is_illegal() {
        let socket = new_socket();
        let transport = socket.current_transport();
        assert_eq!(
            socket.ingest_packets(&transport, vec![Packet::Upgrade]),
            Err(TransportError::PacketIllegal)
        );
    }

    #[tokio::test]
    async fn full_upgrade_probe_and_complete_sequence() {
        let socket = new_socket();
        socket
            .current_transport()
            .send(Packet::Message("buffered".into()))
            .unwrap();

        let probe = TransportHandle::Ws(WsTransport::new());
        socket.begin_upgrade(probe.clone(), Arc::new(NullEvents));
        assert!(socket.is_upgrading());

        // Probe ping on the origin is rejected.
        assert_eq!(
            socket.ingest_packets(&socket.current_transport(), vec![Packet::Ping { probe: true }]),
            Err(TransportError::TransportIsOrigin)
        );

        // Probe ping on the probe transport succeeds and replies pong-probe.
        socket
            .ingest_packets(&probe, vec![Packet::Ping { probe: true }])
            .unwrap();
        // Duplicate probe ping fails.
        assert_eq!(
            socket.ingest_packets(&probe, vec![Packet::Ping { probe: true }]),
            Err(TransportError::TransportAlreadyProbed)
        );

        // Upgrade before the probe transport is adopted as current fails if
        // sent on the origin.
        assert_eq!(
            socket.ingest_packets(&socket.current_transport(), vec![Packet::Upgrade]),
            Err(TransportError::PacketIllegal)
        );

        socket.ingest_packets(&probe, vec![Packet::Upgrade]).unwrap();
        assert!(!socket.is_upgrading());
        assert!(socket.current_transport().ptr_eq(&probe));

        // Buffered packet from the old transport was replayed onto the
        // websocket's outbound queue.
        if let TransportHandle::Ws(ws) = &probe {
            let mut rx = ws.take_outbound().unwrap();
            let frame = rx.try_recv().unwrap();
            assert_eq!(
                frame,
                crate::transport::ws::OutboundFrame::Text("4buffered".into())
            );
        } else {
            panic!("expected ws transport");
        }

        // Duplicate upgrade packet on the now-current transport.
        assert_eq!(
            socket.ingest_packets(&probe, vec![Packet::Upgrade]),
            Err(TransportError::TransportAlreadyUpgraded)
        );
    }

    #[tokio::test]
    async fn upgrade_before_probe_is_rejected() {
        let socket = new_socket();
        let probe = TransportHandle::Ws(WsTransport::new());
        socket.begin_upgrade(probe.clone(), Arc::new(NullEvents));
        assert_eq!(
            socket.ingest_packets(&probe, vec![Packet::Upgrade]),
            Err(TransportError::TransportNotProbed)
        );
    }
}
