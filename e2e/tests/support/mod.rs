//! Shared scaffolding for the end-to-end scenarios: a recording handler
//! that forwards every callback onto a channel, and a bare `hyper` listener
//! wired to a real `EngineIoServer`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use engineio::{
    ConnectError, DisconnectReason, EngineIoConfig, EngineIoHandler, EngineIoServer, Socket,
    TransportError,
};
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use tokio::sync::mpsc;
use tower::Service;

#[derive(Debug)]
#[allow(dead_code)]
pub enum Event {
    Connect(Arc<Socket>),
    Disconnect(Arc<Socket>, DisconnectReason),
    Message(Arc<Socket>, String),
    Binary(Arc<Socket>, Bytes),
    ConnectError(ConnectError),
    TransportException(Arc<Socket>, TransportError),
}

pub struct RecordingHandler {
    tx: mpsc::UnboundedSender<Event>,
}

impl EngineIoHandler for RecordingHandler {
    fn on_connect(&self, socket: Arc<Socket>) {
        let _ = self.tx.send(Event::Connect(socket));
    }

    fn on_disconnect(&self, socket: Arc<Socket>, reason: DisconnectReason) {
        let _ = self.tx.send(Event::Disconnect(socket, reason));
    }

    fn on_message(&self, socket: Arc<Socket>, message: String) {
        let _ = self.tx.send(Event::Message(socket, message));
    }

    fn on_binary(&self, socket: Arc<Socket>, data: Bytes) {
        let _ = self.tx.send(Event::Binary(socket, data));
    }

    fn on_connect_error(&self, error: ConnectError) {
        let _ = self.tx.send(Event::ConnectError(error));
    }

    fn on_transport_exception(&self, socket: Arc<Socket>, error: TransportError) {
        let _ = self.tx.send(Event::TransportException(socket, error));
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub events: mpsc::UnboundedReceiver<Event>,
}

impl TestServer {
    pub fn url(&self, suffix: &str) -> String {
        format!("http://{}{}", self.addr, suffix)
    }

    pub fn ws_url(&self, suffix: &str) -> String {
        format!("ws://{}{}", self.addr, suffix)
    }

    /// Drain events until one satisfies `pred`, or give up.
    pub async fn wait_for(&mut self, mut pred: impl FnMut(&Event) -> bool) -> Event {
        loop {
            let event = self
                .events
                .recv()
                .await
                .expect("server task dropped the event channel");
            if pred(&event) {
                return event;
            }
        }
    }
}

pub fn spawn_server(config: EngineIoConfig) -> TestServer {
    let (tx, rx) = mpsc::unbounded_channel();
    let server = EngineIoServer::new(config, RecordingHandler { tx });

    let make_svc = make_service_fn(move |conn: &AddrStream| {
        let server = server.clone();
        let remote_addr = conn.remote_addr();
        async move {
            Ok::<_, Infallible>(service_fn(move |mut req| {
                req.extensions_mut().insert(remote_addr);
                let mut svc = server.clone();
                async move { Service::call(&mut svc, req).await }
            }))
        }
    });

    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
    listener.set_nonblocking(true).expect("set nonblocking");
    let addr = listener.local_addr().expect("read local addr");
    let incoming = Server::from_tcp(listener).expect("hyper accepts the listener").serve(make_svc);
    tokio::spawn(async move {
        let _ = incoming.await;
    });

    TestServer { addr, events: rx }
}
