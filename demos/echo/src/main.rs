//! Minimal echo server: every text message a client sends is sent back
//! unchanged, every disconnect is logged. Demonstrates wiring
//! `EngineIoServer` directly into a bare `hyper` listener with no
//! framework in between.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use engineio::{DisconnectReason, EngineIoConfig, EngineIoHandler, EngineIoServer, Socket};
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use tower::Service;
use tracing_subscriber::EnvFilter;

struct EchoHandler;

impl EngineIoHandler for EchoHandler {
    fn on_connect(&self, socket: Arc<Socket>) {
        tracing::info!(sid = %socket.id, ip = %socket.ip, "connected");
    }

    fn on_disconnect(&self, socket: Arc<Socket>, reason: DisconnectReason) {
        tracing::info!(sid = %socket.id, ?reason, "disconnected");
    }

    fn on_message(&self, socket: Arc<Socket>, message: String) {
        let _ = socket.current_transport().send(engineio::Packet::Message(message));
    }

    fn on_binary(&self, socket: Arc<Socket>, data: Bytes) {
        let _ = socket.current_transport().send(engineio::Packet::Binary(data));
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = EngineIoConfig::builder().build().expect("default config is valid");
    let server = EngineIoServer::new(config, EchoHandler);

    let addr: SocketAddr = "127.0.0.1:3000".parse().unwrap();
    let make_svc = make_service_fn(move |conn: &hyper::server::conn::AddrStream| {
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

    tracing::info!(%addr, "listening");
    if let Err(e) = Server::bind(&addr).serve(make_svc).await {
        tracing::error!(error = %e, "server error");
    }
}
