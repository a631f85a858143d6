//! The `tower::Service` dispatcher: request classification, handshake,
//! upgrade routing, and GET/POST dispatch to the per-session transport.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use http::request::Parts;
use http::{HeaderMap, Method, Request, Response, StatusCode};
use hyper::upgrade::Upgraded;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;

use crate::body::ResponseBody;
use crate::config::EngineIoConfig;
use crate::errors::{ConnectError, DisconnectReason, EngineError, TransportError, WsTransportError};
use crate::futures::{error_response, http_response, options_response, ws_response};
use crate::handler::EngineIoHandler;
use crate::packet::{OpenPacket, Packet};
use crate::query::parse_query;
use crate::registry::ClientRegistry;
use crate::request::ConnectRequest;
use crate::sid::Sid;
use crate::socket::{SessionEvents, Socket};
use crate::transport::polling::PollingTransport;
use crate::transport::ws::{decode_incoming, IncomingFrame, OutboundFrame, WsTransport};
use crate::transport::{TransportHandle, TransportType};

/// Owns the registry and the handler; cheap to clone (everything behind an
/// `Arc`) so spawned connection tasks can each hold their own reference.
pub struct EngineIoServer<H: EngineIoHandler> {
    pub config: Arc<EngineIoConfig>,
    pub handler: Arc<H>,
    registry: Arc<ClientRegistry>,
}

impl<H: EngineIoHandler> EngineIoServer<H> {
    pub fn new(config: EngineIoConfig, handler: H) -> Arc<Self> {
        Arc::new(Self {
            config: Arc::new(config),
            handler: Arc::new(handler),
            registry: Arc::new(ClientRegistry::new()),
        })
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Server-wide shutdown: dispose every live session concurrently, in
    /// no particular order.
    pub async fn dispose(&self) {
        let close_code = WsTransportError::from(TransportError::ServerClosing).close_code();
        let mut disposals: FuturesUnordered<_> = self
            .registry
            .all()
            .into_iter()
            .map(|socket| async move { socket.dispose(close_code).then_some(socket) })
            .collect();

        while let Some(disposed) = disposals.next().await {
            if let Some(socket) = disposed {
                self.registry.remove(&socket.id);
                self.handler
                    .on_disconnect(socket, DisconnectReason::ServerClosing);
            }
        }
    }

    fn forwarder(self: &Arc<Self>, sid: Sid) -> Arc<dyn SessionEvents> {
        Arc::new(TransportEventForwarder {
            server: self.clone(),
            sid,
        })
    }
}

/// The only asynchronously-originated event path: a transport's heartbeat
/// timeout or forced closure fires from a detached task, not from a live
/// request, so it needs a real subscription rather than a direct call.
struct TransportEventForwarder<H: EngineIoHandler> {
    server: Arc<EngineIoServer<H>>,
    sid: Sid,
}

impl<H: EngineIoHandler> SessionEvents for TransportEventForwarder<H> {
    fn on_transport_exception(&self, err: TransportError) {
        let Some(socket) = self.server.registry.get_by_sid(&self.sid) else {
            return;
        };
        self.server
            .handler
            .on_transport_exception(socket.clone(), err.clone());
        let close_code = WsTransportError::from(err.clone()).close_code();
        if socket.dispose(close_code) {
            self.server.registry.remove(&socket.id);
            self.server.handler.on_disconnect(socket, err.into());
        }
    }
}

impl<H: EngineIoHandler> tower::Service<Request<hyper::Body>> for Arc<EngineIoServer<H>> {
    type Response = Response<ResponseBody<hyper::Body>>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::Body>) -> Self::Future {
        let server = self.clone();
        Box::pin(async move { Ok(handle(server, req).await) })
    }
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let has_token = |name: &str, token: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_ascii_lowercase().contains(token))
            .unwrap_or(false)
    };
    has_token(http::header::CONNECTION.as_str(), "upgrade")
        && has_token(http::header::UPGRADE.as_str(), "websocket")
}

async fn handle<H: EngineIoHandler>(
    server: Arc<EngineIoServer<H>>,
    req: Request<hyper::Body>,
) -> Response<ResponseBody<hyper::Body>> {
    // Step 1: remote IP.
    let remote_addr = match req.extensions().get::<SocketAddr>() {
        Some(addr) => addr.ip(),
        None => {
            server
                .handler
                .on_connect_error(ConnectError::IpAddressUnobtainable);
            return connect_error_response(ConnectError::IpAddressUnobtainable);
        }
    };

    // Step 2: path.
    if req.uri().path() != server.config.req_path {
        return connect_error_response(ConnectError::ServerPathInvalid);
    }

    // Step 3: OPTIONS/CORS.
    if req.method() == Method::OPTIONS {
        return options_response().unwrap_or_else(|_| fallback_error_response());
    }

    // Step 4: method.
    if req.method() != Method::GET && req.method() != Method::POST {
        server.handler.on_connect_error(ConnectError::MethodNotAllowed);
        return connect_error_response(ConnectError::MethodNotAllowed);
    }

    let already_connected = server.registry.contains_ip(remote_addr);

    // Step 5.
    if !already_connected && req.method() != Method::GET {
        server.handler.on_connect_error(ConnectError::GetExpected);
        return connect_error_response(ConnectError::GetExpected);
    }

    // Step 6: query.
    let parsed = match parse_query(
        req.uri().query().unwrap_or(""),
        server.config.protocol_version,
        &server.config.available_transports,
    ) {
        Ok(p) => p,
        Err(e) => {
            server.handler.on_connect_error(e.clone());
            return connect_error_response(e);
        }
    };

    // Step 7: sid presence.
    if already_connected {
        let Some(ref sid_str) = parsed.sid else {
            server
                .handler
                .on_connect_error(ConnectError::SessionIdentifierRequired);
            return connect_error_response(ConnectError::SessionIdentifierRequired);
        };
        if !server.config.sid_generator.validate(sid_str) {
            server
                .handler
                .on_connect_error(ConnectError::SessionIdentifierInvalid);
            return connect_error_response(ConnectError::SessionIdentifierInvalid);
        }
    } else if parsed.sid.is_some() {
        server
            .handler
            .on_connect_error(ConnectError::SessionIdentifierUnexpected);
        return connect_error_response(ConnectError::SessionIdentifierUnexpected);
    }

    let (parts, body) = req.into_parts();
    let wants_ws_upgrade = is_websocket_upgrade(&parts.headers);

    if !already_connected {
        let connect_req = ConnectRequest {
            remote_addr,
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
        };
        return handshake(&server, &connect_req, parsed.transport, wants_ws_upgrade, parts).await;
    }

    // Step 9: lookup.
    let sid = parsed.sid.expect("validated in step 7");
    let socket = match server.registry.get_by_sid(&Sid::new(sid)) {
        Some(socket) => socket,
        None => {
            server
                .handler
                .on_connect_error(ConnectError::SessionIdentifierInvalid);
            return connect_error_response(ConnectError::SessionIdentifierInvalid);
        }
    };

    // Step 10: upgrade routing.
    let current_type = socket.current_transport().transport_type();
    let seeking_upgrade = parsed.transport != current_type;
    if seeking_upgrade {
        if !wants_ws_upgrade || parsed.transport != TransportType::Websocket {
            return respond_exception(&server, socket, ConnectError::UpgradeRequestUnexpected);
        }
        return begin_probe_upgrade(&server, socket, parts).await;
    } else if wants_ws_upgrade {
        return respond_exception(&server, socket, ConnectError::UpgradeRequestUnexpected);
    }

    // Step 11: GET/POST dispatch.
    dispatch_polling(&server, socket, &parts.method, &parts.headers, body).await
}

async fn handshake<H: EngineIoHandler>(
    server: &Arc<EngineIoServer<H>>,
    connect_req: &ConnectRequest,
    requested: TransportType,
    wants_ws_upgrade: bool,
    parts: Parts,
) -> Response<ResponseBody<hyper::Body>> {
    let sid = server.config.sid_generator.generate(connect_req);

    if requested == TransportType::Websocket {
        if !wants_ws_upgrade {
            server
                .handler
                .on_connect_error(ConnectError::TransportUnavailable);
            return connect_error_response(ConnectError::TransportUnavailable);
        }
        // Websocket-only handshake shortcut: no polling transport is ever
        // served for this session; the websocket transport is published
        // directly and the open packet travels as the first ws frame.
        let ws_transport = WsTransport::new();
        let transport = TransportHandle::Ws(ws_transport.clone());
        let socket = Socket::new(
            sid.clone(),
            connect_req.remote_addr,
            server.config.clone(),
            transport,
        );
        server.registry.insert(socket.clone());
        socket.attach_initial_transport(server.forwarder(sid.clone()));
        let _ = ws_transport.send(Packet::Open(OpenPacket::new(sid, &server.config)));
        server.handler.on_connect(socket.clone());

        let key = parts
            .headers
            .get("Sec-WebSocket-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_owned();
        return match ws_response(&key) {
            Ok(response) => {
                spawn_ws_pump(server.clone(), socket, ws_transport, parts);
                response
            }
            Err(_) => fallback_error_response(),
        };
    }

    let transport = TransportHandle::Polling(PollingTransport::new(server.config.clone()));
    let socket = Socket::new(
        sid.clone(),
        connect_req.remote_addr,
        server.config.clone(),
        transport.clone(),
    );
    server.registry.insert(socket.clone());
    socket.attach_initial_transport(server.forwarder(sid.clone()));
    let _ = transport.send(Packet::Open(OpenPacket::new(sid, &server.config)));
    server.handler.on_connect(socket);

    let polling = match transport {
        TransportHandle::Polling(p) => p,
        TransportHandle::Ws(_) => unreachable!("just constructed as polling"),
    };
    match polling.offload() {
        Ok(payload) => http_response(StatusCode::OK, payload.content_type, payload.body)
            .unwrap_or_else(|_| fallback_error_response()),
        Err(e) => fallback_error_response_for(e.status_code(), e.reason_phrase()),
    }
}

async fn begin_probe_upgrade<H: EngineIoHandler>(
    server: &Arc<EngineIoServer<H>>,
    socket: Arc<Socket>,
    parts: Parts,
) -> Response<ResponseBody<hyper::Body>> {
    let ws_transport = WsTransport::new();
    let probe = TransportHandle::Ws(ws_transport.clone());
    socket.begin_upgrade(probe, server.forwarder(socket.id.clone()));

    let key = parts
        .headers
        .get("Sec-WebSocket-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_owned();
    match ws_response(&key) {
        Ok(response) => {
            spawn_ws_pump(server.clone(), socket, ws_transport, parts);
            response
        }
        Err(_) => fallback_error_response(),
    }
}

/// After the HTTP upgrade response is sent, wait for `hyper` to hand back
/// the raw socket and run the frame pump for as long as the connection
/// lives. Reusing the original request's `Parts` (rather than building a
/// fresh `Request`) matters: `hyper::upgrade::on` reads the pending upgrade
/// out of the extensions hyper itself attached while parsing the
/// connection, and that only survives on the original parts.
fn spawn_ws_pump<H: EngineIoHandler>(
    server: Arc<EngineIoServer<H>>,
    socket: Arc<Socket>,
    transport: Arc<WsTransport>,
    parts: Parts,
) {
    let req = Request::from_parts(parts, hyper::Body::empty());
    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => run_ws_pump(server, socket, transport, upgraded).await,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("[sid={}] websocket upgrade failed: {:?}", socket.id, _e);
            }
        }
    });
}

async fn run_ws_pump<H: EngineIoHandler>(
    server: Arc<EngineIoServer<H>>,
    socket: Arc<Socket>,
    transport: Arc<WsTransport>,
    upgraded: Upgraded,
) {
    use futures::SinkExt;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::Message;

    let ws = WebSocketStream::from_raw_socket(upgraded, Role::Server, None).await;
    let (mut sink, mut stream) = ws.split();
    let mut outbound = match transport.take_outbound() {
        Some(rx) => rx,
        None => return,
    };

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let msg = match frame {
                OutboundFrame::Text(s) => Message::Text(s),
                OutboundFrame::Binary(b) => Message::Binary(b.to_vec()),
                OutboundFrame::Close(code) => {
                    let frame = CloseFrame {
                        code: code.into(),
                        reason: std::borrow::Cow::Borrowed(""),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                }
            };
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let transport_handle = TransportHandle::Ws(transport.clone());
    while let Some(msg) = stream.next().await {
        let frame = match msg {
            Ok(Message::Text(s)) => IncomingFrame::Text(s),
            Ok(Message::Binary(b)) => IncomingFrame::Binary(Bytes::from(b)),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(_) => break,
        };
        let packet = match decode_incoming(frame) {
            Ok(packet) => packet,
            Err(e) => {
                finish_session(&server, socket.clone(), e);
                break;
            }
        };
        match socket.ingest_packets(&transport_handle, vec![packet]) {
            Ok(outcome) => {
                for msg in outcome.messages {
                    server.handler.on_message(socket.clone(), msg);
                }
                for bin in outcome.binaries {
                    server.handler.on_binary(socket.clone(), bin);
                }
                if outcome.is_closing {
                    finish_session(&server, socket.clone(), TransportError::RequestedClosure);
                    break;
                }
            }
            Err(e) => {
                finish_session(&server, socket.clone(), e);
                break;
            }
        }
    }

    if !transport.is_closed() {
        transport.report_forced_closure();
    }
    writer.abort();
}

fn finish_session<H: EngineIoHandler>(
    server: &Arc<EngineIoServer<H>>,
    socket: Arc<Socket>,
    err: TransportError,
) {
    server
        .handler
        .on_transport_exception(socket.clone(), err.clone());
    let close_code = WsTransportError::from(err.clone()).close_code();
    if socket.dispose(close_code) {
        server.registry.remove(&socket.id);
        server.handler.on_disconnect(socket, err.into());
    }
}

async fn dispatch_polling<H: EngineIoHandler>(
    server: &Arc<EngineIoServer<H>>,
    socket: Arc<Socket>,
    method: &Method,
    headers: &HeaderMap,
    body: hyper::Body,
) -> Response<ResponseBody<hyper::Body>> {
    let transport = match socket.current_transport() {
        TransportHandle::Polling(p) => p,
        TransportHandle::Ws(_) => {
            let err = if *method == Method::GET {
                ConnectError::GetRequestUnexpected
            } else {
                ConnectError::PostRequestUnexpected
            };
            return respond_exception(server, socket, err);
        }
    };

    if *method == Method::GET {
        return match transport.offload() {
            Ok(payload) => http_response(StatusCode::OK, payload.content_type, payload.body)
                .unwrap_or_else(|_| fallback_error_response()),
            Err(e) => {
                let status = e.status_code();
                let reason = e.reason_phrase();
                finish_session(server, socket, e);
                fallback_error_response_for(status, reason)
            }
        };
    }

    let declared_len = headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let declared_type = headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let bytes = match hyper::body::to_bytes(body).await {
        Ok(b) => b,
        Err(_) => return fallback_error_response_for(400, "Failed to read the request body."),
    };

    let receive_result = transport.receive(&bytes, declared_len, declared_type.as_deref());
    let response = match receive_result {
        Ok((_post_lock, payload)) => {
            // _post_lock stays held through the legality sweep and event
            // emission below, not just the decode above: a second POST
            // must not race ingest_packets's heart/upgrade mutations.
            let handle = TransportHandle::Polling(transport.clone());
            let outcome = socket.ingest_packets(&handle, payload.packets);
            match outcome {
                Ok(outcome) => {
                    for msg in outcome.messages {
                        server.handler.on_message(socket.clone(), msg);
                    }
                    for bin in outcome.binaries {
                        server.handler.on_binary(socket.clone(), bin);
                    }
                    if outcome.is_closing {
                        finish_session(server, socket, TransportError::RequestedClosure);
                    }
                    http_response(StatusCode::OK, "text/plain", "ok")
                        .unwrap_or_else(|_| fallback_error_response())
                }
                Err(e) => {
                    let status = e.status_code();
                    let reason = e.reason_phrase();
                    finish_session(server, socket, e);
                    fallback_error_response_for(status, reason)
                }
            }
        }
        Err(e) => {
            let status = e.status_code();
            let reason = e.reason_phrase();
            finish_session(server, socket, e);
            fallback_error_response_for(status, reason)
        }
    };
    response
}

/// A connect-level exception raised against an already-resolved socket
/// (an unexpected GET/POST/upgrade on its current transport): the HTTP
/// response carries the mapped status and reason, same as an unresolved
/// connect error, but no session state changes.
fn respond_exception<H: EngineIoHandler>(
    _server: &Arc<EngineIoServer<H>>,
    _socket: Arc<Socket>,
    err: ConnectError,
) -> Response<ResponseBody<hyper::Body>> {
    connect_error_response(err)
}

fn connect_error_response(err: ConnectError) -> Response<ResponseBody<hyper::Body>> {
    error_response(err.status_code(), err.reason_phrase()).unwrap_or_else(|_| fallback_error_response())
}

fn fallback_error_response_for(status: u16, reason: &str) -> Response<ResponseBody<hyper::Body>> {
    error_response(status, reason).unwrap_or_else(|_| fallback_error_response())
}

fn fallback_error_response() -> Response<ResponseBody<hyper::Body>> {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .body(ResponseBody::empty())
        .expect("static response is always valid")
}
