//! The subset of an inbound HTTP request the core protocol needs, decoupled
//! from any particular HTTP server.

use std::net::IpAddr;

use http::{HeaderMap, Uri};

#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub remote_addr: IpAddr,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl ConnectRequest {
    pub fn query(&self) -> &str {
        self.uri.query().unwrap_or("")
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
