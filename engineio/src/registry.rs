//! `sid`<->socket and `ip`<->`sid` maps. Owned exclusively by the server.
//!
//! Invariant: for every session `S` present in `sid -> Session`,
//! `ipAddress -> sid[S.ip] == S.sid`. A session is uniquely identified by
//! its `sid`; at most one session per remote IP is tracked - this conflates
//! NAT'd clients behind the same address, a known limitation of the
//! protocol rather than a bug in this implementation.

use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashMap;

use crate::sid::Sid;
use crate::socket::Socket;

#[derive(Default)]
pub struct ClientRegistry {
    by_sid: DashMap<Sid, Arc<Socket>>,
    by_ip: DashMap<IpAddr, Sid>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_ip(&self, ip: IpAddr) -> bool {
        self.by_ip.contains_key(&ip)
    }

    pub fn get_by_sid(&self, sid: &Sid) -> Option<Arc<Socket>> {
        self.by_sid.get(sid).map(|entry| entry.clone())
    }

    pub fn get_by_ip(&self, ip: IpAddr) -> Option<Arc<Socket>> {
        let sid = self.by_ip.get(&ip)?.clone();
        self.get_by_sid(&sid)
    }

    pub fn insert(&self, socket: Arc<Socket>) {
        self.by_ip.insert(socket.ip, socket.id.clone());
        self.by_sid.insert(socket.id.clone(), socket);
    }

    /// Removes a session by `sid`, returning it if present. Only removes
    /// the ip entry if it still points at this exact `sid` (a second
    /// handshake from the same IP would otherwise have already overwritten
    /// it before this one is torn down).
    pub fn remove(&self, sid: &Sid) -> Option<Arc<Socket>> {
        let (_, socket) = self.by_sid.remove(sid)?;
        self.by_ip.remove_if(&socket.ip, |_, existing| existing == sid);
        Some(socket)
    }

    pub fn len(&self) -> usize {
        self.by_sid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_sid.is_empty()
    }

    /// Snapshot of every live session, for server-wide dispose.
    pub fn all(&self) -> Vec<Arc<Socket>> {
        self.by_sid.iter().map(|e| e.value().clone()).collect()
    }
}
