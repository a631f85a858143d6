//! Session identifier generation and validation.
//!
//! The server never hard-codes how session identifiers look; instead a
//! [`SidGenerator`] is plugged into [`crate::config::EngineIoConfig`] and is
//! consulted both when a new session is created and whenever a `sid` query
//! parameter is presented on a follow-up request.

use std::fmt;
use std::sync::Arc;

use rand::Rng;

use crate::request::ConnectRequest;

/// An opaque, per-configuration-validated session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sid(Arc<str>);

impl Sid {
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Sid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Pluggable `sid` allocation and validation, corresponding to
/// `ServerConfiguration.sessionIdentifiers` in the protocol data model.
pub trait SidGenerator: Send + Sync {
    fn generate(&self, req: &ConnectRequest) -> Sid;
    fn validate(&self, sid: &str) -> bool;
}

const SID_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";
const SID_LEN: usize = 20;

/// Default generator: a fixed-length random string drawn from a URL-safe
/// alphabet. Validation only checks shape, not membership in any live
/// registry - that check happens separately against [`crate::registry::ClientRegistry`].
#[derive(Debug, Default)]
pub struct RandomSidGenerator;

impl SidGenerator for RandomSidGenerator {
    fn generate(&self, _req: &ConnectRequest) -> Sid {
        let mut rng = rand::thread_rng();
        let s: String = (0..SID_LEN)
            .map(|_| SID_ALPHABET[rng.gen_range(0..SID_ALPHABET.len())] as char)
            .collect();
        Sid::new(s)
    }

    fn validate(&self, sid: &str) -> bool {
        sid.len() == SID_LEN && sid.bytes().all(|b| SID_ALPHABET.contains(&b))
    }
}
