//! Validated server configuration: timing, payload limits, the server's
//! mount path, and the sid-generation strategy.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::sid::{RandomSidGenerator, SidGenerator};
use crate::transport::TransportType;

pub const DEFAULT_PATH: &str = "/engine.io/";
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_PAYLOAD: u64 = 128 * 1024;
pub const DEFAULT_UPGRADE_TIMEOUT: Duration = Duration::from_secs(15);

/// `max_payload` may never exceed this.
pub const MAX_CHUNK_BYTES_CEILING: u64 = 2_000_000_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("heartbeatTimeout must be strictly less than heartbeatInterval")]
    TimeoutNotLessThanInterval,
    #[error("maximumChunkBytes must not exceed {MAX_CHUNK_BYTES_CEILING}")]
    MaxPayloadTooLarge,
    #[error("availableConnectionTypes must not be empty")]
    NoAvailableTransports,
    #[error("path must start and end with '/'")]
    PathMalformed,
}

pub struct EngineIoConfig {
    pub req_path: String,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub max_payload: u64,
    pub upgrade_timeout: Duration,
    pub available_transports: Vec<TransportType>,
    pub sid_generator: Arc<dyn SidGenerator>,
    /// Protocol version this server speaks; requests must present `EIO`
    /// equal to this value.
    pub protocol_version: u8,
}

impl std::fmt::Debug for EngineIoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineIoConfig")
            .field("req_path", &self.req_path)
            .field("ping_interval", &self.ping_interval)
            .field("ping_timeout", &self.ping_timeout)
            .field("max_payload", &self.max_payload)
            .field("upgrade_timeout", &self.upgrade_timeout)
            .field("available_transports", &self.available_transports)
            .field("protocol_version", &self.protocol_version)
            .finish_non_exhaustive()
    }
}

impl EngineIoConfig {
    pub fn builder() -> EngineIoConfigBuilder {
        EngineIoConfigBuilder::default()
    }

    pub fn allows(&self, transport: TransportType) -> bool {
        self.available_transports.contains(&transport)
    }
}

pub struct EngineIoConfigBuilder {
    req_path: String,
    ping_interval: Duration,
    ping_timeout: Duration,
    max_payload: u64,
    upgrade_timeout: Duration,
    available_transports: Vec<TransportType>,
    sid_generator: Arc<dyn SidGenerator>,
}

impl Default for EngineIoConfigBuilder {
    fn default() -> Self {
        Self {
            req_path: DEFAULT_PATH.to_string(),
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            max_payload: DEFAULT_MAX_PAYLOAD,
            upgrade_timeout: DEFAULT_UPGRADE_TIMEOUT,
            available_transports: vec![TransportType::Polling, TransportType::Websocket],
            sid_generator: Arc::new(RandomSidGenerator),
        }
    }
}

impl EngineIoConfigBuilder {
    pub fn req_path(mut self, path: impl Into<String>) -> Self {
        self.req_path = path.into();
        self
    }

    pub fn ping_interval(mut self, d: Duration) -> Self {
        self.ping_interval = d;
        self
    }

    pub fn ping_timeout(mut self, d: Duration) -> Self {
        self.ping_timeout = d;
        self
    }

    pub fn max_payload(mut self, bytes: u64) -> Self {
        self.max_payload = bytes;
        self
    }

    pub fn upgrade_timeout(mut self, d: Duration) -> Self {
        self.upgrade_timeout = d;
        self
    }

    pub fn available_transports(mut self, transports: Vec<TransportType>) -> Self {
        self.available_transports = transports;
        self
    }

    pub fn sid_generator(mut self, generator: Arc<dyn SidGenerator>) -> Self {
        self.sid_generator = generator;
        self
    }

    pub fn build(self) -> Result<EngineIoConfig, ConfigError> {
        if self.ping_timeout >= self.ping_interval {
            return Err(ConfigError::TimeoutNotLessThanInterval);
        }
        if self.max_payload > MAX_CHUNK_BYTES_CEILING {
            return Err(ConfigError::MaxPayloadTooLarge);
        }
        if self.available_transports.is_empty() {
            return Err(ConfigError::NoAvailableTransports);
        }
        if !self.req_path.starts_with('/') || !self.req_path.ends_with('/') {
            return Err(ConfigError::PathMalformed);
        }
        Ok(EngineIoConfig {
            req_path: self.req_path,
            ping_interval: self.ping_interval,
            ping_timeout: self.ping_timeout,
            max_payload: self.max_payload,
            upgrade_timeout: self.upgrade_timeout,
            available_transports: self.available_transports,
            sid_generator: self.sid_generator,
            protocol_version: 4,
        })
    }
}
