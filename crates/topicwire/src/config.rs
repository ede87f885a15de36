// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection configuration.
//!
//! - [`WireConfig`] - options shared by both ends of a connection
//! - [`ClientConfig`] - connect, reconnect and logout policy
//! - [`ServerConfig`] - listener address and acceptor policy
//!
//! All types deserialize from TOML with every field optional:
//!
//! ```toml
//! reconnect_delay_ms = -1       # never reconnect automatically
//! logout_timeout_ms = 500
//!
//! [wire]
//! heartbeat_interval_ms = 250
//! read_timeout_ms = 1000
//! cache_topics = true
//! raw_frames = "alongside"
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Delivery mode for the undecoded bytes of inbound Data frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawFrames {
    /// Only decoded messages are delivered
    #[default]
    Disabled,

    /// Raw frame first, then the decoded message
    Alongside,

    /// Raw frame only, the payload decoder is never invoked
    Instead,
}

// ============================================================================
// Wire Configuration
// ============================================================================

/// Options applied to every connection, client or server side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireConfig {
    /// Outbound heartbeat period in milliseconds (0 = disabled)
    pub heartbeat_interval_ms: u64,

    /// Inbound silence before a read-timeout event, in milliseconds (0 = never)
    pub read_timeout_ms: u64,

    /// Disable Nagle's algorithm
    pub nodelay: bool,

    /// SO_SNDBUF size (0 = OS default)
    pub socket_send_buffer: usize,

    /// SO_RCVBUF size (0 = OS default)
    pub socket_recv_buffer: usize,

    /// Initial parser buffer capacity; grows on demand
    pub read_buffer_size: usize,

    /// Largest accepted inbound payload (0 = unlimited)
    pub max_payload_size: usize,

    /// Cache topic byte -> string decoding
    pub cache_topics: bool,

    /// Number of distinct topics kept in the decode cache
    pub topic_cache_capacity: usize,

    /// Raw frame observer mode
    pub raw_frames: RawFrames,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 1000,
            read_timeout_ms: 5000,
            nodelay: true,
            socket_send_buffer: 0,
            socket_recv_buffer: 0,
            read_buffer_size: 8 * 1024,
            max_payload_size: 64 * 1024 * 1024,
            cache_topics: true,
            topic_cache_capacity: 256,
            raw_frames: RawFrames::Disabled,
        }
    }
}

impl WireConfig {
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        millis(self.heartbeat_interval_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        millis(self.read_timeout_ms)
    }

    pub fn max_payload(&self) -> Option<usize> {
        (self.max_payload_size > 0).then_some(self.max_payload_size)
    }

    /// Capacity of the topic cache, `None` when caching is off.
    pub fn topic_cache(&self) -> Option<NonZeroUsize> {
        if self.cache_topics {
            NonZeroUsize::new(self.topic_cache_capacity)
        } else {
            None
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_socket_buffers(mut self, send: usize, recv: usize) -> Self {
        self.socket_send_buffer = send;
        self.socket_recv_buffer = recv;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    pub fn with_topic_cache(mut self, enabled: bool) -> Self {
        self.cache_topics = enabled;
        self
    }

    pub fn with_raw_frames(mut self, mode: RawFrames) -> Self {
        self.raw_frames = mode;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "read_buffer_size must be greater than 0".into(),
            ));
        }
        if self.cache_topics && self.topic_cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "topic_cache_capacity must be greater than 0 when cache_topics is set".into(),
            ));
        }
        if self.max_payload_size > i32::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "max_payload_size {} exceeds the wire maximum {}",
                self.max_payload_size,
                i32::MAX
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Client Configuration
// ============================================================================

/// Client connection manager configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub wire: WireConfig,

    /// Delay before the first connection attempt
    pub initial_connect_delay_ms: u64,

    /// Delay between a lost connection and the next attempt (negative = never)
    pub reconnect_delay_ms: i64,

    /// Bound on a single TCP connect
    pub connect_timeout_ms: u64,

    /// How long a graceful close waits for the server's Disconnect
    pub logout_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            wire: WireConfig::default(),
            initial_connect_delay_ms: 0,
            reconnect_delay_ms: 1000,
            connect_timeout_ms: 5000,
            logout_timeout_ms: 2000,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn initial_connect_delay(&self) -> Duration {
        Duration::from_millis(self.initial_connect_delay_ms)
    }

    /// `None` disables automatic reconnection.
    pub fn reconnect_delay(&self) -> Option<Duration> {
        u64::try_from(self.reconnect_delay_ms)
            .ok()
            .map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn logout_timeout(&self) -> Duration {
        Duration::from_millis(self.logout_timeout_ms)
    }

    pub fn with_wire(mut self, wire: WireConfig) -> Self {
        self.wire = wire;
        self
    }

    pub fn with_initial_connect_delay(mut self, delay: Duration) -> Self {
        self.initial_connect_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Option<Duration>) -> Self {
        self.reconnect_delay_ms = delay.map_or(-1, |d| d.as_millis() as i64);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_logout_timeout(mut self, timeout: Duration) -> Self {
        self.logout_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.wire.validate()?;
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "connect_timeout_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Server Configuration
// ============================================================================

/// Server listener configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub wire: WireConfig,

    /// Address to bind
    pub bind_address: IpAddr,

    /// Port to bind (0 = ephemeral port assigned by OS)
    pub port: u16,

    /// How often the acceptor checks for shutdown while idle
    pub accept_poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            wire: WireConfig::default(),
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            accept_poll_interval_ms: 100,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loopback listener on an ephemeral port.
    pub fn localhost() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ..Default::default()
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn accept_poll_interval(&self) -> Duration {
        Duration::from_millis(self.accept_poll_interval_ms)
    }

    pub fn with_wire(mut self, wire: WireConfig) -> Self {
        self.wire = wire;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.wire.validate()?;
        if self.accept_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "accept_poll_interval_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
