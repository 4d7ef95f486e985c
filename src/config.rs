//! Relay configuration loaded from environment variables.

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_BIND_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
const DEFAULT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_MAX_MESSAGE_BYTES: usize = 8 * 1024 * 1024;

/// Tuning knobs for the relay, loaded from environment variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// Address the listener binds to.
    pub bind_addr: IpAddr,
    /// TCP port.
    pub port: u16,
    /// Per-client outbound queue depth. A client whose queue is full misses envelopes.
    pub channel_capacity: usize,
    /// Largest inbound websocket message accepted, in bytes.
    pub max_message_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR,
            port: DEFAULT_PORT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_parse("BIND_ADDR", DEFAULT_BIND_ADDR),
            port: env_parse("PORT", DEFAULT_PORT),
            channel_capacity: env_parse("RELAY_CHANNEL_CAPACITY", DEFAULT_CHANNEL_CAPACITY).max(1),
            max_message_bytes: env_parse("RELAY_MAX_MESSAGE_BYTES", DEFAULT_MAX_MESSAGE_BYTES),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}
