//! Relay configuration: command-line flags with environment fallbacks.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::relay::RoomOptions;

pub const DEFAULT_PORT: u16 = 8081;
const DEFAULT_MAX_MESSAGE_SIZE: usize = 1 << 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max message size must be greater than zero")]
    ZeroMessageSize,

    #[error("pong timeout ({pong}s) must be shorter than the ping interval ({ping}s)")]
    PongTimeoutTooLong { ping: u64, pong: u64 },
}

/// WebSocket signaling relay
#[derive(Debug, Clone, Parser)]
#[command(name = "tether", version, about)]
pub struct RelayConfig {
    /// Address to bind
    #[arg(long, env = "TETHER_HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "TETHER_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Seconds between keepalive pings (0 disables keepalive)
    #[arg(long, env = "TETHER_PING_INTERVAL", default_value_t = 30)]
    pub ping_interval: u64,

    /// Seconds to wait for a pong before dropping the connection
    #[arg(long, env = "TETHER_PONG_TIMEOUT", default_value_t = 10)]
    pub pong_timeout: u64,

    /// Largest accepted WebSocket message, in bytes
    #[arg(long, env = "TETHER_MAX_MESSAGE_SIZE", default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    pub max_message_size: usize,

    /// Seconds between room table summaries in the log (0 disables them)
    #[arg(long, env = "TETHER_STATS_INTERVAL", default_value_t = 60)]
    pub stats_interval: u64,

    /// Tell remaining room members when a connection goes away
    #[arg(long, env = "TETHER_ANNOUNCE_LEAVE")]
    pub announce_leave: bool,

    /// Log filter used when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, env = "TETHER_LOG", default_value = "info")]
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            ping_interval: 30,
            pong_timeout: 10,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            stats_interval: 60,
            announce_leave: false,
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_size == 0 {
            return Err(ConfigError::ZeroMessageSize);
        }
        if self.ping_interval != 0 && self.pong_timeout >= self.ping_interval {
            return Err(ConfigError::PongTimeoutTooLong {
                ping: self.ping_interval,
                pong: self.pong_timeout,
            });
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// `None` when keepalive is disabled
    pub fn keepalive(&self) -> Option<(Duration, Duration)> {
        if self.ping_interval == 0 {
            return None;
        }
        Some((
            Duration::from_secs(self.ping_interval),
            Duration::from_secs(self.pong_timeout),
        ))
    }

    /// `None` when room summaries are disabled
    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval != 0).then(|| Duration::from_secs(self.stats_interval))
    }

    pub fn room_options(&self) -> RoomOptions {
        RoomOptions {
            announce_leave: self.announce_leave,
        }
    }
}
