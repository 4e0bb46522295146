use std::net::SocketAddr;
use std::time::Duration;

use crate::cli::ServeArgs;
use crate::error::ConfigError;
use crate::keepalive;

/// Per-connection relay behavior.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub keepalive_interval: Duration,
    /// Depth of each connection's outbound queue; messages beyond it are dropped.
    pub outbound_buffer: usize,
    pub prune_empty_rooms: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: keepalive::DEFAULT_INTERVAL,
            outbound_buffer: 64,
            prune_empty_rooms: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub relay: RelayConfig,
    pub shutdown_grace: Duration,
    pub metrics_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            relay: RelayConfig::default(),
            shutdown_grace: Duration::from_secs(2),
            metrics_enabled: true,
        }
    }
}

impl TryFrom<ServeArgs> for ServerConfig {
    type Error = ConfigError;

    fn try_from(args: ServeArgs) -> Result<Self, Self::Error> {
        let listen_addr = args
            .listen_addr
            .parse::<SocketAddr>()
            .map_err(|err| ConfigError::ListenAddr {
                addr: args.listen_addr.clone(),
                reason: err.to_string(),
            })?;
        if args.keepalive_secs == 0 {
            return Err(ConfigError::Zero("keepalive interval"));
        }
        if args.outbound_buffer == 0 {
            return Err(ConfigError::Zero("outbound buffer"));
        }

        Ok(Self {
            listen_addr,
            relay: RelayConfig {
                keepalive_interval: Duration::from_secs(args.keepalive_secs),
                outbound_buffer: args.outbound_buffer,
                prune_empty_rooms: !args.keep_empty_rooms,
            },
            shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
            metrics_enabled: !args.no_metrics,
        })
    }
}
