use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ServerError;

pub const DEFAULT_PORT: u16 = 8081;
pub const ENV_PREFIX: &str = "BEEPER_MCP_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub ping_interval: Duration,
    pub heartbeat_interval: Duration,
    pub restart_delay: Duration,
    pub shutdown_grace: Duration,
    pub fixtures: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            ping_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            restart_delay: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(5),
            fixtures: None,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ServerError> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| ServerError::InvalidAddress(self.host.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// One configuration layer. Every field is optional; absent fields defer to
/// the next layer down.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub ping_interval_secs: Option<u64>,
    pub heartbeat_interval_secs: Option<u64>,
    pub restart_delay_secs: Option<u64>,
    pub shutdown_grace_secs: Option<u64>,
    pub fixtures: Option<PathBuf>,
}

impl ConfigOverrides {
    /// Reads `BEEPER_MCP_*` variables through `lookup`. Unparsable values are ignored.
    pub fn from_env(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty());
        let secs = |name: &str| var(name).and_then(|v| v.trim().parse::<u64>().ok());
        Self {
            host: var("HOST"),
            port: var("PORT").and_then(|v| v.trim().parse().ok()),
            ping_interval_secs: secs("PING_INTERVAL_SECS"),
            heartbeat_interval_secs: secs("HEARTBEAT_INTERVAL_SECS"),
            restart_delay_secs: secs("RESTART_DELAY_SECS"),
            shutdown_grace_secs: secs("SHUTDOWN_GRACE_SECS"),
            fixtures: var("FIXTURES").map(PathBuf::from),
        }
    }

    pub fn from_process_env() -> Self {
        Self::from_env(|k| std::env::var(k).ok())
    }
}

/// Precedence: cli, then env, then built-in defaults.
pub fn resolve_config(cli: &ConfigOverrides, env: &ConfigOverrides) -> ServerConfig {
    let defaults = ServerConfig::default();
    let secs = |c: Option<u64>, e: Option<u64>, d: Duration| c.or(e).map(Duration::from_secs).unwrap_or(d);

    ServerConfig {
        host: cli.host.clone().or_else(|| env.host.clone()).unwrap_or(defaults.host),
        port: cli.port.or(env.port).unwrap_or(defaults.port),
        ping_interval: secs(cli.ping_interval_secs, env.ping_interval_secs, defaults.ping_interval),
        heartbeat_interval: secs(
            cli.heartbeat_interval_secs,
            env.heartbeat_interval_secs,
            defaults.heartbeat_interval,
        ),
        restart_delay: secs(cli.restart_delay_secs, env.restart_delay_secs, defaults.restart_delay),
        shutdown_grace: secs(cli.shutdown_grace_secs, env.shutdown_grace_secs, defaults.shutdown_grace),
        fixtures: cli.fixtures.clone().or_else(|| env.fixtures.clone()),
    }
}
