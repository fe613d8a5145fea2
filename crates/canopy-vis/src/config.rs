//! Runtime configuration from the environment.
//!
//! | variable             | default            |
//! |----------------------|--------------------|
//! | `CANOPY_SYNC_ADDR`   | `127.0.0.1:8081`   |
//! | `CANOPY_RPC_ADDR`    | `127.0.0.1:7433`   |
//! | `CANOPY_LISTEN_ADDR` | `127.0.0.1:3000`   |
//! | `CANOPY_TICK_MS`     | `16`               |
//! | `CANOPY_VIEWPORT`    | `1280x800`         |

use std::net::SocketAddr;
use std::time::Duration;

use canopy_layout::{SimulationConfig, Vec2};
use canopy_transfer::{ReconnectPolicy, RpcConfig};

use crate::error::{Error, Result};

pub const SYNC_ADDR: &str = "CANOPY_SYNC_ADDR";
pub const RPC_ADDR: &str = "CANOPY_RPC_ADDR";
pub const LISTEN_ADDR: &str = "CANOPY_LISTEN_ADDR";
pub const TICK_MS: &str = "CANOPY_TICK_MS";
pub const VIEWPORT: &str = "CANOPY_VIEWPORT";

/// Engine loop settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    /// Interval between simulation ticks while the layout moves
    pub tick: Duration,
    /// Screen size in pixels; its center anchors recentering
    pub screen: Vec2,
    pub simulation: SimulationConfig,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(16),
            screen: Vec2::new(1280.0, 800.0),
            simulation: SimulationConfig::default(),
        }
    }
}

impl EngineOptions {
    pub fn screen_center(&self) -> Vec2 {
        self.screen / 2.0
    }
}

/// Everything the `canopy-vis` binary needs.
#[derive(Debug, Clone)]
pub struct VisConfig {
    /// Graph streaming peer
    pub sync_addr: String,
    /// JSON-RPC query peer
    pub rpc_addr: String,
    /// HTTP/WebSocket listen address
    pub listen_addr: SocketAddr,
    pub engine: EngineOptions,
    pub reconnect: ReconnectPolicy,
    pub rpc: RpcConfig,
}

impl Default for VisConfig {
    fn default() -> Self {
        Self {
            sync_addr: "127.0.0.1:8081".into(),
            rpc_addr: "127.0.0.1:7433".into(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            engine: EngineOptions::default(),
            reconnect: ReconnectPolicy::default(),
            rpc: RpcConfig::default(),
        }
    }
}

impl VisConfig {
    /// Read the `CANOPY_*` variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(addr) = lookup(SYNC_ADDR) {
            config.sync_addr = addr;
        }
        if let Some(addr) = lookup(RPC_ADDR) {
            config.rpc_addr = addr;
        }
        if let Some(addr) = lookup(LISTEN_ADDR) {
            config.listen_addr = parse_listen(LISTEN_ADDR, &addr)?;
        }
        if let Some(ms) = lookup(TICK_MS) {
            config.engine.tick = parse_tick(&ms)?;
        }
        if let Some(size) = lookup(VIEWPORT) {
            config.engine.screen = parse_viewport(&size)?;
        }
        config.engine.simulation.validate()?;
        Ok(config)
    }

    /// Apply positional arguments: `[sync_addr] [listen_addr]`.
    pub fn with_args<I, S>(mut self, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args = args.into_iter().map(Into::into);
        if let Some(sync) = args.next() {
            self.sync_addr = sync;
        }
        if let Some(listen) = args.next() {
            self.listen_addr = parse_listen("listen address", &listen)?;
        }
        Ok(self)
    }
}

fn invalid(key: &'static str, value: &str, reason: impl ToString) -> Error {
    Error::Config {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_listen(key: &'static str, value: &str) -> Result<SocketAddr> {
    value.trim().parse().map_err(|e| invalid(key, value, e))
}

fn parse_tick(value: &str) -> Result<Duration> {
    match value.trim().parse::<u64>() {
        Ok(0) => Err(invalid(TICK_MS, value, "must be at least 1")),
        Ok(ms) => Ok(Duration::from_millis(ms)),
        Err(e) => Err(invalid(TICK_MS, value, e)),
    }
}

fn parse_viewport(value: &str) -> Result<Vec2> {
    let (w, h) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| invalid(VIEWPORT, value, "expected WIDTHxHEIGHT"))?;
    let dim = |s: &str| match s.trim().parse::<u32>() {
        Ok(0) => Err(invalid(VIEWPORT, value, "dimensions must be positive")),
        Ok(n) => Ok(f64::from(n)),
        Err(e) => Err(invalid(VIEWPORT, value, e)),
    };
    Ok(Vec2::new(dim(w)?, dim(h)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = VisConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.sync_addr, "127.0.0.1:8081");
        assert_eq!(config.rpc_addr, "127.0.0.1:7433");
        assert_eq!(config.listen_addr.port(), 3000);
        assert_eq!(config.engine.tick, Duration::from_millis(16));
        assert_eq!(config.engine.screen_center(), Vec2::new(640.0, 400.0));
        assert_eq!(config.reconnect.cap, Duration::from_secs(30));
    }

    #[test]
    fn reads_overrides() {
        let config = VisConfig::from_lookup(lookup(&[
            (SYNC_ADDR, "graph.local:9000"),
            (LISTEN_ADDR, "0.0.0.0:8080"),
            (TICK_MS, "33"),
            (VIEWPORT, "1920X1080"),
        ]))
        .unwrap();
        assert_eq!(config.sync_addr, "graph.local:9000");
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.engine.tick, Duration::from_millis(33));
        assert_eq!(config.engine.screen, Vec2::new(1920.0, 1080.0));
    }

    #[test]
    fn rejects_bad_values() {
        for (key, value) in [
            (TICK_MS, "0"),
            (TICK_MS, "fast"),
            (VIEWPORT, "1280"),
            (VIEWPORT, "0x800"),
            (LISTEN_ADDR, "nowhere"),
        ] {
            let err = VisConfig::from_lookup(lookup(&[(key, value)])).unwrap_err();
            assert!(matches!(err, Error::Config { key: k, .. } if k == key), "{key}={value}");
        }
    }

    #[test]
    fn positional_args_override() {
        let config = VisConfig::default()
            .with_args(["10.0.0.2:8081", "127.0.0.1:4000"])
            .unwrap();
        assert_eq!(config.sync_addr, "10.0.0.2:8081");
        assert_eq!(config.listen_addr.port(), 4000);

        let unchanged = VisConfig::default().with_args(Vec::<String>::new()).unwrap();
        assert_eq!(unchanged.sync_addr, "127.0.0.1:8081");
    }
}
