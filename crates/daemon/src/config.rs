use crate::error::ConfigError;
use clap::Parser;
use std::net::IpAddr;
use std::ops::RangeInclusive;
use std::time::Duration;

const DEFAULT_TTL: u64 = 180;

/// Allocator for Android devices and local Appium nodes.
#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Settings {
    /// Address the HTTP facade binds to
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Port the HTTP facade listens on
    #[arg(long, default_value_t = 9093)]
    pub port: u16,

    /// Number of Appium nodes to keep running
    #[arg(long, default_value_t = 4)]
    pub pool_size: usize,

    /// Primary port of the first node; each node takes two consecutive ports
    #[arg(long, default_value_t = 4723)]
    pub appium_port: u16,

    /// First host port handed out to devices as UiAutomator2 systemPort
    #[arg(long, default_value_t = 8200)]
    pub system_port: u16,

    /// Device serial that must never be leased
    #[arg(long)]
    pub reserved_device: Option<String>,

    /// Busy limit in seconds before a lease is reclaimed
    #[arg(long, default_value_t = DEFAULT_TTL)]
    pub ttl: u64,

    /// Delay between readiness probes of a starting node
    #[arg(long, default_value_t = 500)]
    pub probe_interval_ms: u64,

    /// Readiness probes per node; the total budget scales with pool size
    #[arg(long, default_value_t = 6)]
    pub probe_attempts_per_node: u32,

    #[arg(long, default_value = "appium")]
    pub appium_bin: String,

    #[arg(long, default_value = "adb")]
    pub adb_bin: String,
}

impl Settings {
    pub fn pool_config(&self) -> Result<PoolConfig, ConfigError> {
        let config = PoolConfig {
            pool_size: self.pool_size,
            appium_port: self.appium_port,
            system_port: self.system_port,
            reserved_device: self.reserved_device.clone().filter(|s| !s.is_empty()),
            ttl: Duration::from_secs(self.ttl),
            probe_interval: Duration::from_millis(self.probe_interval_ms),
            probe_attempts_per_node: self.probe_attempts_per_node,
            node_host: "127.0.0.1".to_string(),
            http_port: self.port,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Values the pools are built from, independent of how they were supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub pool_size: usize,
    pub appium_port: u16,
    pub system_port: u16,
    pub reserved_device: Option<String>,
    pub ttl: Duration,
    pub probe_interval: Duration,
    pub probe_attempts_per_node: u32,
    /// Host part of the node URLs handed to clients.
    pub node_host: String,
    /// Port of the HTTP facade. Never handed to a device.
    pub http_port: u16,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            appium_port: 4723,
            system_port: 8200,
            reserved_device: None,
            ttl: Duration::from_secs(DEFAULT_TTL),
            probe_interval: Duration::from_millis(500),
            probe_attempts_per_node: 6,
            node_host: "127.0.0.1".to_string(),
            http_port: 9093,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::EmptyPool);
        }
        if self.ttl.is_zero() {
            return Err(ConfigError::ZeroTtl);
        }
        if self.probe_attempts_per_node == 0 {
            return Err(ConfigError::NoProbeAttempts);
        }
        let last = self.last_node_port().ok_or(ConfigError::NodePortsOverflow {
            base: self.appium_port,
            count: self.pool_size,
        })?;
        if (self.appium_port..=last).contains(&self.system_port) {
            return Err(ConfigError::PortOverlap {
                system_port: self.system_port,
                first: self.appium_port,
                last,
            });
        }
        if (self.appium_port..=last).contains(&self.http_port) {
            return Err(ConfigError::ListenerOverlap {
                port: self.http_port,
                first: self.appium_port,
                last,
            });
        }
        Ok(())
    }

    /// Ports the device counter skips: every node port and the facade's own
    /// listener.
    pub fn taken_ports(&self) -> Vec<RangeInclusive<u16>> {
        let mut taken = vec![self.http_port..=self.http_port];
        if let Some(last) = self.last_node_port() {
            taken.push(self.appium_port..=last);
        }
        taken
    }

    /// `(primary, bootstrap)` port pairs, one per node.
    pub fn node_ports(&self) -> Vec<(u16, u16)> {
        (0..self.pool_size)
            .filter_map(|i| {
                let offset = u16::try_from(i * 2).ok()?;
                let primary = self.appium_port.checked_add(offset)?;
                Some((primary, primary.checked_add(1)?))
            })
            .collect()
    }

    /// Readiness probes allowed for one start. Nodes launched together compete
    /// for CPU, so the budget grows with the pool.
    pub fn readiness_attempts(&self) -> u32 {
        let size = u32::try_from(self.pool_size).unwrap_or(u32::MAX);
        self.probe_attempts_per_node.saturating_mul(size)
    }

    fn last_node_port(&self) -> Option<u16> {
        let span = self.pool_size.checked_mul(2)?.checked_sub(1)?;
        self.appium_port.checked_add(u16::try_from(span).ok()?)
    }
}
