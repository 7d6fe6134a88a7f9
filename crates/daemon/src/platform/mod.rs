//! Capabilities the pools need from the host, and their concrete adapters.
//!
//! The pools only see the traits below. Everything that shells out to `adb`,
//! `appium`, `lsof`/`netstat` or talks HTTP to a node lives in the adapters.

mod adb;
mod appium;
mod process;

pub use adb::{parse_adb_devices, AdbBridge};
pub use appium::HttpHealthProbe;
pub use process::{parse_lsof_pids, parse_netstat_listeners, LocalProcessControl, Platform};

use crate::error::ProcessError;
use async_trait::async_trait;
use std::collections::BTreeSet;
use tokio::process::Command;

/// Liveness answer of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeHealth {
    /// The node answered; the text is its status body.
    Up(String),
    Unreachable,
}

impl NodeHealth {
    pub fn is_up(&self) -> bool {
        matches!(self, NodeHealth::Up(_))
    }

    /// Single-line text for status tables.
    pub fn summary(&self) -> String {
        match self {
            NodeHealth::Up(body) => body.split_whitespace().collect::<Vec<_>>().join(" "),
            NodeHealth::Unreachable => "ERR".to_string(),
        }
    }
}

/// Access to attached Android devices.
#[async_trait]
pub trait DeviceBridge: Send + Sync {
    /// Serials of the devices attached and online right now.
    async fn discover(&self) -> Result<BTreeSet<String>, ProcessError>;

    /// Removes `package` from the device.
    async fn uninstall(&self, serial: &str, package: &str) -> Result<(), ProcessError>;
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn status(&self, port: u16) -> NodeHealth;
}

/// Launching nodes and killing whatever listens on a port.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Spawns a node bound to `port` and `bootstrap_port`. Returns once the
    /// process is launched, not once it is ready.
    async fn start_node(&self, port: u16, bootstrap_port: u16) -> Result<(), ProcessError>;

    /// Kills the processes listening on `port` and returns their pids.
    /// Nobody listening is not an error.
    async fn terminate_port_owner(&self, port: u16) -> Result<Vec<u32>, ProcessError>;
}

/// Runs `program` to completion and returns its stdout.
async fn run(program: &str, args: &[&str]) -> Result<String, ProcessError> {
    let command = format!("{} {}", program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ProcessError::Spawn {
            command: command.clone(),
            source,
        })?;
    if !output.status.success() {
        return Err(ProcessError::Exit {
            command,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
