use super::{run, DeviceBridge};
use crate::error::ProcessError;
use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::debug;

/// `DeviceBridge` backed by the `adb` command-line tool.
#[derive(Debug, Clone)]
pub struct AdbBridge {
    adb: String,
}

impl AdbBridge {
    pub fn new(adb: impl Into<String>) -> Self {
        Self { adb: adb.into() }
    }
}

#[async_trait]
impl DeviceBridge for AdbBridge {
    async fn discover(&self) -> Result<BTreeSet<String>, ProcessError> {
        let listing = run(&self.adb, &["devices"]).await?;
        let serials = parse_adb_devices(&listing);
        debug!(count = serials.len(), "adb devices");
        Ok(serials)
    }

    async fn uninstall(&self, serial: &str, package: &str) -> Result<(), ProcessError> {
        run(&self.adb, &["-s", serial, "uninstall", package])
            .await
            .map(|_| ())
    }
}

/// Serials from `adb devices` output whose state is `device`. Devices that are
/// `offline`, `unauthorized` or still booting are not usable and are skipped.
pub fn parse_adb_devices(listing: &str) -> BTreeSet<String> {
    listing
        .lines()
        .filter_map(|line| {
            let mut columns = line.split_whitespace();
            match (columns.next(), columns.next()) {
                (Some(serial), Some("device")) => Some(serial.to_string()),
                _ => None,
            }
        })
        .collect()
}
