//! Pool of attached Android devices, kept in step with `adb devices`.

use crate::config::PoolConfig;
use crate::lease::{Record, Records};
use crate::platform::{DeviceBridge, ProcessControl};
use chrono::Utc;
use common::{Allocation, DeviceLease, RecordView, ReleaseOutcome};
use std::fmt::Write as _;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Helper packages Appium pushes to a device. Stale versions break sessions.
pub const AUTOMATION_PACKAGES: [&str; 3] = [
    "io.appium.uiautomator2.server",
    "io.appium.uiautomator2.server.test",
    "io.appium.settings",
];

/// Hands out system ports in increasing order and never wraps around, so a
/// port is never given to a second device. Ports owned by the node pool or
/// the HTTP listener are stepped over.
#[derive(Debug)]
struct PortCounter {
    next: Option<u16>,
    taken: Vec<RangeInclusive<u16>>,
}

impl PortCounter {
    fn take(&mut self) -> Option<u16> {
        loop {
            let port = self.next?;
            self.next = port.checked_add(1);
            if !self.taken.iter().any(|range| range.contains(&port)) {
                return Some(port);
            }
        }
    }
}

pub struct DevicePool {
    records: Records<String>,
    /// Serializes discovery passes and allocation scans; owns the port counter.
    scan: Mutex<PortCounter>,
    bridge: Arc<dyn DeviceBridge>,
    process: Arc<dyn ProcessControl>,
    reserved: Option<String>,
    ttl: Duration,
}

impl DevicePool {
    pub fn new(
        config: &PoolConfig,
        bridge: Arc<dyn DeviceBridge>,
        process: Arc<dyn ProcessControl>,
    ) -> Self {
        Self {
            records: Records::new(),
            scan: Mutex::new(PortCounter {
                next: Some(config.system_port),
                taken: config.taken_ports(),
            }),
            bridge,
            process,
            reserved: config.reserved_device.clone(),
            ttl: config.ttl,
        }
    }

    /// Syncs with the attached devices and returns the known serials.
    pub async fn refresh(&self) -> Vec<String> {
        let mut ports = self.scan.lock().await;
        self.sync(&mut ports).await;
        self.records.keys()
    }

    /// New serials get a record and the next system port. Records whose
    /// device disappeared are dropped and whatever still listens on their
    /// system port is terminated. A failed discovery changes nothing.
    async fn sync(&self, ports: &mut PortCounter) {
        let attached = match self.bridge.discover().await {
            Ok(attached) => attached,
            Err(err) => {
                warn!(error = %err, "device discovery failed, keeping current devices");
                return;
            }
        };

        let detached: Vec<(String, u16)> = {
            let mut records = self.records.write();
            for serial in &attached {
                if self.is_reserved(serial) || records.contains_key(serial) {
                    continue;
                }
                match ports.take() {
                    Some(system_port) => {
                        info!(%serial, system_port, "device attached");
                        records.insert(serial.clone(), Record::free(system_port));
                    }
                    None => error!(%serial, "no system ports left for device"),
                }
            }
            let detached: Vec<_> = records
                .iter()
                .filter(|(serial, _)| !attached.contains(*serial))
                .map(|(serial, record)| (serial.clone(), record.aux_port))
                .collect();
            for (serial, _) in &detached {
                records.remove(serial);
            }
            detached
        };

        for (serial, system_port) in detached {
            info!(%serial, system_port, "device detached");
            if let Err(err) = self.process.terminate_port_owner(system_port).await {
                warn!(%serial, system_port, error = %err, "could not terminate port owner");
            }
        }
    }

    fn is_reserved(&self, serial: &str) -> bool {
        self.reserved.as_deref() == Some(serial)
    }

    /// Re-syncs, reclaims devices held past the busy limit and hands out the
    /// first free one.
    pub async fn allocate(&self) -> Allocation<DeviceLease> {
        let mut ports = self.scan.lock().await;
        self.sync(&mut ports).await;

        let now = Utc::now();
        for (serial, record) in self.records.snapshot() {
            if record.is_overdue(now, self.ttl) {
                warn!(%serial, "device TTL elapsed");
                self.records.release(serial.as_str(), now);
            }
            if let Some(system_port) = self.records.try_lease(serial.as_str(), now) {
                info!(%serial, system_port, "device leased");
                return Allocation::Leased(DeviceLease {
                    serial,
                    system_port,
                });
            }
        }
        Allocation::Wait
    }

    /// Marks the device free. Whatever listens on its system port is left
    /// alone; on a host that is usually the shared adb server.
    pub fn release(&self, serial: &str) -> ReleaseOutcome {
        match self.records.release(serial, Utc::now()) {
            Some(was_busy) => {
                if was_busy {
                    info!(%serial, "device released");
                }
                ReleaseOutcome::Released
            }
            None => ReleaseOutcome::Unknown,
        }
    }

    pub fn is_all_free(&self) -> bool {
        self.records.all_free()
    }

    /// Frees every known device without asking adb first.
    pub fn force_clean_up(&self) {
        for serial in self.records.keys() {
            self.release(&serial);
        }
    }

    /// Uninstalls the Appium helper packages from `serial`. Returns one
    /// result line, or `None` for an unknown device.
    pub async fn wipe_automation_tools(&self, serial: &str) -> Option<String> {
        self.records.get(serial)?;
        let mut report = format!("device '{}'", serial);
        for package in AUTOMATION_PACKAGES {
            match self.bridge.uninstall(serial, package).await {
                Ok(()) => {
                    let _ = write!(report, " {} [OK]", package);
                }
                Err(err) => {
                    warn!(%serial, package, error = %err, "uninstall failed");
                    let _ = write!(report, " {} [ERR] {}", package, err);
                }
            }
        }
        info!("{}", report);
        Some(report)
    }

    pub fn snapshot(&self) -> Vec<RecordView> {
        self.records
            .snapshot()
            .into_iter()
            .map(|(serial, record)| record.view(serial))
            .collect()
    }

    pub fn status_text(&self) -> String {
        let mut table = String::new();
        for (serial, record) in self.records.snapshot() {
            let _ = writeln!(
                table,
                "║ {:<30}║ {:<5} ║ {:>5} ║",
                serial, record.free, record.aux_port
            );
        }
        table
    }
}
