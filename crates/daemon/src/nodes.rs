//! Pool of local Appium nodes.
//!
//! Health is checked lazily: a node is probed only when it is about to be
//! handed out. An unreachable node and a node held past the busy limit take
//! the same path, a restart, whether it crashed, hung or never came up.

use crate::config::PoolConfig;
use crate::lease::{Record, Records};
use crate::platform::{HealthProbe, NodeHealth, ProcessControl};
use chrono::Utc;
use common::{Allocation, NodeLease, RecordView, ReleaseOutcome};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// How long to wait for a freshly launched node to answer.
#[derive(Debug, Clone, Copy)]
struct Readiness {
    attempts: u32,
    interval: Duration,
}

/// Starts and restarts nodes. Cheap to clone so one copy can move into each
/// task of a concurrent fan-out.
#[derive(Clone)]
struct Supervisor {
    records: Arc<Records<u16>>,
    process: Arc<dyn ProcessControl>,
    probe: Arc<dyn HealthProbe>,
    readiness: Readiness,
    host: String,
}

impl Supervisor {
    async fn start(&self, port: u16, bootstrap_port: u16) {
        let url = common::node_url(&self.host, port);
        let record = match self.process.start_node(port, bootstrap_port).await {
            Ok(()) if self.wait_ready(port).await => {
                info!(%url, "node started");
                Record::free(bootstrap_port)
            }
            Ok(()) => {
                warn!(%url, "node started but not responding");
                Record::stalled(bootstrap_port)
            }
            Err(err) => {
                error!(%url, error = %err, "failed to start node");
                Record::stalled(bootstrap_port)
            }
        };
        self.records.insert(port, record);
    }

    async fn wait_ready(&self, port: u16) -> bool {
        for _ in 0..self.readiness.attempts {
            if self.probe.status(port).await.is_up() {
                return true;
            }
            tokio::time::sleep(self.readiness.interval).await;
        }
        self.probe.status(port).await.is_up()
    }

    /// Kills whatever holds either port, then starts the node again. A start
    /// that failed halfway may have bound only one of the two ports.
    async fn restart(&self, port: u16) {
        let Some(bootstrap_port) = self.records.get(&port).map(|r| r.aux_port) else {
            return;
        };
        self.reap(port, bootstrap_port).await;
        self.start(port, bootstrap_port).await;
    }

    async fn reap(&self, port: u16, bootstrap_port: u16) {
        for target in [port, bootstrap_port] {
            if let Err(err) = self.process.terminate_port_owner(target).await {
                warn!(port = target, error = %err, "could not terminate port owner");
            }
        }
    }
}

pub struct NodePool {
    supervisor: Supervisor,
    /// Serializes allocation scans, restarts and cleanups.
    scan: Mutex<()>,
    ports: Vec<(u16, u16)>,
    ttl: Duration,
}

impl NodePool {
    pub fn new(
        config: &PoolConfig,
        process: Arc<dyn ProcessControl>,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        Self {
            supervisor: Supervisor {
                records: Arc::new(Records::new()),
                process,
                probe,
                readiness: Readiness {
                    attempts: config.readiness_attempts(),
                    interval: config.probe_interval,
                },
                host: config.node_host.clone(),
            },
            scan: Mutex::new(()),
            ports: config.node_ports(),
            ttl: config.ttl,
        }
    }

    /// Launches every configured node in parallel and returns once each one
    /// is either ready or given up on. Leftovers from a previous run on the
    /// same ports are terminated first.
    pub async fn init(&self) {
        let _scan = self.scan.lock().await;
        for &(port, bootstrap_port) in &self.ports {
            self.supervisor
                .records
                .insert(port, Record::stalled(bootstrap_port));
        }
        let mut starts = JoinSet::new();
        for &(port, bootstrap_port) in &self.ports {
            let supervisor = self.supervisor.clone();
            starts.spawn(async move {
                supervisor.reap(port, bootstrap_port).await;
                supervisor.start(port, bootstrap_port).await;
            });
        }
        join_all(starts).await;
    }

    /// Hands out the first free, healthy node.
    pub async fn allocate(&self) -> Allocation<NodeLease> {
        let _scan = self.scan.lock().await;
        for port in self.supervisor.records.keys() {
            let health = self.supervisor.probe.status(port).await;
            if health == NodeHealth::Unreachable {
                warn!(port, "node unreachable, restarting");
                self.supervisor.restart(port).await;
            } else if self
                .supervisor
                .records
                .get(&port)
                .is_some_and(|r| r.is_overdue(Utc::now(), self.ttl))
            {
                warn!(port, "node TTL elapsed, restarting");
                self.supervisor.restart(port).await;
            }
            if self.supervisor.records.try_lease(&port, Utc::now()).is_some() {
                let lease = NodeLease::new(&self.supervisor.host, port);
                info!(url = %lease.url, "node leased");
                return Allocation::Leased(lease);
            }
        }
        Allocation::Wait
    }

    pub fn release(&self, port: u16) -> ReleaseOutcome {
        match self.supervisor.records.release(&port, Utc::now()) {
            Some(was_busy) => {
                if was_busy {
                    info!(port, "node released");
                }
                ReleaseOutcome::Released
            }
            None => ReleaseOutcome::Unknown,
        }
    }

    /// Best-effort idle check; may race with a concurrent allocation.
    pub fn is_all_free(&self) -> bool {
        self.supervisor.records.all_free()
    }

    /// Restarts every node concurrently and waits for all of them.
    pub async fn force_clean_up(&self) {
        let _scan = self.scan.lock().await;
        info!(count = self.ports.len(), "restarting all nodes");
        let mut restarts = JoinSet::new();
        for port in self.supervisor.records.keys() {
            let supervisor = self.supervisor.clone();
            restarts.spawn(async move { supervisor.restart(port).await });
        }
        join_all(restarts).await;
    }

    pub fn snapshot(&self) -> Vec<RecordView> {
        self.supervisor
            .records
            .snapshot()
            .into_iter()
            .map(|(port, record)| record.view(port.to_string()))
            .collect()
    }

    /// Table of nodes with their live status text. Probes run outside any
    /// pool lock, so the rows may be stale by the time they are read.
    pub async fn status_text(&self) -> String {
        let mut table = String::new();
        for (port, record) in self.supervisor.records.snapshot() {
            let url = common::node_url(&self.supervisor.host, port);
            let health = self.supervisor.probe.status(port).await;
            let _ = writeln!(
                table,
                "║ {:<30}║ {:<5} ║ {}",
                url,
                record.free,
                health.summary()
            );
        }
        table
    }
}

async fn join_all(mut tasks: JoinSet<()>) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            error!(error = %err, "node task failed");
        }
    }
}
