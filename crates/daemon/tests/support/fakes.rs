//! In-memory host shared by the unit and integration tests.
//!
//! The including module must have `platform` and `ProcessError` in scope.

#![allow(dead_code)]

use super::platform::{DeviceBridge, HealthProbe, NodeHealth, ProcessControl};
use super::ProcessError;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Tracks which ports have a listener. Starting a node binds both of its
/// ports; terminating a port owner unbinds it. Also answers health probes
/// for the ports it tracks.
#[derive(Default)]
pub struct FakeHost {
    listening: Mutex<BTreeSet<u16>>,
    terminated: Mutex<Vec<u16>>,
    starts: AtomicUsize,
    probes: AtomicUsize,
    fail_starts: AtomicBool,
    silent_starts: AtomicBool,
}

impl FakeHost {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> Vec<u16> {
        self.terminated.lock().unwrap().clone()
    }

    /// Launches fail outright.
    pub fn fail_starts(&self, fail: bool) {
        self.fail_starts.store(fail, Ordering::SeqCst);
    }

    /// Launches succeed but the node never binds its ports.
    pub fn silent_starts(&self, silent: bool) {
        self.silent_starts.store(silent, Ordering::SeqCst);
    }

    pub fn bind(&self, port: u16) {
        self.listening.lock().unwrap().insert(port);
    }

    pub fn crash(&self, port: u16) {
        self.listening.lock().unwrap().remove(&port);
    }

    pub fn is_listening(&self, port: u16) -> bool {
        self.listening.lock().unwrap().contains(&port)
    }
}

#[async_trait]
impl ProcessControl for FakeHost {
    async fn start_node(&self, port: u16, bootstrap_port: u16) -> Result<(), ProcessError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_starts.load(Ordering::SeqCst) {
            return Err(ProcessError::Spawn {
                command: "appium".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "appium"),
            });
        }
        // a real node takes a moment before it answers
        tokio::time::sleep(Duration::from_millis(2)).await;
        if self.silent_starts.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut listening = self.listening.lock().unwrap();
        listening.insert(port);
        listening.insert(bootstrap_port);
        Ok(())
    }

    async fn terminate_port_owner(&self, port: u16) -> Result<Vec<u32>, ProcessError> {
        if self.listening.lock().unwrap().remove(&port) {
            self.terminated.lock().unwrap().push(port);
            Ok(vec![u32::from(port)])
        } else {
            Ok(Vec::new())
        }
    }
}

#[async_trait]
impl HealthProbe for FakeHost {
    async fn status(&self, port: u16) -> NodeHealth {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.is_listening(port) {
            NodeHealth::Up(r#"{"value":{"ready":true}}"#.to_string())
        } else {
            NodeHealth::Unreachable
        }
    }
}

/// Scripted `adb devices`.
#[derive(Default)]
pub struct FakeBridge {
    attached: Mutex<BTreeSet<String>>,
    uninstalled: Mutex<Vec<(String, String)>>,
    broken: AtomicBool,
}

impl FakeBridge {
    pub fn attach(&self, serials: &[&str]) {
        *self.attached.lock().unwrap() = serials.iter().map(|s| s.to_string()).collect();
    }

    pub fn break_discovery(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }

    pub fn uninstalled(&self) -> Vec<(String, String)> {
        self.uninstalled.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceBridge for FakeBridge {
    async fn discover(&self) -> Result<BTreeSet<String>, ProcessError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(ProcessError::Spawn {
                command: "adb devices".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "adb"),
            });
        }
        Ok(self.attached.lock().unwrap().clone())
    }

    async fn uninstall(&self, serial: &str, package: &str) -> Result<(), ProcessError> {
        self.uninstalled
            .lock()
            .unwrap()
            .push((serial.to_string(), package.to_string()));
        Ok(())
    }
}
