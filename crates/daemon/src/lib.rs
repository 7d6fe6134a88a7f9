//! Allocator for Android devices and the local Appium nodes that drive them.
//!
//! Two independent pools lease resources to test runners over HTTP. Leases
//! are reclaimed once held past a busy limit, devices follow `adb devices`,
//! and nodes that stop answering are restarted the next time the pool looks
//! at them.

pub mod config;
pub mod devices;
pub mod error;
pub mod lease;
pub mod nodes;
pub mod platform;
pub mod routes;
pub mod telemetry;

#[cfg(test)]
#[path = "../tests/support/fakes.rs"]
mod fakes;

pub use config::{PoolConfig, Settings};
pub use devices::DevicePool;
pub use error::{ConfigError, ProcessError};
pub use nodes::NodePool;
pub use routes::{router, AppState};
