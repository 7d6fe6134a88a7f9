use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const WAIT: &str = "WAIT";
pub const OK: &str = "OK";
pub const UNKNOWN: &str = "UNKNOWN";

/// Path suffix every Appium node serves its WebDriver API under.
pub const NODE_PATH: &str = "/wd/hub";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty response")]
    Empty,
    #[error("malformed device lease: {0:?}")]
    DeviceLease(String),
    #[error("malformed node address: {0:?}")]
    NodeAddress(String),
    #[error("unexpected release answer: {0:?}")]
    Release(String),
}

/// Result of an allocation request: either a lease or "come back later".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Allocation<T> {
    Leased(T),
    Wait,
}

impl<T> Allocation<T> {
    pub fn leased(self) -> Option<T> {
        match self {
            Allocation::Leased(lease) => Some(lease),
            Allocation::Wait => None,
        }
    }

    pub fn is_wait(&self) -> bool {
        matches!(self, Allocation::Wait)
    }
}

impl<T: fmt::Display> fmt::Display for Allocation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Allocation::Leased(lease) => fmt::Display::fmt(lease, f),
            Allocation::Wait => f.write_str(WAIT),
        }
    }
}

impl<T> FromStr for Allocation<T>
where
    T: FromStr<Err = ParseError>,
{
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err(ParseError::Empty),
            WAIT => Ok(Allocation::Wait),
            other => other.parse().map(Allocation::Leased),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    Unknown,
}

impl fmt::Display for ReleaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReleaseOutcome::Released => OK,
            ReleaseOutcome::Unknown => UNKNOWN,
        })
    }
}

impl FromStr for ReleaseOutcome {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            OK => Ok(ReleaseOutcome::Released),
            UNKNOWN => Ok(ReleaseOutcome::Unknown),
            other => Err(ParseError::Release(other.to_string())),
        }
    }
}

/// A leased device: its adb serial plus the host port reserved for its
/// UiAutomator2 control server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLease {
    pub serial: String,
    pub system_port: u16,
}

impl fmt::Display for DeviceLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.serial, self.system_port)
    }
}

impl FromStr for DeviceLease {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(serial), Some(port), None) => {
                let system_port = port
                    .parse()
                    .map_err(|_| ParseError::DeviceLease(s.to_string()))?;
                Ok(DeviceLease {
                    serial: serial.to_string(),
                    system_port,
                })
            }
            _ => Err(ParseError::DeviceLease(s.to_string())),
        }
    }
}

/// A leased Appium node, addressed by its WebDriver URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLease {
    pub port: u16,
    pub url: String,
}

impl NodeLease {
    pub fn new(host: &str, port: u16) -> Self {
        NodeLease {
            port,
            url: node_url(host, port),
        }
    }
}

impl fmt::Display for NodeLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

impl FromStr for NodeLease {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = s.trim();
        let port = parse_node_port(url).ok_or_else(|| ParseError::NodeAddress(url.to_string()))?;
        Ok(NodeLease {
            port,
            url: url.to_string(),
        })
    }
}

pub fn node_url(host: &str, port: u16) -> String {
    format!("http://{}:{}{}", host, port, NODE_PATH)
}

/// Extracts the primary port from either a bare port ("4723") or a node URL
/// ("http://127.0.0.1:4723/wd/hub").
pub fn parse_node_port(address: &str) -> Option<u16> {
    let address = address.trim();
    if let Ok(port) = address.parse() {
        return Some(port);
    }
    let rest = address.split_once("://").map_or(address, |(_, rest)| rest);
    let authority = rest.split('/').next()?;
    let (_, port) = authority.rsplit_once(':')?;
    port.parse().ok()
}

/// Read-only view of one pool record, as served by `/list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordView {
    pub id: String,
    pub free: bool,
    pub aux_port: u16,
    pub last_transition: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub devices: Vec<RecordView>,
    pub nodes: Vec<RecordView>,
}
