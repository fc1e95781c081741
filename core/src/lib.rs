//! Core types shared by the ingestion, registry and diff crates.

pub mod error;
pub mod risk;

pub use error::Error;
pub use risk::{default_risk, p0_action, service_name, RiskLevel};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Transport protocol accepted by risk rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(Error::InvalidRule(format!("protocol must be 'tcp' or 'udp', got '{other}'"))),
        }
    }
}

/// One (host, port) observation from one scan report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortFinding {
    pub ip: String,
    pub hostname: String,
    pub protocol: String,
    pub port: u16,
    pub state: String,
    pub service: String,
    pub product: String,
    pub version: String,
    pub source_xml: String,
}

impl PortFinding {
    pub fn is_open(&self) -> bool {
        self.state == "open"
    }

    /// `protocol:port`, the identity of a port on one host.
    pub fn port_key(&self) -> String {
        format!("{}:{}", self.protocol, self.port)
    }
}

/// Open-port aggregate counted by distinct affected hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopPort {
    pub protocol: String,
    pub port: u16,
    pub service: String,
    pub hosts_affected: usize,
}

/// Open-port aggregate carrying its resolved risk and the affected hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskPort {
    pub port: u16,
    pub protocol: String,
    pub service: String,
    pub risk: RiskLevel,
    pub hosts_affected: usize,
    pub hosts: Vec<String>,
}
