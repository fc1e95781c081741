//! Static port risk tables.
//!
//! P0 = critical (never expose), P1 = admin/dev interfaces, P2 = context dependent.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Severity tier. Ordering puts the most severe level first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    P0,
    P1,
    P2,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::P0 => "P0",
            RiskLevel::P1 => "P1",
            RiskLevel::P2 => "P2",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RiskLevel::P0 => "Critical - Immediate action required",
            RiskLevel::P1 => "High - Should be reviewed and restricted",
            RiskLevel::P2 => "Context-dependent - Monitor and assess",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "P0" => Ok(RiskLevel::P0),
            "P1" => Ok(RiskLevel::P1),
            "P2" => Ok(RiskLevel::P2),
            other => Err(Error::InvalidRule(format!("risk must be P0, P1 or P2, got '{other}'"))),
        }
    }
}

pub const P0_PORTS: &[u16] = &[
    23, 445, 3389, 5900, 135, 139, 1080, 5985, 5986, 1433, 1434, 3306, 5432, 6379, 27017, 9200,
];

pub const P1_PORTS: &[u16] = &[
    8080, 8443, 8888, 9000, 9090, 10000, 2375, 2376, 4444, 7001, 8000, 8081, 8082,
];

pub const P2_PORTS: &[u16] = &[22, 80, 443, 21, 25, 53, 110, 143, 993, 995];

/// Static classification of a port, before any custom rule applies.
pub fn default_risk(port: u16) -> Option<RiskLevel> {
    if P0_PORTS.contains(&port) { return Some(RiskLevel::P0); }
    if P1_PORTS.contains(&port) { return Some(RiskLevel::P1); }
    if P2_PORTS.contains(&port) { return Some(RiskLevel::P2); }
    None
}

/// Remediation advice for critical ports.
pub fn p0_action(port: u16) -> Option<&'static str> {
    let action = match port {
        23 => "Disable Telnet and use SSH instead",
        445 => "Block at perimeter or isolate to internal VLAN only",
        3389 => "Block RDP at perimeter, use VPN or bastion for remote access",
        5900 => "Block VNC at perimeter, use secure alternatives",
        135 => "Block MSRPC at perimeter firewall",
        139 => "Block NetBIOS at perimeter firewall",
        1080 => "Disable SOCKS proxy or restrict to internal use",
        5985 | 5986 => "Block WinRM at perimeter, use internal management only",
        1433 => "Block MSSQL externally, use internal connections only",
        1434 => "Block MSSQL Browser externally",
        3306 => "Block MySQL externally, use internal connections only",
        5432 => "Block PostgreSQL externally, use internal connections only",
        6379 => "Block Redis externally, enable authentication",
        27017 => "Block MongoDB externally, enable authentication",
        9200 => "Block Elasticsearch externally, enable authentication",
        _ => return None,
    };
    Some(action)
}

/// Friendly service name for well-known ports.
pub fn service_name(port: u16) -> Option<&'static str> {
    let name = match port {
        21 => "FTP",
        22 => "SSH",
        23 => "Telnet",
        25 => "SMTP",
        53 => "DNS",
        80 => "HTTP",
        110 => "POP3",
        135 => "MSRPC",
        139 => "NetBIOS",
        143 => "IMAP",
        443 => "HTTPS",
        445 => "SMB",
        993 => "IMAPS",
        995 => "POP3S",
        1080 => "SOCKS",
        1433 => "MSSQL",
        1434 => "MSSQL Browser",
        3306 => "MySQL",
        3389 => "RDP",
        5432 => "PostgreSQL",
        5900 => "VNC",
        5985 => "WinRM HTTP",
        5986 => "WinRM HTTPS",
        6379 => "Redis",
        8080 => "HTTP Proxy",
        8443 => "HTTPS Alt",
        8888 => "HTTP Alt",
        9200 => "Elasticsearch",
        27017 => "MongoDB",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_static_tables() {
        assert_eq!(default_risk(3389), Some(RiskLevel::P0));
        assert_eq!(default_risk(8080), Some(RiskLevel::P1));
        assert_eq!(default_risk(22), Some(RiskLevel::P2));
        assert_eq!(default_risk(31337), None);
    }

    #[test]
    fn most_severe_sorts_first() {
        let mut v = vec![RiskLevel::P2, RiskLevel::P0, RiskLevel::P1];
        v.sort();
        assert_eq!(v, vec![RiskLevel::P0, RiskLevel::P1, RiskLevel::P2]);
    }

    #[test]
    fn every_p0_port_has_an_action() {
        for p in P0_PORTS { assert!(p0_action(*p).is_some(), "missing action for {p}"); }
    }

    #[test]
    fn level_round_trips_through_str() {
        assert_eq!("p1".parse::<RiskLevel>().unwrap(), RiskLevel::P1);
        assert!("P3".parse::<RiskLevel>().is_err());
    }
}
