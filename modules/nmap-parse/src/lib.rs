//! nmap XML report parsing and open-port aggregation.

use anyhow::Result;
use baseline_core::{PortFinding, TopPort};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, warn};

/// Number of entries `top_ports` returns when the caller has no preference.
pub const DEFAULT_TOP_N: usize = 25;

#[derive(Debug, Default, Deserialize)]
struct NmapRun {
    #[serde(rename = "host", default)]
    hosts: Vec<NmapHost>,
}

#[derive(Debug, Deserialize)]
struct NmapHost {
    #[serde(default)]
    status: Option<NmapStatus>,
    #[serde(rename = "address", default)]
    addresses: Vec<NmapAddress>,
    #[serde(default)]
    hostnames: Option<NmapHostnames>,
    #[serde(default)]
    ports: Option<NmapPorts>,
}

#[derive(Debug, Deserialize)]
struct NmapStatus {
    #[serde(rename = "@state", default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct NmapAddress {
    #[serde(rename = "@addr", default)]
    addr: String,
    #[serde(rename = "@addrtype", default)]
    addr_type: String,
}

#[derive(Debug, Deserialize)]
struct NmapHostnames {
    #[serde(rename = "hostname", default)]
    hostnames: Vec<NmapHostname>,
}

#[derive(Debug, Deserialize)]
struct NmapHostname {
    #[serde(rename = "@name", default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct NmapPorts {
    #[serde(rename = "port", default)]
    ports: Vec<NmapPort>,
}

#[derive(Debug, Deserialize)]
struct NmapPort {
    #[serde(rename = "@protocol", default)]
    protocol: String,
    // kept as text: a malformed id becomes port 0 instead of failing the report
    #[serde(rename = "@portid", default)]
    portid: String,
    #[serde(default)]
    state: Option<NmapState>,
    #[serde(default)]
    service: Option<NmapService>,
}

#[derive(Debug, Deserialize)]
struct NmapState {
    #[serde(rename = "@state", default)]
    state: String,
}

#[derive(Debug, Default, Deserialize)]
struct NmapService {
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "@product", default)]
    product: String,
    #[serde(rename = "@version", default)]
    version: String,
}

/// Parse report text into one finding per (host, port) element.
///
/// Hosts reported as anything but `up` are skipped; every port state is kept.
/// `portid` as a port number; anything outside `u16` maps to 0.
fn port_number(portid: &str, ip: &str) -> u16 {
    match portid.trim().parse() {
        Ok(n) => n,
        Err(e) => {
            debug!(portid, ip, error = %e, "unusable portid, recording port 0");
            0
        }
    }
}

pub fn parse_ports_str(xml: &str, source_xml: &str) -> Result<Vec<PortFinding>> {
    let run: NmapRun = quick_xml::de::from_str(xml)?;
    let mut findings = Vec::new();

    for host in run.hosts {
        if host.status.as_ref().map_or(false, |s| s.state != "up") { continue; }
        let ip = host.addresses.iter().find(|a| a.addr_type == "ipv4").map(|a| a.addr.clone()).unwrap_or_default();
        let hostname = host
            .hostnames
            .as_ref()
            .and_then(|h| h.hostnames.first())
            .map(|h| h.name.clone())
            .unwrap_or_default();
        let Some(ports) = host.ports else { continue; };

        for p in ports.ports {
            let svc = p.service.unwrap_or_default();
            findings.push(PortFinding {
                ip: ip.clone(),
                hostname: hostname.clone(),
                protocol: p.protocol,
                port: port_number(&p.portid, &ip),
                state: p.state.map(|s| s.state).unwrap_or_default(),
                service: svc.name,
                product: svc.product,
                version: svc.version,
                source_xml: source_xml.to_string(),
            });
        }
    }
    Ok(findings)
}

/// Parse one report file. Unreadable or malformed reports yield no findings.
pub fn parse_ports(xml_path: &Path) -> Vec<PortFinding> {
    let source = xml_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let text = match std::fs::read_to_string(xml_path) {
        Ok(t) => t,
        Err(e) => {
            warn!(path = %xml_path.display(), error = %e, "cannot read scan report");
            return Vec::new();
        }
    };
    match parse_ports_str(&text, &source) {
        Ok(findings) => {
            debug!(path = %xml_path.display(), findings = findings.len(), "parsed scan report");
            findings
        }
        Err(e) => {
            warn!(path = %xml_path.display(), error = %e, "malformed scan report");
            Vec::new()
        }
    }
}

/// Rank open `(protocol, port, service)` groups by distinct affected IPs,
/// ties broken by ascending port.
pub fn top_ports(findings: &[PortFinding], n: usize) -> Vec<TopPort> {
    let mut groups: BTreeMap<(&str, u16, &str), HashSet<&str>> = BTreeMap::new();
    for f in findings.iter().filter(|f| f.is_open()) {
        groups.entry((f.protocol.as_str(), f.port, f.service.as_str())).or_default().insert(f.ip.as_str());
    }

    let mut out: Vec<TopPort> = groups
        .into_iter()
        .map(|((protocol, port, service), ips)| TopPort {
            protocol: protocol.to_string(),
            port,
            service: service.to_string(),
            hosts_affected: ips.len(),
        })
        .collect();
    out.sort_by(|a, b| b.hosts_affected.cmp(&a.hosts_affected).then(a.port.cmp(&b.port)));
    out.truncate(n);
    out
}

/// Findings from several reports plus their combined ranking.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedScan {
    pub ports: Vec<PortFinding>,
    pub top_ports: Vec<TopPort>,
}

/// Parse every report, skipping the ones that fail.
pub fn parse_many<P: AsRef<Path>>(xml_paths: &[P], top_n: usize) -> ParsedScan {
    let ports: Vec<PortFinding> = xml_paths.iter().flat_map(|p| parse_ports(p.as_ref())).collect();
    let top_ports = top_ports(&ports, top_n);
    ParsedScan { ports, top_ports }
}

/// Count live hosts listed one per line; `#` comments and blanks ignored.
/// An unreadable list counts as zero.
pub fn count_hosts_up(path: &Path) -> usize {
    match std::fs::read_to_string(path) {
        Ok(s) => s.lines().filter(|l| !l.trim().is_empty() && !l.starts_with('#')).count(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read hosts list");
            0
        }
    }
}
