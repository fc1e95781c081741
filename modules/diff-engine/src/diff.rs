use crate::summary::diff_summary;
use anyhow::Result;
use baseline_core::{Error, PortFinding, RiskLevel};
use risk_rules::RuleSet;
use run_registry::{RunManifest, RunRegistry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use time::OffsetDateTime;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostChangeType {
    Added,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortChangeType {
    Opened,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostChange {
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub change_type: HostChangeType,
    /// Whether a new host is in the network's device inventory; unset until checked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortChange {
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub port: u16,
    pub protocol: String,
    pub service: String,
    pub change_type: PortChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskLevel>,
}

/// Host and port changes between two sets of findings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Changes {
    pub new_hosts: Vec<HostChange>,
    pub removed_hosts: Vec<HostChange>,
    pub ports_opened: Vec<PortChange>,
    pub ports_closed: Vec<PortChange>,
    /// Opened ports resolved to P0.
    pub risky_exposures: Vec<PortChange>,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        self.new_hosts.is_empty() && self.removed_hosts.is_empty() && self.ports_opened.is_empty() && self.ports_closed.is_empty()
    }

    /// Flag each new host as inventoried or not.
    pub fn mark_known_hosts(&mut self, is_known: impl Fn(&str) -> bool) {
        for host in &mut self.new_hosts {
            host.known = Some(is_known(&host.ip));
        }
    }

    /// New hosts not found in the inventory.
    pub fn unknown_hosts(&self) -> impl Iterator<Item = &HostChange> {
        self.new_hosts.iter().filter(|h| h.known == Some(false))
    }

    pub fn summary(&self) -> String {
        diff_summary(
            self.new_hosts.len(),
            self.removed_hosts.len(),
            self.ports_opened.len(),
            self.ports_closed.len(),
            self.risky_exposures.len(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffData {
    pub baseline_run_uid: String,
    pub current_run_uid: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub baseline_timestamp: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub current_timestamp: Option<OffsetDateTime>,
    pub network: String,
    #[serde(flatten)]
    pub changes: Changes,
    pub summary: String,
}

impl DiffData {
    pub fn new(baseline: &RunManifest, current: &RunManifest, changes: Changes) -> Self {
        DiffData {
            baseline_run_uid: baseline.run_uid.clone(),
            current_run_uid: current.run_uid.clone(),
            baseline_timestamp: baseline.timestamp,
            current_timestamp: current.timestamp,
            network: current.network.clone(),
            summary: changes.summary(),
            changes,
        }
    }

    pub fn risk_score(&self) -> u8 {
        crate::risk_score(&self.changes)
    }
}

struct DevicePort<'a> {
    key: String,
    finding: &'a PortFinding,
}

#[derive(Default)]
struct Device<'a> {
    hostname: &'a str,
    ports: Vec<DevicePort<'a>>,
}

impl Device<'_> {
    fn hostname(&self) -> Option<String> {
        if self.hostname.is_empty() { None } else { Some(self.hostname.to_string()) }
    }

    fn keys(&self) -> HashSet<&str> {
        self.ports.iter().map(|p| p.key.as_str()).collect()
    }
}

/// `ip -> device` over open findings only; first non-empty hostname wins and
/// repeated `protocol:port` keys on a host collapse to the first.
fn devices(findings: &[PortFinding]) -> BTreeMap<&str, Device<'_>> {
    let mut out: BTreeMap<&str, Device<'_>> = BTreeMap::new();
    for f in findings.iter().filter(|f| f.is_open()) {
        let dev = out.entry(f.ip.as_str()).or_default();
        if dev.hostname.is_empty() { dev.hostname = f.hostname.as_str(); }
        let key = f.port_key();
        if dev.ports.iter().all(|p| p.key != key) { dev.ports.push(DevicePort { key, finding: f }); }
    }
    out
}

fn port_change(ip: &str, dev: &Device<'_>, f: &PortFinding, change_type: PortChangeType, risk: Option<RiskLevel>) -> PortChange {
    PortChange {
        ip: ip.to_string(),
        hostname: dev.hostname(),
        port: f.port,
        protocol: f.protocol.clone(),
        service: f.service.clone(),
        change_type,
        risk,
    }
}

/// Compare two finding sets. Opened ports carry their risk resolved for `network`.
pub fn diff_findings(baseline: &[PortFinding], current: &[PortFinding], network: &str, rules: &RuleSet) -> Changes {
    let before = devices(baseline);
    let after = devices(current);
    let mut changes = Changes::default();

    for (ip, dev) in &after {
        if !before.contains_key(ip) {
            changes.new_hosts.push(HostChange { ip: ip.to_string(), hostname: dev.hostname(), change_type: HostChangeType::Added, known: None });
        }
        let known = before.get(ip).map(|d| d.keys()).unwrap_or_default();
        for p in dev.ports.iter().filter(|p| !known.contains(p.key.as_str())) {
            let risk = rules.effective_risk(p.finding.port, &p.finding.protocol, network);
            changes.ports_opened.push(port_change(ip, dev, p.finding, PortChangeType::Opened, risk));
        }
    }

    for (ip, dev) in &before {
        if !after.contains_key(ip) {
            changes.removed_hosts.push(HostChange { ip: ip.to_string(), hostname: dev.hostname(), change_type: HostChangeType::Removed, known: None });
        }
        let still = after.get(ip).map(|d| d.keys()).unwrap_or_default();
        for p in dev.ports.iter().filter(|p| !still.contains(p.key.as_str())) {
            changes.ports_closed.push(port_change(ip, dev, p.finding, PortChangeType::Closed, None));
        }
    }

    changes.risky_exposures = changes.ports_opened.iter().filter(|p| p.risk == Some(RiskLevel::P0)).cloned().collect();
    changes
}

/// The XML port report of a run, checked to still exist on disk.
pub fn ports_report(manifest: &RunManifest) -> Result<PathBuf, Error> {
    let xml = manifest.ports_xml().ok_or_else(|| Error::MissingPortScan(manifest.run_uid.clone()))?;
    if !xml.is_file() { return Err(Error::ReportMissing(xml.display().to_string())); }
    Ok(xml.to_path_buf())
}

/// Diff two registered runs, reporting why when it cannot be done.
pub fn try_compute_diff(runs: &RunRegistry, rules: &RuleSet, baseline_uid: &str, current_uid: &str) -> Result<DiffData> {
    let baseline = runs.require(baseline_uid)?;
    let current = runs.require(current_uid)?;
    let baseline_xml = ports_report(&baseline)?;
    let current_xml = ports_report(&current)?;

    let changes = diff_findings(&nmap_parse::parse_ports(&baseline_xml), &nmap_parse::parse_ports(&current_xml), &current.network, rules);
    debug!(baseline = baseline_uid, current = current_uid, opened = changes.ports_opened.len(), closed = changes.ports_closed.len(), "computed diff");
    Ok(DiffData::new(&baseline, &current, changes))
}

/// `None` when either run is unknown or has no readable port report.
pub fn compute_diff(runs: &RunRegistry, rules: &RuleSet, baseline_uid: &str, current_uid: &str) -> Option<DiffData> {
    match try_compute_diff(runs, rules, baseline_uid, current_uid) {
        Ok(d) => Some(d),
        Err(e) => {
            debug!(error = %e, "diff unavailable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{risk_score, ScoreBand};
    use baseline_core::Protocol;
    use risk_rules::{CustomRiskRule, RuleAction};
    use std::fs;
    use std::path::Path;

    fn open(ip: &str, hostname: &str, port: u16, service: &str) -> PortFinding {
        PortFinding {
            ip: ip.into(),
            hostname: hostname.into(),
            protocol: "tcp".into(),
            port,
            state: "open".into(),
            service: service.into(),
            product: String::new(),
            version: String::new(),
            source_xml: "ports_top200_open.xml".into(),
        }
    }

    #[test]
    fn new_rdp_host_scores_good() {
        let base = vec![open("10.0.0.5", "", 22, "ssh")];
        let cur = vec![open("10.0.0.5", "", 22, "ssh"), open("10.0.0.6", "", 3389, "ms-wbt-server")];
        let c = diff_findings(&base, &cur, "home", &RuleSet::default());

        assert_eq!(c.new_hosts, vec![HostChange { ip: "10.0.0.6".into(), hostname: None, change_type: HostChangeType::Added, known: None }]);
        assert!(c.removed_hosts.is_empty());
        assert_eq!(c.ports_opened.len(), 1);
        assert_eq!((c.ports_opened[0].ip.as_str(), c.ports_opened[0].port), ("10.0.0.6", 3389));
        assert_eq!(c.ports_opened[0].risk, Some(RiskLevel::P0));
        assert_eq!(c.risky_exposures, c.ports_opened);
        assert!(c.ports_closed.is_empty());

        let score = risk_score(&c);
        assert_eq!(score, 81);
        assert_eq!(ScoreBand::from_score(score).label(), "Good");
        assert_eq!(c.summary(), "1 critical exposure detected requiring immediate action. Host changes: 1 new. Port changes: 1 opened.");
    }

    #[test]
    fn identical_runs_are_stable() {
        let f = vec![open("10.0.0.5", "nas", 22, "ssh"), open("10.0.0.5", "nas", 445, "microsoft-ds")];
        let c = diff_findings(&f, &f, "home", &RuleSet::default());
        assert!(c.is_empty());
        assert_eq!(risk_score(&c), 100);
        assert_eq!(c.summary(), "No significant changes detected between scans. Network baseline is stable.");
    }

    #[test]
    fn new_hosts_checked_against_inventory() {
        let cur = vec![open("10.0.0.5", "nas", 22, "ssh"), open("10.0.0.6", "", 3389, "ms-wbt-server")];
        let mut c = diff_findings(&[], &cur, "home", &RuleSet::default());
        assert!(c.new_hosts.iter().all(|h| h.known.is_none()));
        assert!(serde_json::to_value(&c).unwrap()["newHosts"][0].get("known").is_none());

        c.mark_known_hosts(|ip| ip == "10.0.0.5");
        let unknown: Vec<&str> = c.unknown_hosts().map(|h| h.ip.as_str()).collect();
        assert_eq!(unknown, vec!["10.0.0.6"]);
        assert_eq!(c.new_hosts[0].known, Some(true));
        assert_eq!(serde_json::to_value(&c).unwrap()["newHosts"][1]["known"], false);
        // the summary and score do not depend on inventory
        assert_eq!(risk_score(&c), 100 - 15 - 3 * 2 - 2);
    }

    #[test]
    fn swapping_sides_swaps_changes() {
        let a = vec![open("10.0.0.1", "", 22, "ssh"), open("10.0.0.2", "", 80, "http")];
        let b = vec![open("10.0.0.1", "", 443, "https"), open("10.0.0.3", "", 80, "http")];
        let rules = RuleSet::default();
        let ab = diff_findings(&a, &b, "n", &rules);
        let ba = diff_findings(&b, &a, "n", &rules);

        let ips = |v: &[HostChange]| v.iter().map(|h| h.ip.clone()).collect::<Vec<_>>();
        assert_eq!(ips(&ab.new_hosts), ips(&ba.removed_hosts));
        assert_eq!(ips(&ab.removed_hosts), ips(&ba.new_hosts));

        let keys = |v: &[PortChange]| v.iter().map(|p| format!("{}/{}:{}", p.ip, p.protocol, p.port)).collect::<Vec<_>>();
        assert_eq!(keys(&ab.ports_opened), keys(&ba.ports_closed));
        assert_eq!(keys(&ab.ports_closed), keys(&ba.ports_opened));
    }

    #[test]
    fn only_open_findings_count_and_duplicates_collapse() {
        let mut closed = open("10.0.0.9", "", 3389, "rdp");
        closed.state = "filtered".into();
        let base: Vec<PortFinding> = vec![];
        let cur = vec![closed, open("10.0.0.5", "", 80, "http"), open("10.0.0.5", "web", 80, "http")];
        let c = diff_findings(&base, &cur, "n", &RuleSet::default());
        assert_eq!(c.new_hosts.len(), 1);
        assert_eq!(c.new_hosts[0].hostname.as_deref(), Some("web"));
        assert_eq!(c.ports_opened.len(), 1);
        assert_eq!(c.ports_opened[0].risk, Some(RiskLevel::P2));
    }

    #[test]
    fn rules_for_current_network_apply_to_opened_ports() {
        let rules = RuleSet::new(vec![CustomRiskRule {
            rule_id: "home_3389_tcp_00000000".into(),
            port: 3389,
            protocol: Protocol::Tcp,
            network: "home".into(),
            action: RuleAction::Whitelist,
            custom_risk: None,
            reason: "jump box".into(),
            created_at: OffsetDateTime::UNIX_EPOCH,
        }]);
        let cur = vec![open("10.0.0.6", "", 3389, "ms-wbt-server")];
        let home = diff_findings(&[], &cur, "HOME", &rules);
        assert_eq!(home.ports_opened[0].risk, None);
        assert!(home.risky_exposures.is_empty());
        let office = diff_findings(&[], &cur, "office", &rules);
        assert_eq!(office.risky_exposures.len(), 1);
    }

    fn write_run(root: &Path, name: &str, xml: Option<&str>) -> PathBuf {
        let run = root.join("home").join("rawscans").join(name);
        fs::create_dir_all(&run).unwrap();
        match xml {
            Some(x) => fs::write(run.join("ports_top200_open.xml"), x).unwrap(),
            None => fs::write(run.join("hosts_up.txt"), "10.0.0.5\n").unwrap(),
        }
        run
    }

    const BASE_XML: &str = r#"<nmaprun><host><status state="up"/><address addr="10.0.0.5" addrtype="ipv4"/>
<ports><port protocol="tcp" portid="22"><state state="open"/><service name="ssh"/></port></ports></host></nmaprun>"#;
    const CUR_XML: &str = r#"<nmaprun><host><status state="up"/><address addr="10.0.0.5" addrtype="ipv4"/>
<ports><port protocol="tcp" portid="22"><state state="open"/><service name="ssh"/></port></ports></host>
<host><status state="up"/><address addr="10.0.0.6" addrtype="ipv4"/>
<ports><port protocol="tcp" portid="3389"><state state="open"/><service name="ms-wbt-server"/></port></ports></host></nmaprun>"#;

    #[test]
    fn diff_between_registered_runs() {
        let scans = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let runs = RunRegistry::open(data.path()).unwrap();
        let base = runs.register_run(&write_run(scans.path(), "2025-12-01_0900_kit", Some(BASE_XML)), "e1", None).unwrap().manifest;
        let cur = runs.register_run(&write_run(scans.path(), "2025-12-31_2044_kit", Some(CUR_XML)), "e2", None).unwrap().manifest;

        let d = compute_diff(&runs, &RuleSet::default(), &base.run_uid, &cur.run_uid).unwrap();
        assert_eq!(d.network, "home");
        assert_eq!(d.baseline_timestamp, base.timestamp);
        assert_eq!(d.changes.risky_exposures.len(), 1);
        assert!(d.summary.starts_with("1 critical exposure detected"));

        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["portsOpened"][0]["changeType"], "opened");
        assert_eq!(v["newHosts"][0]["changeType"], "added");
        assert_eq!(v["riskyExposures"][0]["risk"], "P0");
        assert!(v["newHosts"][0].get("hostname").is_none());
    }

    #[test]
    fn diff_reports_why_it_is_unavailable() {
        let scans = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let runs = RunRegistry::open(data.path()).unwrap();
        let rules = RuleSet::default();
        let with_xml = runs.register_run(&write_run(scans.path(), "2025-12-01_0900_kit", Some(BASE_XML)), "e1", None).unwrap().manifest;
        let no_xml = runs.register_run(&write_run(scans.path(), "2025-12-02_0900_kit", None), "e2", None).unwrap().manifest;

        let err = try_compute_diff(&runs, &rules, &with_xml.run_uid, "missing").unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::RunNotFound(_))));
        let err = try_compute_diff(&runs, &rules, &with_xml.run_uid, &no_xml.run_uid).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::MissingPortScan(_))));

        fs::remove_file(with_xml.ports_xml().unwrap()).unwrap();
        let err = try_compute_diff(&runs, &rules, &with_xml.run_uid, &with_xml.run_uid).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::ReportMissing(_))));
        assert!(compute_diff(&runs, &rules, &with_xml.run_uid, &with_xml.run_uid).is_none());
    }
}
