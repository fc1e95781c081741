use crate::diff::ports_report;
use anyhow::Result;
use baseline_core::{p0_action, PortFinding, RiskLevel, RiskPort, TopPort};
use nmap_parse::{count_hosts_up, parse_ports, top_ports};
use risk_rules::RuleSet;
use run_registry::{RunManifest, RunRegistry};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use time::OffsetDateTime;
use tracing::debug;

pub const SCORECARD_TOP_N: usize = 10;
const MAX_ACTIONS: usize = 3;

/// Exposure overview of a single run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scorecard {
    pub run_uid: String,
    pub network: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    pub total_hosts: usize,
    pub open_ports: usize,
    pub unique_services: usize,
    /// Number of P0/P1 ports.
    pub risk_ports: usize,
    pub top_ports: Vec<TopPort>,
    pub risk_ports_detail: Vec<RiskPort>,
    pub summary: String,
    pub actions: Vec<String>,
}

/// Group open findings by `protocol:port` with their resolved risk.
///
/// Ports without a level (unclassified or whitelisted) are left out. Sorted
/// most severe first, then by affected host count.
pub fn aggregate_risk_ports(findings: &[PortFinding], network: &str, rules: &RuleSet) -> Vec<RiskPort> {
    let mut out: Vec<RiskPort> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();

    for f in findings.iter().filter(|f| f.is_open()) {
        let key = f.port_key();
        let idx = match slots.get(&key) {
            Some(i) => *i,
            None => {
                let Some(risk) = rules.effective_risk(f.port, &f.protocol, network) else { continue; };
                out.push(RiskPort { port: f.port, protocol: f.protocol.clone(), service: f.service.clone(), risk, hosts_affected: 0, hosts: Vec::new() });
                slots.insert(key, out.len() - 1);
                out.len() - 1
            }
        };
        let entry = &mut out[idx];
        if !entry.hosts.contains(&f.ip) {
            entry.hosts.push(f.ip.clone());
            entry.hosts_affected = entry.hosts.len();
        }
    }

    out.sort_by(|a, b| a.risk.cmp(&b.risk).then(b.hosts_affected.cmp(&a.hosts_affected)));
    out
}

fn host_info(rp: &RiskPort) -> String {
    match rp.hosts.as_slice() {
        [only] => format!("on {only}"),
        _ => format!("on {} hosts", rp.hosts_affected),
    }
}

/// Up to three remediation steps: P0 ports first, then P1 reviews.
pub fn generate_actions(risk_ports: &[RiskPort]) -> Vec<String> {
    let mut actions: Vec<String> = risk_ports
        .iter()
        .filter(|r| r.risk == RiskLevel::P0)
        .take(MAX_ACTIONS)
        .map(|rp| match p0_action(rp.port) {
            Some(action) => format!("{action} ({}/{} {})", rp.port, rp.protocol, host_info(rp)),
            None => format!("Block port {}/{} at perimeter ({} hosts)", rp.port, rp.protocol, rp.hosts_affected),
        })
        .collect();

    let room = MAX_ACTIONS - actions.len();
    actions.extend(risk_ports.iter().filter(|r| r.risk == RiskLevel::P1).take(room).map(|rp| {
        let what = if rp.service.is_empty() { format!("port {}", rp.port) } else { rp.service.clone() };
        format!("Review and restrict {what} access ({} hosts)", rp.hosts_affected)
    }));

    if actions.is_empty() { actions.push("No critical exposures detected - continue monitoring".to_string()); }
    actions
}

pub fn scorecard_summary(total_hosts: usize, open_ports: usize, risk_ports: &[RiskPort]) -> String {
    let lead = format!("Scan shows {total_hosts} hosts with {open_ports} open ports.");
    let p0: Vec<&RiskPort> = risk_ports.iter().filter(|r| r.risk == RiskLevel::P0).collect();
    let Some(top) = p0.first() else {
        return format!("{lead} No critical (P0) exposures detected. Standard services are running within expected parameters.");
    };
    let p0_hosts = p0.iter().flat_map(|r| r.hosts.iter()).collect::<BTreeSet<_>>().len();
    let service = if top.service.is_empty() { format!("port {}", top.port) } else { top.service.clone() };

    if p0.len() == 1 {
        let s = if p0_hosts == 1 { "" } else { "s" };
        return format!("{lead} One critical exposure: {service} on {p0_hosts} host{s}. Recommend immediate remediation.");
    }
    format!("{lead} {} critical exposures detected affecting {p0_hosts} hosts. Most urgent: {service}. Immediate action required.", p0.len())
}

/// Scorecard from already parsed findings. `hosts_up` replaces the host count
/// derived from the findings when non-zero.
pub fn scorecard_from_findings(manifest: &RunManifest, findings: &[PortFinding], hosts_up: usize, rules: &RuleSet) -> Scorecard {
    let open: Vec<&PortFinding> = findings.iter().filter(|f| f.is_open()).collect();
    let unique_hosts = open.iter().map(|f| f.ip.as_str()).collect::<BTreeSet<_>>().len();
    let unique_services = open.iter().map(|f| f.service.as_str()).filter(|s| !s.is_empty()).collect::<BTreeSet<_>>().len();
    let total_hosts = if hosts_up > 0 { hosts_up } else { unique_hosts };

    let aggregated = aggregate_risk_ports(findings, &manifest.network, rules);
    let summary = scorecard_summary(total_hosts, open.len(), &aggregated);
    let detail: Vec<RiskPort> = aggregated.into_iter().filter(|r| r.risk <= RiskLevel::P1).collect();

    Scorecard {
        run_uid: manifest.run_uid.clone(),
        network: manifest.network.clone(),
        timestamp: manifest.timestamp,
        total_hosts,
        open_ports: open.len(),
        unique_services,
        risk_ports: detail.len(),
        top_ports: top_ports(findings, SCORECARD_TOP_N),
        actions: generate_actions(&detail),
        risk_ports_detail: detail,
        summary,
    }
}

/// Parse a registered run's port report and summarise its exposure.
pub fn build_scorecard(runs: &RunRegistry, rules: &RuleSet, run_uid: &str) -> Result<Scorecard> {
    let manifest = runs.require(run_uid)?;
    let xml = ports_report(&manifest)?;
    let findings = parse_ports(&xml);
    let hosts_up = manifest.hosts_up_file().filter(|p| p.is_file()).map(count_hosts_up).unwrap_or(0);
    debug!(run_uid, findings = findings.len(), hosts_up, "building scorecard");
    Ok(scorecard_from_findings(&manifest, &findings, hosts_up, rules))
}

#[cfg(test)]
mod tests {
    use super::*;
    use baseline_core::Protocol;
    use risk_rules::{CustomRiskRule, RuleAction};
    use std::fs;

    fn open(ip: &str, port: u16, service: &str) -> PortFinding {
        PortFinding {
            ip: ip.into(),
            hostname: String::new(),
            protocol: "tcp".into(),
            port,
            state: "open".into(),
            service: service.into(),
            product: String::new(),
            version: String::new(),
            source_xml: "ports_top200_open.xml".into(),
        }
    }

    fn sample() -> Vec<PortFinding> {
        vec![
            open("10.0.0.1", 22, "ssh"),
            open("10.0.0.1", 445, "microsoft-ds"),
            open("10.0.0.2", 445, "microsoft-ds"),
            open("10.0.0.2", 445, "microsoft-ds"),
            open("10.0.0.3", 3389, "ms-wbt-server"),
            open("10.0.0.3", 8080, "http-proxy"),
            open("10.0.0.3", 31337, ""),
        ]
    }

    #[test]
    fn aggregates_by_severity_then_reach() {
        let rps = aggregate_risk_ports(&sample(), "home", &RuleSet::default());
        let order: Vec<(u16, RiskLevel, usize)> = rps.iter().map(|r| (r.port, r.risk, r.hosts_affected)).collect();
        assert_eq!(order, vec![(445, RiskLevel::P0, 2), (3389, RiskLevel::P0, 1), (8080, RiskLevel::P1, 1), (22, RiskLevel::P2, 1)]);
        assert_eq!(rps[0].hosts, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn whitelisted_ports_drop_out() {
        let rules = RuleSet::new(vec![CustomRiskRule {
            rule_id: "home_445_tcp_00000000".into(),
            port: 445,
            protocol: Protocol::Tcp,
            network: "home".into(),
            action: RuleAction::Whitelist,
            custom_risk: None,
            reason: "file server".into(),
            created_at: OffsetDateTime::UNIX_EPOCH,
        }]);
        let rps = aggregate_risk_ports(&sample(), "home", &rules);
        assert!(rps.iter().all(|r| r.port != 445));
    }

    #[test]
    fn actions_prefer_p0_then_p1() {
        let rps = aggregate_risk_ports(&sample(), "home", &RuleSet::default());
        let actions = generate_actions(&rps);
        assert_eq!(
            actions,
            vec![
                "Block at perimeter or isolate to internal VLAN only (445/tcp on 2 hosts)".to_string(),
                "Block RDP at perimeter, use VPN or bastion for remote access (3389/tcp on 10.0.0.3)".to_string(),
                "Review and restrict http-proxy access (1 hosts)".to_string(),
            ]
        );
        assert_eq!(generate_actions(&[]), vec!["No critical exposures detected - continue monitoring".to_string()]);
    }

    #[test]
    fn summaries() {
        let rps = aggregate_risk_ports(&sample(), "home", &RuleSet::default());
        assert_eq!(
            scorecard_summary(3, 7, &rps),
            "Scan shows 3 hosts with 7 open ports. 2 critical exposures detected affecting 3 hosts. Most urgent: microsoft-ds. Immediate action required."
        );
        let one: Vec<RiskPort> = rps.iter().filter(|r| r.port == 3389).cloned().collect();
        assert_eq!(
            scorecard_summary(1, 1, &one),
            "Scan shows 1 hosts with 1 open ports. One critical exposure: ms-wbt-server on 1 host. Recommend immediate remediation."
        );
        assert!(scorecard_summary(2, 2, &[]).contains("No critical (P0) exposures detected."));
    }

    #[test]
    fn scorecard_for_registered_run() {
        let scans = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let run = scans.path().join("home").join("rawscans").join("2025-12-31_2044_kit");
        fs::create_dir_all(&run).unwrap();
        fs::write(
            run.join("ports_top200_open.xml"),
            r#"<nmaprun>
<host><status state="up"/><address addr="10.0.0.5" addrtype="ipv4"/><ports>
<port protocol="tcp" portid="22"><state state="open"/><service name="ssh"/></port>
<port protocol="tcp" portid="3389"><state state="open"/><service name="ms-wbt-server"/></port>
<port protocol="tcp" portid="80"><state state="closed"/><service name="http"/></port>
</ports></host></nmaprun>"#,
        )
        .unwrap();
        fs::write(run.join("hosts_up.txt"), "# up\n10.0.0.5\n10.0.0.6\n10.0.0.7\n").unwrap();

        let runs = RunRegistry::open(data.path()).unwrap();
        let uid = runs.register_run(&run, "e1", None).unwrap().manifest.run_uid;
        let card = build_scorecard(&runs, &RuleSet::default(), &uid).unwrap();

        assert_eq!(card.network, "home");
        assert_eq!((card.total_hosts, card.open_ports, card.unique_services), (3, 2, 2));
        assert_eq!(card.risk_ports, 1);
        assert_eq!(card.risk_ports_detail[0].port, 3389);
        assert_eq!(card.top_ports.len(), 2);
        assert_eq!(card.actions.len(), 1);

        let v = serde_json::to_value(&card).unwrap();
        assert_eq!(v["riskPortsDetail"][0]["risk"], "P0");
        assert_eq!(v["topPorts"][0]["hostsAffected"], 1);

        assert!(build_scorecard(&runs, &RuleSet::default(), "nope").is_err());
    }
}
