use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Role of a scanner output file inside a run folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyFileRole {
    Discovery,
    HostsUp,
    Ports,
    HttpTitles,
    InfraServices,
    GatewaySmoke,
    Snapshots,
}

pub type KeyFiles = BTreeMap<KeyFileRole, Vec<PathBuf>>;

impl KeyFileRole {
    pub const ALL: [KeyFileRole; 7] = [
        KeyFileRole::Discovery,
        KeyFileRole::HostsUp,
        KeyFileRole::Ports,
        KeyFileRole::HttpTitles,
        KeyFileRole::InfraServices,
        KeyFileRole::GatewaySmoke,
        KeyFileRole::Snapshots,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyFileRole::Discovery => "discovery",
            KeyFileRole::HostsUp => "hosts_up",
            KeyFileRole::Ports => "ports",
            KeyFileRole::HttpTitles => "http_titles",
            KeyFileRole::InfraServices => "infra_services",
            KeyFileRole::GatewaySmoke => "gateway_smoke",
            KeyFileRole::Snapshots => "snapshots",
        }
    }

    /// Exact file names, or `prefix*` globs.
    pub fn patterns(&self) -> &'static [&'static str] {
        match self {
            KeyFileRole::Discovery => &[
                "discovery_ping_sweep.xml", "discovery_ping_sweep.nmap", "discovery_ping_sweep.gnmap",
                "discovery_smoke.xml", "discovery_smoke.nmap", "discovery_smoke.gnmap",
            ],
            KeyFileRole::HostsUp => &["hosts_up.txt"],
            KeyFileRole::Ports => &["ports_top200_open.xml", "ports_top200_open.nmap", "ports_top200_open.gnmap"],
            KeyFileRole::HttpTitles => &["http_titles.xml", "http_titles.nmap", "http_titles.gnmap"],
            KeyFileRole::InfraServices => &[
                "infra_services_gw.xml", "infra_services_gw.nmap", "infra_services_gw.gnmap",
                "infra_services.xml", "infra_services.nmap", "infra_services.gnmap",
            ],
            KeyFileRole::GatewaySmoke => &["gw_ports_smoke.xml", "gw_ports_smoke.nmap", "gw_ports_smoke.gnmap"],
            KeyFileRole::Snapshots => &["arp*", "ipconfig*", "route*"],
        }
    }

    fn matches_in(&self, dir: &Path, listing: &[PathBuf]) -> Vec<PathBuf> {
        let mut hits = Vec::new();
        for pattern in self.patterns() {
            if let Some(prefix) = pattern.strip_suffix('*') {
                hits.extend(
                    listing
                        .iter()
                        .filter(|p| p.file_name().map_or(false, |n| n.to_string_lossy().starts_with(prefix)))
                        .cloned(),
                );
            } else {
                let p = dir.join(pattern);
                if p.is_file() { hits.push(p); }
            }
        }
        hits
    }
}

/// Map each role to the files present for it; roles with no file are absent.
pub fn find_key_files(run_folder: &Path) -> KeyFiles {
    let mut listing: Vec<PathBuf> = match fs::read_dir(run_folder) {
        Ok(rd) => rd.filter_map(|e| e.ok()).map(|e| e.path()).filter(|p| p.is_file()).collect(),
        Err(_) => Vec::new(),
    };
    listing.sort();

    let mut found = KeyFiles::new();
    for role in KeyFileRole::ALL {
        let mut seen = HashSet::new();
        let files: Vec<PathBuf> = role
            .matches_in(run_folder, &listing)
            .into_iter()
            .map(|p| p.canonicalize().unwrap_or(p))
            .filter(|p| seen.insert(p.clone()))
            .collect();
        if !files.is_empty() { found.insert(role, files); }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_exact_and_prefix_matches() {
        let dir = tempfile::tempdir().unwrap();
        for f in ["ports_top200_open.xml", "ports_top200_open.gnmap", "arp_a.txt", "route_print.txt", "notes.md"] {
            fs::write(dir.path().join(f), f).unwrap();
        }
        fs::create_dir(dir.path().join("ipconfig_dir")).unwrap();

        let kf = find_key_files(dir.path());
        assert_eq!(kf.len(), 2);
        let ports = &kf[&KeyFileRole::Ports];
        assert_eq!(ports.len(), 2);
        assert!(ports[0].ends_with("ports_top200_open.xml"));
        assert!(ports.iter().all(|p| p.is_absolute()));
        let snaps = &kf[&KeyFileRole::Snapshots];
        assert_eq!(snaps.len(), 2, "directories never match");
    }

    #[test]
    fn empty_folder_has_no_roles() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_key_files(dir.path()).is_empty());
        assert!(find_key_files(&dir.path().join("missing")).is_empty());
    }

    #[test]
    fn roles_serialize_as_snake_case_keys() {
        let mut kf = KeyFiles::new();
        kf.insert(KeyFileRole::HostsUp, vec![PathBuf::from("/r/hosts_up.txt")]);
        let v = serde_json::to_value(&kf).unwrap();
        assert_eq!(v["hosts_up"][0], "/r/hosts_up.txt");
        assert_eq!(KeyFileRole::HttpTitles.as_str(), "http_titles");
    }
}
