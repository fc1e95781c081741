//! Registry of ingested scan runs, deduplicated by key-file content.

mod hash;
mod network;

pub use hash::{content_hash, hash_file, run_uid, sanitize_for_uid, RunUid};
pub use network::guess_network;

use anyhow::Result;
use baseline_core::Error;
use ingest::{build_run_meta, sort_newest_first, KeyFileRole, KeyFiles};
use json_store::{JsonIndex, Repository};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub key_file_count: usize,
    pub has_ports_scan: bool,
    pub has_hosts_up: bool,
    pub has_discovery: bool,
}

fn deterministic_default() -> bool {
    true
}

/// A registered run. Written once; only ever removed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunManifest {
    pub run_uid: String,
    pub network: String,
    pub run_folder: PathBuf,
    pub folder_name: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    pub run_type: String,
    pub key_files: KeyFiles,
    pub content_hash: String,
    pub stats: RunStats,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub extraction_id: String,
    #[serde(default = "deterministic_default")]
    pub deterministic_uid: bool,
}

impl RunManifest {
    /// Build a manifest for a run folder on disk without registering it.
    ///
    /// An explicit non-empty `network` wins over the one guessed from the path.
    pub fn create(run_folder: &Path, extraction_id: &str, network: Option<&str>) -> Self {
        let meta = build_run_meta(run_folder);
        let folder_name = meta.run_folder.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let all_files: Vec<PathBuf> = meta.key_files.values().flatten().cloned().collect();
        let content_hash = content_hash(&all_files);

        let network = match network.map(str::trim) {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => guess_network(&meta.run_folder),
        };
        let uid = run_uid(&network, meta.timestamp, &meta.run_type, &content_hash);

        RunManifest {
            run_uid: uid.uid,
            network,
            folder_name,
            timestamp: meta.timestamp,
            run_type: meta.run_type,
            content_hash,
            stats: RunStats {
                key_file_count: all_files.len(),
                has_ports_scan: meta.key_files.contains_key(&KeyFileRole::Ports),
                has_hosts_up: meta.key_files.contains_key(&KeyFileRole::HostsUp),
                has_discovery: meta.key_files.contains_key(&KeyFileRole::Discovery),
            },
            key_files: meta.key_files,
            run_folder: meta.run_folder,
            created_at: OffsetDateTime::now_utc(),
            extraction_id: extraction_id.to_string(),
            deterministic_uid: uid.deterministic,
        }
    }

    pub fn files(&self, role: KeyFileRole) -> &[PathBuf] {
        self.key_files.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The port scan report in XML form, if the run has one.
    pub fn ports_xml(&self) -> Option<&Path> {
        self.files(KeyFileRole::Ports)
            .iter()
            .find(|p| p.extension().map_or(false, |e| e == "xml"))
            .map(PathBuf::as_path)
    }

    pub fn hosts_up_file(&self) -> Option<&Path> {
        self.files(KeyFileRole::HostsUp).first().map(PathBuf::as_path)
    }
}

/// Outcome of `register_run`: the stored manifest and whether it was just added.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub manifest: RunManifest,
    pub is_new: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub total_runs: usize,
    pub networks: usize,
    #[serde(with = "time::serde::rfc3339::option")]
    pub oldest_run: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub newest_run: Option<OffsetDateTime>,
}

/// Runs stored under `<data_dir>/runs`: `index.json` plus `<runUid>.json` each.
#[derive(Clone)]
pub struct RunRegistry {
    index: JsonIndex<RunManifest>,
}

impl RunRegistry {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let index = JsonIndex::open_or_create(data_dir.join("runs"), "runs")?.with_entry_files();
        Ok(RunRegistry { index })
    }

    pub fn dir(&self) -> &Path {
        self.index.dir()
    }

    /// Register a run folder, or return the run already holding identical key files.
    pub fn register_run(&self, run_folder: &Path, extraction_id: &str, network: Option<&str>) -> Result<Registration> {
        let manifest = RunManifest::create(run_folder, extraction_id, network);
        let registration = self.index.update(|runs| {
            if !manifest.content_hash.is_empty() {
                if let Some(existing) = runs.values().find(|m| m.content_hash == manifest.content_hash) {
                    return Ok(Registration { manifest: existing.clone(), is_new: false });
                }
            }
            runs.insert(manifest.run_uid.clone(), manifest.clone());
            Ok(Registration { manifest, is_new: true })
        })?;

        let m = &registration.manifest;
        if registration.is_new {
            info!(run_uid = %m.run_uid, network = %m.network, files = m.stats.key_file_count, "registered run");
        } else {
            debug!(run_uid = %m.run_uid, folder = %run_folder.display(), "duplicate content, keeping existing run");
        }
        Ok(registration)
    }

    pub fn get(&self, run_uid: &str) -> Option<RunManifest> {
        self.index.get(run_uid)
    }

    /// Like `get`, failing with `RunNotFound`.
    pub fn require(&self, run_uid: &str) -> Result<RunManifest, Error> {
        self.get(run_uid).ok_or_else(|| Error::RunNotFound(run_uid.to_string()))
    }

    /// Every run, newest first; runs without a timestamp last.
    pub fn list(&self) -> Vec<RunManifest> {
        let mut runs = self.index.list();
        sort_newest_first(&mut runs, |m| m.timestamp);
        runs
    }

    pub fn list_by_network(&self, network: &str) -> Vec<RunManifest> {
        let wanted = network.to_lowercase();
        self.list().into_iter().filter(|m| m.network.to_lowercase() == wanted).collect()
    }

    /// Distinct network names, sorted.
    pub fn list_networks(&self) -> Vec<String> {
        self.index.list().into_iter().map(|m| m.network).collect::<BTreeSet<_>>().into_iter().collect()
    }

    /// Remove a run and its manifest file. `false` when it was not registered.
    pub fn delete(&self, run_uid: &str) -> Result<bool> {
        let removed = self.index.delete(run_uid)?;
        if removed { info!(run_uid, "deleted run"); }
        Ok(removed)
    }

    pub fn stats(&self) -> RegistryStats {
        let runs = self.index.list();
        let networks = runs.iter().map(|m| m.network.as_str()).collect::<BTreeSet<_>>().len();
        let timestamps: Vec<OffsetDateTime> = runs.iter().filter_map(|m| m.timestamp).collect();
        RegistryStats {
            total_runs: runs.len(),
            networks,
            oldest_run: timestamps.iter().min().copied(),
            newest_run: timestamps.iter().max().copied(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_run(root: &Path, network: &str, name: &str, ports_body: &str) -> PathBuf {
        let run = root.join(network).join("rawscans").join(name);
        fs::create_dir_all(&run).unwrap();
        fs::write(run.join("ports_top200_open.xml"), ports_body).unwrap();
        fs::write(run.join("hosts_up.txt"), "10.0.0.5\n10.0.0.6\n").unwrap();
        run
    }

    #[test]
    fn manifest_describes_folder() {
        let scans = tempfile::tempdir().unwrap();
        let run = make_run(scans.path(), "Batman", "2025-12-31_2044_baselinekit_v0", "<nmaprun/>");
        let m = RunManifest::create(&run, "a1b2c3d4", None);

        assert_eq!(m.network, "batman");
        assert_eq!(m.folder_name, "2025-12-31_2044_baselinekit_v0");
        assert!(m.run_uid.starts_with("batman_2025-12-31T20-44-00_baselinekit-v0_"));
        assert_eq!(&m.run_uid[m.run_uid.len() - 12..], &m.content_hash[..12]);
        assert!(m.deterministic_uid);
        assert_eq!(m.stats, RunStats { key_file_count: 2, has_ports_scan: true, has_hosts_up: true, has_discovery: false });
        assert!(m.ports_xml().unwrap().ends_with("ports_top200_open.xml"));

        let explicit = RunManifest::create(&run, "a1b2c3d4", Some("Gotham"));
        assert_eq!(explicit.network, "Gotham");
        assert!(explicit.run_uid.starts_with("gotham_"));
    }

    #[test]
    fn register_is_idempotent_on_content() {
        let scans = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let reg = RunRegistry::open(data.path()).unwrap();

        let run = make_run(scans.path(), "batman", "2025-12-31_2044_baselinekit_v0", "<nmaprun/>");
        let first = reg.register_run(&run, "a1b2c3d4", None).unwrap();
        assert!(first.is_new);
        assert!(reg.dir().join(format!("{}.json", first.manifest.run_uid)).is_file());

        let again = reg.register_run(&run, "ffffffff", None).unwrap();
        assert!(!again.is_new);
        assert_eq!(again.manifest, first.manifest);

        // same bytes elsewhere, even under another network, is still the same run
        let copy = make_run(scans.path(), "robin", "2025-12-31_2044_baselinekit_v0", "<nmaprun/>");
        let dup = reg.register_run(&copy, "00000000", None).unwrap();
        assert!(!dup.is_new);
        assert_eq!(dup.manifest.run_uid, first.manifest.run_uid);
        assert_eq!(reg.list().len(), 1);
    }

    #[test]
    fn runs_without_key_files_never_dedup() {
        let scans = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let reg = RunRegistry::open(data.path()).unwrap();
        let run = scans.path().join("net").join("rawscans").join("2025-01-01_0000_empty");
        fs::create_dir_all(&run).unwrap();

        let a = reg.register_run(&run, "x", None).unwrap();
        let b = reg.register_run(&run, "x", None).unwrap();
        assert!(a.is_new && b.is_new);
        assert!(!a.manifest.deterministic_uid);
        assert_ne!(a.manifest.run_uid, b.manifest.run_uid);
        assert_eq!(reg.list().len(), 2);
    }

    #[test]
    fn queries_and_delete() {
        let scans = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let reg = RunRegistry::open(data.path()).unwrap();

        let old = reg.register_run(&make_run(scans.path(), "batman", "2025-01-01_0900_kit", "a"), "e1", None).unwrap();
        let new = reg.register_run(&make_run(scans.path(), "batman", "2025-06-01_0900_kit", "b"), "e2", None).unwrap();
        let other = reg.register_run(&make_run(scans.path(), "robin", "2025-03-01_0900_kit", "c"), "e3", None).unwrap();

        let order: Vec<String> = reg.list().into_iter().map(|m| m.run_uid).collect();
        assert_eq!(order, vec![new.manifest.run_uid.clone(), other.manifest.run_uid.clone(), old.manifest.run_uid.clone()]);
        assert_eq!(reg.list_by_network("BATMAN").len(), 2);
        assert_eq!(reg.list_networks(), vec!["batman", "robin"]);

        let stats = reg.stats();
        assert_eq!((stats.total_runs, stats.networks), (3, 2));
        assert_eq!(stats.oldest_run, old.manifest.timestamp);
        assert_eq!(stats.newest_run, new.manifest.timestamp);

        let uid = other.manifest.run_uid;
        assert!(reg.delete(&uid).unwrap());
        assert!(!reg.dir().join(format!("{uid}.json")).exists());
        assert!(reg.get(&uid).is_none());
        assert!(!reg.delete(&uid).unwrap());
        assert!(matches!(reg.require(&uid), Err(Error::RunNotFound(_))));
    }

    #[test]
    fn malformed_index_reads_empty_and_recovers() {
        let scans = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let reg = RunRegistry::open(data.path()).unwrap();
        fs::write(reg.dir().join("index.json"), "{ not json").unwrap();
        assert!(reg.list().is_empty());
        assert_eq!(reg.stats(), RegistryStats::default());

        let run = make_run(scans.path(), "batman", "2025-12-31_2044_kit", "x");
        assert!(reg.register_run(&run, "e", None).unwrap().is_new);
        let doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(reg.dir().join("index.json")).unwrap()).unwrap();
        assert_eq!(doc["version"], 1);
        assert_eq!(doc["runs"].as_object().unwrap().len(), 1);
    }
}
