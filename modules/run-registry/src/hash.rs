use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tracing::warn;
use uuid::Uuid;

static NON_UID_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("uid regex"));

const UID_MAX_PART: usize = 32;
const UID_HASH_LEN: usize = 12;

pub fn hash_file(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut sha = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 { break; }
        sha.update(&buf[..n]);
    }
    Ok(hex::encode(sha.finalize()))
}

/// Combined digest of a run's key files: per-file SHA-256 in sorted path
/// order, joined with `:` and hashed again. Empty when no file could be read.
pub fn content_hash(paths: &[PathBuf]) -> String {
    let mut sorted: Vec<&PathBuf> = paths.iter().collect();
    sorted.sort();

    let mut digests = Vec::new();
    for p in sorted {
        if !p.is_file() { continue; }
        match hash_file(p) {
            Ok(d) => digests.push(d),
            Err(e) => warn!(path = %p.display(), error = %e, "cannot hash key file"),
        }
    }
    if digests.is_empty() { return String::new(); }
    hex::encode(Sha256::digest(digests.join(":").as_bytes()))
}

/// Lowercase, runs of anything outside `[a-z0-9]` become one `-`, trimmed,
/// at most 32 characters.
pub fn sanitize_for_uid(s: &str) -> String {
    let lowered = s.to_lowercase();
    let replaced = NON_UID_CHARS.replace_all(&lowered, "-");
    replaced.trim_matches('-').chars().take(UID_MAX_PART).collect()
}

fn uid_timestamp(ts: OffsetDateTime) -> String {
    ts.to_offset(UtcOffset::UTC)
        .format(format_description!("[year]-[month]-[day]T[hour]-[minute]-[second]"))
        .unwrap_or_else(|_| "notime".to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunUid {
    pub uid: String,
    /// False when no content hash existed and random characters were used.
    pub deterministic: bool,
}

/// `<network>_<YYYY-MM-DDTHH-MM-SS|notime>_<runType>_<12 hash chars>`.
pub fn run_uid(network: &str, timestamp: Option<OffsetDateTime>, run_type: &str, content_hash: &str) -> RunUid {
    let network = if network.is_empty() { "unknown" } else { network };
    let run_type = if run_type.is_empty() { "unknown" } else { run_type };
    let ts = timestamp.map(uid_timestamp).unwrap_or_else(|| "notime".to_string());

    let (suffix, deterministic) = if content_hash.is_empty() {
        (Uuid::new_v4().simple().to_string()[..UID_HASH_LEN].to_string(), false)
    } else {
        (content_hash.chars().take(UID_HASH_LEN).collect(), true)
    };
    RunUid { uid: format!("{}_{}_{}_{}", sanitize_for_uid(network), ts, sanitize_for_uid(run_type), suffix), deterministic }
}
