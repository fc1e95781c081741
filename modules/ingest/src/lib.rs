//! Archive ingestion: extract scan archives, find run folders and their key files.

mod archive;
mod folders;
mod key_files;

pub use archive::{extract_archive, Extraction, MAX_ARCHIVE_SIZE};
pub use folders::{detect_run_folders, parse_run_folder_name, sort_newest_first, RunFolderName};
pub use key_files::{find_key_files, KeyFileRole, KeyFiles};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// A run folder as found on disk, before registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMeta {
    pub run_folder: PathBuf,
    #[serde(with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    pub run_type: String,
    pub key_files: KeyFiles,
}

/// Describe one run folder: timestamp and type from its name, key files from its contents.
pub fn build_run_meta(run_folder: &Path) -> RunMeta {
    let name = run_folder.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let parsed = parse_run_folder_name(&name);
    RunMeta {
        run_folder: run_folder.canonicalize().unwrap_or_else(|_| run_folder.to_path_buf()),
        timestamp: parsed.timestamp,
        run_type: parsed.run_type,
        key_files: find_key_files(run_folder),
    }
}

/// Extract an archive under `data_dir` and describe every run folder inside it.
pub fn ingest_archive(archive: &Path, data_dir: &Path) -> Result<(Extraction, Vec<RunMeta>)> {
    let extraction = extract_archive(archive, data_dir)?;
    let runs = detect_run_folders(&extraction.path).iter().map(|p| build_run_meta(p)).collect();
    Ok((extraction, runs))
}
