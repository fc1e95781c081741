use anyhow::{Context, Result};
use baseline_core::Error;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// Largest archive accepted for extraction (500 MiB).
pub const MAX_ARCHIVE_SIZE: u64 = 500 * 1024 * 1024;

/// An extracted archive: `<data_dir>/extracted/<stem>_<extraction_id>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub extraction_id: String,
    pub path: PathBuf,
}

impl Extraction {
    /// Describe a tree that was extracted earlier. The id is the trailing
    /// `_<8 hex>` of the directory name, or the whole name when absent.
    pub fn from_existing(root: &Path) -> Result<Self> {
        let path = root.canonicalize().with_context(|| format!("opening {}", root.display()))?;
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let extraction_id = match name.rsplit_once('_') {
            Some((_, tail)) if is_hex8(tail) => tail.to_string(),
            _ => name,
        };
        Ok(Extraction { extraction_id, path })
    }
}

pub(crate) fn is_hex8(s: &str) -> bool {
    s.len() == 8 && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn new_extraction_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Unpack a ZIP archive into a fresh directory under `data_dir/extracted`.
///
/// Entries whose names would land outside the destination are skipped.
pub fn extract_archive(archive: &Path, data_dir: &Path) -> Result<Extraction> {
    let meta = fs::metadata(archive).with_context(|| format!("reading {}", archive.display()))?;
    if meta.len() > MAX_ARCHIVE_SIZE {
        return Err(Error::InvalidArchive(format!("{} exceeds {} MiB", archive.display(), MAX_ARCHIVE_SIZE / (1024 * 1024))).into());
    }
    let kind = infer::get_from_path(archive)?;
    if kind.map(|k| k.mime_type()) != Some("application/zip") {
        return Err(Error::InvalidArchive(format!("{} does not appear to be a ZIP file", archive.display())).into());
    }

    let stem = archive.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "archive".into());
    let extraction_id = new_extraction_id();
    let dest = data_dir.join("extracted").join(format!("{stem}_{extraction_id}"));
    fs::create_dir_all(&dest).with_context(|| format!("creating {}", dest.display()))?;

    let mut zip = zip::ZipArchive::new(File::open(archive)?)?;
    let mut written = 0usize;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(rel) = entry.enclosed_name() else {
            warn!(entry = entry.name(), "skipping archive entry outside destination");
            continue;
        };
        let out = dest.join(rel);
        if entry.is_dir() {
            fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() { fs::create_dir_all(parent)?; }
        let mut f = File::create(&out).with_context(|| format!("creating {}", out.display()))?;
        io::copy(&mut entry, &mut f)?;
        written += 1;
    }
    info!(archive = %archive.display(), dest = %dest.display(), files = written, "archive extracted");

    Ok(Extraction { extraction_id, path: dest.canonicalize()? })
}
