use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "baseline.yaml";

#[derive(Debug, Default, Deserialize, Clone)]
pub struct StorageConfig {
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct ParseConfig {
    pub top: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct IngestConfig {
    pub network: Option<String>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct OutputConfig {
    pub format: Option<String>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct Config {
    pub storage: Option<StorageConfig>,
    pub parse: Option<ParseConfig>,
    pub ingest: Option<IngestConfig>,
    pub output: Option<OutputConfig>,
    pub log_level: Option<String>,
}

impl Config {
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.storage.as_ref().and_then(|s| s.data_dir.clone())
    }

    pub fn top(&self) -> Option<usize> {
        self.parse.as_ref().and_then(|p| p.top)
    }

    pub fn network(&self) -> Option<String> {
        self.ingest.as_ref().and_then(|i| i.network.clone())
    }

    pub fn format(&self) -> Option<&str> {
        self.output.as_ref().and_then(|o| o.format.as_deref())
    }
}

/// Load `path`, or `./baseline.yaml` when no path is given and it exists.
/// An explicitly named file that cannot be read or parsed is an error.
pub fn load_config(path: Option<&Path>) -> Result<Option<Config>> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG_FILE);
            if p.exists() { p.to_path_buf() } else { return Ok(None); }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("reading config {}", path.display()))?;
    let cfg = serde_yaml::from_str(&s).with_context(|| format!("parsing config {}", path.display()))?;
    Ok(Some(cfg))
}
