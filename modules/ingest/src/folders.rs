use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};
use tracing::debug;
use walkdir::WalkDir;

/// `YYYY-MM-DD_HHMM_<type>`, e.g. `2025-12-31_2044_baselinekit_v0`.
static RUN_FOLDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([0-9]{4}-[0-9]{2}-[0-9]{2})_([0-9]{4})_(.+)$").expect("run folder regex"));

const RAW_SCANS_DIR: &str = "rawscans";
const REPORT_EXTENSIONS: &[&str] = &["xml", "nmap", "gnmap"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunFolderName {
    pub timestamp: Option<OffsetDateTime>,
    pub run_type: String,
}

impl RunFolderName {
    pub fn is_run_folder(&self) -> bool {
        self.timestamp.is_some() || !self.run_type.is_empty()
    }
}

/// Split a run folder name into its timestamp (UTC) and free-form run type.
/// A name that does not follow the convention yields neither.
pub fn parse_run_folder_name(name: &str) -> RunFolderName {
    let Some(caps) = RUN_FOLDER_RE.captures(name) else { return RunFolderName::default(); };
    let date = Date::parse(&caps[1], format_description!("[year]-[month]-[day]")).ok();
    let hm = &caps[2];
    let time = match (hm[..2].parse::<u8>(), hm[2..].parse::<u8>()) {
        (Ok(h), Ok(m)) => Time::from_hms(h, m, 0).ok(),
        _ => None,
    };
    let timestamp = match (date, time) {
        (Some(d), Some(t)) => Some(PrimitiveDateTime::new(d, t).assume_utc()),
        _ => None,
    };
    RunFolderName { timestamp, run_type: caps[3].to_string() }
}

/// Newest first; entries without a timestamp go last, in their original order.
pub fn sort_newest_first<T>(items: &mut [T], timestamp: impl Fn(&T) -> Option<OffsetDateTime>) {
    items.sort_by(|a, b| match (timestamp(a), timestamp(b)) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}

fn dir_name(p: &Path) -> String {
    p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

fn sorted_subdirs(dir: &Path) -> Vec<PathBuf> {
    let Ok(rd) = fs::read_dir(dir) else { return Vec::new(); };
    let mut out: Vec<PathBuf> = rd.filter_map(|e| e.ok()).map(|e| e.path()).filter(|p| p.is_dir()).collect();
    out.sort();
    out
}

fn has_report_file(dir: &Path) -> bool {
    let Ok(rd) = fs::read_dir(dir) else { return false; };
    rd.filter_map(|e| e.ok()).any(|e| {
        let p = e.path();
        p.is_file() && p.extension().and_then(|x| x.to_str()).map_or(false, |x| REPORT_EXTENSIONS.contains(&x))
    })
}

fn walk_dirs(root: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
}

/// Locate run folders under an extracted archive root.
///
/// Children of any `rawscans/` directory win; only when there are none does
/// every convention-named directory holding a scanner report count.
pub fn detect_run_folders(root: &Path) -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    for raw in walk_dirs(root).filter(|p| dir_name(p) == RAW_SCANS_DIR) {
        for child in sorted_subdirs(&raw) {
            if parse_run_folder_name(&dir_name(&child)).is_run_folder() { candidates.push(child); }
        }
    }

    if candidates.is_empty() {
        debug!(root = %root.display(), "no rawscans directory, scanning whole tree");
        candidates = walk_dirs(root)
            .filter(|p| parse_run_folder_name(&dir_name(p)).is_run_folder() && has_report_file(p))
            .collect();
    }

    let mut seen = HashSet::new();
    let mut unique: Vec<PathBuf> = candidates
        .into_iter()
        .map(|p| p.canonicalize().unwrap_or(p))
        .filter(|p| seen.insert(p.clone()))
        .collect();
    sort_newest_first(&mut unique, |p| parse_run_folder_name(&dir_name(p)).timestamp);
    unique
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mkrun(base: &Path, name: &str, report: Option<&str>) -> PathBuf {
        let p = base.join(name);
        fs::create_dir_all(&p).unwrap();
        if let Some(f) = report { fs::write(p.join(f), "x").unwrap(); }
        p
    }

    #[test]
    fn parses_conventional_name() {
        let n = parse_run_folder_name("2025-12-31_2044_baselinekit_v0");
        let ts = n.timestamp.unwrap();
        assert_eq!((ts.year(), u8::from(ts.month()), ts.day(), ts.hour(), ts.minute()), (2025, 12, 31, 20, 44));
        assert_eq!(n.run_type, "baselinekit_v0");
        assert!(n.is_run_folder());
    }

    #[test]
    fn invalid_clock_keeps_type_only() {
        let n = parse_run_folder_name("2025-13-40_2599_smoke");
        assert!(n.timestamp.is_none());
        assert_eq!(n.run_type, "smoke");
        assert!(n.is_run_folder());
    }

    #[test]
    fn non_matching_name() {
        let n = parse_run_folder_name("notes");
        assert_eq!(n, RunFolderName::default());
        assert!(!n.is_run_folder());
    }

    #[test]
    fn non_ascii_digits_do_not_match() {
        assert_eq!(parse_run_folder_name("2025-01-01_०१२३_kit"), RunFolderName::default());
        assert_eq!(parse_run_folder_name("２０２５-01-01_0900_kit"), RunFolderName::default());

        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("home").join("rawscans");
        mkrun(&raw, "2025-01-01_०१२३_kit", None);
        mkrun(&raw, "2025-01-02_0900_kit", None);
        let names: Vec<String> = detect_run_folders(dir.path()).iter().map(|p| dir_name(p)).collect();
        assert_eq!(names, vec!["2025-01-02_0900_kit"]);
    }

    #[test]
    fn rawscans_preferred_and_sorted_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("batman").join("rawscans");
        mkrun(&raw, "2025-01-01_0900_a", None);
        mkrun(&raw, "2025-03-01_0900_b", None);
        mkrun(&raw, "junk", None);
        // outside rawscans: ignored because rawscans exists
        mkrun(dir.path(), "2026-01-01_0000_outside", Some("ports.xml"));

        let found = detect_run_folders(dir.path());
        let names: Vec<String> = found.iter().map(|p| dir_name(p)).collect();
        assert_eq!(names, vec!["2025-03-01_0900_b", "2025-01-01_0900_a"]);
    }

    #[test]
    fn fallback_requires_report_file() {
        let dir = tempfile::tempdir().unwrap();
        mkrun(dir.path(), "2025-01-01_0900_with", Some("scan.gnmap"));
        mkrun(dir.path(), "2025-02-01_0900_without", Some("readme.txt"));
        mkrun(&dir.path().join("nested"), "2024-01-01_0000_deep", Some("p.xml"));

        let names: Vec<String> = detect_run_folders(dir.path()).iter().map(|p| dir_name(p)).collect();
        assert_eq!(names, vec!["2025-01-01_0900_with", "2024-01-01_0000_deep"]);
    }

    #[test]
    fn untimed_runs_sort_last_in_encounter_order() {
        let mut v = vec![
            ("x", None),
            ("old", parse_run_folder_name("2024-01-01_0000_a").timestamp),
            ("y", None),
            ("new", parse_run_folder_name("2025-01-01_0000_a").timestamp),
        ];
        sort_newest_first(&mut v, |e| e.1);
        let order: Vec<&str> = v.iter().map(|e| e.0).collect();
        assert_eq!(order, vec!["new", "old", "x", "y"]);
    }
}
