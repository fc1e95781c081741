use ingest::parse_run_folder_name;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

static DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").expect("date regex"));
static EXTRACTION_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)_[a-f0-9]{8}$").expect("extraction suffix regex"));

const SKIPPED_SEGMENTS: &[&str] = &["rawscans", "extracted", "data"];

fn name_of(p: &Path) -> Option<String> {
    p.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// Infer the network a run folder belongs to from the directory names above it.
pub fn guess_network(run_folder: &Path) -> String {
    // <network>_<date>_<time>_... two levels up, e.g. an extracted archive root
    if let Some(name) = run_folder.parent().and_then(Path::parent).and_then(name_of) {
        let parts: Vec<&str> = name.split('_').collect();
        if parts.len() >= 3 && !parts[0].is_empty() && !DATE_RE.is_match(parts[0]) {
            return parts[0].to_lowercase();
        }
    }

    for ancestor in run_folder.ancestors().skip(1) {
        let Some(segment) = name_of(ancestor) else { continue; };
        if SKIPPED_SEGMENTS.contains(&segment.as_str()) { continue; }
        if parse_run_folder_name(&segment).timestamp.is_some() { continue; }
        if EXTRACTION_SUFFIX_RE.is_match(&segment) {
            let stripped = EXTRACTION_SUFFIX_RE.replace(&segment, "");
            let network = stripped.split('_').next().unwrap_or_default();
            if !network.is_empty() { return network.to_lowercase(); }
        }
        return segment.to_lowercase();
    }
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_root_name_two_levels_up() {
        let p = Path::new("/data/extracted/Batman_2025-12-31_2134_kit_a1b2c3d4/rawscans/2025-12-31_2044_baselinekit_v0");
        assert_eq!(guess_network(p), "batman");
    }

    #[test]
    fn nearest_meaningful_ancestor() {
        let p = Path::new("/data/extracted/upload_a1b2c3d4/Office/rawscans/2025-12-31_2044_baselinekit_v0");
        assert_eq!(guess_network(p), "office");
    }

    #[test]
    fn extraction_suffix_is_stripped() {
        let p = Path::new("/srv/data/extracted/home_DEADBEEF/2025-12-31_2134_x_y/2025-12-31_2044_smoke");
        assert_eq!(guess_network(p), "home");
    }

    #[test]
    fn date_prefixed_root_is_not_a_network() {
        let p = Path::new("/home/ops/2025-12-31_2134_kit/rawscans/2025-12-31_2044_smoke");
        assert_eq!(guess_network(p), "ops");
    }

    #[test]
    fn non_ascii_digit_segment_is_an_ordinary_name() {
        let p = Path::new("/srv/Lab/2025-01-01_०१२३_kit/2025-12-31_2044_smoke");
        assert_eq!(guess_network(p), "2025-01-01_०१२३_kit");
    }

    #[test]
    fn nothing_usable_is_unknown() {
        assert_eq!(guess_network(Path::new("/data/rawscans/2025-12-31_2044_smoke")), "unknown");
        assert_eq!(guess_network(Path::new("2025-12-31_2044_smoke")), "unknown");
    }
}
