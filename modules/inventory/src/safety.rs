use std::path::{Component, Path, PathBuf};

const MAX_NETWORK_NAME: usize = 120;

/// A user-supplied network name that is safe to use as one directory segment.
///
/// Spaces and punctuation are allowed; separators, NUL and `..` are not.
pub fn sanitize_network_name(network: &str) -> Option<String> {
    let name = network.trim();
    if name.is_empty() || name.chars().count() > MAX_NETWORK_NAME { return None; }
    if name.contains('\0') || name.contains("..") || name == "." { return None; }
    if name.contains(|c: char| c == '/' || c == '\\') { return None; }
    Some(name.to_string())
}

/// `base.join(segment)` if it stays strictly below `base`, checked lexically.
pub fn resolve_within(base: &Path, segment: &str) -> Option<PathBuf> {
    let mut components = Path::new(segment).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Some(base.join(segment)),
        _ => None,
    }
}
