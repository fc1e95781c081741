pub const STABLE_SUMMARY: &str = "No significant changes detected between scans. Network baseline is stable.";

fn plural(n: usize, word: &str) -> String {
    if n == 1 { format!("{n} {word}") } else { format!("{n} {word}s") }
}

fn counts(items: &[(usize, &str)]) -> String {
    items.iter().filter(|(n, _)| *n > 0).map(|(n, what)| format!("{n} {what}")).collect::<Vec<_>>().join(", ")
}

/// One sentence per kind of change, in severity order.
pub fn diff_summary(new_hosts: usize, removed_hosts: usize, opened: usize, closed: usize, risky: usize) -> String {
    let mut parts = Vec::new();
    if risky > 0 {
        parts.push(format!("{} detected requiring immediate action.", plural(risky, "critical exposure")));
    }
    if new_hosts > 0 || removed_hosts > 0 {
        parts.push(format!("Host changes: {}.", counts(&[(new_hosts, "new"), (removed_hosts, "removed")])));
    }
    if opened > 0 || closed > 0 {
        parts.push(format!("Port changes: {}.", counts(&[(opened, "opened"), (closed, "closed")])));
    }
    if parts.is_empty() { return STABLE_SUMMARY.to_string(); }
    parts.join(" ")
}
