//! Run-to-run exposure diffs, risk scoring and per-run scorecards.

mod diff;
mod score;
mod scorecard;
mod summary;

pub use diff::{
    compute_diff, diff_findings, ports_report, try_compute_diff, Changes, DiffData, HostChange, HostChangeType, PortChange,
    PortChangeType,
};
pub use score::{risk_score, ScoreBand};
pub use scorecard::{
    aggregate_risk_ports, build_scorecard, generate_actions, scorecard_from_findings, scorecard_summary, Scorecard,
    SCORECARD_TOP_N,
};
pub use summary::{diff_summary, STABLE_SUMMARY};
