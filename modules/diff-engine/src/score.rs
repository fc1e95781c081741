use crate::diff::Changes;
use baseline_core::RiskLevel;
use serde::Serialize;

/// 0..=100, higher is better.
///
/// Each P0 exposure costs 15, each P1 opening 5, each new host 3, and every
/// opened port 1 up to a cap of 10.
pub fn risk_score(changes: &Changes) -> u8 {
    let p1_opened = changes.ports_opened.iter().filter(|p| p.risk == Some(RiskLevel::P1)).count() as i64;
    let score = 100
        - 15 * changes.risky_exposures.len() as i64
        - 5 * p1_opened
        - 3 * changes.new_hosts.len() as i64
        - changes.ports_opened.len().min(10) as i64;
    score.clamp(0, 100) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScoreBand {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl ScoreBand {
    pub fn from_score(score: u8) -> Self {
        match score {
            90.. => ScoreBand::Excellent,
            70..=89 => ScoreBand::Good,
            50..=69 => ScoreBand::Fair,
            30..=49 => ScoreBand::Poor,
            _ => ScoreBand::Critical,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ScoreBand::Excellent => "Excellent",
            ScoreBand::Good => "Good",
            ScoreBand::Fair => "Fair",
            ScoreBand::Poor => "Poor",
            ScoreBand::Critical => "Critical",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            ScoreBand::Excellent => "green",
            ScoreBand::Good => "blue",
            ScoreBand::Fair => "yellow",
            ScoreBand::Poor => "orange",
            ScoreBand::Critical => "red",
        }
    }
}
