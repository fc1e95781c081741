//! Effective risk resolution: an ordered chain of resolvers, first answer wins.

use crate::{CustomRiskRule, RuleAction, GLOBAL_NETWORK};
use baseline_core::{default_risk, RiskLevel};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskSource {
    NetworkRule,
    GlobalRule,
    Default,
}

/// Resolved risk for one port on one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolved {
    pub level: Option<RiskLevel>,
    pub source: RiskSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

impl Resolved {
    /// A rule removed the port from risk accounting.
    pub fn is_suppressed(&self) -> bool {
        self.level.is_none() && self.source != RiskSource::Default
    }
}

pub struct RiskQuery<'a> {
    pub port: u16,
    pub protocol: &'a str,
    pub network: &'a str,
    pub default: Option<RiskLevel>,
}

pub trait RiskResolver {
    /// `None` passes the query on to the next resolver.
    fn resolve(&self, rules: &[CustomRiskRule], query: &RiskQuery<'_>) -> Option<Resolved>;
}

fn from_rule(rule: &CustomRiskRule, source: RiskSource) -> Resolved {
    let level = match rule.action {
        RuleAction::Whitelist => None,
        RuleAction::Override => rule.custom_risk,
    };
    Resolved { level, source, rule_id: Some(rule.rule_id.clone()) }
}

fn scoped(rules: &[CustomRiskRule], query: &RiskQuery<'_>, network: &str, source: RiskSource) -> Option<Resolved> {
    rules.iter().find(|r| r.matches(query.port, query.protocol, network)).map(|r| from_rule(r, source))
}

pub struct NetworkScope;

impl RiskResolver for NetworkScope {
    fn resolve(&self, rules: &[CustomRiskRule], query: &RiskQuery<'_>) -> Option<Resolved> {
        scoped(rules, query, query.network, RiskSource::NetworkRule)
    }
}

pub struct GlobalScope;

impl RiskResolver for GlobalScope {
    fn resolve(&self, rules: &[CustomRiskRule], query: &RiskQuery<'_>) -> Option<Resolved> {
        scoped(rules, query, GLOBAL_NETWORK, RiskSource::GlobalRule)
    }
}

pub struct StaticDefault;

impl RiskResolver for StaticDefault {
    fn resolve(&self, _rules: &[CustomRiskRule], query: &RiskQuery<'_>) -> Option<Resolved> {
        Some(Resolved { level: query.default, source: RiskSource::Default, rule_id: None })
    }
}

/// Most specific first.
pub const RESOLVERS: &[&(dyn RiskResolver + Sync)] = &[&NetworkScope, &GlobalScope, &StaticDefault];

/// A point-in-time copy of the rule registry used for bulk resolution.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CustomRiskRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<CustomRiskRule>) -> Self {
        RuleSet { rules }
    }

    pub fn resolve_with_default(&self, port: u16, protocol: &str, network: &str, default: Option<RiskLevel>) -> Resolved {
        let query = RiskQuery { port, protocol, network, default };
        RESOLVERS
            .iter()
            .find_map(|r| r.resolve(&self.rules, &query))
            .unwrap_or(Resolved { level: default, source: RiskSource::Default, rule_id: None })
    }

    /// Resolve against the static port table as the fallback.
    pub fn resolve(&self, port: u16, protocol: &str, network: &str) -> Resolved {
        self.resolve_with_default(port, protocol, network, default_risk(port))
    }

    pub fn effective_risk(&self, port: u16, protocol: &str, network: &str) -> Option<RiskLevel> {
        self.resolve(port, protocol, network).level
    }
}
