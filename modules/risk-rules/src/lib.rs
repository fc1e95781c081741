//! User-defined risk rules: per-network or global overrides of the static port table.

mod resolve;

pub use resolve::{GlobalScope, NetworkScope, Resolved, RiskQuery, RiskResolver, RiskSource, RuleSet, StaticDefault, RESOLVERS};

use anyhow::Result;
use baseline_core::{Error, Protocol, RiskLevel};
use json_store::{JsonIndex, Repository};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use time::OffsetDateTime;
use tracing::info;

/// Network name of rules that apply everywhere.
pub const GLOBAL_NETWORK: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Replace the static level with the rule's own.
    Override,
    /// Drop the port from risk accounting.
    Whitelist,
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleAction::Override => "override",
            RuleAction::Whitelist => "whitelist",
        }
    }
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "override" => Ok(RuleAction::Override),
            "whitelist" => Ok(RuleAction::Whitelist),
            other => Err(Error::InvalidRule(format!("action must be 'override' or 'whitelist', got '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomRiskRule {
    pub rule_id: String,
    pub port: u16,
    pub protocol: Protocol,
    pub network: String,
    pub action: RuleAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_risk: Option<RiskLevel>,
    pub reason: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl CustomRiskRule {
    pub fn is_global(&self) -> bool {
        self.network == GLOBAL_NETWORK
    }

    /// Same port and protocol, network compared case-insensitively.
    pub fn matches(&self, port: u16, protocol: &str, network: &str) -> bool {
        self.port == port && self.protocol.as_str().eq_ignore_ascii_case(protocol) && self.network.eq_ignore_ascii_case(network)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRule {
    pub port: u16,
    pub protocol: Protocol,
    pub network: String,
    pub action: RuleAction,
    #[serde(default)]
    pub custom_risk: Option<RiskLevel>,
    pub reason: String,
}

impl NewRule {
    pub fn validate(&self) -> Result<(), Error> {
        if self.port == 0 { return Err(Error::InvalidRule("port must be between 1 and 65535".into())); }
        if self.network.trim().is_empty() { return Err(Error::InvalidRule("network is required".into())); }
        if self.reason.trim().is_empty() { return Err(Error::InvalidRule("reason is required".into())); }
        if self.action == RuleAction::Override && self.custom_risk.is_none() {
            return Err(Error::InvalidRule("customRisk is required when action is 'override'".into()));
        }
        Ok(())
    }
}

/// Partial update; `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleUpdate {
    pub action: Option<RuleAction>,
    pub custom_risk: Option<RiskLevel>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesStats {
    pub total_rules: usize,
    pub global_rules: usize,
    pub network_rules: usize,
    pub networks: Vec<String>,
}

/// `<network>_<port>_<protocol>_<8 hex>`; the network keeps `[a-z0-9-]` only.
pub fn generate_rule_id(port: u16, protocol: Protocol, network: &str) -> String {
    let seed = format!("{network}_{port}_{protocol}_{}", OffsetDateTime::now_utc().unix_timestamp_nanos());
    let digest = hex::encode(Sha256::digest(seed.as_bytes()));
    let safe: String = network
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' { c } else { '-' })
        .collect();
    format!("{safe}_{port}_{protocol}_{}", &digest[..8])
}

/// Global rules first, then network name, then port.
fn sort_rules(rules: &mut [CustomRiskRule]) {
    rules.sort_by(|a, b| {
        (!a.is_global(), &a.network, a.port).cmp(&(!b.is_global(), &b.network, b.port))
    });
}

/// Rules stored in `<data_dir>/rules/index.json`.
#[derive(Clone)]
pub struct RulesRegistry {
    index: JsonIndex<CustomRiskRule>,
}

impl RulesRegistry {
    pub fn open(data_dir: &Path) -> Result<Self> {
        Ok(RulesRegistry { index: JsonIndex::open_or_create(data_dir.join("rules"), "rules")? })
    }

    pub fn create_rule(&self, req: NewRule) -> Result<CustomRiskRule> {
        req.validate()?;
        let network = req.network.trim().to_string();
        let rule = self.index.update(|rules| {
            if rules.values().any(|r| r.matches(req.port, req.protocol.as_str(), &network)) {
                return Err(Error::DuplicateRule { port: req.port, protocol: req.protocol.to_string(), network: network.clone() }.into());
            }
            let rule = CustomRiskRule {
                rule_id: generate_rule_id(req.port, req.protocol, &network),
                port: req.port,
                protocol: req.protocol,
                network: network.clone(),
                action: req.action,
                custom_risk: if req.action == RuleAction::Override { req.custom_risk } else { None },
                reason: req.reason.trim().to_string(),
                created_at: OffsetDateTime::now_utc(),
            };
            rules.insert(rule.rule_id.clone(), rule.clone());
            Ok(rule)
        })?;
        info!(rule_id = %rule.rule_id, action = %rule.action, network = %rule.network, "created rule");
        Ok(rule)
    }

    pub fn find_rule(&self, port: u16, protocol: Protocol, network: &str) -> Option<CustomRiskRule> {
        self.index.find(|r| r.matches(port, protocol.as_str(), network))
    }

    pub fn get_rule(&self, rule_id: &str) -> Option<CustomRiskRule> {
        self.index.get(rule_id)
    }

    /// All rules, or those for `network` plus the global ones.
    pub fn list_rules(&self, network: Option<&str>) -> Vec<CustomRiskRule> {
        let mut rules: Vec<CustomRiskRule> = match network {
            Some(n) => self.index.list().into_iter().filter(|r| r.is_global() || r.network.eq_ignore_ascii_case(n)).collect(),
            None => self.index.list(),
        };
        sort_rules(&mut rules);
        rules
    }

    pub fn update_rule(&self, rule_id: &str, changes: RuleUpdate) -> Result<CustomRiskRule> {
        let rule = self.index.update(|rules| {
            let Some(rule) = rules.get_mut(rule_id) else {
                return Err(Error::RuleNotFound(rule_id.to_string()).into());
            };
            if let Some(action) = changes.action { rule.action = action; }
            if let Some(risk) = changes.custom_risk { rule.custom_risk = Some(risk); }
            if let Some(reason) = changes.reason {
                if reason.trim().is_empty() { return Err(Error::InvalidRule("reason is required".into()).into()); }
                rule.reason = reason.trim().to_string();
            }
            match rule.action {
                RuleAction::Whitelist => rule.custom_risk = None,
                RuleAction::Override if rule.custom_risk.is_none() => {
                    return Err(Error::InvalidRule("customRisk is required when action is 'override'".into()).into());
                }
                RuleAction::Override => {}
            }
            Ok(rule.clone())
        })?;
        info!(rule_id, action = %rule.action, "updated rule");
        Ok(rule)
    }

    pub fn delete_rule(&self, rule_id: &str) -> Result<bool> {
        let removed = self.index.delete(rule_id)?;
        if removed { info!(rule_id, "deleted rule"); }
        Ok(removed)
    }

    /// Distinct network names having rules, `*` included, sorted.
    pub fn list_rule_networks(&self) -> Vec<String> {
        self.index.list().into_iter().map(|r| r.network).collect::<BTreeSet<_>>().into_iter().collect()
    }

    pub fn stats(&self) -> RulesStats {
        let rules = self.index.list();
        let global_rules = rules.iter().filter(|r| r.is_global()).count();
        let networks: BTreeSet<String> = rules.iter().filter(|r| !r.is_global()).map(|r| r.network.clone()).collect();
        RulesStats { total_rules: rules.len(), global_rules, network_rules: rules.len() - global_rules, networks: networks.into_iter().collect() }
    }

    /// Load every rule once for resolving many ports.
    pub fn snapshot(&self) -> RuleSet {
        RuleSet::new(self.index.list())
    }

    pub fn resolve(&self, port: u16, protocol: &str, network: &str) -> Resolved {
        self.snapshot().resolve(port, protocol, network)
    }
}
