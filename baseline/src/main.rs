use anyhow::{anyhow, Result};
use baseline_core::{service_name, Protocol, RiskLevel};
use clap::{Parser, Subcommand, ValueEnum};
use diff_engine::{build_scorecard, try_compute_diff, ScoreBand};
use ingest::{detect_run_folders, ingest_archive, Extraction};
use inventory::{DeviceFields, InventoryDevice, InventoryRegistry};
use risk_rules::{NewRule, RiskSource, RuleAction, RuleUpdate, RulesRegistry, GLOBAL_NETWORK};
use run_registry::{RunManifest, RunRegistry};
use serde::Serialize;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;

const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_LOG_LEVEL: &str = "warn";

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat { Text, Json, Jsonl }

impl OutputFormat {
    fn from_config(s: &str) -> Self {
        match s { "json" => OutputFormat::Json, "jsonl" => OutputFormat::Jsonl, _ => OutputFormat::Text }
    }
}

#[derive(Debug, Parser)]
#[command(name = "baseline", version, about = "Scan run registry, exposure diffs and scorecards")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./baseline.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Storage root for extracted archives, runs, rules and inventory (default: ./data)
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,
    /// Output format: text, json, or jsonl
    #[arg(long, global = true, value_enum)]
    format: Option<OutputFormat>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Extract a scan archive (or use an already extracted tree) and register its runs
    Ingest {
        /// ZIP archive of scan output
        #[arg(required_unless_present = "dir", conflicts_with = "dir")]
        archive: Option<PathBuf>,
        /// Previously extracted archive root
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
        /// Network label for every run (default: guessed from folder names)
        #[arg(long)]
        network: Option<String>,
    },
    /// Inspect and manage registered runs
    Runs {
        #[command(subcommand)]
        cmd: RunsCmd,
    },
    /// Parse nmap XML reports and rank open ports
    Parse {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Number of top ports to show (default 25)
        #[arg(long)]
        top: Option<usize>,
    },
    /// Manage custom risk rules
    Rules {
        #[command(subcommand)]
        cmd: RulesCmd,
    },
    /// Compare two runs: host and port changes, risk score
    Diff {
        baseline: String,
        current: String,
    },
    /// Exposure overview of one run
    Scorecard {
        run_uid: String,
    },
    /// Per-network device inventory used to tell expected hosts from unknown ones
    Inventory {
        #[command(subcommand)]
        cmd: InventoryCmd,
    },
}

#[derive(Debug, Subcommand)]
enum InventoryCmd {
    /// Import a CSV export (router DHCP table, spreadsheet) into a network
    Import {
        csv: PathBuf,
        #[arg(long)]
        network: String,
    },
    /// List a network's devices
    List { network: String },
    /// Add one device by hand
    Add {
        network: String,
        #[arg(long)]
        ip: Option<String>,
        #[arg(long)]
        mac: Option<String>,
        /// Friendly name
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        vendor: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Check whether an IP or MAC is inventoried
    Check {
        network: String,
        #[arg(long, required_unless_present = "mac")]
        ip: Option<String>,
        #[arg(long)]
        mac: Option<String>,
    },
    /// Networks with an inventory
    Networks,
}

#[derive(Debug, Subcommand)]
enum RunsCmd {
    /// List runs, newest first
    List {
        #[arg(long)]
        network: Option<String>,
    },
    /// Show one run manifest
    Show { run_uid: String },
    /// Remove a run from the registry
    Delete { run_uid: String },
    /// Registry totals
    Stats,
    /// Distinct network names
    Networks,
}

#[derive(Debug, Subcommand)]
enum RulesCmd {
    /// Create a rule for a port on a network ("*" for every network)
    Add {
        #[arg(long)]
        port: u16,
        #[arg(long, default_value = "tcp")]
        protocol: Protocol,
        #[arg(long, default_value = GLOBAL_NETWORK)]
        network: String,
        /// override or whitelist
        #[arg(long)]
        action: RuleAction,
        /// Level for override rules: P0, P1 or P2
        #[arg(long)]
        risk: Option<RiskLevel>,
        #[arg(long)]
        reason: String,
    },
    /// List rules; with --network, that network's rules plus global ones
    List {
        #[arg(long)]
        network: Option<String>,
    },
    /// Change a rule's action, level or reason
    Update {
        rule_id: String,
        #[arg(long)]
        action: Option<RuleAction>,
        #[arg(long)]
        risk: Option<RiskLevel>,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Remove a rule
    Delete { rule_id: String },
    /// Show the effective risk of a port on a network
    Resolve {
        #[arg(long)]
        port: u16,
        #[arg(long, default_value = "tcp")]
        protocol: Protocol,
        #[arg(long)]
        network: String,
    },
    /// Rule totals
    Stats,
    /// Networks that have rules
    Networks,
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// `json` prints one array, `jsonl` one line per item.
fn print_items<T: Serialize>(items: &[T], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Jsonl => {
            for item in items { print_json(item)?; }
            Ok(())
        }
        _ => print_json(&items),
    }
}

fn fmt_ts(ts: Option<OffsetDateTime>) -> String {
    ts.and_then(|t| t.format(&Rfc3339).ok()).unwrap_or_else(|| "notime".to_string())
}

fn service_or_name(service: &str, port: u16) -> String {
    if !service.is_empty() { return service.to_string(); }
    service_name(port).map(|s| s.to_lowercase()).unwrap_or_else(|| "unknown".to_string())
}

fn print_run_line(m: &RunManifest) {
    println!("{}  {}  {}  {}  ({} key files)", m.run_uid, m.network, fmt_ts(m.timestamp), m.run_type, m.stats.key_file_count);
}

fn cmd_ingest(data_dir: &Path, archive: Option<PathBuf>, dir: Option<PathBuf>, network: Option<String>, format: OutputFormat) -> Result<()> {
    let (extraction, run_folders) = match (archive, dir) {
        (Some(zip), _) => {
            let (ex, metas) = ingest_archive(&zip, data_dir)?;
            (ex, metas.into_iter().map(|m| m.run_folder).collect::<Vec<_>>())
        }
        (None, Some(root)) => {
            let ex = Extraction::from_existing(&root)?;
            let folders = detect_run_folders(&ex.path);
            (ex, folders)
        }
        (None, None) => return Err(anyhow!("provide an archive or --dir <extracted-root>")),
    };
    if run_folders.is_empty() { return Err(anyhow!("no run folders found under {}", extraction.path.display())); }

    let runs = RunRegistry::open(data_dir)?;
    let mut registrations = Vec::new();
    for folder in &run_folders {
        registrations.push(runs.register_run(folder, &extraction.extraction_id, network.as_deref())?);
    }
    let added = registrations.iter().filter(|r| r.is_new).count();
    info!(extraction_id = %extraction.extraction_id, added, duplicates = registrations.len() - added, "ingest finished");

    match format {
        OutputFormat::Text => {
            println!("extracted {} (id {})", extraction.path.display(), extraction.extraction_id);
            for r in &registrations {
                let m = &r.manifest;
                let tag = if r.is_new { "new      " } else { "duplicate" };
                println!("{} {}  network={}  files={}", tag, m.run_uid, m.network, m.stats.key_file_count);
                if !m.deterministic_uid { println!("          (no key files hashed, uid is random)"); }
            }
            println!("registered {} new, {} duplicate", added, registrations.len() - added);
        }
        OutputFormat::Json => print_json(&serde_json::json!({
            "extractionId": extraction.extraction_id,
            "extractedPath": extraction.path,
            "runs": registrations,
        }))?,
        OutputFormat::Jsonl => print_items(&registrations, format)?,
    }
    Ok(())
}

fn cmd_runs(data_dir: &Path, cmd: RunsCmd, format: OutputFormat) -> Result<()> {
    let runs = RunRegistry::open(data_dir)?;
    match cmd {
        RunsCmd::List { network } => {
            let list = match network.as_deref() {
                Some(n) => runs.list_by_network(n),
                None => runs.list(),
            };
            match format {
                OutputFormat::Text => {
                    if list.is_empty() { println!("no runs registered"); }
                    for m in &list { print_run_line(m); }
                }
                _ => print_items(&list, format)?,
            }
        }
        RunsCmd::Show { run_uid } => {
            let m = runs.require(&run_uid)?;
            match format {
                OutputFormat::Text => {
                    print_run_line(&m);
                    println!("folder: {}", m.run_folder.display());
                    println!("content hash: {}", m.content_hash);
                    println!("extraction: {}  created: {}", m.extraction_id, fmt_ts(Some(m.created_at)));
                    for (role, files) in &m.key_files {
                        for f in files { println!("  {:<15} {}", role.as_str(), f.display()); }
                    }
                }
                _ => print_json(&m)?,
            }
        }
        RunsCmd::Delete { run_uid } => {
            let deleted = runs.delete(&run_uid)?;
            if !deleted { return Err(baseline_core::Error::RunNotFound(run_uid).into()); }
            match format {
                OutputFormat::Text => println!("deleted {}", run_uid),
                _ => print_json(&serde_json::json!({ "runUid": run_uid, "deleted": true }))?,
            }
        }
        RunsCmd::Stats => {
            let s = runs.stats();
            match format {
                OutputFormat::Text => {
                    println!("runs: {}  networks: {}", s.total_runs, s.networks);
                    println!("oldest: {}  newest: {}", fmt_ts(s.oldest_run), fmt_ts(s.newest_run));
                }
                _ => print_json(&s)?,
            }
        }
        RunsCmd::Networks => {
            let networks = runs.list_networks();
            match format {
                OutputFormat::Text => {
                    for n in &networks { println!("{}", n); }
                }
                _ => print_items(&networks, format)?,
            }
        }
    }
    Ok(())
}

fn cmd_parse(files: &[PathBuf], top: usize, format: OutputFormat) -> Result<()> {
    let scan = nmap_parse::parse_many(files, top);
    match format {
        OutputFormat::Text => {
            let open = scan.ports.iter().filter(|f| f.is_open()).count();
            println!("{} findings ({} open) from {} report(s)", scan.ports.len(), open, files.len());
            for t in &scan.top_ports {
                println!("  {:>5}/{:<3} {:<20} {} hosts", t.port, t.protocol, service_or_name(&t.service, t.port), t.hosts_affected);
            }
        }
        OutputFormat::Json => print_json(&scan)?,
        OutputFormat::Jsonl => print_items(&scan.ports, format)?,
    }
    Ok(())
}

fn print_rule(r: &risk_rules::CustomRiskRule) {
    let level = r.custom_risk.map(|l| format!(" -> {l}")).unwrap_or_default();
    println!("{}  {}/{} on {}  {}{}  ({})", r.rule_id, r.port, r.protocol, r.network, r.action, level, r.reason);
}

fn cmd_rules(data_dir: &Path, cmd: RulesCmd, format: OutputFormat) -> Result<()> {
    let rules = RulesRegistry::open(data_dir)?;
    match cmd {
        RulesCmd::Add { port, protocol, network, action, risk, reason } => {
            let rule = rules.create_rule(NewRule { port, protocol, network, action, custom_risk: risk, reason })?;
            match format {
                OutputFormat::Text => print_rule(&rule),
                _ => print_json(&rule)?,
            }
        }
        RulesCmd::List { network } => {
            let list = rules.list_rules(network.as_deref());
            match format {
                OutputFormat::Text => {
                    if list.is_empty() { println!("no rules defined"); }
                    for r in &list { print_rule(r); }
                }
                _ => print_items(&list, format)?,
            }
        }
        RulesCmd::Update { rule_id, action, risk, reason } => {
            let rule = rules.update_rule(&rule_id, RuleUpdate { action, custom_risk: risk, reason })?;
            match format {
                OutputFormat::Text => print_rule(&rule),
                _ => print_json(&rule)?,
            }
        }
        RulesCmd::Delete { rule_id } => {
            if !rules.delete_rule(&rule_id)? { return Err(baseline_core::Error::RuleNotFound(rule_id).into()); }
            match format {
                OutputFormat::Text => println!("deleted {}", rule_id),
                _ => print_json(&serde_json::json!({ "ruleId": rule_id, "deleted": true }))?,
            }
        }
        RulesCmd::Resolve { port, protocol, network } => {
            let resolved = rules.resolve(port, protocol.as_str(), &network);
            match format {
                OutputFormat::Text => {
                    let level = match resolved.level {
                        Some(l) => format!("{l} ({})", l.description()),
                        None if resolved.is_suppressed() => "suppressed".to_string(),
                        None => "unclassified".to_string(),
                    };
                    let via = match (resolved.source, &resolved.rule_id) {
                        (RiskSource::Default, _) => "static port table".to_string(),
                        (_, Some(id)) => format!("rule {id}"),
                        (_, None) => "rule".to_string(),
                    };
                    println!("{}/{} on {}: {} via {}", port, protocol, network, level, via);
                }
                _ => print_json(&resolved)?,
            }
        }
        RulesCmd::Stats => {
            let s = rules.stats();
            match format {
                OutputFormat::Text => {
                    println!("rules: {}  global: {}  network: {}", s.total_rules, s.global_rules, s.network_rules);
                    if !s.networks.is_empty() { println!("networks: {}", s.networks.join(", ")); }
                }
                _ => print_json(&s)?,
            }
        }
        RulesCmd::Networks => {
            let networks = rules.list_rule_networks();
            match format {
                OutputFormat::Text => {
                    for n in &networks { println!("{}", n); }
                }
                _ => print_items(&networks, format)?,
            }
        }
    }
    Ok(())
}

fn print_device(d: &InventoryDevice) {
    let name = if d.fields.device.is_empty() { "-" } else { d.fields.device.as_str() };
    println!("{:<15} {:<17} {:<20} {}  {}", d.fields.ip, d.fields.mac, name, d.fields.vendor, d.fields.status);
}

fn cmd_inventory(data_dir: &Path, cmd: InventoryCmd, format: OutputFormat) -> Result<()> {
    let inv = InventoryRegistry::open(data_dir)?;
    match cmd {
        InventoryCmd::Import { csv, network } => {
            let devices = inv.import_csv(&csv, &network)?;
            match format {
                OutputFormat::Text => println!("{} devices in {} after import", devices.len(), network.trim().to_lowercase()),
                _ => print_items(&devices, format)?,
            }
        }
        InventoryCmd::List { network } => {
            let devices = inv.devices(&network);
            match format {
                OutputFormat::Text => {
                    if devices.is_empty() { println!("no devices for {}", network); }
                    for d in &devices { print_device(d); }
                }
                _ => print_items(&devices, format)?,
            }
        }
        InventoryCmd::Add { network, ip, mac, name, vendor, notes } => {
            let fields = DeviceFields {
                device: name.unwrap_or_default(),
                ip: ip.unwrap_or_default(),
                mac: mac.unwrap_or_default(),
                vendor: vendor.unwrap_or_default(),
                notes: notes.unwrap_or_default(),
                ..Default::default()
            };
            let device = inv.add_device(&network, fields)?;
            match format {
                OutputFormat::Text => print_device(&device),
                _ => print_json(&device)?,
            }
        }
        InventoryCmd::Check { network, ip, mac } => {
            let known = inv.is_device_known(&network, ip.as_deref(), mac.as_deref());
            let device = ip.as_deref().and_then(|ip| inv.device_by_ip(&network, ip));
            match format {
                OutputFormat::Text => {
                    println!("{}", if known { "known" } else { "unknown" });
                    if let Some(d) = &device { print_device(d); }
                }
                _ => print_json(&serde_json::json!({ "known": known, "device": device }))?,
            }
        }
        InventoryCmd::Networks => {
            let networks = inv.list_networks();
            match format {
                OutputFormat::Text => {
                    for n in &networks { println!("{}  {} devices", n.name, n.device_count); }
                }
                _ => print_items(&networks, format)?,
            }
        }
    }
    Ok(())
}

fn cmd_diff(data_dir: &Path, baseline: &str, current: &str, format: OutputFormat) -> Result<()> {
    let runs = RunRegistry::open(data_dir)?;
    let rules = RulesRegistry::open(data_dir)?.snapshot();
    let mut diff = try_compute_diff(&runs, &rules, baseline, current)?;
    let inventory = InventoryRegistry::open(data_dir)?.snapshot(&diff.network);
    if !inventory.devices().is_empty() {
        diff.changes.mark_known_hosts(|ip| inventory.is_known(Some(ip), None));
    }
    let score = diff.risk_score();
    let band = ScoreBand::from_score(score);
    let c = &diff.changes;

    match format {
        OutputFormat::Text => {
            println!("{} -> {} ({})", diff.baseline_run_uid, diff.current_run_uid, diff.network);
            println!("{}", diff.summary);
            println!("risk score: {} ({})", score, band.label());
            for h in &c.new_hosts {
                let tag = match h.known { Some(true) => " (inventoried)", Some(false) => " (not in inventory)", None => "" };
                println!("+ host {} {}{}", h.ip, h.hostname.as_deref().unwrap_or(""), tag);
            }
            for h in &c.removed_hosts { println!("- host {} {}", h.ip, h.hostname.as_deref().unwrap_or("")); }
            for p in &c.ports_opened {
                let risk = p.risk.map(|r| format!(" [{r}]")).unwrap_or_default();
                println!("+ {} {}/{} {}{}", p.ip, p.port, p.protocol, service_or_name(&p.service, p.port), risk);
            }
            for p in &c.ports_closed { println!("- {} {}/{} {}", p.ip, p.port, p.protocol, service_or_name(&p.service, p.port)); }
        }
        OutputFormat::Json => print_json(&serde_json::json!({
            "diff": diff,
            "riskScore": score,
            "scoreLabel": band.label(),
            "scoreColor": band.color(),
        }))?,
        OutputFormat::Jsonl => {
            print_items(&c.new_hosts, format)?;
            print_items(&c.removed_hosts, format)?;
            print_items(&c.ports_opened, format)?;
            print_items(&c.ports_closed, format)?;
        }
    }
    Ok(())
}

fn cmd_scorecard(data_dir: &Path, run_uid: &str, format: OutputFormat) -> Result<()> {
    let runs = RunRegistry::open(data_dir)?;
    let rules = RulesRegistry::open(data_dir)?.snapshot();
    let card = build_scorecard(&runs, &rules, run_uid)?;
    match format {
        OutputFormat::Text => {
            println!("{} ({}, {})", card.run_uid, card.network, fmt_ts(card.timestamp));
            println!("hosts: {}  open ports: {}  services: {}  risk ports: {}", card.total_hosts, card.open_ports, card.unique_services, card.risk_ports);
            println!("{}", card.summary);
            if !card.risk_ports_detail.is_empty() { println!("risk ports:"); }
            for r in &card.risk_ports_detail {
                println!("  {} {:>5}/{:<3} {:<20} {} hosts", r.risk, r.port, r.protocol, service_or_name(&r.service, r.port), r.hosts_affected);
            }
            println!("top ports:");
            for t in &card.top_ports {
                println!("  {:>5}/{:<3} {:<20} {} hosts", t.port, t.protocol, service_or_name(&t.service, t.port), t.hosts_affected);
            }
            println!("actions:");
            for (i, a) in card.actions.iter().enumerate() { println!("  {}. {}", i + 1, a); }
        }
        _ => print_json(&card)?,
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?.unwrap_or_default();
    init_tracing(cfg.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL));

    let data_dir = cli.data_dir.clone().or_else(|| cfg.data_dir()).unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    let format = cli.format.or_else(|| cfg.format().map(OutputFormat::from_config)).unwrap_or(OutputFormat::Text);

    match cli.command {
        Commands::Version => {
            println!("baseline {} (core {})", env!("CARGO_PKG_VERSION"), baseline_core::version());
        }
        Commands::Ingest { archive, dir, network } => {
            cmd_ingest(&data_dir, archive, dir, network.or_else(|| cfg.network()), format)?;
        }
        Commands::Runs { cmd } => cmd_runs(&data_dir, cmd, format)?,
        Commands::Parse { files, top } => {
            let top = top.or_else(|| cfg.top()).unwrap_or(nmap_parse::DEFAULT_TOP_N);
            if top == 0 { return Err(anyhow!("--top must be > 0")); }
            cmd_parse(&files, top, format)?;
        }
        Commands::Rules { cmd } => cmd_rules(&data_dir, cmd, format)?,
        Commands::Diff { baseline, current } => cmd_diff(&data_dir, &baseline, &current, format)?,
        Commands::Scorecard { run_uid } => cmd_scorecard(&data_dir, &run_uid, format)?,
        Commands::Inventory { cmd } => cmd_inventory(&data_dir, cmd, format)?,
    }
    Ok(())
}
