//! Per-network device inventory imported from CSV exports.
//!
//! Layout under the data directory:
//! `inventory/index.json` lists networks, `inventory/<network>/index.json`
//! holds that network's devices keyed by device id.

mod csv_import;
mod safety;

pub use csv_import::{normalize_mac, parse_inventory_csv};
pub use safety::{resolve_within, sanitize_network_name};

use anyhow::{Context, Result};
use baseline_core::Error;
use json_store::{Entries, JsonIndex, Repository};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::{info, warn};

/// Editable columns of a device record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceFields {
    /// Friendly name.
    pub device: String,
    pub mac: String,
    pub vendor: String,
    pub ip: String,
    pub hostnames: String,
    pub status: String,
    pub notes: String,
    pub security_recs: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryDevice {
    pub id: String,
    #[serde(flatten)]
    pub fields: DeviceFields,
    pub network: String,
    #[serde(with = "time::serde::rfc3339")]
    pub added_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl InventoryDevice {
    /// `seq` orders devices created within the same instant.
    fn new(fields: DeviceFields, network: &str, now: OffsetDateTime, seq: u64) -> Self {
        InventoryDevice { id: generate_device_id(now, seq), fields, network: network.to_string(), added_at: now, updated_at: now }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSummary {
    pub name: String,
    /// Last CSV imported for this network; empty when devices were only added by hand.
    #[serde(default)]
    pub csv_path: String,
    pub device_count: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

/// `dev_<unix nanos + seq, hex>_<6 random hex>`; sorts by creation time.
fn generate_device_id(now: OffsetDateTime, seq: u64) -> String {
    let nanos = u64::try_from(now.unix_timestamp_nanos()).unwrap_or_default().wrapping_add(seq);
    let rand = uuid::Uuid::new_v4().simple().to_string();
    format!("dev_{nanos:016x}_{}", &rand[..6])
}

/// Devices of one network, loaded once for repeated lookups.
#[derive(Debug, Clone, Default)]
pub struct NetworkInventory {
    devices: Vec<InventoryDevice>,
}

impl NetworkInventory {
    pub fn devices(&self) -> &[InventoryDevice] {
        &self.devices
    }

    /// Known when an IP or MAC matches; MACs compare after normalization.
    pub fn is_known(&self, ip: Option<&str>, mac: Option<&str>) -> bool {
        let ip = ip.filter(|s| !s.is_empty());
        let mac = mac.filter(|s| !s.is_empty()).map(normalize_mac);
        self.devices.iter().any(|d| {
            ip.is_some_and(|ip| d.fields.ip == ip) || mac.as_deref().is_some_and(|m| d.fields.mac.eq_ignore_ascii_case(m))
        })
    }

    pub fn by_ip(&self, ip: &str) -> Option<&InventoryDevice> {
        self.devices.iter().find(|d| d.fields.ip == ip)
    }
}

/// Fold `incoming` into `existing`: a row matching a device by MAC, then by
/// IP, updates it in place (id and `addedAt` kept); other rows are added.
/// Empty incoming columns leave the stored value alone.
fn merge_devices(existing: &mut Entries<InventoryDevice>, incoming: Vec<DeviceFields>, network: &str, now: OffsetDateTime) {
    let mut by_mac: HashMap<String, String> = HashMap::new();
    let mut by_ip: HashMap<String, String> = HashMap::new();
    for d in existing.values() {
        if !d.fields.mac.is_empty() { by_mac.insert(d.fields.mac.to_uppercase(), d.id.clone()); }
        if !d.fields.ip.is_empty() { by_ip.insert(d.fields.ip.clone(), d.id.clone()); }
    }

    for (seq, fields) in (0u64..).zip(incoming) {
        let hit = Some(fields.mac.to_uppercase())
            .filter(|m| !m.is_empty())
            .and_then(|m| by_mac.get(&m))
            .or_else(|| by_ip.get(&fields.ip).filter(|_| !fields.ip.is_empty()))
            .cloned();

        match hit.and_then(|id| existing.get_mut(&id)) {
            Some(dev) => {
                overlay(&mut dev.fields, fields);
                dev.updated_at = now;
            }
            None => {
                let dev = InventoryDevice::new(fields, network, now, seq);
                if !dev.fields.mac.is_empty() { by_mac.insert(dev.fields.mac.to_uppercase(), dev.id.clone()); }
                if !dev.fields.ip.is_empty() { by_ip.insert(dev.fields.ip.clone(), dev.id.clone()); }
                existing.insert(dev.id.clone(), dev);
            }
        }
    }
}

fn overlay(stored: &mut DeviceFields, incoming: DeviceFields) {
    let pairs = [
        (&mut stored.device, incoming.device),
        (&mut stored.mac, incoming.mac),
        (&mut stored.vendor, incoming.vendor),
        (&mut stored.ip, incoming.ip),
        (&mut stored.hostnames, incoming.hostnames),
        (&mut stored.status, incoming.status),
        (&mut stored.notes, incoming.notes),
        (&mut stored.security_recs, incoming.security_recs),
    ];
    for (slot, value) in pairs {
        if !value.is_empty() { *slot = value; }
    }
}

pub struct InventoryRegistry {
    root: PathBuf,
    networks: JsonIndex<NetworkSummary>,
}

impl InventoryRegistry {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let networks: JsonIndex<NetworkSummary> = JsonIndex::open_or_create(data_dir.join("inventory"), "networks")?;
        Ok(InventoryRegistry { root: networks.dir().to_path_buf(), networks })
    }

    /// Network names are lowercased to line up with run and rule networks.
    fn network_dir(&self, network: &str) -> Result<(String, PathBuf), Error> {
        let name = sanitize_network_name(network).map(|n| n.to_lowercase()).ok_or_else(|| Error::InvalidNetwork(network.to_string()))?;
        let dir = resolve_within(&self.root, &name).ok_or_else(|| Error::InvalidNetwork(network.to_string()))?;
        Ok((name, dir))
    }

    fn network_store(&self, network: &str) -> Result<(String, JsonIndex<InventoryDevice>)> {
        let (name, dir) = self.network_dir(network)?;
        Ok((name, JsonIndex::open_or_create(dir, "devices")?))
    }

    fn record_network(&self, network: &str, csv_path: Option<&Path>, device_count: usize) -> Result<()> {
        self.networks.update(|nets| {
            let csv_path = match (csv_path, nets.get(network)) {
                (Some(p), _) => p.display().to_string(),
                (None, Some(prev)) => prev.csv_path.clone(),
                (None, None) => String::new(),
            };
            nets.insert(
                network.to_string(),
                NetworkSummary { name: network.to_string(), csv_path, device_count, last_updated: OffsetDateTime::now_utc() },
            );
            Ok(())
        })
    }

    /// Import a CSV export into `network`, merging with what is stored.
    /// Returns the network's full device list after the merge.
    pub fn import_csv(&self, csv_path: &Path, network: &str) -> Result<Vec<InventoryDevice>> {
        let (name, store) = self.network_store(network)?;
        let content = std::fs::read_to_string(csv_path).with_context(|| format!("reading {}", csv_path.display()))?;
        let incoming = parse_inventory_csv(&content);
        let rows = incoming.len();
        let now = OffsetDateTime::now_utc();
        let count = store.update(|devices| {
            merge_devices(devices, incoming, &name, now);
            Ok(devices.len())
        })?;
        self.record_network(&name, Some(csv_path), count)?;
        info!(network = %name, rows, devices = count, "imported inventory");
        Ok(self.devices(&name))
    }

    /// Add one device by hand, e.g. to mark a newly seen host as expected.
    pub fn add_device(&self, network: &str, mut fields: DeviceFields) -> Result<InventoryDevice> {
        fields.mac = normalize_mac(fields.mac.trim());
        fields.ip = fields.ip.trim().to_string();
        if fields.ip.is_empty() && fields.mac.is_empty() {
            return Err(Error::InvalidDevice("an IP or MAC address is required".into()).into());
        }
        if fields.status.is_empty() { fields.status = "active".to_string(); }

        let (name, store) = self.network_store(network)?;
        let device = InventoryDevice::new(fields, &name, OffsetDateTime::now_utc(), 0);
        let count = store.update(|devices| {
            devices.insert(device.id.clone(), device.clone());
            Ok(devices.len())
        })?;
        self.record_network(&name, None, count)?;
        info!(network = %name, id = %device.id, "added inventory device");
        Ok(device)
    }

    /// Devices of `network`, oldest first. Unknown or invalid names yield none.
    pub fn devices(&self, network: &str) -> Vec<InventoryDevice> {
        match self.network_dir(network) {
            Ok((_, dir)) if !dir.is_dir() => Vec::new(),
            Ok(_) => match self.network_store(network) {
                Ok((_, store)) => store.list(),
                Err(e) => {
                    warn!(network, error = %e, "inventory unavailable");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(network, error = %e, "invalid inventory network");
                Vec::new()
            }
        }
    }

    pub fn snapshot(&self, network: &str) -> NetworkInventory {
        NetworkInventory { devices: self.devices(network) }
    }

    pub fn is_device_known(&self, network: &str, ip: Option<&str>, mac: Option<&str>) -> bool {
        self.snapshot(network).is_known(ip, mac)
    }

    pub fn device_by_ip(&self, network: &str, ip: &str) -> Option<InventoryDevice> {
        self.snapshot(network).by_ip(ip).cloned()
    }

    pub fn list_networks(&self) -> Vec<NetworkSummary> {
        self.networks.list()
    }
}
