use crate::DeviceFields;
use csv::{ReaderBuilder, StringRecord, Trim};
use tracing::debug;

const DEVICE_HEADERS: &[&str] = &["device", "name", "friendly name", "device name", "hostname"];
const MAC_HEADERS: &[&str] = &["mac", "mac address", "macaddress", "physical address"];
const VENDOR_HEADERS: &[&str] = &["vendor", "manufacturer", "make", "oui"];
const IP_HEADERS: &[&str] = &["ip", "ip address", "ipaddress", "address"];
const HOSTNAME_HEADERS: &[&str] = &["hostnames", "hostname", "dns", "fqdn", "dns name"];
const STATUS_HEADERS: &[&str] = &["status", "state", "active"];
const NOTES_HEADERS: &[&str] = &["notes", "note", "comments", "comment", "description"];
const SECURITY_HEADERS: &[&str] = &["security recs", "security recommendations", "security", "recommendations", "recs"];

/// Lowercase, keep only `[a-z0-9]` and whitespace.
fn normalize_header(h: &str) -> String {
    h.trim().to_lowercase().chars().filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace()).collect()
}

/// First alias (in order) that equals or is contained in some header.
fn column(headers: &[String], aliases: &[&str]) -> Option<usize> {
    aliases.iter().find_map(|alias| {
        let alias = normalize_header(alias);
        headers.iter().position(|h| *h == alias || h.contains(&alias))
    })
}

struct Columns {
    device: Option<usize>,
    mac: Option<usize>,
    vendor: Option<usize>,
    ip: Option<usize>,
    hostnames: Option<usize>,
    status: Option<usize>,
    notes: Option<usize>,
    security_recs: Option<usize>,
}

impl Columns {
    fn from_header(record: &StringRecord) -> Self {
        let headers: Vec<String> = record.iter().map(normalize_header).collect();
        Columns {
            device: column(&headers, DEVICE_HEADERS),
            mac: column(&headers, MAC_HEADERS),
            vendor: column(&headers, VENDOR_HEADERS),
            ip: column(&headers, IP_HEADERS),
            hostnames: column(&headers, HOSTNAME_HEADERS),
            status: column(&headers, STATUS_HEADERS),
            notes: column(&headers, NOTES_HEADERS),
            security_recs: column(&headers, SECURITY_HEADERS),
        }
    }
}

fn value(record: &StringRecord, idx: Option<usize>) -> String {
    idx.and_then(|i| record.get(i)).unwrap_or_default().to_string()
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(|v| v.trim().is_empty())
}

/// `AA:BB:CC:DD:EE:FF` when the input holds exactly twelve hex digits,
/// otherwise the input unchanged.
pub fn normalize_mac(mac: &str) -> String {
    let hex: Vec<char> = mac.chars().filter(char::is_ascii_hexdigit).map(|c| c.to_ascii_uppercase()).collect();
    if hex.len() != 12 { return mac.to_string(); }
    hex.chunks(2).map(|pair| pair.iter().collect::<String>()).collect::<Vec<_>>().join(":")
}

/// Read device rows out of an inventory export.
///
/// The header is the first non-blank row and columns are matched by common
/// aliases, so exports from routers and spreadsheets work unchanged. Blank
/// rows, short rows and rows with neither IP nor MAC are skipped.
pub fn parse_inventory_csv(content: &str) -> Vec<DeviceFields> {
    let mut reader = ReaderBuilder::new().has_headers(false).flexible(true).trim(Trim::All).from_reader(content.as_bytes());
    let mut columns: Option<Columns> = None;
    let mut devices = Vec::new();

    for (line, record) in reader.records().enumerate() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                debug!(line, error = %e, "skipping unreadable inventory row");
                continue;
            }
        };
        if is_blank(&record) { continue; }
        let Some(cols) = columns.as_ref() else {
            columns = Some(Columns::from_header(&record));
            continue;
        };

        let status = value(&record, cols.status);
        let fields = DeviceFields {
            device: value(&record, cols.device),
            mac: normalize_mac(&value(&record, cols.mac)),
            vendor: value(&record, cols.vendor),
            ip: value(&record, cols.ip),
            hostnames: value(&record, cols.hostnames),
            status: if status.is_empty() { "unknown".to_string() } else { status },
            notes: value(&record, cols.notes),
            security_recs: value(&record, cols.security_recs),
        };
        if fields.ip.is_empty() && fields.mac.is_empty() { continue; }
        devices.push(fields);
    }
    devices
}
