use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::Value;

use crate::config::DEFAULT_PORT;
use crate::error::StoreError;

fn is_global_ipv4(ip: &Ipv4Addr) -> bool {
    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_unspecified()
        || ip.is_multicast())
}

fn is_global_ipv6(ip: &Ipv6Addr) -> bool {
    !(ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() || (ip.segments()[0] & 0xfe00) == 0xfc00)
}

fn is_global(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_global_ipv4(v4),
        IpAddr::V6(v6) => is_global_ipv6(v6),
    }
}

/// Parses and filters a `"<host>:<port>"` peer entry (§6): host must be
/// a globally routable IP literal, port in 1..65535.
fn parse_peer_entry(entry: &str) -> Option<(IpAddr, u16)> {
    let (host, port_str) = entry.rsplit_once(':')?;
    let ip: IpAddr = host.parse().ok()?;
    let port: u16 = port_str.parse().ok()?;
    if port == 0 {
        return None;
    }
    if !is_global(&ip) {
        return None;
    }
    Some((ip, port))
}

/// Append-only during a run, flushed to disk under the single task
/// runner (§5). On-disk shape is a flat JSON object mapping
/// `"host:port"` to `""` (§6, `original_source/storage.py`).
pub struct Peers {
    path: PathBuf,
    known: Mutex<HashSet<String>>,
}

impl Peers {
    pub fn load(path: PathBuf) -> Result<Self, StoreError> {
        let known = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            let value: Value = serde_json::from_str(&data)?;
            value
                .as_object()
                .map(|obj| obj.keys().cloned().collect())
                .unwrap_or_default()
        } else {
            HashSet::new()
        };
        Ok(Self { path, known: Mutex::new(known) })
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.known.lock().iter().cloned().collect()
    }

    /// Filters and inserts each entry, respecting the per-host cap.
    /// Returns the entries that were newly added.
    pub fn add_filtered(&self, entries: &[String]) -> Vec<String> {
        let mut known = self.known.lock();
        let mut added = Vec::new();

        let mut per_host: HashMap<IpAddr, usize> = HashMap::new();
        for existing in known.iter() {
            if let Some((host, existing_port)) = parse_peer_entry(existing) {
                if existing_port != DEFAULT_PORT {
                    *per_host.entry(host).or_insert(0) += 1;
                }
            }
        }

        for entry in entries {
            let Some((host, port)) = parse_peer_entry(entry) else { continue };
            if known.contains(entry) {
                continue;
            }
            let count = per_host.entry(host).or_insert(0);
            if *count >= 10 && port != DEFAULT_PORT {
                continue;
            }
            known.insert(entry.clone());
            if port != DEFAULT_PORT {
                *count += 1;
            }
            added.push(entry.clone());
        }

        added
    }

    pub fn persist(&self) -> Result<(), StoreError> {
        let known = self.known.lock();
        let map: serde_json::Map<String, Value> = known.iter().map(|p| (p.clone(), Value::String(String::new()))).collect();
        let json = serde_json::to_string_pretty(&Value::Object(map))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
