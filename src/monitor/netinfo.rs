//! Interface probing helpers
//!
//! Low-level reads of interface state, shared by the link monitor and the
//! `ip_info` builtin. Link presence comes from sysfs; address details come
//! from `ip -json addr show`, which is the one dependable source across
//! distributions without a native netlink binding.

use crate::core::error::{NetProbeError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

const SYSFS_NET: &str = "/sys/class/net";

/// Addresses currently assigned to an interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AddressSnapshot {
    pub ipv4: Vec<String>,
    pub ipv6: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
}

/// Point-in-time view of one interface.
#[derive(Debug, Clone, Serialize)]
pub struct InterfaceState {
    pub interface: String,
    pub exists: bool,
    pub up: bool,
    pub carrier: bool,
    pub addresses: AddressSnapshot,
    pub observed_at: DateTime<Utc>,
}

/// All interface names known to the kernel, sorted.
pub fn list_interfaces() -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(SYSFS_NET) {
        Ok(dir) => dir
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

/// Pick a sensible default interface: first non-loopback, wired preferred.
pub fn pick_default_interface() -> Option<String> {
    let candidates: Vec<String> = list_interfaces()
        .into_iter()
        .filter(|n| n != "lo")
        .collect();
    candidates
        .iter()
        .find(|n| n.starts_with("eth") || n.starts_with("en"))
        .cloned()
        .or_else(|| candidates.into_iter().next())
}

fn sysfs_read(interface: &str, file: &str) -> std::io::Result<String> {
    std::fs::read_to_string(Path::new(SYSFS_NET).join(interface).join(file))
        .map(|s| s.trim().to_string())
}

pub fn interface_exists(interface: &str) -> bool {
    Path::new(SYSFS_NET).join(interface).is_dir()
}

/// Link presence of an interface.
///
/// A missing interface reads as down rather than an error, so a monitor can
/// be pointed at an interface that appears later (USB adapters). Reading
/// `carrier` on an administratively-down interface fails with EINVAL; fall
/// back to `operstate` in that case.
pub fn read_carrier(interface: &str) -> Result<bool> {
    if !interface_exists(interface) {
        return Ok(false);
    }
    match sysfs_read(interface, "carrier") {
        Ok(value) => Ok(value == "1"),
        Err(_) => match sysfs_read(interface, "operstate") {
            Ok(state) => Ok(state == "up"),
            Err(e) => Err(NetProbeError::DetectionError(format!(
                "cannot read state of {}: {}",
                interface, e
            ))),
        },
    }
}

/// Assigned addresses, best effort. Failures produce an empty snapshot.
pub async fn addresses(interface: &str) -> AddressSnapshot {
    let mut snapshot = AddressSnapshot {
        mac: sysfs_read(interface, "address").ok().filter(|m| !m.is_empty()),
        ..Default::default()
    };

    let output = Command::new("ip")
        .args(["-json", "addr", "show", "dev", interface])
        .output()
        .await;
    let output = match output {
        Ok(o) if o.status.success() => o,
        Ok(o) => {
            debug!(interface, status = ?o.status.code(), "ip addr show failed");
            return snapshot;
        }
        Err(e) => {
            debug!(interface, error = %e, "ip command unavailable");
            return snapshot;
        }
    };

    let parsed: Vec<Value> = match serde_json::from_slice(&output.stdout) {
        Ok(v) => v,
        Err(e) => {
            debug!(interface, error = %e, "unparseable ip addr output");
            return snapshot;
        }
    };
    for link in parsed {
        let Some(infos) = link.get("addr_info").and_then(Value::as_array) else {
            continue;
        };
        for info in infos {
            let (Some(family), Some(local)) = (
                info.get("family").and_then(Value::as_str),
                info.get("local").and_then(Value::as_str),
            ) else {
                continue;
            };
            match family {
                "inet" => snapshot.ipv4.push(local.to_string()),
                "inet6" => snapshot.ipv6.push(local.to_string()),
                _ => {}
            }
        }
    }
    snapshot
}

/// Full snapshot of one interface.
pub async fn interface_state(interface: &str) -> InterfaceState {
    let exists = interface_exists(interface);
    let carrier = read_carrier(interface).unwrap_or(false);
    let up = sysfs_read(interface, "operstate")
        .map(|s| s == "up")
        .unwrap_or(false);
    let addresses = if exists {
        addresses(interface).await
    } else {
        AddressSnapshot::default()
    };
    InterfaceState {
        interface: interface.to_string(),
        exists,
        up,
        carrier,
        addresses,
        observed_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_interface_reads_as_down() {
        assert!(!read_carrier("definitely_not_an_interface0").unwrap());
        assert!(!interface_exists("definitely_not_an_interface0"));
    }

    #[tokio::test]
    async fn missing_interface_state_is_empty() {
        let state = interface_state("definitely_not_an_interface0").await;
        assert!(!state.exists);
        assert!(!state.carrier);
        assert!(state.addresses.ipv4.is_empty());
    }

    #[test]
    fn loopback_is_never_the_default_interface() {
        if let Some(name) = pick_default_interface() {
            assert_ne!(name, "lo");
        }
    }
}
