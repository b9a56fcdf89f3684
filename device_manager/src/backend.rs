//! The monitor operations `DeviceManager` needs, behind a trait so the
//! verify-loop/rollback state machine is testable without a live QEMU
//! socket -- the same dependency-injection shape `memory_planner`'s
//! `HugepageSysfs` uses for the host sysfs tree.

use std::collections::HashSet;
use std::time::Duration;

use monitor::MonitorClient;

use crate::error::{DeviceError, Result};

pub trait DeviceBackend {
    fn pci_device_ids(&self) -> Result<HashSet<String>>;
    fn block_ids(&self) -> Result<HashSet<String>>;
    fn mouse_ids(&self) -> Result<HashSet<String>>;
    fn usb_device_ids(&self) -> Result<HashSet<String>>;
    fn cpu_count(&self) -> Result<u32>;
    fn memory_device_ids(&self) -> Result<HashSet<String>>;

    fn device_add(&self, device_str: &str) -> Result<()>;
    fn device_del(&self, id: &str) -> Result<()>;
    fn drive_add(&self, hmp_line: &str) -> Result<()>;
    fn drive_del(&self, id: &str) -> Result<()>;
    fn netdev_add(&self, netdev_str: &str) -> Result<()>;
    fn netdev_del(&self, id: &str) -> Result<()>;
    fn object_add(&self, qom_type: &str, id: &str, props: &str) -> Result<()>;
    fn object_del(&self, id: &str) -> Result<()>;
}

/// Real backend: every call is one `MonitorClient::cmd` round trip against
/// `vmid`'s socket, with the 3 s default timeout for non-blocking commands.
pub struct MonitorBackend<'a> {
    pub client: &'a MonitorClient,
    pub vmid: u32,
}

impl<'a> MonitorBackend<'a> {
    fn query_ids(&self, execute: &str, id_field: &str) -> Result<HashSet<String>> {
        let result = self
            .client
            .cmd(self.vmid, execute, None, monitor::DEFAULT_TIMEOUT)?;
        let ids = result
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.get(id_field).and_then(|i| i.as_str()).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }
}

impl<'a> DeviceBackend for MonitorBackend<'a> {
    fn pci_device_ids(&self) -> Result<HashSet<String>> {
        self.query_ids("query-pci", "qdev_id")
    }

    fn block_ids(&self) -> Result<HashSet<String>> {
        self.query_ids("query-block", "device")
    }

    fn mouse_ids(&self) -> Result<HashSet<String>> {
        self.query_ids("query-mice", "name")
    }

    fn usb_device_ids(&self) -> Result<HashSet<String>> {
        self.query_ids("query-usb", "label")
    }

    fn cpu_count(&self) -> Result<u32> {
        let result = self
            .client
            .cmd(self.vmid, "query-cpus-fast", None, monitor::DEFAULT_TIMEOUT)?;
        Ok(result.as_array().map(|a| a.len() as u32).unwrap_or(0))
    }

    fn memory_device_ids(&self) -> Result<HashSet<String>> {
        self.query_ids("query-memory-devices", "id")
    }

    fn device_add(&self, device_str: &str) -> Result<()> {
        let args = parse_device_str(device_str);
        self.client
            .cmd(self.vmid, "device_add", Some(args), monitor::DEFAULT_TIMEOUT)?;
        Ok(())
    }

    fn device_del(&self, id: &str) -> Result<()> {
        self.client.cmd(
            self.vmid,
            "device_del",
            Some(serde_json::json!({ "id": id })),
            monitor::DEFAULT_TIMEOUT,
        )?;
        Ok(())
    }

    fn drive_add(&self, hmp_line: &str) -> Result<()> {
        self.client
            .hmp(self.vmid, &format!("drive_add auto {}", hmp_line), monitor::DEFAULT_TIMEOUT)?;
        Ok(())
    }

    fn drive_del(&self, id: &str) -> Result<()> {
        self.client
            .hmp(self.vmid, &format!("drive_del {}", id), monitor::DEFAULT_TIMEOUT)?;
        Ok(())
    }

    fn netdev_add(&self, netdev_str: &str) -> Result<()> {
        let args = parse_device_str(netdev_str);
        self.client
            .cmd(self.vmid, "netdev_add", Some(args), monitor::DEFAULT_TIMEOUT)?;
        Ok(())
    }

    fn netdev_del(&self, id: &str) -> Result<()> {
        self.client.cmd(
            self.vmid,
            "netdev_del",
            Some(serde_json::json!({ "id": id })),
            monitor::DEFAULT_TIMEOUT,
        )?;
        Ok(())
    }

    fn object_add(&self, qom_type: &str, id: &str, props: &str) -> Result<()> {
        let mut args = parse_device_str(props);
        args["qom-type"] = serde_json::Value::String(qom_type.to_string());
        args["id"] = serde_json::Value::String(id.to_string());
        self.client
            .cmd(self.vmid, "object-add", Some(args), monitor::DEFAULT_TIMEOUT)?;
        Ok(())
    }

    fn object_del(&self, id: &str) -> Result<()> {
        self.client.cmd(
            self.vmid,
            "object-del",
            Some(serde_json::json!({ "id": id })),
            monitor::DEFAULT_TIMEOUT,
        )?;
        Ok(())
    }
}

/// Turn a `key=value,key2=value2` device/netdev/object string into a JSON
/// arguments object, mirroring the property-string convention the rest of
/// the workspace already parses with `SchemaRegistry`.
fn parse_device_str(s: &str) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for part in s.split(',') {
        if let Some((k, v)) = part.split_once('=') {
            map.insert(k.to_string(), serde_json::Value::String(v.to_string()));
        } else if !part.is_empty() {
            map.insert("driver".to_string(), serde_json::Value::String(part.to_string()));
        }
    }
    serde_json::Value::Object(map)
}

/// Sleep between verify-loop poll attempts. Split out so tests can shrink
/// it without touching the retry count/semantics.
pub fn poll_interval() -> Duration {
    Duration::from_secs(1)
}

pub fn retry_budget_exhausted(attempts: u32, max: u32) -> bool {
    attempts >= max
}

/// Used by callers constructing a `DeviceError` for a verify-loop timeout.
pub fn plug_verify_failed(id: &str, retries: u32) -> DeviceError {
    DeviceError::PlugVerifyFailed(id.to_string(), retries)
}

pub fn unplug_verify_failed(id: &str, retries: u32) -> DeviceError {
    DeviceError::UnplugVerifyFailed(id.to_string(), retries)
}
