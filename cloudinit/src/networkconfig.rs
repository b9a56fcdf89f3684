//! `network-config`: one entry per `netN`, matched to its addressing by
//! the corresponding `ipconfigN`, in cloud-init's v1 schema (the schema
//! `nocloud` and `configdrive2` both consume).

use config::{net, Config};
use schema::SchemaRegistry;

use crate::error::Result;

/// One `ipN=...,gw=...` entry, parsed ad hoc since it has no schema-backed
/// property-string format of its own -- it only ever appears as a
/// cloud-init passthrough key.
struct IpConfig {
    dhcp: bool,
    address: Option<String>,
    gateway: Option<String>,
}

fn parse_ipconfig(value: &str) -> IpConfig {
    let mut address = None;
    let mut gateway = None;
    let mut dhcp = false;
    for part in value.split(',') {
        if let Some((key, v)) = part.split_once('=') {
            match key {
                "ip" if v == "dhcp" => dhcp = true,
                "ip" => address = Some(v.to_string()),
                "gw" => gateway = Some(v.to_string()),
                _ => {}
            }
        }
    }
    IpConfig { dhcp, address, gateway }
}

/// Build the v1 `network-config` document: one `type: physical` entry per
/// `netN`, matched on MAC address, with static or dhcp addressing from the
/// matching `ipconfigN`, and a single shared `nameserver` subnet.
pub fn build_network_config(registry: &SchemaRegistry, config: &Config, oui_prefix: [u8; 3], vmid: u32) -> Result<String> {
    let mut out = String::from("version: 1\nconfig:\n");

    let mut index = 0u32;
    loop {
        let key = format!("net{}", index);
        let Some(value) = config.get(&key) else { break };
        let net = net::parse_net(registry, value)?;
        let mac = net
            .macaddr
            .clone()
            .unwrap_or_else(|| net::generate_macaddr(oui_prefix, vmid, index));

        out.push_str(&format!("  - type: physical\n    name: eth{}\n    mac_address: '{}'\n", index, mac));

        let ipcfg_key = format!("ipconfig{}", index);
        let subnets = match config.get(&ipcfg_key) {
            Some(raw) => {
                let ipcfg = parse_ipconfig(raw);
                if ipcfg.dhcp {
                    vec!["    subnets:\n      - type: dhcp\n".to_string()]
                } else if let Some(address) = ipcfg.address {
                    let mut s = format!("    subnets:\n      - type: static\n        address: {}\n", address);
                    if let Some(gw) = ipcfg.gateway {
                        s.push_str(&format!("        gateway: {}\n", gw));
                    }
                    vec![s]
                } else {
                    vec!["    subnets:\n      - type: manual\n".to_string()]
                }
            }
            None => vec!["    subnets:\n      - type: manual\n".to_string()],
        };
        for subnet in subnets {
            out.push_str(&subnet);
        }
        index += 1;
    }

    let nameserver = config.get("nameserver").map(str::to_string);
    let searchdomain = config.get("searchdomain").map(str::to_string);
    if nameserver.is_some() || searchdomain.is_some() {
        out.push_str("  - type: nameserver\n");
        if let Some(ns) = nameserver {
            out.push_str(&format!("    address:\n      - {}\n", ns));
        }
        if let Some(sd) = searchdomain {
            out.push_str(&format!("    search:\n      - {}\n", sd));
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SchemaRegistry {
        config::build_registry()
    }

    #[test]
    fn test_dhcp_interface() {
        let r = registry();
        let mut config = Config::new();
        config.set("net0", "virtio,bridge=vmbr0");
        config.set("ipconfig0", "ip=dhcp");
        let out = build_network_config(&r, &config, [0x02, 0x11, 0x22], 100).unwrap();
        assert!(out.contains("type: dhcp"));
    }

    #[test]
    fn test_static_interface_with_gateway() {
        let r = registry();
        let mut config = Config::new();
        config.set("net0", "virtio,macaddr=AA:BB:CC:DD:EE:FF");
        config.set("ipconfig0", "ip=10.0.0.5/24,gw=10.0.0.1");
        let out = build_network_config(&r, &config, [0x02, 0x11, 0x22], 100).unwrap();
        assert!(out.contains("mac_address: 'AA:BB:CC:DD:EE:FF'"));
        assert!(out.contains("address: 10.0.0.5/24"));
        assert!(out.contains("gateway: 10.0.0.1"));
    }

    #[test]
    fn test_nameserver_emitted_once() {
        let r = registry();
        let mut config = Config::new();
        config.set("nameserver", "8.8.8.8");
        config.set("searchdomain", "example.com");
        let out = build_network_config(&r, &config, [0x02, 0x11, 0x22], 100).unwrap();
        assert_eq!(out.matches("type: nameserver").count(), 1);
        assert!(out.contains("8.8.8.8"));
        assert!(out.contains("example.com"));
    }
}
