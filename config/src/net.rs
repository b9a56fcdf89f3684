use schema::{FieldDescriptor, FieldType, FieldValue, Format, PropertyMap, SchemaRegistry};

use crate::error::Result;

pub const NET_FORMAT: &str = "net";

#[derive(Debug, Clone)]
pub struct Net {
    pub model: String,
    pub macaddr: Option<String>,
    pub bridge: Option<String>,
    pub queues: u32,
    pub rate: Option<f64>,
    pub tag: Option<u16>,
    pub trunks: Option<String>,
    pub firewall: bool,
    pub link_down: bool,
}

pub fn register_net_format(registry: &mut SchemaRegistry) {
    registry.register(Format::new(
        NET_FORMAT,
        vec![
            FieldDescriptor::new("model", FieldType::String)
                .as_default_key()
                .with_enum(vec!["rtl8139", "e1000", "virtio", "vmxnet3"])
                .with_default(FieldValue::String("virtio".to_string())),
            FieldDescriptor::new("macaddr", FieldType::String),
            FieldDescriptor::new("bridge", FieldType::String),
            FieldDescriptor::new("queues", FieldType::Integer)
                .with_range(Some(1.0), Some(16.0))
                .with_default(FieldValue::Integer(1)),
            FieldDescriptor::new("rate", FieldType::Number),
            FieldDescriptor::new("tag", FieldType::Integer).with_range(Some(1.0), Some(4094.0)),
            FieldDescriptor::new("trunks", FieldType::String),
            FieldDescriptor::new("firewall", FieldType::Bool)
                .with_default(FieldValue::Bool(false)),
            FieldDescriptor::new("link_down", FieldType::Bool)
                .with_default(FieldValue::Bool(false)),
        ],
    ));
}

/// A per-VM-instance, per-slot, deterministic OUI-prefixed MAC, used when
/// `macaddr` is absent from the property string.
pub fn generate_macaddr(oui_prefix: [u8; 3], vmid: u32, slot: u32) -> String {
    let b4 = (vmid >> 8) as u8;
    let b5 = (vmid & 0xff) as u8;
    let b6 = slot as u8;
    format!(
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        oui_prefix[0], oui_prefix[1], oui_prefix[2], b4, b5, b6
    )
}

pub fn parse_net(registry: &SchemaRegistry, value: &str) -> Result<Net> {
    let map = registry.parse_property_string(NET_FORMAT, value)?;
    Ok(net_from_map(&map))
}

fn net_from_map(map: &PropertyMap) -> Net {
    Net {
        model: map
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or("virtio")
            .to_string(),
        macaddr: map.get("macaddr").and_then(|v| v.as_str()).map(str::to_string),
        bridge: map.get("bridge").and_then(|v| v.as_str()).map(str::to_string),
        queues: map.get("queues").and_then(|v| v.as_integer()).unwrap_or(1) as u32,
        rate: map.get("rate").and_then(|v| v.as_number()),
        tag: map
            .get("tag")
            .and_then(|v| v.as_integer())
            .map(|v| v as u16),
        trunks: map.get("trunks").and_then(|v| v.as_str()).map(str::to_string),
        firewall: map.get("firewall").and_then(|v| v.as_bool()).unwrap_or(false),
        link_down: map.get("link_down").and_then(|v| v.as_bool()).unwrap_or(false),
    }
}
