use schema::{FieldDescriptor, FieldType, PropertyMap, Format, SchemaRegistry};

use crate::error::Result;

pub const USB_FORMAT: &str = "usb";

#[derive(Debug, Clone)]
pub enum UsbSource {
    Host { vendor_product: String },
    Spice,
}

#[derive(Debug, Clone)]
pub struct Usb {
    pub source: UsbSource,
    pub usb3: bool,
}

pub fn register_usb_format(registry: &mut SchemaRegistry) {
    registry.register(Format::new(
        USB_FORMAT,
        vec![
            FieldDescriptor::new("host", FieldType::String)
                .with_pattern(r"^([0-9a-fA-F]{1,4}:[0-9a-fA-F]{1,4}|\d+-\d+(\.\d+)*)$"),
            FieldDescriptor::new("spice", FieldType::Bool),
            FieldDescriptor::new("usb3", FieldType::Bool),
        ],
    ));
}

pub fn parse_usb(registry: &SchemaRegistry, value: &str) -> Result<Usb> {
    let map = registry.parse_property_string(USB_FORMAT, value)?;
    Ok(usb_from_map(&map))
}

fn usb_from_map(map: &PropertyMap) -> Usb {
    let source = if map.get("spice").and_then(|v| v.as_bool()).unwrap_or(false) {
        UsbSource::Spice
    } else {
        let vendor_product = map
            .get("host")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        UsbSource::Host { vendor_product }
    };
    Usb {
        source,
        usb3: map.get("usb3").and_then(|v| v.as_bool()).unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_usb_host() {
        let mut r = SchemaRegistry::new();
        register_usb_format(&mut r);
        let usb = parse_usb(&r, "host=0658:0200,usb3=1").unwrap();
        assert!(matches!(usb.source, UsbSource::Host { ref vendor_product } if vendor_product == "0658:0200"));
        assert!(usb.usb3);
    }

    #[test]
    fn test_parse_usb_spice() {
        let mut r = SchemaRegistry::new();
        register_usb_format(&mut r);
        let usb = parse_usb(&r, "spice=1").unwrap();
        assert!(matches!(usb.source, UsbSource::Spice));
    }

    #[test]
    fn test_parse_usb_rejects_bad_host() {
        let mut r = SchemaRegistry::new();
        register_usb_format(&mut r);
        assert!(parse_usb(&r, "host=not-a-device").is_err());
    }
}
