//! OVF envelope parsing: `References` -> `DiskSection` -> the
//! `VirtualHardwareSection`'s `Item`s, resolved into a flat disk list plus
//! processor/memory counts. Namespace prefixes (`ovf:`, `rasd:`) are
//! ignored throughout -- every lookup matches on local element/attribute
//! name only, since the prefix itself is not meaningful to this importer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use roxmltree::{Document, Node};

use config::Config;

use crate::error::{OvfError, Result};
use crate::model::{interface_for_controller, resource_type, ImportResult, ImportedDisk};
use crate::security;

fn attr<'input>(node: Node<'input, 'input>, local_name: &str) -> Option<&'input str> {
    node.attributes().find(|a| a.name() == local_name).map(|a| a.value())
}

fn children_named<'input>(
    node: Node<'input, 'input>,
    local_name: &'input str,
) -> impl Iterator<Item = Node<'input, 'input>> {
    node.children().filter(move |n| n.is_element() && n.tag_name().name() == local_name)
}

fn descendant_named<'input>(node: Node<'input, 'input>, local_name: &str) -> Option<Node<'input, 'input>> {
    node.descendants().find(|n| n.is_element() && n.tag_name().name() == local_name)
}

fn text_of(node: Node) -> Option<String> {
    node.text().map(str::trim).map(str::to_string)
}

/// DNS-label-sanitize an OVF VirtualSystem name: lowercase, non
/// `[a-z0-9-]` replaced with `-`, collapsed, trimmed of leading/trailing
/// hyphens.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_dash = false;
    for c in name.to_ascii_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_was_dash = false;
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}

struct HardwareItem {
    resource_type: u32,
    virtual_quantity: Option<u64>,
    instance_id: Option<String>,
    parent: Option<String>,
    address_on_parent: Option<u32>,
    host_resource: Option<String>,
}

fn parse_item(item: Node) -> HardwareItem {
    HardwareItem {
        resource_type: descendant_named(item, "ResourceType")
            .and_then(text_of)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
        virtual_quantity: descendant_named(item, "VirtualQuantity")
            .and_then(text_of)
            .and_then(|s| s.parse().ok()),
        instance_id: descendant_named(item, "InstanceID").and_then(text_of),
        parent: descendant_named(item, "Parent").and_then(text_of),
        address_on_parent: descendant_named(item, "AddressOnParent")
            .and_then(text_of)
            .and_then(|s| s.parse().ok()),
        host_resource: descendant_named(item, "HostResource").and_then(text_of),
    }
}

/// Parse the OVF file at `path` into a `Config` plus its resolved disk
/// list. Disk source paths are canonicalized and checked to lie under the
/// OVF's own directory before being returned.
pub fn parse_ovf(path: &Path) -> Result<ImportResult> {
    let text = std::fs::read_to_string(path).map_err(|source| OvfError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let doc = Document::parse(&text)?;
    let root = doc.root_element();
    let ovf_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();

    let file_refs = parse_references(root);
    let disk_refs = parse_disk_section(root);

    let virtual_system =
        descendant_named(root, "VirtualSystem").ok_or(OvfError::MissingElement("VirtualSystem"))?;
    let name = descendant_named(virtual_system, "Name")
        .and_then(text_of)
        .map(|n| sanitize_name(&n))
        .ok_or(OvfError::MissingElement("Name"))?;

    let hardware = descendant_named(virtual_system, "VirtualHardwareSection")
        .ok_or(OvfError::MissingElement("VirtualHardwareSection"))?;
    let items: Vec<HardwareItem> = children_named(hardware, "Item").map(parse_item).collect();

    let mut controllers: HashMap<String, &'static str> = HashMap::new();
    for item in &items {
        if let Some(prefix) = interface_for_controller(item.resource_type) {
            if let Some(id) = &item.instance_id {
                controllers.insert(id.clone(), prefix);
            }
        }
    }

    let mut config = Config::new();
    config.set("name", &name);

    let mut sockets = 1u32;
    let mut disks = Vec::new();

    for item in &items {
        match item.resource_type {
            resource_type::PROCESSOR => {
                sockets = item.virtual_quantity.unwrap_or(1) as u32;
            }
            resource_type::MEMORY => {
                if let Some(mb) = item.virtual_quantity {
                    config.set("memory", mb.to_string());
                }
            }
            resource_type::DISK_DRIVE => {
                disks.push(resolve_disk(item, &controllers, &file_refs, &disk_refs, &ovf_dir)?);
            }
            _ => {}
        }
    }

    config.set("sockets", sockets.to_string());
    for disk in &disks {
        config.set(&disk.key, disk.source_path.display().to_string());
    }

    Ok(ImportResult { config, disks })
}

/// `References/File[@id -> @href]`.
fn parse_references(root: Node) -> HashMap<String, String> {
    let mut out = HashMap::new();
    if let Some(references) = descendant_named(root, "References") {
        for file in children_named(references, "File") {
            if let (Some(id), Some(href)) = (attr(file, "id"), attr(file, "href")) {
                out.insert(id.to_string(), href.to_string());
            }
        }
    }
    out
}

/// `DiskSection/Disk[@diskId -> @fileRef]`, keyed by the `ovf:/disk/<id>`
/// form `HostResource` references it with.
fn parse_disk_section(root: Node) -> HashMap<String, (String, u64)> {
    let mut out = HashMap::new();
    if let Some(section) = descendant_named(root, "DiskSection") {
        for disk in children_named(section, "Disk") {
            let (Some(disk_id), Some(file_ref)) = (attr(disk, "diskId"), attr(disk, "fileRef")) else {
                continue;
            };
            let capacity = attr(disk, "capacity").and_then(|s| s.parse::<u64>().ok()).unwrap_or(0);
            let units = attr(disk, "capacityAllocationUnits").unwrap_or("byte");
            let bytes = capacity.saturating_mul(allocation_unit_bytes(units));
            out.insert(format!("ovf:/disk/{}", disk_id), (file_ref.to_string(), bytes));
        }
    }
    out
}

/// `byte * 2^20` -> MiB multiplier, etc. Defaults to 1 for the bare
/// `byte` unit.
fn allocation_unit_bytes(units: &str) -> u64 {
    if let Some(exp) = units.rsplit('^').next().filter(|_| units.contains("2^")) {
        if let Ok(exp) = exp.trim().parse::<u32>() {
            return 1u64 << exp;
        }
    }
    1
}

fn resolve_disk(
    item: &HardwareItem,
    controllers: &HashMap<String, &'static str>,
    file_refs: &HashMap<String, String>,
    disk_refs: &HashMap<String, (String, u64)>,
    ovf_dir: &Path,
) -> Result<ImportedDisk> {
    let host_resource = item
        .host_resource
        .as_deref()
        .ok_or(OvfError::MissingElement("HostResource"))?;
    let (file_ref, capacity_bytes) = disk_refs
        .get(host_resource)
        .ok_or_else(|| OvfError::DanglingReference {
            kind: "disk",
            id: host_resource.to_string(),
        })?;
    let href = file_refs.get(file_ref).ok_or_else(|| OvfError::DanglingReference {
        kind: "file",
        id: file_ref.clone(),
    })?;

    let parent_id = item.parent.as_deref().ok_or(OvfError::MissingElement("Parent"))?;
    let interface = controllers
        .get(parent_id)
        .copied()
        .ok_or_else(|| OvfError::DanglingReference {
            kind: "controller",
            id: parent_id.to_string(),
        })?;
    let address = item.address_on_parent.unwrap_or(0);
    let key = format!("{}{}", interface, address);

    let resolved_path = security::resolve_within(ovf_dir, href)?;
    let capacity_bytes = if capacity_bytes > &0 {
        *capacity_bytes
    } else {
        std::fs::metadata(&resolved_path).map(|m| m.len()).unwrap_or(0)
    };

    Ok(ImportedDisk {
        key,
        source_path: resolved_path,
        capacity_bytes,
    })
}

pub fn probe_disk_size(path: &PathBuf) -> Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const SAMPLE_OVF: &str = r#"<?xml version="1.0"?>
<Envelope xmlns:ovf="http://schemas.dmtf.org/ovf/envelope/1" xmlns:rasd="http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/CIM_ResourceAllocationSettingData">
  <References>
    <File ovf:id="file1" ovf:href="disk1.vmdk"/>
  </References>
  <DiskSection>
    <Disk ovf:diskId="vmdisk1" ovf:fileRef="file1" ovf:capacity="20" ovf:capacityAllocationUnits="byte * 2^30"/>
  </DiskSection>
  <VirtualSystem ovf:id="vm">
    <Name>My Test VM!</Name>
    <VirtualHardwareSection>
      <Item>
        <rasd:ResourceType>3</rasd:ResourceType>
        <rasd:VirtualQuantity>2</rasd:VirtualQuantity>
      </Item>
      <Item>
        <rasd:ResourceType>4</rasd:ResourceType>
        <rasd:VirtualQuantity>2048</rasd:VirtualQuantity>
      </Item>
      <Item>
        <rasd:ResourceType>6</rasd:ResourceType>
        <rasd:InstanceID>3</rasd:InstanceID>
      </Item>
      <Item>
        <rasd:ResourceType>17</rasd:ResourceType>
        <rasd:HostResource>ovf:/disk/vmdisk1</rasd:HostResource>
        <rasd:Parent>3</rasd:Parent>
        <rasd:AddressOnParent>0</rasd:AddressOnParent>
      </Item>
    </VirtualHardwareSection>
  </VirtualSystem>
</Envelope>
"#;

    fn write_sample(dir: &Path) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("disk1.vmdk"), vec![0u8; 1024]).unwrap();
        let ovf_path = dir.join("vm.ovf");
        std::fs::write(&ovf_path, SAMPLE_OVF).unwrap();
        ovf_path
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("My Test VM!"), "my-test-vm");
    }

    #[test]
    fn test_parse_ovf_full_chain() {
        let dir = std::env::temp_dir().join(format!("vmctl-ovf-{}", std::process::id()));
        let ovf_path = write_sample(&dir);

        let result = parse_ovf(&ovf_path).unwrap();
        assert_eq!(result.config.get("name"), Some("my-test-vm"));
        assert_eq!(result.config.get("sockets"), Some("2"));
        assert_eq!(result.config.get("memory"), Some("2048"));
        assert_eq!(result.disks.len(), 1);
        assert_eq!(result.disks[0].key, "scsi0");
        assert_eq!(result.disks[0].capacity_bytes, 20 * (1u64 << 30));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_dangling_host_resource_rejected() {
        let dir = std::env::temp_dir().join(format!("vmctl-ovf-dangling-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let bad = SAMPLE_OVF.replace("ovf:/disk/vmdisk1", "ovf:/disk/missing");
        let ovf_path = dir.join("vm.ovf");
        std::fs::write(dir.join("disk1.vmdk"), vec![0u8; 1024]).unwrap();
        std::fs::write(&ovf_path, bad).unwrap();

        let err = parse_ovf(&ovf_path).unwrap_err();
        assert!(matches!(err, OvfError::DanglingReference { .. }));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
