//! Domain model for block devices across interfaces (ide/scsi/sata/virtio/
//! efidisk/tpmstate/unused): parsing, validation, and constraint
//! enforcement.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use schema::{FieldDescriptor, FieldType, FieldValue, Format, PropertyMap, SchemaRegistry};

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interface {
    Ide,
    Scsi,
    Sata,
    Virtio,
    Efidisk,
    Tpmstate,
    Unused,
}

impl Interface {
    pub fn as_str(self) -> &'static str {
        match self {
            Interface::Ide => "ide",
            Interface::Scsi => "scsi",
            Interface::Sata => "sata",
            Interface::Virtio => "virtio",
            Interface::Efidisk => "efidisk",
            Interface::Tpmstate => "tpmstate",
            Interface::Unused => "unused",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ide" => Some(Interface::Ide),
            "scsi" => Some(Interface::Scsi),
            "sata" => Some(Interface::Sata),
            "virtio" => Some(Interface::Virtio),
            "efidisk" => Some(Interface::Efidisk),
            "tpmstate" => Some(Interface::Tpmstate),
            "unused" => Some(Interface::Unused),
            _ => None,
        }
    }

    /// Inclusive maximum index for this interface, per the enforced maxima.
    pub fn max_index(self) -> u32 {
        match self {
            Interface::Ide => 3,
            Interface::Sata => 5,
            Interface::Scsi => 30,
            Interface::Virtio => 15,
            Interface::Unused => 255,
            Interface::Efidisk => 0,
            Interface::Tpmstate => 0,
        }
    }

    /// Canonical boot-order precedence used by `resolve_first_disk`.
    pub fn boot_order_rank(self) -> u32 {
        match self {
            Interface::Ide => 0,
            Interface::Scsi => 1,
            Interface::Virtio => 2,
            Interface::Sata => 3,
            Interface::Efidisk => 4,
            Interface::Tpmstate => 5,
            Interface::Unused => 99,
        }
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Media {
    Disk,
    Cdrom,
}

/// A parsed `<interface><index>` drive, e.g. `scsi0`.
#[derive(Debug, Clone)]
pub struct Drive {
    pub interface: Interface,
    pub index: u32,
    pub file: String,
    pub media: Media,
    pub cache: Option<String>,
    pub aio: Option<String>,
    pub serial: Option<String>,
    pub model: Option<String>,
    pub wwn: Option<String>,
    pub shared: bool,
    pub backup: bool,
    pub replicate: bool,
    pub iothread: bool,
    pub ssd: bool,
    pub size: u64,
    pub format: Option<String>,
    pub snapshot: bool,
    pub cyls: Option<u32>,
    pub heads: Option<u32>,
    pub secs: Option<u32>,
    pub trans: Option<String>,
    pub rerror: Option<String>,
    pub werror: Option<String>,
    pub mbps_rd: Option<f64>,
    pub mbps_wr: Option<f64>,
    pub mbps_rd_max: Option<f64>,
    pub mbps_wr_max: Option<f64>,
    pub mbps: Option<f64>,
    pub mbps_max: Option<f64>,
    pub iops_rd: Option<f64>,
    pub iops_wr: Option<f64>,
    pub iops_rd_max: Option<f64>,
    pub iops_wr_max: Option<f64>,
    pub iops: Option<f64>,
    pub iops_max: Option<f64>,
    pub mbps_rd_max_length: Option<u64>,
    pub mbps_wr_max_length: Option<u64>,
    pub mbps_max_length: Option<u64>,
    pub iops_rd_max_length: Option<u64>,
    pub iops_wr_max_length: Option<u64>,
    pub iops_max_length: Option<u64>,
}

const CLOUDINIT_PATTERN: &str = r"[:/]vm-\d+-cloudinit(\.[A-Za-z0-9]+)?$";

static CLOUDINIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(CLOUDINIT_PATTERN).unwrap());

impl Drive {
    /// `media == cdrom`. When `exclude_cloudinit`, a cloud-init-looking
    /// volume name is treated as not-a-cdrom even if `media` says so,
    /// matching the file-pattern special case the pending engine relies on.
    pub fn is_cdrom(&self, exclude_cloudinit: bool) -> bool {
        if self.media != Media::Cdrom {
            return false;
        }
        if exclude_cloudinit && self.is_cloudinit() {
            return false;
        }
        true
    }

    /// Matches `vm-<id>-cloudinit[.<format>]` anywhere that looks like a
    /// volume path. Per the open question on file §9, the vmid embedded in
    /// the match is not required to equal this drive's owning VM.
    pub fn is_cloudinit(&self) -> bool {
        CLOUDINIT_RE.is_match(&self.file)
    }

    pub fn key(&self) -> String {
        format!("{}{}", self.interface.as_str(), self.index)
    }
}

/// Builds the base format shared by all interfaces, then layers per-interface
/// extensions at registry-build time (no inheritance graph, per the design
/// notes).
fn base_fields() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::new("file", FieldType::String)
            .as_default_key()
            .required()
            .with_description("volume reference or host path, or the literal none/cdrom"),
        FieldDescriptor::new("media", FieldType::String)
            .with_enum(vec!["disk", "cdrom"])
            .with_default(FieldValue::String("disk".to_string())),
        FieldDescriptor::new("cache", FieldType::String).with_enum(vec![
            "none",
            "writethrough",
            "writeback",
            "unsafe",
            "directsync",
        ]),
        FieldDescriptor::new("aio", FieldType::String)
            .with_enum(vec!["native", "threads", "io_uring"]),
        FieldDescriptor::new("serial", FieldType::String),
        FieldDescriptor::new("shared", FieldType::Bool).with_default(FieldValue::Bool(false)),
        FieldDescriptor::new("backup", FieldType::Bool).with_default(FieldValue::Bool(true)),
        FieldDescriptor::new("replicate", FieldType::Bool).with_default(FieldValue::Bool(true)),
        FieldDescriptor::new("size", FieldType::String),
        FieldDescriptor::new("format", FieldType::String).with_enum(vec![
            "raw", "qcow", "qcow2", "qed", "vmdk", "cloop",
        ]),
        FieldDescriptor::new("snapshot", FieldType::Bool).with_default(FieldValue::Bool(false)),
        FieldDescriptor::new("cyls", FieldType::Integer),
        FieldDescriptor::new("heads", FieldType::Integer),
        FieldDescriptor::new("secs", FieldType::Integer),
        FieldDescriptor::new("trans", FieldType::String).with_enum(vec!["none", "lba", "auto"]),
        FieldDescriptor::new("rerror", FieldType::String)
            .with_enum(vec!["ignore", "report", "stop", "enospc"]),
        FieldDescriptor::new("werror", FieldType::String)
            .with_enum(vec!["ignore", "report", "stop", "enospc"]),
        FieldDescriptor::new("mbps_rd", FieldType::Number),
        FieldDescriptor::new("mbps_wr", FieldType::Number),
        FieldDescriptor::new("mbps_rd_max", FieldType::Number),
        FieldDescriptor::new("mbps_wr_max", FieldType::Number),
        FieldDescriptor::new("mbps", FieldType::Number),
        FieldDescriptor::new("mbps_max", FieldType::Number),
        FieldDescriptor::new("iops_rd", FieldType::Number),
        FieldDescriptor::new("iops_wr", FieldType::Number),
        FieldDescriptor::new("iops_rd_max", FieldType::Number),
        FieldDescriptor::new("iops_wr_max", FieldType::Number),
        FieldDescriptor::new("iops", FieldType::Number),
        FieldDescriptor::new("iops_max", FieldType::Number),
        FieldDescriptor::new("mbps_rd_max_length", FieldType::Integer),
        FieldDescriptor::new("mbps_wr_max_length", FieldType::Integer),
        FieldDescriptor::new("mbps_max_length", FieldType::Integer),
        FieldDescriptor::new("iops_rd_max_length", FieldType::Integer),
        FieldDescriptor::new("iops_wr_max_length", FieldType::Integer),
        FieldDescriptor::new("iops_max_length", FieldType::Integer),
        // bps* is a compatibility alias: converted to mbps* on parse by
        // dividing by 1024^2, never re-emitted on print.
        FieldDescriptor::new("bps_rd", FieldType::Number),
        FieldDescriptor::new("bps_wr", FieldType::Number),
    ]
}

fn extra_fields_for(interface: Interface) -> Vec<FieldDescriptor> {
    match interface {
        Interface::Scsi => vec![
            FieldDescriptor::new("iothread", FieldType::Bool).with_default(FieldValue::Bool(false)),
            FieldDescriptor::new("queues", FieldType::Integer),
            FieldDescriptor::new("scsiblock", FieldType::Bool).with_default(FieldValue::Bool(false)),
        ],
        Interface::Virtio => vec![FieldDescriptor::new("iothread", FieldType::Bool)
            .with_default(FieldValue::Bool(false))],
        Interface::Ide | Interface::Sata => vec![
            FieldDescriptor::new("model", FieldType::String),
            FieldDescriptor::new("ssd", FieldType::Bool).with_default(FieldValue::Bool(false)),
            FieldDescriptor::new("wwn", FieldType::String),
        ],
        Interface::Efidisk | Interface::Tpmstate | Interface::Unused => vec![],
    }
}

pub fn format_name(interface: Interface) -> &'static str {
    match interface {
        Interface::Ide => "drive-ide",
        Interface::Scsi => "drive-scsi",
        Interface::Sata => "drive-sata",
        Interface::Virtio => "drive-virtio",
        Interface::Efidisk => "drive-efidisk",
        Interface::Tpmstate => "drive-tpmstate",
        Interface::Unused => "drive-unused",
    }
}

/// Register every per-interface drive format into `registry`.
pub fn register_drive_formats(registry: &mut SchemaRegistry) {
    for interface in [
        Interface::Ide,
        Interface::Scsi,
        Interface::Sata,
        Interface::Virtio,
        Interface::Efidisk,
        Interface::Tpmstate,
        Interface::Unused,
    ] {
        let mut fields = base_fields();
        fields.extend(extra_fields_for(interface));
        registry.register(Format::new(format_name(interface), fields));
    }
}

/// Split `keyN` into `(interface, index)`.
pub fn split_key(key: &str) -> Result<(Interface, u32)> {
    let split_at = key
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(|| ConfigError::UnknownInterface(key.to_string()))?;
    let (name, idx) = key.split_at(split_at);
    let interface =
        Interface::from_str(name).ok_or_else(|| ConfigError::UnknownInterface(name.to_string()))?;
    let index: u32 = idx
        .parse()
        .map_err(|_| ConfigError::UnknownInterface(key.to_string()))?;
    if index > interface.max_index() {
        return Err(ConfigError::IndexOutOfRange {
            interface: interface.as_str().to_string(),
            index,
            max: interface.max_index(),
        });
    }
    Ok((interface, index))
}

fn require_if_set(
    map: &PropertyMap,
    option: &'static str,
    requires: &'static str,
) -> Result<()> {
    if map.contains_key(option) && !map.contains_key(requires) {
        return Err(ConfigError::ThrottlingRequirement { option, requires });
    }
    Ok(())
}

fn exclusive(map: &PropertyMap, a: &'static str, b: &'static str) -> Result<()> {
    if map.contains_key(a) && map.contains_key(b) {
        return Err(ConfigError::MutuallyExclusive { a, b });
    }
    Ok(())
}

/// Parse `keyN=value` into a fully validated `Drive`.
pub fn parse_drive(registry: &SchemaRegistry, key: &str, value: &str) -> Result<Drive> {
    let (interface, index) = split_key(key)?;
    let format = format_name(interface);
    let mut map = registry.parse_property_string(format, value)?;

    // bps* -> mbps* alias, unit conversion by division of 1024^2, never
    // printed back out.
    for (bps_key, mbps_key) in [("bps_rd", "mbps_rd"), ("bps_wr", "mbps_wr")] {
        if let Some(bps) = map.remove(bps_key) {
            if !map.contains_key(mbps_key) {
                let bytes = bps.as_number().unwrap_or(0.0);
                map.insert(
                    mbps_key.to_string(),
                    FieldValue::Number(util::size::bps_to_mbps(bytes as u64)),
                );
            }
        }
    }

    require_if_set(&map, "mbps_rd_max", "mbps_rd")?;
    require_if_set(&map, "mbps_wr_max", "mbps_wr")?;
    require_if_set(&map, "mbps_max", "mbps")?;
    require_if_set(&map, "iops_rd_max", "iops_rd")?;
    require_if_set(&map, "iops_wr_max", "iops_wr")?;
    require_if_set(&map, "iops_max", "iops")?;
    require_if_set(&map, "mbps_rd_max_length", "mbps_rd_max")?;
    require_if_set(&map, "mbps_wr_max_length", "mbps_wr_max")?;
    require_if_set(&map, "mbps_max_length", "mbps_max")?;
    require_if_set(&map, "iops_rd_max_length", "iops_rd_max")?;
    require_if_set(&map, "iops_wr_max_length", "iops_wr_max")?;
    require_if_set(&map, "iops_max_length", "iops_max")?;

    exclusive(&map, "mbps_rd", "mbps")?;
    exclusive(&map, "mbps_wr", "mbps")?;
    exclusive(&map, "iops_rd", "iops")?;
    exclusive(&map, "iops_wr", "iops")?;

    let media = match map.get("media").and_then(|v| v.as_str()) {
        Some("cdrom") => Media::Cdrom,
        _ => Media::Disk,
    };

    if media == Media::Cdrom {
        if interface == Interface::Virtio {
            return Err(ConfigError::CdromExclusion(key.to_string(), "interface=virtio"));
        }
        for excluded in ["format", "snapshot", "trans", "cyls", "heads", "secs"] {
            if map.contains_key(excluded) {
                return Err(ConfigError::CdromExclusion(key.to_string(), excluded));
            }
        }
    }

    let size = match map.get("size").and_then(|v| v.as_str()) {
        Some(s) => util::size::parse_human_size(s)?,
        None => 0,
    };

    Ok(Drive {
        interface,
        index,
        file: map
            .get("file")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        media,
        cache: map.get("cache").and_then(|v| v.as_str()).map(str::to_string),
        aio: map.get("aio").and_then(|v| v.as_str()).map(str::to_string),
        serial: map.get("serial").and_then(|v| v.as_str()).map(str::to_string),
        model: map.get("model").and_then(|v| v.as_str()).map(str::to_string),
        wwn: map.get("wwn").and_then(|v| v.as_str()).map(str::to_string),
        shared: map.get("shared").and_then(|v| v.as_bool()).unwrap_or(false),
        backup: map.get("backup").and_then(|v| v.as_bool()).unwrap_or(true),
        replicate: map.get("replicate").and_then(|v| v.as_bool()).unwrap_or(true),
        iothread: map.get("iothread").and_then(|v| v.as_bool()).unwrap_or(false),
        ssd: map.get("ssd").and_then(|v| v.as_bool()).unwrap_or(false),
        size,
        format: map.get("format").and_then(|v| v.as_str()).map(str::to_string),
        snapshot: map.get("snapshot").and_then(|v| v.as_bool()).unwrap_or(false),
        cyls: map.get("cyls").and_then(|v| v.as_integer()).map(|v| v as u32),
        heads: map.get("heads").and_then(|v| v.as_integer()).map(|v| v as u32),
        secs: map.get("secs").and_then(|v| v.as_integer()).map(|v| v as u32),
        trans: map.get("trans").and_then(|v| v.as_str()).map(str::to_string),
        rerror: map.get("rerror").and_then(|v| v.as_str()).map(str::to_string),
        werror: map.get("werror").and_then(|v| v.as_str()).map(str::to_string),
        mbps_rd: map.get("mbps_rd").and_then(|v| v.as_number()),
        mbps_wr: map.get("mbps_wr").and_then(|v| v.as_number()),
        mbps_rd_max: map.get("mbps_rd_max").and_then(|v| v.as_number()),
        mbps_wr_max: map.get("mbps_wr_max").and_then(|v| v.as_number()),
        mbps: map.get("mbps").and_then(|v| v.as_number()),
        mbps_max: map.get("mbps_max").and_then(|v| v.as_number()),
        iops_rd: map.get("iops_rd").and_then(|v| v.as_number()),
        iops_wr: map.get("iops_wr").and_then(|v| v.as_number()),
        iops_rd_max: map.get("iops_rd_max").and_then(|v| v.as_number()),
        iops_wr_max: map.get("iops_wr_max").and_then(|v| v.as_number()),
        iops: map.get("iops").and_then(|v| v.as_number()),
        iops_max: map.get("iops_max").and_then(|v| v.as_number()),
        mbps_rd_max_length: map.get("mbps_rd_max_length").and_then(|v| v.as_integer()).map(|v| v as u64),
        mbps_wr_max_length: map.get("mbps_wr_max_length").and_then(|v| v.as_integer()).map(|v| v as u64),
        mbps_max_length: map.get("mbps_max_length").and_then(|v| v.as_integer()).map(|v| v as u64),
        iops_rd_max_length: map.get("iops_rd_max_length").and_then(|v| v.as_integer()).map(|v| v as u64),
        iops_wr_max_length: map.get("iops_wr_max_length").and_then(|v| v.as_integer()).map(|v| v as u64),
        iops_max_length: map.get("iops_max_length").and_then(|v| v.as_integer()).map(|v| v as u64),
    })
}

/// Reprint a drive back into its canonical property-string form.
pub fn print_drive(registry: &SchemaRegistry, drive: &Drive) -> Result<String> {
    let format = format_name(drive.interface);
    let mut map = PropertyMap::new();
    map.insert("file".to_string(), FieldValue::String(drive.file.clone()));
    if drive.media == Media::Cdrom {
        map.insert("media".to_string(), FieldValue::String("cdrom".to_string()));
    }
    if let Some(cache) = &drive.cache {
        map.insert("cache".to_string(), FieldValue::String(cache.clone()));
    }
    if let Some(aio) = &drive.aio {
        map.insert("aio".to_string(), FieldValue::String(aio.clone()));
    }
    if drive.iothread {
        map.insert("iothread".to_string(), FieldValue::Bool(true));
    }
    if drive.snapshot {
        map.insert("snapshot".to_string(), FieldValue::Bool(true));
    }
    if let Some(cyls) = drive.cyls {
        map.insert("cyls".to_string(), FieldValue::Integer(cyls as i64));
    }
    if let Some(heads) = drive.heads {
        map.insert("heads".to_string(), FieldValue::Integer(heads as i64));
    }
    if let Some(secs) = drive.secs {
        map.insert("secs".to_string(), FieldValue::Integer(secs as i64));
    }
    if let Some(trans) = &drive.trans {
        map.insert("trans".to_string(), FieldValue::String(trans.clone()));
    }
    if let Some(rerror) = &drive.rerror {
        map.insert("rerror".to_string(), FieldValue::String(rerror.clone()));
    }
    if let Some(werror) = &drive.werror {
        map.insert("werror".to_string(), FieldValue::String(werror.clone()));
    }
    if drive.size != 0 {
        map.insert(
            "size".to_string(),
            FieldValue::String(util::size::format_human_size(drive.size)),
        );
    }
    if let Some(mbps_rd) = drive.mbps_rd {
        map.insert("mbps_rd".to_string(), FieldValue::Number(mbps_rd));
    }
    if let Some(mbps_wr) = drive.mbps_wr {
        map.insert("mbps_wr".to_string(), FieldValue::Number(mbps_wr));
    }
    if let Some(mbps_rd_max) = drive.mbps_rd_max {
        map.insert("mbps_rd_max".to_string(), FieldValue::Number(mbps_rd_max));
    }
    if let Some(mbps_wr_max) = drive.mbps_wr_max {
        map.insert("mbps_wr_max".to_string(), FieldValue::Number(mbps_wr_max));
    }
    if let Some(mbps) = drive.mbps {
        map.insert("mbps".to_string(), FieldValue::Number(mbps));
    }
    if let Some(mbps_max) = drive.mbps_max {
        map.insert("mbps_max".to_string(), FieldValue::Number(mbps_max));
    }
    if let Some(iops_rd) = drive.iops_rd {
        map.insert("iops_rd".to_string(), FieldValue::Number(iops_rd));
    }
    if let Some(iops_wr) = drive.iops_wr {
        map.insert("iops_wr".to_string(), FieldValue::Number(iops_wr));
    }
    if let Some(iops) = drive.iops {
        map.insert("iops".to_string(), FieldValue::Number(iops));
    }
    Ok(registry.print_property_string(format, &map, &[])?)
}

/// If the size changed, return the mutated drive and a human message
/// describing the transition; else `None`.
pub fn update_disksize(drive: &Drive, new_size_bytes: u64) -> Option<(Drive, String)> {
    if drive.size == new_size_bytes {
        return None;
    }
    let message = format!(
        "size of disk '{}' changed from {} to {}",
        drive.key(),
        util::size::format_human_size(drive.size),
        util::size::format_human_size(new_size_bytes)
    );
    let mut next = drive.clone();
    next.size = new_size_bytes;
    Some((next, message))
}

/// Canonical boot order for `resolve_first_disk`: ide, scsi, virtio, sata,
/// efidisk, tpmstate.
pub fn valid_drive_names() -> &'static [Interface] {
    &[
        Interface::Ide,
        Interface::Scsi,
        Interface::Virtio,
        Interface::Sata,
        Interface::Efidisk,
        Interface::Tpmstate,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SchemaRegistry {
        let mut r = SchemaRegistry::new();
        register_drive_formats(&mut r);
        r
    }

    #[test]
    fn test_scenario_s1_drive_parse_print() {
        let r = registry();
        let drive = parse_drive(
            &r,
            "scsi0",
            "local-lvm:vm-100-disk-0,size=32G,cache=writeback,iothread=1",
        )
        .unwrap();
        assert_eq!(drive.interface, Interface::Scsi);
        assert_eq!(drive.index, 0);
        assert_eq!(drive.file, "local-lvm:vm-100-disk-0");
        assert_eq!(drive.size, 34_359_738_368);
        assert_eq!(drive.cache.as_deref(), Some("writeback"));
        assert!(drive.iothread);

        let printed = print_drive(&r, &drive).unwrap();
        assert_eq!(
            printed,
            "local-lvm:vm-100-disk-0,cache=writeback,iothread=1,size=32G"
        );
    }

    #[test]
    fn test_cdrom_excludes_format() {
        let r = registry();
        let err = parse_drive(&r, "ide2", "none,media=cdrom,format=raw").unwrap_err();
        assert!(matches!(err, ConfigError::CdromExclusion(_, "format")));
    }

    #[test]
    fn test_cdrom_virtio_rejected() {
        let r = registry();
        let err = parse_drive(&r, "virtio0", "none,media=cdrom").unwrap_err();
        assert!(matches!(err, ConfigError::CdromExclusion(_, _)));
    }

    #[test]
    fn test_throttling_requirement_chain() {
        let r = registry();
        let err = parse_drive(&r, "scsi1", "local:vm-100-disk-1,mbps_rd_max=100").unwrap_err();
        assert!(matches!(err, ConfigError::ThrottlingRequirement { .. }));

        let ok = parse_drive(
            &r,
            "scsi1",
            "local:vm-100-disk-1,mbps_rd=50,mbps_rd_max=100",
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_bps_alias_converts_to_mbps() {
        let r = registry();
        let drive = parse_drive(&r, "scsi2", "local:vm-100-disk-2,bps_rd=10485760").unwrap();
        assert_eq!(drive.mbps_rd, Some(10.0));
    }

    #[test]
    fn test_index_out_of_range() {
        let err = split_key("ide4").unwrap_err();
        assert!(matches!(err, ConfigError::IndexOutOfRange { .. }));
    }

    #[test]
    fn test_geometry_and_error_action_round_trip() {
        let r = registry();
        let drive = parse_drive(
            &r,
            "ide0",
            "local:vm-100-disk-0,cyls=16383,heads=16,secs=63,trans=lba,rerror=stop,werror=report",
        )
        .unwrap();
        assert_eq!(drive.cyls, Some(16383));
        assert_eq!(drive.heads, Some(16));
        assert_eq!(drive.secs, Some(63));
        assert_eq!(drive.trans.as_deref(), Some("lba"));
        assert_eq!(drive.rerror.as_deref(), Some("stop"));
        assert_eq!(drive.werror.as_deref(), Some("report"));
    }

    #[test]
    fn test_cdrom_excludes_geometry_and_snapshot() {
        let r = registry();
        let err = parse_drive(&r, "ide2", "none,media=cdrom,trans=lba").unwrap_err();
        assert!(matches!(err, ConfigError::CdromExclusion(_, "trans")));

        let err = parse_drive(&r, "ide2", "none,media=cdrom,snapshot=1").unwrap_err();
        assert!(matches!(err, ConfigError::CdromExclusion(_, "snapshot")));
    }

    #[test]
    fn test_burst_length_requires_max() {
        let r = registry();
        let err = parse_drive(&r, "scsi1", "local:vm-100-disk-1,mbps_rd_max_length=10").unwrap_err();
        assert!(matches!(err, ConfigError::ThrottlingRequirement { .. }));

        let ok = parse_drive(
            &r,
            "scsi1",
            "local:vm-100-disk-1,mbps_rd=50,mbps_rd_max=100,mbps_rd_max_length=10",
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_iops_excludes_directional_iops() {
        let r = registry();
        let err = parse_drive(&r, "scsi1", "local:vm-100-disk-1,iops_rd=100,iops=200").unwrap_err();
        assert!(matches!(err, ConfigError::MutuallyExclusive { .. }));
    }

    #[test]
    fn test_is_cloudinit() {
        let r = registry();
        let drive = parse_drive(&r, "ide2", "local:vm-100-cloudinit").unwrap();
        assert!(drive.is_cloudinit());
    }
}
