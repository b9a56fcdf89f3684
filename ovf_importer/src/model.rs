use std::path::PathBuf;

use config::Config;

/// One disk drive resolved from the VirtualHardwareSection, ready to be
/// turned into a `<interface><index>` config entry once the target volume
/// is allocated on the storage layer.
#[derive(Debug, Clone)]
pub struct ImportedDisk {
    pub key: String,
    pub source_path: PathBuf,
    pub capacity_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ImportResult {
    pub config: Config,
    pub disks: Vec<ImportedDisk>,
}

/// ResourceType codes from the CIM_ResourceAllocationSettingData schema
/// that this importer cares about.
pub mod resource_type {
    pub const PROCESSOR: u32 = 3;
    pub const MEMORY: u32 = 4;
    pub const IDE_CONTROLLER: u32 = 5;
    pub const SCSI_CONTROLLER: u32 = 6;
    pub const SATA_CONTROLLER: u32 = 20;
    pub const DISK_DRIVE: u32 = 17;
}

/// Map a controller's own ResourceType to the drive-key interface prefix.
pub fn interface_for_controller(resource_type: u32) -> Option<&'static str> {
    match resource_type {
        resource_type::IDE_CONTROLLER => Some("ide"),
        resource_type::SCSI_CONTROLLER => Some("scsi"),
        resource_type::SATA_CONTROLLER => Some("sata"),
        _ => None,
    }
}
