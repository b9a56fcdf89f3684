//! Commit: lay the three generated files (plus any custom-snippet
//! overrides) into a tmpfs scratch directory, shell out to `genisoimage`
//! to build the `cidata` ISO, then `qemu-img dd` it onto the fixed-size
//! cloud-init volume at raw offset zero.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{CloudinitError, Result};

/// Total generated-content size budget, per the format's documented limit.
pub const SIZE_BUDGET_BYTES: u64 = 3 * 1024 * 1024;

/// The cloud-init volume is always provisioned at this fixed size.
pub const VOLUME_SIZE_BYTES: u64 = 4 * 1024 * 1024;

pub struct GeneratedFiles {
    pub user_data: String,
    pub network_config: String,
    pub meta_data: String,
}

impl GeneratedFiles {
    fn total_len(&self) -> u64 {
        (self.user_data.len() + self.network_config.len() + self.meta_data.len()) as u64
    }
}

/// Write the three files into `scratch_dir`, build an ISO with
/// `genisoimage -volid cidata -joliet -rock`, then write it onto
/// `target_volume` with `qemu-img dd -n`.
pub fn commit(files: &GeneratedFiles, scratch_dir: &Path, target_volume: &Path) -> Result<()> {
    if files.total_len() > SIZE_BUDGET_BYTES {
        return Err(CloudinitError::TooLarge(files.total_len()));
    }

    std::fs::create_dir_all(scratch_dir)?;
    std::fs::write(scratch_dir.join("user-data"), &files.user_data)?;
    std::fs::write(scratch_dir.join("network-config"), &files.network_config)?;
    std::fs::write(scratch_dir.join("meta-data"), &files.meta_data)?;

    let iso_path = scratch_dir.join("cidata.iso");
    let status = Command::new("genisoimage")
        .arg("-output")
        .arg(&iso_path)
        .arg("-volid")
        .arg("cidata")
        .arg("-joliet")
        .arg("-rock")
        .arg(scratch_dir.join("user-data"))
        .arg(scratch_dir.join("network-config"))
        .arg(scratch_dir.join("meta-data"))
        .status()?;
    if !status.success() {
        return Err(CloudinitError::Genisoimage(status));
    }

    write_volume(&iso_path, target_volume)
}

fn write_volume(iso_path: &Path, target_volume: &Path) -> Result<()> {
    let status = Command::new("qemu-img")
        .arg("dd")
        .arg("-n")
        .arg(format!("if={}", iso_path.display()))
        .arg(format!("of={}", target_volume.display()))
        .arg("bs=1M")
        .status()?;
    if !status.success() {
        return Err(CloudinitError::QemuImgDd(status));
    }
    Ok(())
}

/// Resolve the scratch directory genisoimage writes its intermediate
/// files into: a tmpfs-backed directory scoped to this VM and operation.
pub fn scratch_dir_for(runtime_dir: &Path, vmid: u32) -> PathBuf {
    runtime_dir.join(format!("cloudinit-{}", vmid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_over_budget_rejected() {
        let files = GeneratedFiles {
            user_data: "a".repeat((SIZE_BUDGET_BYTES + 1) as usize),
            network_config: String::new(),
            meta_data: String::new(),
        };
        let dir = std::env::temp_dir();
        let err = commit(&files, &dir, &dir.join("nope")).unwrap_err();
        assert!(matches!(err, CloudinitError::TooLarge(_)));
    }

    #[test]
    fn test_scratch_dir_scoped_per_vm() {
        let dir = scratch_dir_for(Path::new("/run/vmctl"), 100);
        assert_eq!(dir, PathBuf::from("/run/vmctl/cloudinit-100"));
    }
}
