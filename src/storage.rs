//! A plain-filesystem [`StorageBackend`]: volids are paths, and a disk
//! "snapshot" is a sidecar copy next to the volume it was taken from.
//! Real deployments plug in an LVM/ZFS/qcow2-internal backend instead;
//! this one exists so `vmctl` is runnable against a directory of raw
//! images without a storage plugin.

use std::path::PathBuf;

use snapshot::{Result, SnapshotError, StorageBackend};

pub struct FsStorageBackend {
    pub runtime_dir: PathBuf,
}

impl FsStorageBackend {
    fn snap_path(volid: &str, snap_name: &str) -> PathBuf {
        PathBuf::from(format!("{volid}.snap-{snap_name}"))
    }

    fn wrap(volid: &str, e: std::io::Error) -> SnapshotError {
        SnapshotError::Storage { volid: volid.to_string(), reason: e.to_string() }
    }
}

impl StorageBackend for FsStorageBackend {
    fn snapshot_disk(&self, volid: &str, snap_name: &str) -> Result<()> {
        std::fs::copy(volid, Self::snap_path(volid, snap_name)).map_err(|e| Self::wrap(volid, e))?;
        Ok(())
    }

    fn rollback_disk(&self, volid: &str, snap_name: &str) -> Result<()> {
        std::fs::copy(Self::snap_path(volid, snap_name), volid).map_err(|e| Self::wrap(volid, e))?;
        Ok(())
    }

    fn delete_disk_snapshot(&self, volid: &str, snap_name: &str) -> Result<()> {
        match std::fs::remove_file(Self::snap_path(volid, snap_name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::wrap(volid, e)),
        }
    }

    fn allocate_vmstate(&self, vmid: u32, snap_name: &str) -> Result<String> {
        let path = self.runtime_dir.join(format!("vmstate-{vmid}-{snap_name}"));
        Ok(path.to_string_lossy().into_owned())
    }

    fn volume_path(&self, volid: &str) -> Result<PathBuf> {
        Ok(PathBuf::from(volid))
    }

    fn free_volume(&self, volid: &str) -> Result<()> {
        match std::fs::remove_file(volid) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::wrap(volid, e)),
        }
    }
}
