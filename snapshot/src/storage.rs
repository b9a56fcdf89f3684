//! The storage-layer operations the snapshot coordinator delegates to --
//! everything that isn't QMP traffic. A real implementation dispatches on
//! volume type (LVM, ZFS, qcow2 internal snapshot, ...); tests use an
//! in-memory double.

use crate::error::Result;

pub trait StorageBackend {
    /// Take a point-in-time snapshot of `volid`, named `snap_name`.
    fn snapshot_disk(&self, volid: &str, snap_name: &str) -> Result<()>;

    /// Roll `volid` back to the state it was in at `snap_name`.
    fn rollback_disk(&self, volid: &str, snap_name: &str) -> Result<()>;

    /// Free the on-disk snapshot `snap_name` taken of `volid`. Best-effort
    /// callers log and continue rather than propagate.
    fn delete_disk_snapshot(&self, volid: &str, snap_name: &str) -> Result<()>;

    /// Allocate a volume to hold `vmid`'s vmstate for snapshot `snap_name`,
    /// returning its volid.
    fn allocate_vmstate(&self, vmid: u32, snap_name: &str) -> Result<String>;

    /// Resolve a volid to the path QEMU should read/write it at.
    fn volume_path(&self, volid: &str) -> Result<std::path::PathBuf>;

    /// Free a volume (vmstate or otherwise) entirely.
    fn free_volume(&self, volid: &str) -> Result<()>;
}
