//! Two-phase snapshot create, per the algorithm: prepare under lock,
//! capture vmstate and disk snapshots with the lock released, commit under
//! lock again.

use std::time::{SystemTime, UNIX_EPOCH};

use schema::SchemaRegistry;

use config::config::{check_lock_permits, LockKind, SnapState, Snapshot};
use config::Config;
use util::context::RuntimeContext;

use crate::backend::SnapshotBackend;
use crate::error::{Result, SnapshotError};
use crate::persist::{load_config, persist_config};
use crate::storage::StorageBackend;

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Prepare phase: snapshot the live config fields, optionally reserve a
/// vmstate volume, mark `lock=snapshot` and the new entry's `snapstate`.
/// Returns the vmstate volid, if one was allocated.
fn prepare(
    storage: &dyn StorageBackend,
    context: &RuntimeContext,
    vmid: u32,
    name: &str,
    with_vmstate: bool,
) -> Result<Option<String>> {
    let _lock = util::lock::lock_vm(&context.lock_dir, vmid)?;
    let mut config = load_config(context, vmid)?;

    if config.snapshots.contains_key(name) {
        return Err(SnapshotError::AlreadyExists(name.to_string()));
    }
    check_lock_permits(&config, LockKind::Snapshot)?;

    let vmstate = if with_vmstate {
        Some(storage.allocate_vmstate(vmid, name)?)
    } else {
        None
    };

    let snap = Snapshot {
        fields: config.options.clone(),
        snaptime: now_unix(),
        vmstate: vmstate.clone(),
        machine: config.get("machine").map(str::to_string),
        snapstate: Some(SnapState::Prepare),
        parent: config.parent.clone(),
    };

    config.lock = Some(LockKind::Snapshot);
    config.snapshots.insert(name.to_string(), snap);
    persist_config(context, vmid, &config)?;

    Ok(vmstate)
}

/// Run phase: lock released. Captures vmstate (if requested and the VM is
/// running) then snapshots every non-CD-ROM disk; on any disk-snapshot
/// failure, best-effort frees the ones already taken.
fn run(
    snapshot_backend: &dyn SnapshotBackend,
    storage: &dyn StorageBackend,
    registry: &SchemaRegistry,
    context: &RuntimeContext,
    vmid: u32,
    name: &str,
    vmstate: &Option<String>,
) -> Result<()> {
    let config = load_config(context, vmid)?;

    if let Some(volid) = vmstate {
        if snapshot_backend.is_running(vmid) {
            let statefile = storage.volume_path(volid)?;
            snapshot_backend.capture_vmstate(vmid, &statefile)?;
        }
    }

    let drives = config.drives(registry)?;
    let mut taken = Vec::new();
    for drive in drives.iter().filter(|d| !d.is_cdrom(true)) {
        match storage.snapshot_disk(&drive.file, name) {
            Ok(()) => taken.push(drive.file.clone()),
            Err(e) => {
                for volid in &taken {
                    let _ = storage.delete_disk_snapshot(volid, name);
                }
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Commit phase: reacquire the lock, clear the prepare marker, point
/// `parent` at the new snapshot, persist.
fn commit(context: &RuntimeContext, vmid: u32, name: &str) -> Result<()> {
    let _lock = util::lock::lock_vm(&context.lock_dir, vmid)?;
    let mut config = load_config(context, vmid)?;

    if let Some(snap) = config.snapshots.get_mut(name) {
        snap.snapstate = None;
    }
    config.lock = None;
    config.parent = Some(name.to_string());
    persist_config(context, vmid, &config)?;
    Ok(())
}

/// Abort a prepared-but-failed snapshot: reacquire the lock, drop the
/// snapshot entry, clear the lock marker.
fn abort(context: &RuntimeContext, vmid: u32, name: &str) -> Result<()> {
    let _lock = util::lock::lock_vm(&context.lock_dir, vmid)?;
    let mut config = load_config(context, vmid)?;
    config.snapshots.remove(name);
    config.lock = None;
    persist_config(context, vmid, &config)?;
    Ok(())
}

pub fn create_snapshot(
    snapshot_backend: &dyn SnapshotBackend,
    storage: &dyn StorageBackend,
    registry: &SchemaRegistry,
    context: &RuntimeContext,
    vmid: u32,
    name: &str,
    with_vmstate: bool,
) -> Result<()> {
    let vmstate = prepare(storage, context, vmid, name, with_vmstate)?;

    match run(snapshot_backend, storage, registry, context, vmid, name, &vmstate) {
        Ok(()) => commit(context, vmid, name),
        Err(e) => {
            let _ = abort(context, vmid, name);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::path::PathBuf;

    use config::drive::register_drive_formats;

    struct FakeSnapshotBackend {
        running: bool,
        captured: RefCell<Vec<(u32, PathBuf)>>,
    }

    impl SnapshotBackend for FakeSnapshotBackend {
        fn is_running(&self, _vmid: u32) -> bool {
            self.running
        }
        fn capture_vmstate(&self, vmid: u32, statefile: &std::path::Path) -> Result<()> {
            self.captured.borrow_mut().push((vmid, statefile.to_path_buf()));
            Ok(())
        }
        fn stop_vm(&self, _vmid: u32) -> Result<()> {
            Ok(())
        }
    }

    struct FakeStorage {
        snapshotted: RefCell<Vec<String>>,
        deleted: RefCell<Vec<String>>,
        fail_on: Option<String>,
    }

    impl StorageBackend for FakeStorage {
        fn snapshot_disk(&self, volid: &str, _snap_name: &str) -> Result<()> {
            if self.fail_on.as_deref() == Some(volid) {
                return Err(SnapshotError::Storage {
                    volid: volid.to_string(),
                    reason: "injected failure".to_string(),
                });
            }
            self.snapshotted.borrow_mut().push(volid.to_string());
            Ok(())
        }
        fn rollback_disk(&self, _volid: &str, _snap_name: &str) -> Result<()> {
            Ok(())
        }
        fn delete_disk_snapshot(&self, volid: &str, _snap_name: &str) -> Result<()> {
            self.deleted.borrow_mut().push(volid.to_string());
            Ok(())
        }
        fn allocate_vmstate(&self, vmid: u32, snap_name: &str) -> Result<String> {
            Ok(format!("local:vm-{}-state-{}", vmid, snap_name))
        }
        fn volume_path(&self, volid: &str) -> Result<PathBuf> {
            Ok(PathBuf::from(format!("/var/lib/vmctl/{}", volid)))
        }
        fn free_volume(&self, _volid: &str) -> Result<()> {
            Ok(())
        }
    }

    fn registry() -> SchemaRegistry {
        let mut r = SchemaRegistry::new();
        register_drive_formats(&mut r);
        r
    }

    fn test_context(tag: &str) -> RuntimeContext {
        let dir = std::env::temp_dir().join(format!("vmctl-snapshot-create-{}-{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        RuntimeContext {
            node_name: "test".to_string(),
            runtime_dir: dir.clone(),
            lock_dir: dir.clone(),
            config_dir: dir.clone(),
            hugepage_sysfs_root: dir,
        }
    }

    fn write_config(context: &RuntimeContext, vmid: u32, options: &[(&str, &str)]) {
        let mut config = Config::new();
        for (k, v) in options {
            config.set(*k, *v);
        }
        persist_config(context, vmid, &config).unwrap();
    }

    #[test]
    fn test_create_snapshot_commits_and_sets_parent() {
        let context = test_context("ok");
        write_config(&context, 100, &[("scsi0", "local:vm-100-disk-0"), ("memory", "2048")]);

        let snapshot_backend = FakeSnapshotBackend {
            running: false,
            captured: RefCell::new(Vec::new()),
        };
        let storage = FakeStorage {
            snapshotted: RefCell::new(Vec::new()),
            deleted: RefCell::new(Vec::new()),
            fail_on: None,
        };
        let registry = registry();

        create_snapshot(&snapshot_backend, &storage, &registry, &context, 100, "before-upgrade", false).unwrap();

        let config = load_config(&context, 100).unwrap();
        assert_eq!(config.parent.as_deref(), Some("before-upgrade"));
        assert!(config.lock.is_none());
        let snap = config.snapshots.get("before-upgrade").unwrap();
        assert!(snap.snapstate.is_none());
        assert_eq!(storage.snapshotted.borrow().as_slice(), ["local:vm-100-disk-0"]);
        let _ = std::fs::remove_dir_all(&context.runtime_dir);
    }

    #[test]
    fn test_create_snapshot_rolls_back_on_disk_failure() {
        let context = test_context("fail");
        write_config(
            &context,
            101,
            &[("scsi0", "local:vm-101-disk-0"), ("scsi1", "local:vm-101-disk-1")],
        );

        let snapshot_backend = FakeSnapshotBackend {
            running: false,
            captured: RefCell::new(Vec::new()),
        };
        let storage = FakeStorage {
            snapshotted: RefCell::new(Vec::new()),
            deleted: RefCell::new(Vec::new()),
            fail_on: Some("local:vm-101-disk-1".to_string()),
        };
        let registry = registry();

        let err = create_snapshot(&snapshot_backend, &storage, &registry, &context, 101, "bad", false).unwrap_err();
        assert!(matches!(err, SnapshotError::Storage { .. }));

        let config = load_config(&context, 101).unwrap();
        assert!(config.lock.is_none());
        assert!(!config.snapshots.contains_key("bad"));
        assert_eq!(storage.deleted.borrow().as_slice(), ["local:vm-101-disk-0"]);
        let _ = std::fs::remove_dir_all(&context.runtime_dir);
    }

    #[test]
    fn test_create_snapshot_rejects_duplicate_name() {
        let context = test_context("dup");
        write_config(&context, 102, &[("scsi0", "local:vm-102-disk-0")]);

        let snapshot_backend = FakeSnapshotBackend {
            running: false,
            captured: RefCell::new(Vec::new()),
        };
        let storage = FakeStorage {
            snapshotted: RefCell::new(Vec::new()),
            deleted: RefCell::new(Vec::new()),
            fail_on: None,
        };
        let registry = registry();

        create_snapshot(&snapshot_backend, &storage, &registry, &context, 102, "again", false).unwrap();
        let err = create_snapshot(&snapshot_backend, &storage, &registry, &context, 102, "again", false).unwrap_err();
        assert!(matches!(err, SnapshotError::AlreadyExists(_)));
        let _ = std::fs::remove_dir_all(&context.runtime_dir);
    }

    #[test]
    fn test_create_snapshot_captures_vmstate_when_running() {
        let context = test_context("vmstate");
        write_config(&context, 103, &[("scsi0", "local:vm-103-disk-0")]);

        let snapshot_backend = FakeSnapshotBackend {
            running: true,
            captured: RefCell::new(Vec::new()),
        };
        let storage = FakeStorage {
            snapshotted: RefCell::new(Vec::new()),
            deleted: RefCell::new(Vec::new()),
            fail_on: None,
        };
        let registry = registry();

        create_snapshot(&snapshot_backend, &storage, &registry, &context, 103, "live", true).unwrap();

        assert_eq!(snapshot_backend.captured.borrow().len(), 1);
        let config = load_config(&context, 103).unwrap();
        let snap = config.snapshots.get("live").unwrap();
        assert_eq!(snap.vmstate.as_deref(), Some("local:vm-103-state-live"));
        let _ = std::fs::remove_dir_all(&context.runtime_dir);
    }
}
