//! Snapshot delete: two-phase like create, freeing the snapshot's disk
//! snapshots and vmstate volume on success.

use schema::SchemaRegistry;

use config::config::{check_lock_permits, LockKind, SnapState};
use util::context::RuntimeContext;

use crate::error::{Result, SnapshotError};
use crate::persist::{load_config, persist_config};
use crate::storage::StorageBackend;

fn prepare(context: &RuntimeContext, vmid: u32, name: &str) -> Result<()> {
    let _lock = util::lock::lock_vm(&context.lock_dir, vmid)?;
    let mut config = load_config(context, vmid)?;

    let snap = config
        .snapshots
        .get_mut(name)
        .ok_or_else(|| SnapshotError::NotFound(name.to_string()))?;
    check_lock_permits(&config, LockKind::Snapshot)?;
    snap.snapstate = Some(SnapState::Delete);
    config.lock = Some(LockKind::Snapshot);
    persist_config(context, vmid, &config)?;
    Ok(())
}

fn run(storage: &dyn StorageBackend, registry: &SchemaRegistry, context: &RuntimeContext, vmid: u32, name: &str) -> Result<()> {
    let config = load_config(context, vmid)?;
    let snap = config
        .snapshots
        .get(name)
        .ok_or_else(|| SnapshotError::NotFound(name.to_string()))?;

    for (key, value) in &snap.fields {
        if config::drive::split_key(key).is_err() {
            continue;
        }
        let drive = config::drive::parse_drive(registry, key, value)?;
        if drive.is_cdrom(true) {
            continue;
        }
        storage.delete_disk_snapshot(&drive.file, name)?;
    }

    if let Some(volid) = &snap.vmstate {
        storage.free_volume(volid)?;
    }
    Ok(())
}

fn commit(context: &RuntimeContext, vmid: u32, name: &str) -> Result<()> {
    let _lock = util::lock::lock_vm(&context.lock_dir, vmid)?;
    let mut config = load_config(context, vmid)?;
    config.snapshots.remove(name);
    if config.parent.as_deref() == Some(name) {
        config.parent = None;
    }
    config.lock = None;
    persist_config(context, vmid, &config)?;
    Ok(())
}

pub fn delete_snapshot(storage: &dyn StorageBackend, registry: &SchemaRegistry, context: &RuntimeContext, vmid: u32, name: &str) -> Result<()> {
    prepare(context, vmid, name)?;
    run(storage, registry, context, vmid, name)?;
    commit(context, vmid, name)
}
