//! Snapshot rollback: prepare stops the VM and marks the config
//! `lock=rollback`; apply replaces the live fields with the snapshot's,
//! rolls back every disk on the storage layer, and reports whether the
//! caller needs to resume the VM from a captured vmstate.

use schema::SchemaRegistry;

use config::config::{check_lock_permits, LockKind};
use util::context::RuntimeContext;

use crate::backend::SnapshotBackend;
use crate::error::{Result, SnapshotError};
use crate::persist::{load_config, persist_config};
use crate::storage::StorageBackend;

/// What the caller must do after `rollback_snapshot` returns successfully:
/// if `resume_vmstate` is set, start the VM with `-loadstate` at that path
/// using the given machine type (command_builder's job, not this crate's).
pub struct RollbackOutcome {
    pub resume_vmstate: Option<(std::path::PathBuf, String)>,
}

fn prepare(context: &RuntimeContext, vmid: u32, name: &str) -> Result<()> {
    let _lock = util::lock::lock_vm(&context.lock_dir, vmid)?;
    let mut config = load_config(context, vmid)?;

    if !config.snapshots.contains_key(name) {
        return Err(SnapshotError::NotFound(name.to_string()));
    }
    check_lock_permits(&config, LockKind::Rollback)?;

    config.lock = Some(LockKind::Rollback);
    persist_config(context, vmid, &config)?;
    Ok(())
}

fn apply(
    storage: &dyn StorageBackend,
    registry: &SchemaRegistry,
    context: &RuntimeContext,
    vmid: u32,
    name: &str,
) -> Result<RollbackOutcome> {
    let mut config = load_config(context, vmid)?;
    let snap = config
        .snapshots
        .get(name)
        .ok_or_else(|| SnapshotError::NotFound(name.to_string()))?
        .clone();

    let preserved_unused: Vec<(String, String)> = config
        .options
        .iter()
        .filter(|(k, _)| k.starts_with("unused"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    config.options = snap.fields.clone();
    for (k, v) in preserved_unused {
        config.options.entry(k).or_insert(v);
    }

    let drives = config.drives(registry)?;
    for drive in drives.iter().filter(|d| !d.is_cdrom(true)) {
        storage.rollback_disk(&drive.file, name)?;
    }

    let resume_vmstate = match (&snap.vmstate, &snap.machine) {
        (Some(volid), Some(machine)) => Some((storage.volume_path(volid)?, machine.clone())),
        _ => None,
    };

    config.lock = None;
    persist_config(context, vmid, &config)?;

    Ok(RollbackOutcome { resume_vmstate })
}

pub fn rollback_snapshot(
    snapshot_backend: &dyn SnapshotBackend,
    storage: &dyn StorageBackend,
    registry: &SchemaRegistry,
    context: &RuntimeContext,
    vmid: u32,
    name: &str,
) -> Result<RollbackOutcome> {
    prepare(context, vmid, name)?;
    snapshot_backend.stop_vm(vmid)?;
    apply(storage, registry, context, vmid, name)
}
