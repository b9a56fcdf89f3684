//! The `Config` ordered-mapping data model: reserved keys, the pending
//! overlay, and the snapshots table.

use std::collections::BTreeMap;

use crate::drive::{self, Drive};
use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Migrate,
    Backup,
    Snapshot,
    Rollback,
    Clone,
    Create,
}

impl LockKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LockKind::Migrate => "migrate",
            LockKind::Backup => "backup",
            LockKind::Snapshot => "snapshot",
            LockKind::Rollback => "rollback",
            LockKind::Clone => "clone",
            LockKind::Create => "create",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "migrate" => Some(LockKind::Migrate),
            "backup" => Some(LockKind::Backup),
            "snapshot" => Some(LockKind::Snapshot),
            "rollback" => Some(LockKind::Rollback),
            "clone" => Some(LockKind::Clone),
            "create" => Some(LockKind::Create),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapState {
    Prepare,
    Delete,
}

/// One entry of `pending.delete`: a key to remove, optionally forced even
/// if the underlying resource is still allocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteEntry {
    pub key: String,
    pub force: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PendingOverlay {
    pub values: BTreeMap<String, String>,
    pub delete: Vec<DeleteEntry>,
}

impl PendingOverlay {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.delete.is_empty()
    }

    pub fn delete_csv(&self) -> String {
        self.delete
            .iter()
            .map(|e| if e.force { format!("!{}", e.key) } else { e.key.clone() })
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn parse_delete_csv(csv: &str) -> Vec<DeleteEntry> {
        csv.split(',')
            .filter(|s| !s.is_empty())
            .map(|s| {
                if let Some(stripped) = s.strip_prefix('!') {
                    DeleteEntry {
                        key: stripped.to_string(),
                        force: true,
                    }
                } else {
                    DeleteEntry {
                        key: s.to_string(),
                        force: false,
                    }
                }
            })
            .collect()
    }
}

/// A full-fidelity snapshot of Config (excluding the snapshots table
/// itself), augmented with capture-time metadata.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub fields: BTreeMap<String, String>,
    pub snaptime: u64,
    pub vmstate: Option<String>,
    pub machine: Option<String>,
    pub snapstate: Option<SnapState>,
    pub parent: Option<String>,
}

/// Ordered mapping from option key to string value, plus the pending
/// overlay and the snapshots table. This is the unit of per-VM state the
/// advisory lock protects.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub options: BTreeMap<String, String>,
    pub description: Option<String>,
    pub digest: Option<String>,
    pub snapstate: Option<SnapState>,
    pub lock: Option<LockKind>,
    pub parent: Option<String>,
    pub pending: PendingOverlay,
    pub snapshots: BTreeMap<String, Snapshot>,
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.options.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.options.remove(key)
    }

    /// Recompute and store `digest` over the canonical printed form of the
    /// live options (not the pending overlay or snapshots table).
    pub fn refresh_digest(&mut self) {
        let canonical: String = self
            .options
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();
        self.digest = Some(util::digest::sha1_hex(canonical.as_bytes()));
    }

    /// Every drive key (`ide0`, `scsi3`, `unused7`, ...) present in
    /// `options`, parsed.
    pub fn drives(&self, registry: &schema::SchemaRegistry) -> Result<Vec<Drive>> {
        let mut out = Vec::new();
        for (key, value) in &self.options {
            if drive::split_key(key).is_ok() {
                out.push(drive::parse_drive(registry, key, value)?);
            }
        }
        Ok(out)
    }
}

/// `is_volume_in_use`: scans the current config and every snapshot;
/// considers direct volid equality; excludes CD-ROMs; `skip_key` suppresses
/// one drive key during the current-config scan only.
pub fn is_volume_in_use(
    registry: &schema::SchemaRegistry,
    config: &Config,
    skip_key: Option<&str>,
    volid: &str,
) -> Result<bool> {
    for (key, value) in &config.options {
        if Some(key.as_str()) == skip_key {
            continue;
        }
        if drive::split_key(key).is_err() {
            continue;
        }
        let d = drive::parse_drive(registry, key, value)?;
        if d.is_cdrom(true) {
            continue;
        }
        if d.file == volid {
            return Ok(true);
        }
    }
    for snapshot in config.snapshots.values() {
        for (key, value) in &snapshot.fields {
            if drive::split_key(key).is_err() {
                continue;
            }
            let d = drive::parse_drive(registry, key, value)?;
            if d.is_cdrom(true) {
                continue;
            }
            if d.file == volid {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// `resolve_first_disk`: iterate `valid_drive_names()` in canonical boot
/// order, returning the first whose Drive satisfies the CD-ROM flag.
pub fn resolve_first_disk(
    registry: &schema::SchemaRegistry,
    config: &Config,
    want_cdrom: bool,
) -> Result<Option<String>> {
    for interface in drive::valid_drive_names() {
        for index in 0..=interface.max_index() {
            let key = format!("{}{}", interface.as_str(), index);
            let Some(value) = config.get(&key) else {
                continue;
            };
            let d = drive::parse_drive(registry, &key, value)?;
            if d.is_cdrom(false) == want_cdrom {
                return Ok(Some(key));
            }
        }
    }
    Ok(None)
}

/// `bootdisk_size`: follows either the legacy `bootdisk` scalar or the
/// `boot` property's `order=` list, returning the first non-CD-ROM disk's
/// size.
pub fn bootdisk_size(registry: &schema::SchemaRegistry, config: &Config) -> Result<Option<u64>> {
    if let Some(bootdisk) = config.get("bootdisk") {
        if let Some(value) = config.get(bootdisk) {
            let d = drive::parse_drive(registry, bootdisk, value)?;
            if !d.is_cdrom(true) {
                return Ok(Some(d.size));
            }
        }
    }
    if let Some(boot) = config.get("boot") {
        if let Some(order) = boot.strip_prefix("order=") {
            for key in order.split(';') {
                if let Some(value) = config.get(key) {
                    let d = drive::parse_drive(registry, key, value)?;
                    if !d.is_cdrom(true) {
                        return Ok(Some(d.size));
                    }
                }
            }
        }
    }
    Ok(resolve_first_disk(registry, config, false)?
        .and_then(|key| config.get(&key).map(|v| (key, v.to_string())))
        .map(|(key, value)| drive::parse_drive(registry, &key, &value))
        .transpose()?
        .map(|d| d.size))
}

/// Operator cancellation / in-band mutual exclusion: fails unless the
/// config is unlocked or already locked for the same operation kind.
pub fn check_lock_permits(config: &Config, kind: LockKind) -> Result<()> {
    match config.lock {
        None => Ok(()),
        Some(held) if held.as_str() == kind.as_str() => Ok(()),
        Some(held) => Err(ConfigError::Conflict(held.as_str().to_string())),
    }
}
