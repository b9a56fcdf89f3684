//! The persisted, line-oriented config file: `key: value` lines, `#`
//! description comments, a `[PENDING]` section, and `[<name>]` snapshot
//! sections.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::{Config, LockKind, PendingOverlay, SnapState, Snapshot};
use crate::error::{ConfigError, Result};

static SNAPSHOT_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_-]+$").unwrap());

enum Section {
    Live,
    Pending,
    Snapshot(String),
}

/// Parse the whole config-file text into a `Config`. A `cdrom:` key is
/// rewritten to `ide2:` on read.
pub fn parse_config_file(text: &str) -> Result<Config> {
    let mut config = Config::new();
    let mut description_lines = Vec::new();
    let mut section = Section::Live;

    for raw_line in text.lines() {
        let line = raw_line.trim_end();
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            description_lines.push(comment.trim_start().to_string());
            continue;
        }
        if let Some(header) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            section = if header == "PENDING" {
                Section::Pending
            } else {
                if !SNAPSHOT_NAME_RE.is_match(header) {
                    return Err(ConfigError::MalformedLine(line.to_string()));
                }
                config
                    .snapshots
                    .entry(header.to_string())
                    .or_insert_with(Snapshot::default);
                Section::Snapshot(header.to_string())
            };
            continue;
        }

        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| ConfigError::MalformedLine(line.to_string()))?;
        let key = key.trim();
        let value = value.trim_start();

        match &section {
            Section::Live => assign_live_key(&mut config, key, value)?,
            Section::Pending => {
                if key == "delete" {
                    config.pending.delete = PendingOverlay::parse_delete_csv(value);
                } else {
                    config.pending.values.insert(key.to_string(), value.to_string());
                }
            }
            Section::Snapshot(name) => {
                if key == "delete" {
                    return Err(ConfigError::MalformedLine(
                        "delete: is only permitted in [PENDING]".to_string(),
                    ));
                }
                let snapshot = config.snapshots.get_mut(name).expect("section was inserted above");
                assign_snapshot_key(snapshot, key, value)?;
            }
        }
    }

    if !description_lines.is_empty() {
        config.description = Some(description_lines.join("\n"));
    }

    Ok(config)
}

fn assign_live_key(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let key = if key == "cdrom" { "ide2" } else { key };
    match key {
        "digest" => config.digest = Some(value.to_string()),
        "snapstate" => config.snapstate = parse_snapstate(value),
        "lock" => config.lock = LockKind::from_str(value),
        "parent" => config.parent = Some(value.to_string()),
        _ => {
            config.options.insert(key.to_string(), value.to_string());
        }
    }
    Ok(())
}

fn assign_snapshot_key(snapshot: &mut Snapshot, key: &str, value: &str) -> Result<()> {
    match key {
        "snaptime" => {
            snapshot.snaptime = value
                .parse()
                .map_err(|_| ConfigError::MalformedLine(format!("snaptime: {}", value)))?
        }
        "vmstate" => snapshot.vmstate = Some(value.to_string()),
        "machine" => snapshot.machine = Some(value.to_string()),
        "snapstate" => snapshot.snapstate = parse_snapstate(value),
        "parent" => snapshot.parent = Some(value.to_string()),
        _ => {
            snapshot.fields.insert(key.to_string(), value.to_string());
        }
    }
    Ok(())
}

fn parse_snapstate(value: &str) -> Option<SnapState> {
    match value {
        "prepare" => Some(SnapState::Prepare),
        "delete" => Some(SnapState::Delete),
        _ => None,
    }
}

/// Print the whole `Config` back to its persisted text form. Ordering:
/// description comments, sorted live keys, pending section, snapshot
/// sections in sorted order (both maps are `BTreeMap`s, so iteration order
/// is already sorted).
pub fn print_config_file(config: &Config) -> String {
    let mut out = String::new();

    if let Some(description) = &config.description {
        for line in description.lines() {
            out.push('#');
            out.push_str(line);
            out.push('\n');
        }
    }

    if let Some(digest) = &config.digest {
        out.push_str(&format!("digest: {}\n", digest));
    }
    if let Some(snapstate) = config.snapstate {
        out.push_str(&format!("snapstate: {}\n", snapstate_str(snapstate)));
    }
    if let Some(lock) = config.lock {
        out.push_str(&format!("lock: {}\n", lock.as_str()));
    }
    if let Some(parent) = &config.parent {
        out.push_str(&format!("parent: {}\n", parent));
    }
    for (key, value) in &config.options {
        out.push_str(&format!("{}: {}\n", key, value));
    }

    if !config.pending.is_empty() {
        out.push_str("[PENDING]\n");
        for (key, value) in &config.pending.values {
            out.push_str(&format!("{}: {}\n", key, value));
        }
        if !config.pending.delete.is_empty() {
            out.push_str(&format!("delete: {}\n", config.pending.delete_csv()));
        }
    }

    for (name, snapshot) in &config.snapshots {
        out.push_str(&format!("[{}]\n", name));
        if snapshot.snaptime != 0 {
            out.push_str(&format!("snaptime: {}\n", snapshot.snaptime));
        }
        if let Some(vmstate) = &snapshot.vmstate {
            out.push_str(&format!("vmstate: {}\n", vmstate));
        }
        if let Some(machine) = &snapshot.machine {
            out.push_str(&format!("machine: {}\n", machine));
        }
        if let Some(snapstate) = snapshot.snapstate {
            out.push_str(&format!("snapstate: {}\n", snapstate_str(snapstate)));
        }
        if let Some(parent) = &snapshot.parent {
            out.push_str(&format!("parent: {}\n", parent));
        }
        for (key, value) in &snapshot.fields {
            out.push_str(&format!("{}: {}\n", key, value));
        }
    }

    out
}

fn snapstate_str(state: SnapState) -> &'static str {
    match state {
        SnapState::Prepare => "prepare",
        SnapState::Delete => "delete",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cdrom_key_rewritten_to_ide2() {
        let config = parse_config_file("cdrom: local:iso/debian.iso,media=cdrom\n").unwrap();
        assert_eq!(config.get("ide2"), Some("local:iso/debian.iso,media=cdrom"));
        assert!(config.get("cdrom").is_none());
    }

    #[test]
    fn test_pending_and_delete() {
        let text = "memory: 2048\n[PENDING]\nmemory: 4096\ndelete: net1,!scsi2\n";
        let config = parse_config_file(text).unwrap();
        assert_eq!(config.pending.values.get("memory").map(String::as_str), Some("4096"));
        assert_eq!(config.pending.delete.len(), 2);
        assert!(config.pending.delete[1].force);
    }

    #[test]
    fn test_snapshot_section() {
        let text = "memory: 2048\n[before-upgrade]\nsnaptime: 1000\nmemory: 1024\nmachine: pc-q35-6.1\n";
        let config = parse_config_file(text).unwrap();
        let snap = config.snapshots.get("before-upgrade").unwrap();
        assert_eq!(snap.snaptime, 1000);
        assert_eq!(snap.fields.get("memory").map(String::as_str), Some("1024"));
        assert_eq!(snap.machine.as_deref(), Some("pc-q35-6.1"));
    }

    #[test]
    fn test_description_comments_round_trip() {
        let mut config = Config::new();
        config.description = Some("line one\nline two".to_string());
        config.set("memory", "2048");
        let printed = print_config_file(&config);
        assert!(printed.starts_with("#line one\n#line two\n"));
        let reparsed = parse_config_file(&printed).unwrap();
        assert_eq!(reparsed.description.as_deref(), Some("line one\nline two"));
    }
}
