//! `hotplug_pending`/`apply_pending`: the reconciliation loop that diffs a
//! `Config`'s pending overlay against the live options, classifies each
//! touched key fast-plug / runtime-classified / cold-plug, and either
//! applies it live (against a running VM) or folds it straight into the
//! live config (cold). A failed runtime-classified key is left in the
//! pending overlay rather than aborting the whole pass, so the rest of
//! the batch still lands and the operator sees exactly which option needs
//! a retry or a reboot.

use std::collections::BTreeMap;

use schema::SchemaRegistry;

use config::config::is_volume_in_use;
use config::drive::{self, Interface};
use config::{Config, Media};
use device_manager::plug::{deviceplug, deviceunplug, PlugRequest, PresenceCheck};
use device_manager::{cpu_hotplug, memory_hotplug, VERIFY_RETRIES};
use memory_planner::dimm::HugepageMode;
use pci_topology::{MachineKind, PciTopology};
use util::context::RuntimeContext;
use util::lock::lock_vm;

use crate::backend::PendingBackend;
use crate::cgroup::{write_cpulimit, write_cpuunits};
use crate::classify::{classify, numeric_suffix, ChangeClass};
use crate::error::{PendingError, Result};
use crate::persist::{load_config, persist_config};

/// Result of one `hotplug_pending` pass: which keys moved live, which
/// stayed pending because they aren't hotpluggable right now, and the
/// per-option failures, keyed by option name per the invariant that a
/// failed hotplug must not abort the rest of the batch.
#[derive(Debug, Default)]
pub struct HotplugOutcome {
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
    pub errors: BTreeMap<String, String>,
}

fn sockets_of(config: &Config) -> u32 {
    config.get("sockets").and_then(|v| v.parse().ok()).unwrap_or(1)
}

fn hugepage_mode_of(config: &Config) -> HugepageMode {
    config.get("hugepages").and_then(HugepageMode::from_str).unwrap_or(HugepageMode::Off)
}

fn numa_nodes_of(config: &Config) -> u32 {
    let count = config.options.keys().filter(|k| numeric_suffix(k, "numa")).count() as u32;
    count.max(1)
}

fn memory_mb_of(config: &Config) -> u64 {
    config.get("memory").and_then(|v| v.parse().ok()).unwrap_or(512)
}

fn cpu_type_of(config: &Config) -> String {
    config
        .get("cpu")
        .and_then(|s| s.split(',').next())
        .unwrap_or("host")
        .to_string()
}

fn invalid(key: &str, why: &str) -> PendingError {
    PendingError::Invalid(key.to_string(), why.to_string())
}

/// Step 1: move every fast-plug key out of the pending overlay straight
/// into the live config. No QEMU interaction, so this always succeeds.
fn move_fast_plug(config: &mut Config) -> Vec<String> {
    let keys: Vec<String> = config
        .pending
        .values
        .keys()
        .filter(|k| classify(k) == ChangeClass::FastPlug)
        .cloned()
        .collect();
    let mut applied = Vec::with_capacity(keys.len());
    for key in keys {
        if let Some(value) = config.pending.values.remove(&key) {
            config.options.insert(key.clone(), value);
            applied.push(key);
        }
    }
    applied
}

/// Step 2: `pending.delete`. Non-hotpluggable keys are marked skip
/// (carried to next boot, i.e. left in `pending.delete`); hotpluggable
/// ones are unplugged and removed on success, or recorded as a per-key
/// error and left in place on failure.
fn process_deletes(
    backend: &dyn PendingBackend,
    registry: &SchemaRegistry,
    config: &mut Config,
    skipped: &mut Vec<String>,
    errors: &mut BTreeMap<String, String>,
) {
    let entries = config.pending.delete.clone();
    let mut remaining = Vec::with_capacity(entries.len());
    for entry in entries {
        if classify(&entry.key) != ChangeClass::RuntimeClassified {
            skipped.push(entry.key.clone());
            remaining.push(entry);
            continue;
        }
        match delete_one(backend, registry, config, &entry.key, entry.force) {
            Ok(()) => {}
            Err(e) => {
                errors.insert(entry.key.clone(), e.to_string());
                remaining.push(entry);
            }
        }
    }
    config.pending.delete = remaining;
}

fn delete_one(
    backend: &dyn PendingBackend,
    registry: &SchemaRegistry,
    config: &mut Config,
    key: &str,
    force: bool,
) -> Result<()> {
    let Some(value) = config.get(key).map(str::to_string) else {
        return Ok(());
    };

    if let Ok((interface, _index)) = drive::split_key(key) {
        if interface != Interface::Unused {
            let drive = drive::parse_drive(registry, key, &value)?;
            if !force && is_volume_in_use(registry, config, Some(key), &drive.file)? {
                return Err(PendingError::VolumeInUse(drive.file));
            }
            if backend.is_running() {
                deviceunplug(backend.device(), key, PresenceCheck::Block, VERIFY_RETRIES)?;
            }
        }
        config.options.remove(key);
        return Ok(());
    }

    if numeric_suffix(key, "net") || numeric_suffix(key, "usb") {
        if backend.is_running() {
            deviceunplug(backend.device(), key, PresenceCheck::Pci, VERIFY_RETRIES)?;
        }
        config.options.remove(key);
        return Ok(());
    }

    // Scalar runtime-classified keys (tablet, vcpus, balloon, memory,
    // cpuunits, cpulimit, hotplug, agent) have no device identity of
    // their own to unplug; deleting them is a pure config edit.
    config.options.remove(key);
    Ok(())
}

/// Step 3: `pending` new values. Dispatches each runtime-classified key
/// to its class-specific handler; cold-plug keys are left untouched for
/// the next `apply_pending`.
fn process_updates(
    backend: &dyn PendingBackend,
    registry: &SchemaRegistry,
    config: &mut Config,
    vmid: u32,
    applied: &mut Vec<String>,
    skipped: &mut Vec<String>,
    errors: &mut BTreeMap<String, String>,
) {
    let keys: Vec<String> = config
        .pending
        .values
        .keys()
        .filter(|k| classify(k) == ChangeClass::RuntimeClassified)
        .cloned()
        .collect();
    if keys.is_empty() {
        return;
    }

    if cloudinit::regeneration_required(&keys) {
        if let Err(e) = backend.regenerate_cloudinit(vmid) {
            let message = e.to_string();
            for key in &keys {
                errors.insert(key.clone(), message.clone());
            }
            return;
        }
    }

    for key in keys {
        let Some(value) = config.pending.values.get(&key).cloned() else {
            continue;
        };
        match apply_one(backend, registry, config, vmid, &key, &value) {
            Ok(true) => {
                config.options.insert(key.clone(), value);
                config.pending.values.remove(&key);
                applied.push(key);
            }
            Ok(false) => skipped.push(key),
            Err(e) => {
                errors.insert(key, e.to_string());
            }
        }
    }
}

/// Apply one runtime-classified key's new value live. `Ok(true)` means
/// applied (caller moves it into the live config); `Ok(false)` means this
/// value is only ever applied cold (left pending, not an error).
fn apply_one(
    backend: &dyn PendingBackend,
    registry: &SchemaRegistry,
    config: &Config,
    vmid: u32,
    key: &str,
    value: &str,
) -> Result<bool> {
    match key {
        // Enabling or disabling the balloon device itself requires a
        // cold restart; only the target size (handled by "memory", not
        // this key) is adjustable live.
        "balloon" => Ok(false),

        "tablet" => {
            if !backend.is_running() {
                return Ok(false);
            }
            if value != "0" {
                let req = PlugRequest {
                    id: "tablet0",
                    device_str: "usb-tablet,id=tablet0,bus=usb.0",
                    drive_line: None,
                    netdev_line: None,
                    presence: PresenceCheck::Pci,
                };
                deviceplug(backend.device(), &req, VERIFY_RETRIES)?;
            } else {
                deviceunplug(backend.device(), "tablet0", PresenceCheck::Pci, VERIFY_RETRIES)?;
            }
            Ok(true)
        }

        "vcpus" => {
            if !backend.is_running() {
                return Ok(false);
            }
            let target: u32 = value.parse().map_err(|_| invalid(key, "not a number"))?;
            let current = backend.device().cpu_count()?;
            let cpu_type = cpu_type_of(config);
            match target.cmp(&current) {
                std::cmp::Ordering::Greater => {
                    for id in current..target {
                        cpu_hotplug::plug_vcpu(backend.device(), &cpu_type, id, 0, id)?;
                    }
                }
                std::cmp::Ordering::Less => {
                    for id in (target..current).rev() {
                        cpu_hotplug::unplug_vcpu(backend.device(), id, backend.qemu_version())?;
                    }
                }
                std::cmp::Ordering::Equal => {}
            }
            Ok(true)
        }

        "memory" => {
            if !backend.is_running() {
                return Ok(false);
            }
            let target_mb: u64 = value.parse().map_err(|_| invalid(key, "not a number"))?;
            memory_hotplug::memory_hotplug(
                backend.device(),
                backend.hugepage_sysfs(),
                backend.lock_dir(),
                sockets_of(config),
                hugepage_mode_of(config),
                numa_nodes_of(config),
                memory_mb_of(config),
                target_mb,
            )?;
            Ok(true)
        }

        "cpuunits" => {
            let shares: u64 = value.parse().map_err(|_| invalid(key, "not a number"))?;
            write_cpuunits(backend.cgroup_writer(), backend.cgroup_root(), vmid, shares)?;
            Ok(true)
        }

        "cpulimit" => {
            let limit: f64 = value.parse().map_err(|_| invalid(key, "not a number"))?;
            write_cpulimit(backend.cgroup_writer(), backend.cgroup_root(), vmid, limit)?;
            Ok(true)
        }

        // Property-only: no corresponding live device to reconcile.
        "hotplug" | "agent" => Ok(true),

        _ => {
            if let Ok((interface, _index)) = drive::split_key(key) {
                if interface == Interface::Unused {
                    return Ok(true);
                }
                return update_disk(backend, registry, config, key, value);
            }
            if numeric_suffix(key, "net") {
                return update_net(backend, registry, config, vmid, key, value);
            }
            if numeric_suffix(key, "usb") {
                return update_usb(backend, registry, config, key, value);
            }
            Ok(false)
        }
    }
}

/// The same `machine` option parsing `command_builder::build_command` uses
/// to pick a `PciTopology` kind -- kept identical so a hot-plugged device's
/// slot always lands where cold-start would have put it.
fn machine_kind_of(config: &Config) -> MachineKind {
    let machine_type = config.get("machine").unwrap_or("pc-q35");
    if machine_type.starts_with("q35") {
        MachineKind::Q35
    } else {
        MachineKind::Pc
    }
}

/// `update_disk`: in-place reconfigure by unplugging whatever currently
/// occupies the slot (if present) and plugging the new drive/device pair.
/// The PCI address is looked up from a fresh [`PciTopology`] rather than
/// invented inline, so it always matches what cold-start's
/// `command_builder` would have assigned the same logical id.
fn update_disk(backend: &dyn PendingBackend, registry: &SchemaRegistry, config: &Config, key: &str, value: &str) -> Result<bool> {
    if !backend.is_running() {
        return Ok(false);
    }
    let drive = drive::parse_drive(registry, key, value)?;
    let (interface, index) = drive::split_key(key)?;
    if matches!(interface, Interface::Efidisk | Interface::Tpmstate) {
        // No independent hot-pluggable device class backs these; the
        // option still updates live config, just without a QMP step.
        return Ok(true);
    }

    if backend.device().block_ids()?.contains(key) {
        deviceunplug(backend.device(), key, PresenceCheck::Block, VERIFY_RETRIES)?;
    }

    let drive_id = format!("drive-{}", key);
    let media = if drive.media == Media::Cdrom { "cdrom" } else { "disk" };
    let drive_line = format!("file={},id={},media={}", drive.file, drive_id, media);
    let mut pci = PciTopology::new(machine_kind_of(config));
    let device_str = match interface {
        Interface::Virtio => {
            let addr = pci.assign(key)?;
            format!("virtio-blk-pci,drive={},id={},addr={}", drive_id, key, addr.qemu_addr())
        }
        Interface::Scsi => {
            let bus = index / 7;
            let _hw_addr = pci.assign(&format!("scsihw{}", bus))?;
            format!("scsi-hd,bus=scsihw{}.0,scsi-id={},drive={},id={}", bus, index % 7, drive_id, key)
        }
        Interface::Sata => {
            let _ahci_addr = pci.assign("ahci0")?;
            format!("ide-hd,bus=ahci0.{},drive={},id={}", index, drive_id, key)
        }
        Interface::Ide => format!("ide-hd,bus=ide.{},drive={},id={}", index / 2, drive_id, key),
        Interface::Efidisk | Interface::Tpmstate | Interface::Unused => unreachable!(),
    };

    let req = PlugRequest {
        id: key,
        device_str: &device_str,
        drive_line: Some(&drive_line),
        netdev_line: None,
        presence: PresenceCheck::Block,
    };
    deviceplug(backend.device(), &req, VERIFY_RETRIES)?;
    Ok(true)
}

/// `update_net`: same in-place-reconfigure-then-replug shape as
/// `update_disk`, built from [`config::net::parse_net`].
fn update_net(backend: &dyn PendingBackend, registry: &SchemaRegistry, config: &Config, vmid: u32, key: &str, value: &str) -> Result<bool> {
    if !backend.is_running() {
        return Ok(false);
    }
    let net = config::net::parse_net(registry, value)?;

    if backend.device().pci_device_ids()?.contains(key) {
        deviceunplug(backend.device(), key, PresenceCheck::Pci, VERIFY_RETRIES)?;
    }

    let slot: u32 = key.trim_start_matches("net").parse().unwrap_or(0);
    let netdev_line = match &net.bridge {
        Some(_bridge) => format!("type=tap,id={},ifname=tap{}i{}", key, vmid, slot),
        None => format!("type=user,id={}", key),
    };
    let mac = net
        .macaddr
        .clone()
        .unwrap_or_else(|| config::net::generate_macaddr(backend.oui_prefix(), vmid, slot));
    let mut pci = PciTopology::new(machine_kind_of(config));
    let addr = pci.assign(key)?;
    let device_str = format!("{},mac={},netdev={},id={},addr={}", net.model, mac, key, key, addr.qemu_addr());

    let req = PlugRequest {
        id: key,
        device_str: &device_str,
        drive_line: None,
        netdev_line: Some(&netdev_line),
        presence: PresenceCheck::Pci,
    };
    deviceplug(backend.device(), &req, VERIFY_RETRIES)?;
    Ok(true)
}

/// `update_usb`: plug a `usb-host`/`usb-redir` device for a `usbN` slot,
/// creating the shared `usb-bus` controller first if no usbN device has
/// been live yet (the controller's own PCI address is the same
/// `PciTopology::assign("usb-bus")` cold-start uses, so it lands on the
/// bus/slot `command_builder::push_usb` would have chosen at boot).
fn update_usb(backend: &dyn PendingBackend, registry: &SchemaRegistry, config: &Config, key: &str, value: &str) -> Result<bool> {
    if !backend.is_running() {
        return Ok(false);
    }
    if backend.device().usb_device_ids()?.contains(key) {
        deviceunplug(backend.device(), key, PresenceCheck::Usb, VERIFY_RETRIES)?;
    }
    if value.is_empty() {
        return Ok(true);
    }

    let usb = config::usb::parse_usb(registry, value)?;
    let mut pci = PciTopology::new(machine_kind_of(config));

    if !backend.device().pci_device_ids()?.contains("usb-bus") {
        let addr = pci.assign("usb-bus")?;
        let controller_str = if usb.usb3 {
            format!("qemu-xhci,id=usb-bus,addr={}", addr.qemu_addr())
        } else {
            format!("piix3-usb-uhci,id=usb-bus,addr={}", addr.qemu_addr())
        };
        let req = PlugRequest {
            id: "usb-bus",
            device_str: &controller_str,
            drive_line: None,
            netdev_line: None,
            presence: PresenceCheck::Pci,
        };
        deviceplug(backend.device(), &req, VERIFY_RETRIES)?;
    }

    let device_str = match &usb.source {
        config::UsbSource::Host { vendor_product } => {
            let (vendor, product) = vendor_product
                .split_once(':')
                .ok_or_else(|| invalid(key, "expected host=vendorid:productid"))?;
            format!(
                "usb-host,vendorid=0x{},productid=0x{},id={},bus=usb-bus.0",
                vendor, product, key
            )
        }
        config::UsbSource::Spice => format!("usb-redir,chardev=usbredir{},id={},bus=usb-bus.0", key, key),
    };
    let req = PlugRequest {
        id: key,
        device_str: &device_str,
        drive_line: None,
        netdev_line: None,
        presence: PresenceCheck::Usb,
    };
    deviceplug(backend.device(), &req, VERIFY_RETRIES)?;
    Ok(true)
}

/// Reconcile `vmid`'s pending overlay against its running VM: fast-plug
/// values move over unconditionally, then deletes and new values are
/// processed against a live QEMU per [`PendingBackend`]. The mutated
/// config is persisted once before returning, whether or not every key
/// succeeded, so a successful subset is never lost.
pub fn hotplug_pending(
    backend: &dyn PendingBackend,
    registry: &SchemaRegistry,
    context: &RuntimeContext,
    vmid: u32,
) -> Result<HotplugOutcome> {
    let _lock = lock_vm(&context.lock_dir, vmid)?;
    let mut config = load_config(context, vmid)?;

    let mut outcome = HotplugOutcome::default();
    outcome.applied.extend(move_fast_plug(&mut config));
    process_deletes(backend, registry, &mut config, &mut outcome.skipped, &mut outcome.errors);
    process_updates(backend, registry, &mut config, vmid, &mut outcome.applied, &mut outcome.skipped, &mut outcome.errors);

    persist_config(context, vmid, &config)?;
    Ok(outcome)
}

/// Cold equivalent: the VM isn't running, so every pending entry folds
/// straight into the live config with no verify loop. Deletions simply
/// remove the key; new values overwrite it. `conf.pending` is empty
/// afterwards.
pub fn apply_pending(context: &RuntimeContext, vmid: u32) -> Result<()> {
    let _lock = lock_vm(&context.lock_dir, vmid)?;
    let mut config = load_config(context, vmid)?;

    for entry in config.pending.delete.drain(..).collect::<Vec<_>>() {
        config.options.remove(&entry.key);
    }
    for (key, value) in std::mem::take(&mut config.pending.values) {
        config.options.insert(key, value);
    }

    persist_config(context, vmid, &config)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::path::{Path, PathBuf};

    use config::config::DeleteEntry;
    use device_manager::DeviceBackend;
    use memory_planner::hugepage::HugepageSysfs;

    use crate::cgroup::CgroupWriter;

    fn registry() -> SchemaRegistry {
        config::build_registry()
    }

    #[derive(Default)]
    struct FakeDevice {
        pci: RefCell<HashSet<String>>,
        block: RefCell<HashSet<String>>,
        usb: RefCell<HashSet<String>>,
        cpu_count: RefCell<u32>,
    }

    impl DeviceBackend for FakeDevice {
        fn pci_device_ids(&self) -> device_manager::Result<HashSet<String>> {
            Ok(self.pci.borrow().clone())
        }
        fn block_ids(&self) -> device_manager::Result<HashSet<String>> {
            Ok(self.block.borrow().clone())
        }
        fn mouse_ids(&self) -> device_manager::Result<HashSet<String>> {
            Ok(HashSet::new())
        }
        fn usb_device_ids(&self) -> device_manager::Result<HashSet<String>> {
            Ok(self.usb.borrow().clone())
        }
        fn cpu_count(&self) -> device_manager::Result<u32> {
            Ok(*self.cpu_count.borrow())
        }
        fn memory_device_ids(&self) -> device_manager::Result<HashSet<String>> {
            Ok(HashSet::new())
        }
        fn device_add(&self, device_str: &str) -> device_manager::Result<()> {
            let id = device_str.split(',').find_map(|kv| kv.strip_prefix("id=")).unwrap_or_default();
            if device_str.contains("cpu") {
                *self.cpu_count.borrow_mut() += 1;
            } else if device_str.contains("usb-host") || device_str.contains("usb-redir") {
                self.usb.borrow_mut().insert(id.to_string());
            } else if device_str.contains("netdev=") {
                self.pci.borrow_mut().insert(id.to_string());
            } else {
                self.block.borrow_mut().insert(id.to_string());
            }
            Ok(())
        }
        fn device_del(&self, id: &str) -> device_manager::Result<()> {
            self.pci.borrow_mut().remove(id);
            self.block.borrow_mut().remove(id);
            self.usb.borrow_mut().remove(id);
            Ok(())
        }
        fn drive_add(&self, _hmp_line: &str) -> device_manager::Result<()> {
            Ok(())
        }
        fn drive_del(&self, _id: &str) -> device_manager::Result<()> {
            Ok(())
        }
        fn netdev_add(&self, _netdev_str: &str) -> device_manager::Result<()> {
            Ok(())
        }
        fn netdev_del(&self, _id: &str) -> device_manager::Result<()> {
            Ok(())
        }
        fn object_add(&self, _qom_type: &str, _id: &str, _props: &str) -> device_manager::Result<()> {
            Ok(())
        }
        fn object_del(&self, _id: &str) -> device_manager::Result<()> {
            Ok(())
        }
    }

    struct FakeSysfs;
    impl HugepageSysfs for FakeSysfs {
        fn read_nr(&self, _node: u32, _size_kb: u64) -> std::io::Result<u64> {
            Ok(0)
        }
        fn read_free(&self, _node: u32, _size_kb: u64) -> std::io::Result<u64> {
            Ok(0)
        }
        fn write_nr(&self, _node: u32, _size_kb: u64, _count: u64) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct FakeCgroup {
        writes: RefCell<Vec<(PathBuf, String)>>,
    }
    impl CgroupWriter for FakeCgroup {
        fn write(&self, path: &Path, value: &str) -> Result<()> {
            self.writes.borrow_mut().push((path.to_path_buf(), value.to_string()));
            Ok(())
        }
    }

    struct FakeBackend {
        device: FakeDevice,
        sysfs: FakeSysfs,
        cgroup: FakeCgroup,
        cgroup_root: PathBuf,
        lock_dir: PathBuf,
        running: bool,
        regenerated: RefCell<Vec<u32>>,
    }

    impl PendingBackend for FakeBackend {
        fn device(&self) -> &dyn DeviceBackend {
            &self.device
        }
        fn cgroup_writer(&self) -> &dyn CgroupWriter {
            &self.cgroup
        }
        fn cgroup_root(&self) -> &Path {
            &self.cgroup_root
        }
        fn hugepage_sysfs(&self) -> &dyn HugepageSysfs {
            &self.sysfs
        }
        fn lock_dir(&self) -> &Path {
            &self.lock_dir
        }
        fn is_running(&self) -> bool {
            self.running
        }
        fn qemu_version(&self) -> (u32, u32) {
            (6, 2)
        }
        fn oui_prefix(&self) -> [u8; 3] {
            [0x02, 0x11, 0x22]
        }
        fn regenerate_cloudinit(&self, vmid: u32) -> Result<()> {
            self.regenerated.borrow_mut().push(vmid);
            Ok(())
        }
    }

    fn fake_backend(running: bool) -> FakeBackend {
        FakeBackend {
            device: FakeDevice::default(),
            sysfs: FakeSysfs,
            cgroup: FakeCgroup { writes: RefCell::new(Vec::new()) },
            cgroup_root: PathBuf::from("/sys/fs/cgroup/cpu"),
            lock_dir: std::env::temp_dir(),
            running,
            regenerated: RefCell::new(Vec::new()),
        }
    }

    #[test]
    fn test_move_fast_plug_moves_and_removes() {
        let mut config = Config::new();
        config.pending.values.insert("description".to_string(), "hi".to_string());
        config.pending.values.insert("memory".to_string(), "2048".to_string());
        let moved = move_fast_plug(&mut config);
        assert_eq!(moved, vec!["description".to_string()]);
        assert_eq!(config.get("description"), Some("hi"));
        assert!(config.pending.values.contains_key("memory"));
    }

    #[test]
    fn test_process_deletes_skips_non_hotpluggable() {
        let registry = registry();
        let backend = fake_backend(true);
        let mut config = Config::new();
        config.set("sockets", "2");
        config.pending.delete.push(DeleteEntry { key: "sockets".to_string(), force: false });
        let mut skipped = Vec::new();
        let mut errors = BTreeMap::new();
        process_deletes(&backend, &registry, &mut config, &mut skipped, &mut errors);
        assert_eq!(skipped, vec!["sockets".to_string()]);
        assert!(errors.is_empty());
        assert_eq!(config.pending.delete.len(), 1);
        assert_eq!(config.get("sockets"), Some("2"));
    }

    #[test]
    fn test_process_deletes_refuses_volume_still_in_snapshot() {
        let registry = registry();
        let backend = fake_backend(true);
        let mut config = Config::new();
        config.set("scsi0", "file=vm-100-disk-0,size=10G");
        config.pending.delete.push(DeleteEntry { key: "scsi0".to_string(), force: false });
        let mut fields = std::collections::BTreeMap::new();
        fields.insert("scsi0".to_string(), "file=vm-100-disk-0,size=10G".to_string());
        config.snapshots.insert(
            "snap1".to_string(),
            config::config::Snapshot { fields, ..Default::default() },
        );
        let mut skipped = Vec::new();
        let mut errors = BTreeMap::new();
        process_deletes(&backend, &registry, &mut config, &mut skipped, &mut errors);
        assert!(errors.contains_key("scsi0"));
        assert_eq!(config.pending.delete.len(), 1);
        assert_eq!(config.get("scsi0"), Some("file=vm-100-disk-0,size=10G"));
    }

    #[test]
    fn test_process_updates_cpuunits_and_cpulimit_write_cgroup() {
        let registry = registry();
        let backend = fake_backend(true);
        let mut config = Config::new();
        config.pending.values.insert("cpuunits".to_string(), "2048".to_string());
        config.pending.values.insert("cpulimit".to_string(), "1.5".to_string());
        let mut applied = Vec::new();
        let mut skipped = Vec::new();
        let mut errors = BTreeMap::new();
        process_updates(&backend, &registry, &mut config, 100, &mut applied, &mut skipped, &mut errors);
        assert!(errors.is_empty());
        assert_eq!(applied.len(), 2);
        assert_eq!(config.get("cpuunits"), Some("2048"));
        assert_eq!(config.get("cpulimit"), Some("1.5"));
        assert_eq!(backend.cgroup.writes.borrow().len(), 3);
    }

    #[test]
    fn test_process_updates_balloon_is_left_pending() {
        let registry = registry();
        let backend = fake_backend(true);
        let mut config = Config::new();
        config.pending.values.insert("balloon".to_string(), "512".to_string());
        let mut applied = Vec::new();
        let mut skipped = Vec::new();
        let mut errors = BTreeMap::new();
        process_updates(&backend, &registry, &mut config, 100, &mut applied, &mut skipped, &mut errors);
        assert!(applied.is_empty());
        assert!(errors.is_empty());
        assert_eq!(skipped, vec!["balloon".to_string()]);
        assert!(config.pending.values.contains_key("balloon"));
        assert_eq!(config.get("balloon"), None);
    }

    #[test]
    fn test_process_updates_net_triggers_cloudinit_regeneration() {
        let registry = registry();
        let backend = fake_backend(true);
        let mut config = Config::new();
        config.pending.values.insert("net0".to_string(), "virtio,bridge=vmbr0".to_string());
        let mut applied = Vec::new();
        let mut skipped = Vec::new();
        let mut errors = BTreeMap::new();
        process_updates(&backend, &registry, &mut config, 100, &mut applied, &mut skipped, &mut errors);
        assert!(errors.is_empty());
        assert_eq!(applied, vec!["net0".to_string()]);
        assert_eq!(*backend.regenerated.borrow(), vec![100]);
        assert!(backend.device.pci.borrow().contains("net0"));
    }

    #[test]
    fn test_process_updates_vcpus_grows_and_shrinks() {
        let registry = registry();
        let backend = fake_backend(true);
        *backend.device.cpu_count.borrow_mut() = 1;
        let mut config = Config::new();
        config.set("vcpus", "1");
        config.pending.values.insert("vcpus".to_string(), "3".to_string());
        let mut applied = Vec::new();
        let mut skipped = Vec::new();
        let mut errors = BTreeMap::new();
        process_updates(&backend, &registry, &mut config, 100, &mut applied, &mut skipped, &mut errors);
        assert!(errors.is_empty());
        assert_eq!(*backend.device.cpu_count.borrow(), 3);
        assert_eq!(config.get("vcpus"), Some("3"));
    }

    #[test]
    fn test_process_updates_stopped_vm_leaves_runtime_keys_pending() {
        let registry = registry();
        let backend = fake_backend(false);
        let mut config = Config::new();
        config.pending.values.insert("memory".to_string(), "2048".to_string());
        let mut applied = Vec::new();
        let mut skipped = Vec::new();
        let mut errors = BTreeMap::new();
        process_updates(&backend, &registry, &mut config, 100, &mut applied, &mut skipped, &mut errors);
        assert!(applied.is_empty());
        assert!(errors.is_empty());
        assert_eq!(skipped, vec!["memory".to_string()]);
        assert!(config.pending.values.contains_key("memory"));
    }
}
