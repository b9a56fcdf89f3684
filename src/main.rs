//! `vmctl`: node-local KVM/QEMU VM lifecycle control plane CLI. Thin
//! wiring layer over the library crates -- argument parsing and concrete
//! backend construction live here; every algorithm lives in its own
//! crate and is exercised there under a fake backend.

mod storage;

use std::path::PathBuf;
use std::process::ExitCode;

use config::config::DeleteEntry;
use device_manager::MonitorBackend;
use memory_planner::hugepage::FsHugepageSysfs;
use monitor::MonitorClient;
use pending_engine::cgroup::FsCgroupWriter;
use pending_engine::PendingBackend;
use schema::SchemaRegistry;
use util::context::RuntimeContext;

use storage::FsStorageBackend;

fn usage() -> &'static str {
    "usage: vmctl <command> [args]\n\
     commands:\n\
     \x20 set <vmid> <key>=<value> [...]       stage values in the pending overlay\n\
     \x20 delete <vmid> <key> [...]            stage deletions (prefix key with ! to force)\n\
     \x20 hotplug-pending <vmid>               reconcile the pending overlay live\n\
     \x20 apply-pending <vmid>                 fold the pending overlay in cold\n\
     \x20 snapshot create <vmid> <name> [--vmstate]\n\
     \x20 snapshot rollback <vmid> <name>\n\
     \x20 snapshot delete <vmid> <name>\n\
     \x20 import-ovf <ovf-path> <vmid>         persist an imported OVF as vmid's config\n"
}

/// Real-world [`PendingBackend`]: a QMP round trip per device call, the
/// host hugepage sysfs tree, and the VM's cgroup scope.
struct LivePendingBackend<'a> {
    device: MonitorBackend<'a>,
    sysfs: FsHugepageSysfs,
    cgroup: FsCgroupWriter,
    cgroup_root: PathBuf,
    context: &'a RuntimeContext,
    registry: &'a SchemaRegistry,
    vmid: u32,
}

impl<'a> PendingBackend for LivePendingBackend<'a> {
    fn device(&self) -> &dyn device_manager::DeviceBackend {
        &self.device
    }
    fn cgroup_writer(&self) -> &dyn pending_engine::cgroup::CgroupWriter {
        &self.cgroup
    }
    fn cgroup_root(&self) -> &std::path::Path {
        &self.cgroup_root
    }
    fn hugepage_sysfs(&self) -> &dyn memory_planner::hugepage::HugepageSysfs {
        &self.sysfs
    }
    fn lock_dir(&self) -> &std::path::Path {
        &self.context.lock_dir
    }
    fn is_running(&self) -> bool {
        monitor::running::is_running(self.context, self.vmid)
    }
    fn qemu_version(&self) -> (u32, u32) {
        // A real deployment would read this from `query-version`; fixed
        // here at a version known to support vCPU unplug.
        device_manager::cpu_hotplug::MIN_UNPLUG_VERSION
    }
    fn oui_prefix(&self) -> [u8; 3] {
        [0x52, 0x54, 0x00]
    }
    fn regenerate_cloudinit(&self, vmid: u32) -> pending_engine::Result<()> {
        let text = std::fs::read_to_string(self.context.config_path(vmid))
            .map_err(pending_engine::PendingError::Io)?;
        let config =
            config::codec::parse_config_file(&text).map_err(pending_engine::PendingError::Config)?;
        let Some(drive) = config
            .drives(self.registry)
            .map_err(pending_engine::PendingError::Config)?
            .into_iter()
            .find(|d| d.is_cloudinit())
        else {
            return Ok(());
        };
        let name = config.get("name").unwrap_or("vm").to_string();
        cloudinit::generate_and_commit(
            self.registry,
            &config,
            &name,
            vmid,
            self.oui_prefix(),
            &self.context.runtime_dir,
            std::path::Path::new(&drive.file),
            |volid| std::fs::read_to_string(volid).map_err(cloudinit::CloudinitError::from),
        )
        .map_err(|e| pending_engine::PendingError::Invalid("cicustom".to_string(), e.to_string()))
    }
}

fn cmd_set(context: &RuntimeContext, vmid: u32, assignments: &[String]) -> anyhow::Result<()> {
    let mut config = snapshot::persist::load_config(context, vmid)?;
    for assignment in assignments {
        let (key, value) = assignment
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected key=value, got '{}'", assignment))?;
        config.pending.values.insert(key.to_string(), value.to_string());
    }
    snapshot::persist::persist_config(context, vmid, &config)?;
    Ok(())
}

fn cmd_delete(context: &RuntimeContext, vmid: u32, keys: &[String]) -> anyhow::Result<()> {
    let mut config = snapshot::persist::load_config(context, vmid)?;
    for raw in keys {
        let (key, force) = match raw.strip_prefix('!') {
            Some(stripped) => (stripped.to_string(), true),
            None => (raw.clone(), false),
        };
        config.pending.delete.push(DeleteEntry { key, force });
    }
    snapshot::persist::persist_config(context, vmid, &config)?;
    Ok(())
}

fn cmd_hotplug_pending(context: &RuntimeContext, registry: &SchemaRegistry, vmid: u32) -> anyhow::Result<()> {
    let client = MonitorClient::new(context.clone());
    let backend = LivePendingBackend {
        device: MonitorBackend { client: &client, vmid },
        sysfs: FsHugepageSysfs { context: context.clone() },
        cgroup: FsCgroupWriter,
        cgroup_root: PathBuf::from("/sys/fs/cgroup/cpu"),
        context,
        registry,
        vmid,
    };
    let outcome = pending_engine::hotplug_pending(&backend, registry, context, vmid)?;
    log::info!(
        "vmid {}: applied {:?}, skipped {:?}, {} error(s)",
        vmid,
        outcome.applied,
        outcome.skipped,
        outcome.errors.len()
    );
    for (key, message) in &outcome.errors {
        log::warn!("vmid {}: {} failed: {}", vmid, key, message);
    }
    Ok(())
}

fn cmd_apply_pending(context: &RuntimeContext, vmid: u32) -> anyhow::Result<()> {
    pending_engine::apply_pending(context, vmid)?;
    Ok(())
}

fn cmd_snapshot(context: &RuntimeContext, registry: &SchemaRegistry, args: &[String]) -> anyhow::Result<()> {
    let [action, vmid_str, name, rest @ ..] = args else {
        anyhow::bail!("{}", usage());
    };
    let vmid: u32 = vmid_str.parse()?;
    let client = MonitorClient::new(context.clone());
    let storage = FsStorageBackend { runtime_dir: context.runtime_dir.clone() };
    let snapshot_backend = snapshot::MonitorBackend { client: &client, context };

    match action.as_str() {
        "create" => {
            let with_vmstate = rest.iter().any(|a| a == "--vmstate");
            snapshot::create_snapshot(&snapshot_backend, &storage, registry, context, vmid, name, with_vmstate)?;
        }
        "rollback" => {
            let outcome = snapshot::rollback_snapshot(&snapshot_backend, &storage, registry, context, vmid, name)?;
            if let Some((path, machine)) = outcome.resume_vmstate {
                log::info!("vmid {}: resume from vmstate {:?} (machine {})", vmid, path, machine);
            }
        }
        "delete" => {
            snapshot::delete_snapshot(&storage, registry, context, vmid, name)?;
        }
        other => anyhow::bail!("unknown snapshot subcommand '{}'\n{}", other, usage()),
    }
    Ok(())
}

fn cmd_import_ovf(context: &RuntimeContext, path: &str, vmid: u32) -> anyhow::Result<()> {
    let result = ovf_importer::import_ovf(std::path::Path::new(path))?;
    std::fs::write(context.config_path(vmid), config::codec::print_config_file(&result.config))?;
    log::info!("vmid {}: imported '{}' from {}", vmid, result.config.get("name").unwrap_or(""), path);
    Ok(())
}

fn run() -> anyhow::Result<()> {
    let registry = config::build_registry();
    let context = RuntimeContext::from_env();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        anyhow::bail!("{}", usage());
    };

    match command.as_str() {
        "set" => {
            let [vmid_str, assignments @ ..] = rest else { anyhow::bail!("{}", usage()) };
            cmd_set(&context, vmid_str.parse()?, assignments)
        }
        "delete" => {
            let [vmid_str, keys @ ..] = rest else { anyhow::bail!("{}", usage()) };
            cmd_delete(&context, vmid_str.parse()?, keys)
        }
        "hotplug-pending" => {
            let [vmid_str] = rest else { anyhow::bail!("{}", usage()) };
            cmd_hotplug_pending(&context, &registry, vmid_str.parse()?)
        }
        "apply-pending" => {
            let [vmid_str] = rest else { anyhow::bail!("{}", usage()) };
            cmd_apply_pending(&context, vmid_str.parse()?)
        }
        "snapshot" => cmd_snapshot(&context, &registry, rest),
        "import-ovf" => {
            let [path, vmid_str] = rest else { anyhow::bail!("{}", usage()) };
            cmd_import_ovf(&context, path, vmid_str.parse()?)
        }
        _ => anyhow::bail!("{}", usage()),
    }
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
