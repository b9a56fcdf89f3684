//! Process-wide context. Replaces the implicit globals (nodename, runtime
//! tmpdir, pcisysfs path) the design notes call out: built once at startup
//! and threaded through explicitly rather than read from a global.

use std::path::{Path, PathBuf};

/// Paths and identity shared by every call into the control plane. Built
/// once in `main` and passed down by reference; never stored behind a
/// `static` or thread-local.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    /// Name of the node this control plane instance runs on.
    pub node_name: String,
    /// Directory holding per-VM runtime state: monitor sockets, pidfiles.
    pub runtime_dir: PathBuf,
    /// Directory holding advisory lock files (both per-VM and the
    /// process-wide hugepage lock).
    pub lock_dir: PathBuf,
    /// Directory configs are persisted under, one file per VM.
    pub config_dir: PathBuf,
    /// Root of the host's hugepage sysfs tree
    /// (`/sys/kernel/mm/hugepages`, `/sys/devices/system/node/node*/hugepages`).
    pub hugepage_sysfs_root: PathBuf,
}

impl RuntimeContext {
    /// Build a context from environment variables, falling back to the
    /// conventional filesystem layout when a variable is unset.
    pub fn from_env() -> Self {
        let node_name = std::env::var("VMCTL_NODE_NAME").unwrap_or_else(|_| {
            nix::unistd::gethostname()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "localhost".to_string())
        });
        let runtime_dir = std::env::var("VMCTL_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/run/vmctl"));
        let lock_dir = std::env::var("VMCTL_LOCK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/run/vmctl/lock"));
        let config_dir = std::env::var("VMCTL_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/etc/vmctl/qemu-server"));
        let hugepage_sysfs_root = std::env::var("VMCTL_HUGEPAGE_SYSFS_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/sys/kernel/mm/hugepages"));

        RuntimeContext {
            node_name,
            runtime_dir,
            lock_dir,
            config_dir,
            hugepage_sysfs_root,
        }
    }

    /// Path of the monitor (QMP) UNIX socket for a given VM.
    pub fn monitor_socket_path(&self, vmid: u32) -> PathBuf {
        self.runtime_dir.join(format!("{}.qmp", vmid))
    }

    /// Path of the pidfile for a given VM.
    pub fn pidfile_path(&self, vmid: u32) -> PathBuf {
        self.runtime_dir.join(format!("{}.pid", vmid))
    }

    /// Path of the persisted config file for a given VM.
    pub fn config_path(&self, vmid: u32) -> PathBuf {
        self.config_dir.join(format!("{}.conf", vmid))
    }

    /// Per-NUMA-node hugepage directory for a given page size in KiB.
    pub fn node_hugepage_dir(&self, node: u32, size_kb: u64) -> PathBuf {
        Path::new("/sys/devices/system/node")
            .join(format!("node{}", node))
            .join("hugepages")
            .join(format!("hugepages-{}kB", size_kb))
    }
}
