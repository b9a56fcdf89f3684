//! Liveness check backing `cmd`'s running-assertion: read the VM's pidfile
//! and probe it with signal 0, the same "is it actually still there"
//! technique file-restore VM teardown uses before deciding a process is
//! worth talking to.

use nix::sys::signal::kill;
use nix::unistd::Pid;

use util::context::RuntimeContext;

pub fn is_running(context: &RuntimeContext, vmid: u32) -> bool {
    let pidfile = context.pidfile_path(vmid);
    let raw = match std::fs::read_to_string(&pidfile) {
        Ok(s) => s,
        Err(_) => return false,
    };
    let pid: i32 = match raw.trim().parse() {
        Ok(p) => p,
        Err(_) => return false,
    };
    kill(Pid::from_raw(pid), None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_pidfile_is_not_running() {
        let context = RuntimeContext {
            node_name: "test".to_string(),
            runtime_dir: std::env::temp_dir().join("vmctl-monitor-test-missing"),
            lock_dir: std::env::temp_dir().join("vmctl-monitor-test-missing"),
            config_dir: std::env::temp_dir().join("vmctl-monitor-test-missing"),
            hugepage_sysfs_root: std::env::temp_dir(),
        };
        assert!(!is_running(&context, 9999));
    }

    #[test]
    fn test_own_pid_is_running() {
        let dir = std::env::temp_dir().join(format!("vmctl-monitor-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let context = RuntimeContext {
            node_name: "test".to_string(),
            runtime_dir: dir.clone(),
            lock_dir: dir.clone(),
            config_dir: dir.clone(),
            hugepage_sysfs_root: dir.clone(),
        };
        let mut f = std::fs::File::create(context.pidfile_path(100)).unwrap();
        write!(f, "{}", std::process::id()).unwrap();
        assert!(is_running(&context, 100));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
