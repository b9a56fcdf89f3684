//! The monitor/liveness operations snapshot create/rollback need, behind
//! a trait so the two/three-phase orchestration is testable without a
//! live QEMU socket -- the same shape `device_manager::DeviceBackend`
//! uses.

use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use monitor::MonitorClient;
use util::context::RuntimeContext;

use crate::error::Result;
use crate::savevm;

pub trait SnapshotBackend {
    fn is_running(&self, vmid: u32) -> bool;
    fn capture_vmstate(&self, vmid: u32, statefile: &Path) -> Result<()>;
    fn stop_vm(&self, vmid: u32) -> Result<()>;
}

pub struct MonitorBackend<'a> {
    pub client: &'a MonitorClient,
    pub context: &'a RuntimeContext,
}

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(200);
const SHUTDOWN_POLL_ATTEMPTS: u32 = 25;

impl<'a> SnapshotBackend for MonitorBackend<'a> {
    fn is_running(&self, vmid: u32) -> bool {
        monitor::running::is_running(self.context, vmid)
    }

    fn capture_vmstate(&self, vmid: u32, statefile: &Path) -> Result<()> {
        savevm::capture_vmstate(self.client, vmid, statefile)
    }

    fn stop_vm(&self, vmid: u32) -> Result<()> {
        if !self.is_running(vmid) {
            return Ok(());
        }
        self.client.cmd(vmid, "quit", None, monitor::DEFAULT_TIMEOUT)?;
        for _ in 0..SHUTDOWN_POLL_ATTEMPTS {
            if !self.is_running(vmid) {
                return Ok(());
            }
            sleep(SHUTDOWN_POLL_INTERVAL);
        }
        Ok(())
    }
}
