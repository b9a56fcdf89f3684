//! `cpuunits`/`cpulimit` write straight through to the VM's cgroup,
//! bypassing QMP entirely -- behind a trait for the same reason
//! `memory_planner::HugepageSysfs` is: so the reconciliation logic is
//! testable without a live cgroupfs.

use std::path::PathBuf;

use crate::error::Result;

pub trait CgroupWriter {
    fn write(&self, path: &std::path::Path, value: &str) -> Result<()>;
}

pub struct FsCgroupWriter;

impl CgroupWriter for FsCgroupWriter {
    fn write(&self, path: &std::path::Path, value: &str) -> Result<()> {
        std::fs::write(path, value)?;
        Ok(())
    }
}

fn scope_dir(cgroup_root: &std::path::Path, vmid: u32) -> PathBuf {
    cgroup_root.join("qemu.slice").join(format!("{}.scope", vmid))
}

/// `cpuunits` maps to `cpu.shares` (or `cpu.weight` on a cgroup v2 host,
/// left to the caller's choice of `cgroup_root`).
pub fn write_cpuunits(writer: &dyn CgroupWriter, cgroup_root: &std::path::Path, vmid: u32, shares: u64) -> Result<()> {
    writer.write(&scope_dir(cgroup_root, vmid).join("cpu.shares"), &shares.to_string())
}

/// `cpulimit` (in whole or fractional CPUs, `0` = unlimited) maps to the
/// CFS quota/period pair, period fixed at 100 ms.
pub fn write_cpulimit(writer: &dyn CgroupWriter, cgroup_root: &std::path::Path, vmid: u32, cpulimit: f64) -> Result<()> {
    const PERIOD_US: u64 = 100_000;
    let dir = scope_dir(cgroup_root, vmid);
    writer.write(&dir.join("cpu.cfs_period_us"), &PERIOD_US.to_string())?;
    let quota = if cpulimit <= 0.0 {
        -1i64
    } else {
        (cpulimit * PERIOD_US as f64).round() as i64
    };
    writer.write(&dir.join("cpu.cfs_quota_us"), &quota.to_string())
}
