//! DIMM hot-plug/hot-unplug, driven by [`memory_planner`]'s forward/reverse
//! walk so the set of DIMMs this module ever adds or removes agrees with
//! what [`command_builder`] would have emitted for the same target memory
//! size. Growing allocates hugepages (if configured) under the process-wide
//! lock before touching the monitor; shrinking removes DIMMs in the reverse
//! of plug order, `object-del`ing the backing memory object only after the
//! `pc-dimm` device itself is confirmed gone.

use std::path::Path;
use std::thread;

use memory_planner::dimm::{self, DimmRecord, HugepageMode};
use memory_planner::hugepage::{self, HugepageSysfs};
use memory_planner::MAX_MEM_MB;

use crate::backend::{plug_verify_failed, poll_interval, unplug_verify_failed, DeviceBackend};
use crate::error::{DeviceError, Result};
use crate::plug::VERIFY_RETRIES;

fn mem_object_id(dimm: &DimmRecord) -> String {
    format!("mem-{}", dimm.name)
}

/// Grow from `current_mb` to `target_mb`: whichever DIMMs the forward walk
/// to `target_mb` has beyond the forward walk to `current_mb`.
fn grow(
    backend: &dyn DeviceBackend,
    sysfs: &dyn HugepageSysfs,
    lock_dir: &Path,
    sockets: u32,
    hugepage_mode: HugepageMode,
    numa_nodes: u32,
    current_mb: u64,
    target_mb: u64,
) -> Result<()> {
    let current = dimm::foreach_dimm(current_mb, sockets, hugepage_mode, numa_nodes);
    let wanted = dimm::foreach_dimm(target_mb, sockets, hugepage_mode, numa_nodes);
    let new_dimms = &wanted[current.len()..];
    if new_dimms.is_empty() {
        return Ok(());
    }

    if let Some(size_kb) = hugepage_mode.size_kb() {
        let topology = hugepage::topology_from_dimms(new_dimms, size_kb);
        let _lock = util::lock::lock_hugepages(lock_dir).map_err(hugepage::HugepageError::from)?;
        hugepage::allocate(sysfs, &topology)?;
    }

    for record in new_dimms {
        let mem_id = mem_object_id(record);
        let backend_kind = if hugepage_mode.size_kb().is_some() {
            "memory-backend-file"
        } else {
            "memory-backend-ram"
        };
        backend.object_add(backend_kind, &mem_id, &format!("size={}M", record.size_mb))?;

        let device_str = format!(
            "pc-dimm,id={},memdev={},node={}",
            record.name, mem_id, record.numa_node
        );
        if let Err(e) = backend.device_add(&device_str) {
            let _ = backend.object_del(&mem_id);
            return Err(e);
        }

        let mut appeared = false;
        for _ in 0..VERIFY_RETRIES {
            if backend.memory_device_ids()?.contains(&record.name) {
                appeared = true;
                break;
            }
            thread::sleep(poll_interval());
        }
        if !appeared {
            let _ = backend.device_del(&record.name);
            let _ = backend.object_del(&mem_id);
            return Err(plug_verify_failed(&record.name, VERIFY_RETRIES));
        }
    }
    Ok(())
}

/// Shrink from `current_mb` to `target_mb`: the trailing slice of the
/// reverse walk from `current_mb` once the DIMMs that survive at
/// `target_mb` are excluded.
fn shrink(
    backend: &dyn DeviceBackend,
    sockets: u32,
    hugepage_mode: HugepageMode,
    numa_nodes: u32,
    current_mb: u64,
    target_mb: u64,
) -> Result<()> {
    let reverse_current = dimm::foreach_reverse_dimm(current_mb, sockets, hugepage_mode, numa_nodes);
    let keep_count = dimm::foreach_dimm(target_mb, sockets, hugepage_mode, numa_nodes).len();
    let remove_count = reverse_current.len().saturating_sub(keep_count);
    let to_remove = &reverse_current[..remove_count];

    for record in to_remove {
        backend.device_del(&record.name)?;

        let mut gone = false;
        for _ in 0..VERIFY_RETRIES {
            if !backend.memory_device_ids()?.contains(&record.name) {
                gone = true;
                break;
            }
            thread::sleep(poll_interval());
        }
        if !gone {
            return Err(unplug_verify_failed(&record.name, VERIFY_RETRIES));
        }
        let _ = backend.object_del(&mem_object_id(record));
    }
    Ok(())
}

/// Retarget a running VM's memory to `target_mb`, rejecting targets below
/// the static-memory floor or above [`MAX_MEM_MB`], then growing or
/// shrinking as needed.
#[allow(clippy::too_many_arguments)]
pub fn memory_hotplug(
    backend: &dyn DeviceBackend,
    sysfs: &dyn HugepageSysfs,
    lock_dir: &Path,
    sockets: u32,
    hugepage_mode: HugepageMode,
    numa_nodes: u32,
    current_mb: u64,
    target_mb: u64,
) -> Result<()> {
    let floor = dimm::base_static_memory_mb(sockets, hugepage_mode);
    if target_mb < floor {
        return Err(DeviceError::BelowFloor { target: target_mb, floor });
    }
    if target_mb > MAX_MEM_MB {
        return Err(DeviceError::AboveMax { target: target_mb, max: MAX_MEM_MB });
    }

    match target_mb.cmp(&current_mb) {
        std::cmp::Ordering::Greater => {
            grow(backend, sysfs, lock_dir, sockets, hugepage_mode, numa_nodes, current_mb, target_mb)
        }
        std::cmp::Ordering::Less => {
            shrink(backend, sockets, hugepage_mode, numa_nodes, current_mb, target_mb)
        }
        std::cmp::Ordering::Equal => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet};

    #[derive(Default)]
    struct FakeBackend {
        memory: RefCell<HashSet<String>>,
        never_appears: RefCell<bool>,
    }

    impl DeviceBackend for FakeBackend {
        fn pci_device_ids(&self) -> Result<HashSet<String>> {
            Ok(HashSet::new())
        }
        fn block_ids(&self) -> Result<HashSet<String>> {
            Ok(HashSet::new())
        }
        fn mouse_ids(&self) -> Result<HashSet<String>> {
            Ok(HashSet::new())
        }
        fn usb_device_ids(&self) -> Result<HashSet<String>> {
            Ok(HashSet::new())
        }
        fn cpu_count(&self) -> Result<u32> {
            Ok(1)
        }
        fn memory_device_ids(&self) -> Result<HashSet<String>> {
            Ok(self.memory.borrow().clone())
        }
        fn device_add(&self, device_str: &str) -> Result<()> {
            if *self.never_appears.borrow() {
                return Ok(());
            }
            let id = device_str
                .split(',')
                .find_map(|kv| kv.strip_prefix("id="))
                .unwrap_or_default();
            self.memory.borrow_mut().insert(id.to_string());
            Ok(())
        }
        fn device_del(&self, id: &str) -> Result<()> {
            self.memory.borrow_mut().remove(id);
            Ok(())
        }
        fn drive_add(&self, _hmp_line: &str) -> Result<()> {
            Ok(())
        }
        fn drive_del(&self, _id: &str) -> Result<()> {
            Ok(())
        }
        fn netdev_add(&self, _netdev_str: &str) -> Result<()> {
            Ok(())
        }
        fn netdev_del(&self, _id: &str) -> Result<()> {
            Ok(())
        }
        fn object_add(&self, _qom_type: &str, _id: &str, _props: &str) -> Result<()> {
            Ok(())
        }
        fn object_del(&self, _id: &str) -> Result<()> {
            Ok(())
        }
    }

    struct FakeSysfs {
        free: RefCell<HashMap<(u32, u64), u64>>,
    }

    impl HugepageSysfs for FakeSysfs {
        fn read_nr(&self, _node: u32, _size_kb: u64) -> std::io::Result<u64> {
            Ok(1000)
        }
        fn read_free(&self, node: u32, size_kb: u64) -> std::io::Result<u64> {
            Ok(*self.free.borrow().get(&(node, size_kb)).unwrap_or(&1000))
        }
        fn write_nr(&self, _node: u32, _size_kb: u64, _count: u64) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_grow_adds_dimms_matching_planner_walk() {
        let backend = FakeBackend::default();
        let sysfs = FakeSysfs { free: RefCell::new(HashMap::new()) };
        let dir = std::env::temp_dir().join(format!("vmctl-memhp-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        memory_hotplug(
            &backend,
            &sysfs,
            &dir,
            1,
            HugepageMode::Off,
            1,
            1024,
            2048,
        )
        .unwrap();
        assert_eq!(backend.memory.borrow().len(), 1);
        assert!(backend.memory.borrow().contains("dimm0"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_shrink_removes_in_reverse_order() {
        let backend = FakeBackend::default();
        backend.memory.borrow_mut().insert("dimm0".to_string());
        backend.memory.borrow_mut().insert("dimm1".to_string());
        let sysfs = FakeSysfs { free: RefCell::new(HashMap::new()) };
        let dir = std::env::temp_dir().join(format!("vmctl-memhp-shrink-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        memory_hotplug(&backend, &sysfs, &dir, 1, HugepageMode::Off, 1, 2048, 1024).unwrap();
        assert!(backend.memory.borrow().is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_below_floor_rejected() {
        let backend = FakeBackend::default();
        let sysfs = FakeSysfs { free: RefCell::new(HashMap::new()) };
        let dir = std::env::temp_dir().join(format!("vmctl-memhp-floor-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let err = memory_hotplug(&backend, &sysfs, &dir, 1, HugepageMode::Off, 1, 2048, 512).unwrap_err();
        assert!(matches!(err, DeviceError::BelowFloor { .. }));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_grow_rolls_back_when_dimm_never_appears() {
        let backend = FakeBackend { never_appears: RefCell::new(true), ..Default::default() };
        let sysfs = FakeSysfs { free: RefCell::new(HashMap::new()) };
        let dir = std::env::temp_dir().join(format!("vmctl-memhp-fail-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let err = memory_hotplug(&backend, &sysfs, &dir, 1, HugepageMode::Off, 1, 1024, 2048).unwrap_err();
        assert!(matches!(err, DeviceError::PlugVerifyFailed(_, _)));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
