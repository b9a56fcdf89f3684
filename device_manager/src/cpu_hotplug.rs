//! vCPU hot-plug/unplug: `device_add`/`device_del` a `cpu{N}` device,
//! reconciled against `query-cpus-fast`'s count rather than an id set,
//! since individual vCPU ids aren't independently meaningful the way PCI
//! or block device ids are.

use std::thread;

use crate::backend::{plug_verify_failed, poll_interval, unplug_verify_failed, DeviceBackend};
use crate::error::{DeviceError, Result};
use crate::plug::VERIFY_RETRIES;

/// Lowest (major, minor) QEMU version that supports vCPU unplug.
pub const MIN_UNPLUG_VERSION: (u32, u32) = (2, 7);

/// `device_add` one vCPU, polling `query-cpus-fast`'s count until it rises.
/// Rolls back with `device_del` if the count never moves.
pub fn plug_vcpu(
    backend: &dyn DeviceBackend,
    cpu_type: &str,
    vcpu_id: u32,
    socket_id: u32,
    core_id: u32,
) -> Result<()> {
    let id = format!("cpu{}", vcpu_id);
    let before = backend.cpu_count()?;
    let device_str = format!(
        "{},id={},socket-id={},core-id={},thread-id=0",
        cpu_type, id, socket_id, core_id
    );
    backend.device_add(&device_str)?;

    for _ in 0..VERIFY_RETRIES {
        if backend.cpu_count()? > before {
            return Ok(());
        }
        thread::sleep(poll_interval());
    }
    let _ = backend.device_del(&id);
    Err(plug_verify_failed(&id, VERIFY_RETRIES))
}

/// `device_del` one vCPU, rejecting the request outright on a QEMU build
/// older than [`MIN_UNPLUG_VERSION`] -- hot vCPU removal isn't safe there.
pub fn unplug_vcpu(backend: &dyn DeviceBackend, vcpu_id: u32, qemu_version: (u32, u32)) -> Result<()> {
    if qemu_version < MIN_UNPLUG_VERSION {
        return Err(DeviceError::CpuUnplugUnsupported);
    }
    let id = format!("cpu{}", vcpu_id);
    let before = backend.cpu_count()?;
    backend.device_del(&id)?;

    for _ in 0..VERIFY_RETRIES {
        if backend.cpu_count()? < before {
            return Ok(());
        }
        thread::sleep(poll_interval());
    }
    Err(unplug_verify_failed(&id, VERIFY_RETRIES))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashSet;

    #[derive(Default)]
    struct FakeBackend {
        count: RefCell<u32>,
        never_moves: RefCell<bool>,
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
            Ok(*self.count.borrow())
        }
        fn memory_device_ids(&self) -> Result<HashSet<String>> {
            Ok(HashSet::new())
        }
        fn device_add(&self, _device_str: &str) -> Result<()> {
            if !*self.never_moves.borrow() {
                *self.count.borrow_mut() += 1;
            }
            Ok(())
        }
        fn device_del(&self, _id: &str) -> Result<()> {
            if !*self.never_moves.borrow() {
                let mut c = self.count.borrow_mut();
                *c = c.saturating_sub(1);
            }
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

    #[test]
    fn test_plug_vcpu_succeeds() {
        let backend = FakeBackend { count: RefCell::new(2), never_moves: RefCell::new(false) };
        plug_vcpu(&backend, "qemu64-x86_64-cpu", 2, 0, 2).unwrap();
        assert_eq!(*backend.count.borrow(), 3);
    }

    #[test]
    fn test_plug_vcpu_rolls_back_when_count_never_rises() {
        let backend = FakeBackend { count: RefCell::new(1), never_moves: RefCell::new(true) };
        let err = plug_vcpu(&backend, "qemu64-x86_64-cpu", 1, 0, 1).unwrap_err();
        assert!(matches!(err, DeviceError::PlugVerifyFailed(_, _)));
    }

    #[test]
    fn test_unplug_rejected_on_old_qemu() {
        let backend = FakeBackend { count: RefCell::new(2), never_moves: RefCell::new(false) };
        let err = unplug_vcpu(&backend, 1, (2, 5)).unwrap_err();
        assert!(matches!(err, DeviceError::CpuUnplugUnsupported));
    }

    #[test]
    fn test_unplug_succeeds_on_supported_qemu() {
        let backend = FakeBackend { count: RefCell::new(2), never_moves: RefCell::new(false) };
        unplug_vcpu(&backend, 1, (2, 7)).unwrap();
        assert_eq!(*backend.count.borrow(), 1);
    }
}
