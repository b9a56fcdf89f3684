//! The generic device-class verify-loop/rollback state machine: add a
//! device (optionally backed by a drive or netdev), poll for it to appear
//! in the matching query, and tear back down whatever was added if it
//! never does. `tablet`, `usbN`, `virtioN`, `virtioscsiN`/`scsihwN`,
//! `scsiN`, `netN` and `pci.N` all funnel through the same machine; only
//! which query confirms presence and which teardown calls to issue on
//! failure differ.

use std::thread;

use crate::backend::{plug_verify_failed, poll_interval, unplug_verify_failed, DeviceBackend};
use crate::error::{DeviceError, Result};

/// Default number of poll attempts for both plug and unplug verification.
pub const VERIFY_RETRIES: u32 = 5;

/// Which query confirms a device's presence/absence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceCheck {
    Pci,
    Block,
    Mouse,
    Usb,
}

fn is_present(backend: &dyn DeviceBackend, check: PresenceCheck, id: &str) -> Result<bool> {
    let ids = match check {
        PresenceCheck::Pci => backend.pci_device_ids()?,
        PresenceCheck::Block => backend.block_ids()?,
        PresenceCheck::Mouse => backend.mouse_ids()?,
        PresenceCheck::Usb => backend.usb_device_ids()?,
    };
    Ok(ids.contains(id))
}

/// One device-class plug request: the device's own `device_add` string
/// plus whatever backing drive/netdev it needs created first.
pub struct PlugRequest<'a> {
    pub id: &'a str,
    pub device_str: &'a str,
    pub drive_line: Option<&'a str>,
    pub netdev_line: Option<&'a str>,
    pub presence: PresenceCheck,
}

/// Verify the device is not already present, bring up its drive/netdev if
/// any, `device_add` it, then poll up to `retries` times at 1 s intervals.
/// On failure, rolls back whatever step succeeded.
pub fn deviceplug(backend: &dyn DeviceBackend, req: &PlugRequest, retries: u32) -> Result<()> {
    if is_present(backend, req.presence, req.id)? {
        return Err(DeviceError::AlreadyPresent(req.id.to_string()));
    }

    if let Some(netdev) = req.netdev_line {
        backend.netdev_add(netdev)?;
    }
    if let Some(drive) = req.drive_line {
        if let Err(e) = backend.drive_add(drive) {
            if req.netdev_line.is_some() {
                let _ = backend.netdev_del(req.id);
            }
            return Err(e);
        }
    }

    if let Err(e) = backend.device_add(req.device_str) {
        rollback_add(backend, req);
        return Err(e);
    }

    for _ in 0..retries {
        if is_present(backend, req.presence, req.id)? {
            return Ok(());
        }
        thread::sleep(poll_interval());
    }

    rollback_add(backend, req);
    let _ = backend.device_del(req.id);
    Err(plug_verify_failed(req.id, retries))
}

fn rollback_add(backend: &dyn DeviceBackend, req: &PlugRequest) {
    if req.drive_line.is_some() {
        let _ = backend.drive_del(req.id);
    }
    if req.netdev_line.is_some() {
        let _ = backend.netdev_del(req.id);
    }
}

/// `device_del` then poll until the id disappears from the matching
/// query; unlike plug there is nothing to roll back to, since the device
/// was already live -- a verify failure just surfaces as an error for the
/// caller to retry or report.
pub fn deviceunplug(
    backend: &dyn DeviceBackend,
    id: &str,
    presence: PresenceCheck,
    retries: u32,
) -> Result<()> {
    backend.device_del(id)?;
    for _ in 0..retries {
        if !is_present(backend, presence, id)? {
            return Ok(());
        }
        thread::sleep(poll_interval());
    }
    Err(unplug_verify_failed(id, retries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashSet;

    #[derive(Default)]
    struct FakeBackend {
        pci: RefCell<HashSet<String>>,
        block: RefCell<HashSet<String>>,
        mice: RefCell<HashSet<String>>,
        fail_device_add: RefCell<bool>,
        never_appears: RefCell<bool>,
    }

    impl DeviceBackend for FakeBackend {
        fn pci_device_ids(&self) -> Result<HashSet<String>> {
            Ok(self.pci.borrow().clone())
        }
        fn block_ids(&self) -> Result<HashSet<String>> {
            Ok(self.block.borrow().clone())
        }
        fn mouse_ids(&self) -> Result<HashSet<String>> {
            Ok(self.mice.borrow().clone())
        }
        fn usb_device_ids(&self) -> Result<HashSet<String>> {
            Ok(self.pci.borrow().clone())
        }
        fn cpu_count(&self) -> Result<u32> {
            Ok(1)
        }
        fn memory_device_ids(&self) -> Result<HashSet<String>> {
            Ok(HashSet::new())
        }
        fn device_add(&self, device_str: &str) -> Result<()> {
            if *self.fail_device_add.borrow() {
                return Err(DeviceError::AlreadyPresent("boom".to_string()));
            }
            let id = device_str.split(',').next().unwrap_or_default();
            if !*self.never_appears.borrow() {
                self.pci.borrow_mut().insert(id.to_string());
            }
            Ok(())
        }
        fn device_del(&self, id: &str) -> Result<()> {
            self.pci.borrow_mut().remove(id);
            Ok(())
        }
        fn drive_add(&self, hmp_line: &str) -> Result<()> {
            let _ = hmp_line;
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
    fn test_plug_succeeds_when_device_appears() {
        let backend = FakeBackend::default();
        let req = PlugRequest {
            id: "net0",
            device_str: "net0,driver=virtio-net-pci",
            drive_line: None,
            netdev_line: Some("id=net0,type=user"),
            presence: PresenceCheck::Pci,
        };
        deviceplug(&backend, &req, 5).unwrap();
        assert!(backend.pci.borrow().contains("net0"));
    }

    #[test]
    fn test_plug_rejects_already_present() {
        let backend = FakeBackend::default();
        backend.pci.borrow_mut().insert("net0".to_string());
        let req = PlugRequest {
            id: "net0",
            device_str: "net0,driver=virtio-net-pci",
            drive_line: None,
            netdev_line: None,
            presence: PresenceCheck::Pci,
        };
        let err = deviceplug(&backend, &req, 5).unwrap_err();
        assert!(matches!(err, DeviceError::AlreadyPresent(_)));
    }

    #[test]
    fn test_plug_rolls_back_when_device_never_appears() {
        let backend = FakeBackend::default();
        *backend.never_appears.borrow_mut() = true;
        let req = PlugRequest {
            id: "scsi0",
            device_str: "scsi0,driver=scsi-hd",
            drive_line: Some("file=/dev/null,format=raw"),
            netdev_line: None,
            presence: PresenceCheck::Block,
        };
        let err = deviceplug(&backend, &req, 2).unwrap_err();
        assert!(matches!(err, DeviceError::PlugVerifyFailed(_, 2)));
    }

    #[test]
    fn test_unplug_succeeds_when_device_disappears() {
        let backend = FakeBackend::default();
        backend.pci.borrow_mut().insert("virtio0".to_string());
        deviceunplug(&backend, "virtio0", PresenceCheck::Pci, 5).unwrap();
        assert!(!backend.pci.borrow().contains("virtio0"));
    }
}
