//! What the running host can actually do: injected so `CommandBuilder`
//! stays a pure function testable without `/dev/kvm` or a real QEMU binary.

#[derive(Debug, Clone, Copy)]
pub struct HostCaps {
    pub kvm_available: bool,
    pub spice_available: bool,
    pub vfio_available: bool,
}

impl Default for HostCaps {
    fn default() -> Self {
        HostCaps {
            kvm_available: true,
            spice_available: false,
            vfio_available: false,
        }
    }
}
