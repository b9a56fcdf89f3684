use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error(transparent)]
    Monitor(#[from] monitor::MonitorError),

    #[error(transparent)]
    Pci(#[from] pci_topology::PciError),

    #[error(transparent)]
    Hugepage(#[from] memory_planner::HugepageError),

    #[error("device {0} already present")]
    AlreadyPresent(String),

    #[error("device {0} did not appear after {1} verification attempts; rolled back")]
    PlugVerifyFailed(String, u32),

    #[error("device {0} did not disappear after {1} verification attempts")]
    UnplugVerifyFailed(String, u32),

    #[error("memory target {target} is below the static-memory floor {floor}")]
    BelowFloor { target: u64, floor: u64 },

    #[error("memory target {target} exceeds MAX_MEM {max}")]
    AboveMax { target: u64, max: u64 },

    #[error("QEMU version does not support vCPU unplug (pre-2.7)")]
    CpuUnplugUnsupported,

    #[error("unknown device class for id {0}")]
    UnknownDeviceClass(String),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
