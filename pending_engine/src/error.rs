use thiserror::Error;

#[derive(Error, Debug)]
pub enum PendingError {
    #[error("lock error: {0}")]
    Lock(#[from] util::lock::LockError),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("pci topology error: {0}")]
    Pci(#[from] pci_topology::PciError),

    #[error("device error: {0}")]
    Device(#[from] device_manager::DeviceError),

    #[error("cloud-init error: {0}")]
    Cloudinit(#[from] cloudinit::CloudinitError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("deletion of {0} refused: still referenced by a snapshot")]
    VolumeInUse(String),

    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

pub type Result<T> = std::result::Result<T, PendingError>;

/// One key's reconciliation failure, collected rather than propagated so
/// the rest of the pending overlay still gets a chance to apply.
#[derive(Debug, Clone)]
pub struct PerKeyError {
    pub key: String,
    pub message: String,
}
