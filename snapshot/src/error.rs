use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("lock error: {0}")]
    Lock(#[from] util::lock::LockError),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("monitor error: {0}")]
    Monitor(#[from] monitor::MonitorError),

    #[error("device error: {0}")]
    Device(#[from] device_manager::DeviceError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot \"{0}\" already exists")]
    AlreadyExists(String),

    #[error("no snapshot named \"{0}\"")]
    NotFound(String),

    #[error("config is locked for {0}, refusing snapshot operation")]
    Conflict(String),

    #[error("drive {0} is not currently attached, refusing to snapshot it")]
    DriveNotAttached(String),

    #[error("savevm did not reach completed state within {0:?}")]
    SavevmTimeout(Duration),

    #[error("savevm reported an error: {0}")]
    SavevmFailed(String),

    #[error("storage backend error for volume {volid}: {reason}")]
    Storage { volid: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SnapshotError>;
