use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("vm {0} is not running")]
    VmNotRunning(String),

    #[error("failed to connect to monitor socket {path}: {source}")]
    Connect {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("monitor socket I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("monitor response was not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("request to {vm} timed out after {timeout:?}")]
    Timeout { vm: String, timeout: Duration },

    #[error("monitor returned an error response for {vm}: class={class} desc={desc}")]
    ErrorResponse {
        vm: String,
        class: String,
        desc: String,
    },

    #[error("monitor handshake with {vm} failed: {reason}")]
    Handshake { vm: String, reason: String },
}

pub type Result<T> = std::result::Result<T, MonitorError>;
