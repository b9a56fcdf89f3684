//! `savevm-start` / `query-savevm` polling: no upper bound on wall time per
//! the concurrency model, so this loops until `completed` or `error`,
//! sleeping 1 s between polls.

use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde_json::json;

use monitor::MonitorClient;

use crate::error::{Result, SnapshotError};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub(crate) fn capture_vmstate(monitor: &MonitorClient, vmid: u32, statefile: &Path) -> Result<()> {
    monitor.cmd(
        vmid,
        "savevm-start",
        Some(json!({ "statefile": statefile.display().to_string() })),
        monitor::DEFAULT_TIMEOUT,
    )?;

    loop {
        let status = monitor.cmd(vmid, "query-savevm", None, monitor::DEFAULT_TIMEOUT)?;
        match status.get("status").and_then(|v| v.as_str()) {
            Some("completed") => return Ok(()),
            Some("error") => {
                let reason = status
                    .get("error")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                return Err(SnapshotError::SavevmFailed(reason));
            }
            _ => sleep(POLL_INTERVAL),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_interval_is_one_second() {
        assert_eq!(POLL_INTERVAL, Duration::from_secs(1));
    }
}
