//! Single-connection request/response transport for QEMU's monitor
//! protocol. One short-lived connection per request: connect, read the
//! greeting, negotiate `qmp_capabilities`, send the command line, read the
//! matching response line, disconnect. The per-VM advisory lock serializes
//! callers, so the client itself carries no multiplexing state.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::{Duration, Instant};

use serde_json::Value;

use util::context::RuntimeContext;

use crate::error::{MonitorError, Result};
use crate::response::{Request, Response};
use crate::running;

/// Default timeout for non-blocking commands (query-*, device_add, ...).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

pub struct MonitorClient {
    context: RuntimeContext,
}

impl MonitorClient {
    pub fn new(context: RuntimeContext) -> Self {
        MonitorClient { context }
    }

    /// Normal path: asserts the VM is running before issuing the command.
    pub fn cmd(
        &self,
        vmid: u32,
        execute: &str,
        arguments: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        if !running::is_running(&self.context, vmid) {
            return Err(MonitorError::VmNotRunning(vmid.to_string()));
        }
        self.cmd_nocheck(vmid, execute, arguments, timeout)
    }

    /// Identical to `cmd`, but skips the running-check: used during
    /// migration teardown and startup races where the caller already knows
    /// the state it's in.
    pub fn cmd_nocheck(
        &self,
        vmid: u32,
        execute: &str,
        arguments: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let vm = vmid.to_string();
        let path = self.context.monitor_socket_path(vmid);
        let mut conn = Connection::connect(&path, &vm, timeout)?;
        conn.handshake(&vm)?;
        let request = Request::new(execute, arguments);
        let response = conn.send(&vm, &request, timeout)?;
        if let Some(err) = response.error {
            return Err(MonitorError::ErrorResponse {
                vm,
                class: err.class,
                desc: err.desc,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Human-monitor-command passthrough: wraps `command_line` in a
    /// `human-monitor-command` request and returns the textual reply.
    pub fn hmp(&self, vmid: u32, command_line: &str, timeout: Duration) -> Result<String> {
        let args = serde_json::json!({ "command-line": command_line });
        let result = self.cmd(vmid, "human-monitor-command", Some(args), timeout)?;
        Ok(result.as_str().unwrap_or_default().to_string())
    }
}

/// One connect/handshake/request/response/disconnect cycle.
struct Connection {
    reader: BufReader<UnixStream>,
}

impl Connection {
    fn connect(path: &Path, vm: &str, timeout: Duration) -> Result<Self> {
        let stream = UnixStream::connect(path).map_err(|source| MonitorError::Connect {
            path: path.display().to_string(),
            source,
        })?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        let _ = vm;
        Ok(Connection {
            reader: BufReader::new(stream),
        })
    }

    /// Read the greeting line and negotiate `qmp_capabilities`.
    fn handshake(&mut self, vm: &str) -> Result<()> {
        let mut greeting = String::new();
        self.reader
            .read_line(&mut greeting)
            .map_err(|e| MonitorError::Handshake {
                vm: vm.to_string(),
                reason: e.to_string(),
            })?;
        if greeting.is_empty() {
            return Err(MonitorError::Handshake {
                vm: vm.to_string(),
                reason: "socket closed before greeting".to_string(),
            });
        }
        self.write_line("{\"execute\":\"qmp_capabilities\"}")
            .map_err(|e| MonitorError::Handshake {
                vm: vm.to_string(),
                reason: e.to_string(),
            })?;
        let mut reply = String::new();
        self.reader
            .read_line(&mut reply)
            .map_err(|e| MonitorError::Handshake {
                vm: vm.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    fn send(&mut self, vm: &str, request: &Request, timeout: Duration) -> Result<Response> {
        let text = serde_json::to_string(request)?;
        self.write_line(&text)?;

        let deadline = Instant::now() + timeout;
        let mut line = String::new();
        loop {
            match self.reader.read_line(&mut line) {
                Ok(0) => {
                    return Err(MonitorError::Handshake {
                        vm: vm.to_string(),
                        reason: "socket closed before response".to_string(),
                    })
                }
                Ok(_) => break,
                Err(e) if is_timeout(&e) => {
                    if Instant::now() >= deadline {
                        return Err(MonitorError::Timeout {
                            vm: vm.to_string(),
                            timeout,
                        });
                    }
                    continue;
                }
                Err(e) => return Err(MonitorError::Io(e)),
            }
        }
        let response: Response = serde_json::from_str(line.trim())?;
        Ok(response)
    }

    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(line.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use std::thread;

    fn test_context(dir: &Path) -> RuntimeContext {
        RuntimeContext {
            node_name: "test".to_string(),
            runtime_dir: dir.to_path_buf(),
            lock_dir: dir.to_path_buf(),
            config_dir: dir.to_path_buf(),
            hugepage_sysfs_root: dir.to_path_buf(),
        }
    }

    fn spawn_fake_qemu(sock_path: std::path::PathBuf, reply: &'static str) {
        let listener = UnixListener::bind(&sock_path).unwrap();
        thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut writer = stream;
                writeln!(writer, "{{\"QMP\": {{\"version\": {{}}}}}}").unwrap();
                let mut buf = String::new();
                reader.read_line(&mut buf).unwrap(); // qmp_capabilities
                writeln!(writer, "{{\"return\": {{}}}}").unwrap();
                buf.clear();
                reader.read_line(&mut buf).unwrap(); // actual command
                writeln!(writer, "{}", reply).unwrap();
            }
        });
    }

    #[test]
    fn test_cmd_nocheck_round_trip() {
        let dir = std::env::temp_dir().join(format!("vmctl-monitor-client-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let context = test_context(&dir);
        let sock_path = context.monitor_socket_path(200);
        spawn_fake_qemu(sock_path, r#"{"return": {"status": "running"}}"#);
        thread::sleep(Duration::from_millis(50));

        let client = MonitorClient::new(context);
        let result = client
            .cmd_nocheck(200, "query-status", None, Duration::from_secs(2))
            .unwrap();
        assert_eq!(result["status"], "running");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_cmd_nocheck_surfaces_error_response() {
        let dir = std::env::temp_dir().join(format!("vmctl-monitor-client-err-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let context = test_context(&dir);
        let sock_path = context.monitor_socket_path(201);
        spawn_fake_qemu(
            sock_path,
            r#"{"error": {"class": "GenericError", "desc": "no such device"}}"#,
        );
        thread::sleep(Duration::from_millis(50));

        let client = MonitorClient::new(context);
        let err = client
            .cmd_nocheck(201, "device_del", None, Duration::from_secs(2))
            .unwrap_err();
        assert!(matches!(err, MonitorError::ErrorResponse { .. }));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_cmd_rejects_when_vm_not_running() {
        let dir = std::env::temp_dir().join(format!("vmctl-monitor-client-notrun-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let context = test_context(&dir);
        let client = MonitorClient::new(context);
        let err = client
            .cmd(9999, "query-status", None, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, MonitorError::VmNotRunning(_)));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
