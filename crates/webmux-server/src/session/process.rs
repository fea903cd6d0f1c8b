//! The process collaborator boundary.
//!
//! A session's backing process is reached only through [`ProcessHandle`]
//! (write/resize/kill) and observed only through its [`ProcessEvent`] stream:
//! output chunks in the order the process produced them, terminated by
//! exactly one `Exit`. The production implementation wraps portable-pty;
//! tests substitute a fake spawner.

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webmux_proto::{MuxError, MuxResult};

/// Events emitted by a spawned process, FIFO per process.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    /// A chunk of process output.
    Output(Vec<u8>),
    /// The process terminated. Emitted exactly once, after the last output.
    Exit { code: i32, signal: Option<String> },
}

/// Handle to a spawned interactive process.
pub trait ProcessHandle: Send + Sync {
    /// Forward bytes to the process's stdin.
    fn write(&mut self, data: &[u8]) -> MuxResult<()>;
    /// Resize the process's terminal.
    fn resize(&mut self, cols: u16, rows: u16) -> MuxResult<()>;
    /// Request termination. Fire-and-forget: the caller observes actual
    /// termination via the event stream, never by blocking here.
    fn kill(&mut self) -> MuxResult<()>;
}

/// Spawns process handles. Injected into the registry so that session logic
/// can be exercised without real PTYs.
pub trait ProcessSpawner: Send + Sync {
    fn spawn(
        &self,
        shell: Option<&str>,
        cols: u16,
        rows: u16,
    ) -> MuxResult<(Box<dyn ProcessHandle>, mpsc::UnboundedReceiver<ProcessEvent>)>;
}

/// Resolve the shell to run: explicit request, then `$SHELL`, then the
/// platform default.
fn resolve_shell(explicit: Option<&str>) -> String {
    if let Some(shell) = explicit {
        if !shell.trim().is_empty() {
            return shell.to_string();
        }
    }
    if let Ok(shell) = std::env::var("SHELL") {
        if !shell.is_empty() {
            return shell;
        }
    }
    if cfg!(windows) {
        "cmd.exe".to_string()
    } else {
        "/bin/sh".to_string()
    }
}

/// Production spawner backed by the native PTY system.
pub struct PtySpawner;

impl ProcessSpawner for PtySpawner {
    fn spawn(
        &self,
        shell: Option<&str>,
        cols: u16,
        rows: u16,
    ) -> MuxResult<(Box<dyn ProcessHandle>, mpsc::UnboundedReceiver<ProcessEvent>)> {
        let pty_system = native_pty_system();
        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = pty_system
            .openpty(size)
            .map_err(|e| MuxError::Spawn(format!("failed to open PTY: {e}")))?;

        let shell = resolve_shell(shell);
        let mut cmd = CommandBuilder::new(&shell);
        // POSIX shells run in login mode so the user's profile is loaded.
        if cfg!(unix) {
            cmd.arg("-l");
        }
        cmd.env("TERM", "xterm-256color");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| MuxError::Spawn(format!("failed to spawn {shell}: {e}")))?;
        drop(pair.slave);

        info!(shell = %shell, cols, rows, "PTY spawned");

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| MuxError::Spawn(format!("failed to clone PTY reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| MuxError::Spawn(format!("failed to take PTY writer: {e}")))?;
        let killer = child.clone_killer();

        let killed = Arc::new(AtomicBool::new(false));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        spawn_pump(reader, child, event_tx, killed.clone());

        let handle = PtyProcess {
            master: Mutex::new(pair.master),
            writer: Mutex::new(writer),
            killer,
            killed,
        };
        Ok((Box::new(handle), event_rx))
    }
}

/// Pump PTY output and the final exit status into the event channel from a
/// dedicated blocking thread. The thread owns the child so `wait` needs no
/// shared locking.
fn spawn_pump(
    mut reader: Box<dyn Read + Send>,
    mut child: Box<dyn portable_pty::Child + Send + Sync>,
    event_tx: mpsc::UnboundedSender<ProcessEvent>,
    killed: Arc<AtomicBool>,
) {
    std::thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if event_tx.send(ProcessEvent::Output(buf[..n].to_vec())).is_err() {
                        // Consumer gone; stop pumping but still reap the child.
                        break;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "PTY read ended");
                    break;
                }
            }
        }

        let code = match child.wait() {
            Ok(status) => status.exit_code() as i32,
            Err(e) => {
                warn!(error = %e, "PTY child wait failed");
                -1
            }
        };
        let signal = killed
            .load(Ordering::SeqCst)
            .then(|| "SIGKILL".to_string());
        info!(code, "PTY child exited");
        let _ = event_tx.send(ProcessEvent::Exit { code, signal });
    });
}

/// A live PTY-backed process.
struct PtyProcess {
    /// Master side, kept for resize (Mutex because MasterPty is not Sync).
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    killed: Arc<AtomicBool>,
}

impl ProcessHandle for PtyProcess {
    fn write(&mut self, data: &[u8]) -> MuxResult<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| MuxError::Other("PTY writer lock poisoned".into()))?;
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    fn resize(&mut self, cols: u16, rows: u16) -> MuxResult<()> {
        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        let master = self
            .master
            .lock()
            .map_err(|_| MuxError::Other("PTY master lock poisoned".into()))?;
        master
            .resize(size)
            .map_err(|e| MuxError::Other(format!("PTY resize failed: {e}")))?;
        debug!(cols, rows, "PTY resized");
        Ok(())
    }

    fn kill(&mut self) -> MuxResult<()> {
        self.killed.store(true, Ordering::SeqCst);
        self.killer
            .kill()
            .map_err(|e| MuxError::Other(format!("kill failed: {e}")))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn drain_until_exit(
        rx: &mut mpsc::UnboundedReceiver<ProcessEvent>,
    ) -> (Vec<u8>, i32, Option<String>) {
        let mut output = Vec::new();
        loop {
            let ev = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("timed out waiting for process event")
                .expect("event stream closed without Exit");
            match ev {
                ProcessEvent::Output(chunk) => output.extend_from_slice(&chunk),
                ProcessEvent::Exit { code, signal } => return (output, code, signal),
            }
        }
    }

    #[tokio::test]
    async fn spawn_echo_and_exit() {
        let (mut handle, mut rx) = PtySpawner
            .spawn(Some("/bin/sh"), 80, 24)
            .expect("spawn /bin/sh");
        handle.write(b"echo marker_4361\n").unwrap();
        handle.write(b"exit 0\n").unwrap();
        let (output, code, signal) = drain_until_exit(&mut rx).await;
        let text = String::from_utf8_lossy(&output);
        assert!(text.contains("marker_4361"), "output was: {text}");
        assert_eq!(code, 0);
        assert_eq!(signal, None);
    }

    #[tokio::test]
    async fn kill_reports_signal() {
        let (mut handle, mut rx) = PtySpawner
            .spawn(Some("/bin/sh"), 80, 24)
            .expect("spawn /bin/sh");
        handle.kill().unwrap();
        let (_, _, signal) = drain_until_exit(&mut rx).await;
        assert_eq!(signal.as_deref(), Some("SIGKILL"));
    }

    #[test]
    fn spawn_failure_surfaces() {
        let err = PtySpawner
            .spawn(Some("/nonexistent/shell-binary"), 80, 24)
            .err()
            .expect("spawn should fail");
        assert!(matches!(err, MuxError::Spawn(_)));
    }

    #[test]
    fn shell_fallback_chain() {
        assert_eq!(resolve_shell(Some("/bin/bash")), "/bin/bash");
        let fallback = resolve_shell(None);
        assert!(!fallback.is_empty());
    }
}
