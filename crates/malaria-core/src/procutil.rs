// src/procutil.rs
// Small child-process helper shared by the worker pool (C5) and the bridge
// broker supervisor (C6): both need to spawn a subprocess, reap it on every
// exit path (including a panicking unwind), and optionally read back its
// final stdout. Centralizing it here avoids writing the same spawn/reap
// boilerplate twice.

use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

// ManagedChild owns a spawned child process and guarantees it is signaled
// and reaped on drop, even on a panicking unwind -- the scoped-acquisition
// discipline called for in spec section 9's "Scoped broker lifetime" note,
// expressed as Drop instead of a comment.
pub struct ManagedChild {
    child: Option<Child>,
    label: String,
}

impl ManagedChild {
    pub fn spawn(mut command: Command, label: impl Into<String>) -> std::io::Result<Self> {
        let child = command.spawn()?;
        Ok(Self {
            child: Some(child),
            label: label.into(),
        })
    }

    // terminate_and_wait sends SIGTERM (via kill_on_drop semantics on other
    // platforms, explicit signal on unix) and waits for exit. Safe to call
    // more than once; the second call is a no-op.
    pub async fn terminate_and_wait(&mut self) -> std::io::Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                // SAFETY: pid belongs to our own child process, obtained
                // from the Child handle we still hold.
                unsafe {
                    libc_kill(pid as i32);
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }
        child.wait().await?;
        tracing::debug!(label = %self.label, "reaped child process");
        Ok(())
    }
}

#[cfg(unix)]
unsafe fn libc_kill(pid: i32) {
    // Avoid a direct libc dependency for a single syscall: shell out to the
    // standard `kill` utility is unnecessary churn, but pulling in all of
    // `libc` for one call is not appealing either. `nix`'s `signal::kill` is
    // the idiomatic choice and is already a transitive dependency via
    // tokio's process backend, so we use std's own raw FFI declaration.
    unsafe extern "C" {
        fn kill(pid: i32, sig: i32) -> i32;
    }
    const SIGTERM: i32 = 15;
    let _ = unsafe { kill(pid, SIGTERM) };
}

impl Drop for ManagedChild {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            tracing::warn!(
                label = %self.label,
                "ManagedChild dropped without explicit terminate_and_wait; killing synchronously"
            );
            let _ = child.start_kill();
        }
    }
}

// spawn_and_capture_stdout runs `command` to completion, returning its exit
// status and whatever it wrote to stdout. Used by the worker pool to read
// back a child worker's final stats line.
pub async fn spawn_and_capture_stdout(
    mut command: Command,
) -> std::io::Result<(std::process::ExitStatus, String)> {
    command.stdout(Stdio::piped());
    let mut child = command.spawn()?;
    let mut stdout = child.stdout.take().expect("stdout was piped");
    let mut buf = String::new();
    stdout.read_to_string(&mut buf).await?;
    let status = child.wait().await?;
    Ok((status, buf))
}
