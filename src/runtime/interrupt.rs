//! Process termination: SIGTERM, a grace window, then SIGKILL.

use std::time::Duration;

use log::{info, warn};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::time::{sleep, Instant};

use super::{RuntimeError, RuntimeResult};

const TERM_GRACE: Duration = Duration::from_secs(3);
const TERM_POLL: Duration = Duration::from_millis(100);
const KILL_PROBES: u32 = 3;
const KILL_PROBE_INTERVAL: Duration = Duration::from_millis(50);

fn process_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

/// Terminate a command's process group: SIGTERM, up to three seconds for a
/// graceful exit, then SIGKILL confirmed by signal-0 probes.
///
/// A pid that is already gone (or was never recorded) counts as success, so
/// interrupting a finished session is idempotent.
pub(crate) async fn kill_pid(pid: i32) -> RuntimeResult<()> {
    if pid <= 0 {
        return Ok(());
    }

    warn!("attempting to terminate process {pid}");
    let group = Pid::from_raw(-pid);

    match kill(group, Signal::SIGTERM) {
        Err(Errno::ESRCH) => return Ok(()),
        Err(err) => {
            warn!("SIGTERM failed for pid {pid}: {err}, trying SIGKILL");
        }
        Ok(()) => {
            let deadline = Instant::now() + TERM_GRACE;
            while Instant::now() < deadline {
                sleep(TERM_POLL).await;
                if !process_alive(pid) {
                    info!("process {pid} terminated gracefully");
                    return Ok(());
                }
            }
            warn!("process {pid} did not terminate after SIGTERM, using SIGKILL");
        }
    }

    match kill(group, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => {
            return Err(RuntimeError::Io(std::io::Error::from_raw_os_error(
                err as i32,
            )))
        }
    }

    for _ in 0..KILL_PROBES {
        if !process_alive(pid) {
            info!("process {pid} confirmed terminated");
            return Ok(());
        }
        sleep(KILL_PROBE_INTERVAL).await;
    }

    Err(RuntimeError::StillRunning(pid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn killing_a_dead_pid_is_idempotent() {
        // spawn and reap a process so its pid is certainly gone
        let child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id() as i32;
        let mut child = child;
        child.wait().unwrap();

        assert!(kill_pid(pid).await.is_ok());
    }

    #[tokio::test]
    async fn unrecorded_pid_is_a_no_op() {
        assert!(kill_pid(-1).await.is_ok());
        assert!(kill_pid(0).await.is_ok());
    }
}
