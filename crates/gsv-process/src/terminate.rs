//! Process termination primitives.
//!
//! Only the hard kill lives here. The graceful path writes a console
//! command and waits, which needs the child's stdin and belongs to
//! `gsv-process-control`.

use gsv_common::{ProcessError, ProcessResult};

/// Force kill a process (SIGKILL on Unix, TerminateProcess on Windows).
///
/// A pid that no longer exists counts as success.
///
/// # Errors
///
/// [`ProcessError::StopFailed`] when the OS refuses the kill, typically
/// for lack of permission.
pub fn force_kill(pid: u32) -> ProcessResult<()> {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let nix_pid = Pid::from_raw(pid as i32);
        match kill(nix_pid, Signal::SIGKILL) {
            Ok(()) => Ok(()),
            // Already gone: nothing left to kill
            Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(ProcessError::stop_failed(pid.to_string(), e.to_string())),
        }
    }

    #[cfg(windows)]
    {
        use windows::Win32::Foundation::CloseHandle;
        use windows::Win32::System::Threading::{OpenProcess, TerminateProcess, PROCESS_TERMINATE};

        unsafe {
            let handle = match OpenProcess(PROCESS_TERMINATE, false, pid) {
                Ok(h) if !h.is_invalid() => h,
                _ => {
                    return Err(ProcessError::stop_failed(
                        pid.to_string(),
                        "Failed to open process for termination",
                    ));
                }
            };

            let result = TerminateProcess(handle, 1);
            let _ = CloseHandle(handle);

            result.map_err(|e| {
                ProcessError::stop_failed(pid.to_string(), format!("TerminateProcess failed: {}", e))
            })
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_force_kill_terminates_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        force_kill(child.id()).unwrap();

        let status = child.wait().unwrap();
        assert!(!status.success());
    }

    #[test]
    fn test_force_kill_reaped_child_is_ok() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        // The pid is reaped, so the kernel reports ESRCH
        assert!(force_kill(pid).is_ok());
    }
}
