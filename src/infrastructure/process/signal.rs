//! Signal helpers for processes we did not spawn ourselves.

use std::io;

/// Force-kills `pid`. A process that is already gone is not an error.
#[cfg(unix)]
pub fn terminate_pid(pid: u32) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("pid {pid} out of range")))?;
    match kill(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

/// Force-kills `pid`. A process that is already gone is not an error.
#[cfg(not(unix))]
pub fn terminate_pid(pid: u32) -> io::Result<()> {
    let status = std::process::Command::new("taskkill")
        .args(["/F", "/PID", &pid.to_string()])
        .output()?;
    if status.status.success() || status.status.code() == Some(128) {
        Ok(())
    } else {
        Err(io::Error::other(String::from_utf8_lossy(&status.stderr).trim().to_string()))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_missing_pid_is_not_an_error() {
        // Highest pid Linux can hand out is 2^22; this one cannot exist.
        assert!(terminate_pid(i32::MAX as u32).is_ok());
    }

    #[test]
    fn test_out_of_range_pid_is_rejected() {
        let err = terminate_pid(u32::MAX).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_kills_running_process() {
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        terminate_pid(child.id()).expect("kill");
        let status = child.wait().expect("wait");
        assert!(!status.success());
    }
}
