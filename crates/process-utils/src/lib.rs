//! Small process-related helpers shared across the workspace.
//!
//! Transfer processes are started through [`tokio_command`] and stopped in two
//! steps: [`request_termination`] asks politely, [`force_kill`] does not.

use std::ffi::OsStr;
use std::io;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Ask a child process to exit.
///
/// On Unix this sends `SIGTERM` so the transfer tool can flush and clean up.
/// Other platforms have no graceful equivalent and get an immediate kill.
/// A child that has already been reaped is left alone.
#[cfg(feature = "tokio")]
pub fn request_termination(child: &mut tokio::process::Child) -> io::Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Some(pid) = child.id() else {
            return Ok(());
        };
        let pid = i32::try_from(pid).map_err(|_| io::Error::other("pid out of range"))?;
        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(errno) => Err(io::Error::from(errno)),
        }
    }
    #[cfg(not(unix))]
    {
        match child.start_kill() {
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            other => other,
        }
    }
}

/// Kill a child process and reap it.
///
/// Killing a process that already exited is not an error.
#[cfg(feature = "tokio")]
pub async fn force_kill(child: &mut tokio::process::Child) -> io::Result<()> {
    match child.kill().await {
        Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
        other => other,
    }
}

/// Check whether a child process is still running without blocking.
#[cfg(feature = "tokio")]
pub fn is_running(child: &mut tokio::process::Child) -> bool {
    matches!(child.try_wait(), Ok(None))
}
