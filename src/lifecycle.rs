//! Process lifecycle: single-instance lock, daemonization, PID file and
//! signal handling.
//!
//! The instance lock is a non-blocking advisory `flock` on the daemon's
//! own executable image, so a second copy fails fast without needing a
//! writable run directory.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use log::warn;
use tokio::signal::unix::{signal, SignalKind};

use crate::error::{PresenceError, Result};

/// Holds the advisory lock for the process lifetime.
#[derive(Debug)]
pub struct InstanceLock {
   _file: File,
}

/// Takes an exclusive non-blocking lock on `path`. A held lock means
/// another instance is running (exit code 3).
pub fn acquire_instance_lock(path: &Path) -> Result<InstanceLock> {
   let file = File::open(path)?;
   let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
   if rc != 0 {
      let err = io::Error::last_os_error();
      if err.kind() == io::ErrorKind::WouldBlock {
         return Err(PresenceError::AlreadyRunning);
      }
      return Err(err.into());
   }
   Ok(InstanceLock { _file: file })
}

/// Path of this daemon's executable image, the lock target.
pub fn executable_path() -> Result<PathBuf> {
   Ok(std::env::current_exe()?)
}

/// Classic double fork. The intermediate parents `_exit` immediately;
/// the surviving child is session leader with stdio on `/dev/null`.
/// Must run before the async runtime starts any threads.
pub fn daemonize() -> Result<()> {
   unsafe {
      match libc::fork() {
         -1 => return Err(io::Error::last_os_error().into()),
         0 => {},
         _ => libc::_exit(0),
      }
      if libc::setsid() == -1 {
         return Err(io::Error::last_os_error().into());
      }
      match libc::fork() {
         -1 => return Err(io::Error::last_os_error().into()),
         0 => {},
         _ => libc::_exit(0),
      }
   }

   std::env::set_current_dir("/")?;

   let devnull = OpenOptions::new().read(true).write(true).open("/dev/null")?;
   let fd = devnull.as_raw_fd();
   unsafe {
      libc::dup2(fd, libc::STDIN_FILENO);
      libc::dup2(fd, libc::STDOUT_FILENO);
      libc::dup2(fd, libc::STDERR_FILENO);
   }
   Ok(())
}

/// Writes our PID; called after daemonizing.
pub fn write_pid_file(path: &Path) -> Result<()> {
   let mut file = File::create(path)?;
   writeln!(file, "{}", std::process::id())?;
   Ok(())
}

pub fn remove_pid_file(path: &Path) {
   if let Err(e) = fs::remove_file(path) {
      if e.kind() != io::ErrorKind::NotFound {
         warn!("failed to remove PID file {}: {e}", path.display());
      }
   }
}

/// Writes to a vanished peer must surface as ordinary I/O errors, not
/// kill the process.
pub fn ignore_sigpipe() {
   unsafe {
      libc::signal(libc::SIGPIPE, libc::SIG_IGN);
   }
}

/// Resolves when SIGINT, SIGTERM or SIGHUP arrives; returns the name of
/// the signal for the shutdown log line.
pub async fn shutdown_signal() -> &'static str {
   let mut interrupt = match signal(SignalKind::interrupt()) {
      Ok(stream) => stream,
      Err(e) => {
         warn!("failed to install SIGINT handler: {e}");
         return futures_never().await;
      },
   };
   let mut terminate = match signal(SignalKind::terminate()) {
      Ok(stream) => stream,
      Err(e) => {
         warn!("failed to install SIGTERM handler: {e}");
         return futures_never().await;
      },
   };
   let mut hangup = match signal(SignalKind::hangup()) {
      Ok(stream) => stream,
      Err(e) => {
         warn!("failed to install SIGHUP handler: {e}");
         return futures_never().await;
      },
   };

   tokio::select! {
      _ = interrupt.recv() => "SIGINT",
      _ = terminate.recv() => "SIGTERM",
      _ = hangup.recv() => "SIGHUP",
   }
}

async fn futures_never() -> &'static str {
   std::future::pending().await
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn instance_lock_is_exclusive() {
      let dir = tempfile::tempdir().unwrap();
      let path = dir.path().join("npresenced.lock");
      fs::write(&path, b"").unwrap();

      let first = acquire_instance_lock(&path).unwrap();
      match acquire_instance_lock(&path) {
         Err(PresenceError::AlreadyRunning) => {},
         other => panic!("expected AlreadyRunning, got {other:?}"),
      }

      drop(first);
      acquire_instance_lock(&path).unwrap();
   }

   #[test]
   fn pid_file_round_trip() {
      let dir = tempfile::tempdir().unwrap();
      let path = dir.path().join("npresenced.pid");

      write_pid_file(&path).unwrap();
      let contents = fs::read_to_string(&path).unwrap();
      assert_eq!(contents.trim(), std::process::id().to_string());

      remove_pid_file(&path);
      assert!(!path.exists());
      // Removing a missing file is a no-op.
      remove_pid_file(&path);
   }
}
