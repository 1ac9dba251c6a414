//! Error types for the presence daemon.
//!
//! This module defines all error types that can occur during startup and
//! operation of the daemon, together with the process exit codes that
//! fatal setup errors map onto.

use thiserror::Error;

/// Main error type for the presence daemon.
#[derive(Error, Debug)]
pub enum PresenceError {
   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("name lookup tool `{0}` not found on PATH")]
   LookupToolMissing(String),

   #[error("another instance is already running")]
   AlreadyRunning,

   #[error("failed to bind listen socket: {0}")]
   Bind(std::io::Error),

   #[error("invalid MAC address: {0}")]
   InvalidMac(String),

   #[error("logger error: {0}")]
   Logger(#[from] log::SetLoggerError),

   #[error("syslog error: {0}")]
   Syslog(#[from] syslog::Error),
}

impl PresenceError {
   /// Process exit code for a fatal setup error.
   pub fn exit_code(&self) -> i32 {
      match self {
         Self::Bind(_) => 2,
         Self::AlreadyRunning => 3,
         Self::LookupToolMissing(_) => 4,
         _ => 1,
      }
   }
}

/// Convenience type alias for Results with `PresenceError`.
pub type Result<T> = std::result::Result<T, PresenceError>;
