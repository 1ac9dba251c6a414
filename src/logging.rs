//! Leveled log facility.
//!
//! Everything logs through the `log` facade; this module only selects
//! the sink. `stdout` keeps the daemon observable in the foreground,
//! `syslog` hands lines to the system log the way a service manager
//! expects.

use syslog::{BasicLogger, Facility, Formatter3164};

use crate::config::{DAEMON_NAME, LogLevel, LogTarget};
use crate::error::Result;

/// Installs the global logger. Must be called exactly once, before any
/// log output.
pub fn init(level: LogLevel, target: LogTarget) -> Result<()> {
   let filter = level.to_filter();
   match target {
      LogTarget::Stdout => {
         env_logger::Builder::new()
            .filter_level(filter)
            .target(env_logger::Target::Stdout)
            .format_timestamp_secs()
            .init();
      },
      LogTarget::Syslog => {
         let formatter = Formatter3164 {
            facility: Facility::LOG_DAEMON,
            hostname: None,
            process: DAEMON_NAME.into(),
            pid: std::process::id(),
         };
         let logger = syslog::unix(formatter)?;
         log::set_boxed_logger(Box::new(BasicLogger::new(logger)))?;
         log::set_max_level(filter);
      },
   }
   Ok(())
}
