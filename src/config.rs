//! Command-line surface and runtime configuration.
//!
//! The daemon keeps no config file and no persisted state; the entire
//! configuration surface is command-line flags. Protocol and scheduler
//! constants live here as well.

use std::net::Ipv4Addr;
use std::time::Duration;

use clap::Parser;
use log::LevelFilter;

/// Daemon name, used in log lines, the PID file and the wire protocol.
pub const DAEMON_NAME: &str = "npresenced";

/// Protocol version string emitted in `present`/`absence` lines. Pinned
/// independently of the crate version; consumers parse it.
pub const DAEMON_VERSION: &str = "0.01";

/// Sentinel name stored before a device's real name is known.
pub const UNKNOWN_NAME: &str = "(unknown)";

/// Reserved MAC used to calibrate the probe duration. Expected absent.
pub const CALIBRATION_MAC: &str = "11:22:33:44:55:66";

/// Consecutive probe failures before a device is considered down.
pub const DOWN_THRESHOLD: u32 = 2;

/// Timestamp written on an up→down edge. Entries carrying it are
/// treated as stale regardless of their computed age; the clock bases
/// its readings above it so a real observation never collides with it.
pub const STALE_SENTINEL: u64 = 1;

/// Pause between scanner passes over the subscription registry.
pub const RETRY_SLEEP: Duration = Duration::from_secs(1);

/// Dispatcher tick period.
pub const MAINLOOP_SLEEP: Duration = Duration::from_millis(250);

/// Upper bound on a single receive from a client socket.
pub const INET_RECV_BUFFER: usize = 1500;

/// Seconds between presence table eviction passes.
pub const CLEANUP_INTERVAL: u64 = 900;

/// Entries older than this and unreferenced by any session are evicted.
pub const CLEANUP_MAX_AGE: u64 = 1800;

/// Seconds between stats log lines at the default log level.
pub const STATS_INTERVAL_INFO: u64 = 300;

/// Seconds between stats log lines when the log level is `LOG_DEBUG`.
pub const STATS_INTERVAL_DEBUG: u64 = 60;

/// Seconds between presence table dumps in debug mode.
pub const DUMP_INTERVAL: u64 = 10;

/// Slack subtracted from a subscription interval when deciding whether a
/// persistently-present device needs its table timestamp refreshed.
pub const REFRESH_SLACK: u64 = 5;

/// PID file written when running as a daemon.
pub const PID_FILE: &str = "/var/run/npresenced.pid";

/// Log levels accepted by `--loglevel`, mirroring syslog priorities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, strum::Display)]
pub enum LogLevel {
   #[value(name = "LOG_EMERG")]
   #[strum(serialize = "LOG_EMERG")]
   Emerg,
   #[value(name = "LOG_ALERT")]
   #[strum(serialize = "LOG_ALERT")]
   Alert,
   #[value(name = "LOG_CRIT")]
   #[strum(serialize = "LOG_CRIT")]
   Crit,
   #[value(name = "LOG_ERR")]
   #[strum(serialize = "LOG_ERR")]
   Err,
   #[value(name = "LOG_WARNING")]
   #[strum(serialize = "LOG_WARNING")]
   Warning,
   #[value(name = "LOG_NOTICE")]
   #[strum(serialize = "LOG_NOTICE")]
   Notice,
   #[value(name = "LOG_INFO")]
   #[strum(serialize = "LOG_INFO")]
   Info,
   #[value(name = "LOG_DEBUG")]
   #[strum(serialize = "LOG_DEBUG")]
   Debug,
}

impl LogLevel {
   /// Folds the eight syslog priorities onto the log facade's filters.
   pub fn to_filter(self) -> LevelFilter {
      match self {
         Self::Emerg | Self::Alert | Self::Crit | Self::Err => LevelFilter::Error,
         Self::Warning => LevelFilter::Warn,
         Self::Notice | Self::Info => LevelFilter::Info,
         Self::Debug => LevelFilter::Debug,
      }
   }

   /// Stats cadence depends on the effective log level.
   pub fn stats_interval(self) -> u64 {
      if self == Self::Debug {
         STATS_INTERVAL_DEBUG
      } else {
         STATS_INTERVAL_INFO
      }
   }
}

/// Log sinks accepted by `--logtarget`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, strum::Display)]
pub enum LogTarget {
   #[value(name = "syslog")]
   #[strum(serialize = "syslog")]
   Syslog,
   #[value(name = "stdout")]
   #[strum(serialize = "stdout")]
   Stdout,
}

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = DAEMON_NAME, version = DAEMON_VERSION)]
#[command(about = "Bluetooth presence daemon for home-automation controllers")]
pub struct Config {
   /// Bluetooth radio handed to the name lookup helper
   #[arg(short = 'b', long = "bluetoothdevice", default_value = "hci0")]
   pub bluetooth_device: String,

   /// IPv4 address to listen on
   #[arg(short = 'a', long = "listenaddress", default_value = "0.0.0.0")]
   pub listen_address: Ipv4Addr,

   /// TCP port to listen on
   #[arg(short = 'p', long = "listenport", default_value_t = 5333)]
   pub listen_port: u16,

   /// Detach from the terminal and write a PID file
   #[arg(short = 'd', long = "daemon")]
   pub daemon: bool,

   /// Calibrate the probe duration and pack probe slots across MACs
   #[arg(long = "fast")]
   pub fast: bool,

   /// Log priority threshold
   #[arg(short = 'l', long = "loglevel", default_value = "LOG_INFO")]
   pub log_level: LogLevel,

   /// Log sink
   #[arg(short = 't', long = "logtarget", default_value = "stdout")]
   pub log_target: LogTarget,

   /// Enable the periodic presence table dump
   #[arg(long = "debug")]
   pub debug: bool,
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn parses_defaults() {
      let cfg = Config::parse_from([DAEMON_NAME]);
      assert_eq!(cfg.bluetooth_device, "hci0");
      assert_eq!(cfg.listen_address, Ipv4Addr::new(0, 0, 0, 0));
      assert_eq!(cfg.listen_port, 5333);
      assert!(!cfg.daemon);
      assert!(!cfg.fast);
      assert_eq!(cfg.log_level, LogLevel::Info);
      assert_eq!(cfg.log_target, LogTarget::Stdout);
   }

   #[test]
   fn parses_full_surface() {
      let cfg = Config::parse_from([
         DAEMON_NAME,
         "-b",
         "hci1",
         "-a",
         "127.0.0.1",
         "-p",
         "5334",
         "-d",
         "--fast",
         "-l",
         "LOG_DEBUG",
         "-t",
         "syslog",
         "--debug",
      ]);
      assert_eq!(cfg.bluetooth_device, "hci1");
      assert_eq!(cfg.listen_address, Ipv4Addr::new(127, 0, 0, 1));
      assert_eq!(cfg.listen_port, 5334);
      assert!(cfg.daemon && cfg.fast && cfg.debug);
      assert_eq!(cfg.log_level, LogLevel::Debug);
      assert_eq!(cfg.log_target, LogTarget::Syslog);
   }

   #[test]
   fn rejects_bad_listen_address() {
      assert!(Config::try_parse_from([DAEMON_NAME, "-a", "not-an-ip"]).is_err());
      assert!(Config::try_parse_from([DAEMON_NAME, "-a", "1.2.3"]).is_err());
   }

   #[test]
   fn rejects_unknown_log_level() {
      assert!(Config::try_parse_from([DAEMON_NAME, "-l", "LOG_BOGUS"]).is_err());
   }

   #[test]
   fn level_folding() {
      assert_eq!(LogLevel::Emerg.to_filter(), LevelFilter::Error);
      assert_eq!(LogLevel::Warning.to_filter(), LevelFilter::Warn);
      assert_eq!(LogLevel::Notice.to_filter(), LevelFilter::Info);
      assert_eq!(LogLevel::Debug.to_filter(), LevelFilter::Debug);
   }

   #[test]
   fn stats_cadence_tracks_level() {
      assert_eq!(LogLevel::Info.stats_interval(), STATS_INTERVAL_INFO);
      assert_eq!(LogLevel::Debug.stats_interval(), STATS_INTERVAL_DEBUG);
   }
}
