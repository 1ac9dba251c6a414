//! Client session state and wire formatting.
//!
//! One session per TCP connection. A session holds at most one active
//! subscription; a new subscribe command replaces the prior MAC.

use std::net::SocketAddr;

use tokio::net::tcp::OwnedWriteHalf;

use crate::config::{DAEMON_NAME, DAEMON_VERSION};
use crate::mac::MacAddr;

/// Response to a recognized `subscribe` or `now` command.
pub const RESP_ACCEPTED: &str = "command accepted";

/// Response to `stop`.
pub const RESP_STOPPED: &str = "no command running";

/// One connected client.
pub struct Session {
   pub writer: OwnedWriteHalf,
   pub peer: SocketAddr,
   /// Subscribed MAC, if any.
   pub mac: Option<MacAddr>,
   pub interval_s: u64,
   /// Monotonic-seconds deadline for the next update emission; 0 means
   /// emit at the next tick.
   pub next_check: u64,
}

impl Session {
   pub fn new(writer: OwnedWriteHalf, peer: SocketAddr) -> Self {
      Self {
         writer,
         peer,
         mac: None,
         interval_s: 0,
         next_check: 0,
      }
   }
}

/// Update line for a reachable device.
pub fn present_line(name: &str) -> String {
   format!("present;device_name={name};model=lan-{DAEMON_NAME};daemon={DAEMON_NAME} V{DAEMON_VERSION}")
}

/// Update line for an unreachable device.
pub fn absence_line() -> String {
   format!("absence;model=lan-{DAEMON_NAME};daemon={DAEMON_NAME} V{DAEMON_VERSION}")
}

/// `pong` line carrying daemon stats; `%` stands for unknown ages.
pub fn pong_line(clients: usize, devices: usize, ages: Option<(u64, u64)>) -> String {
   let (min_age, max_age) = match ages {
      Some((min, max)) => (min.to_string(), max.to_string()),
      None => ("%".to_string(), "%".to_string()),
   };
   format!("pong [clients={clients};devices={devices};min_age={min_age};max_age={max_age}]")
}
