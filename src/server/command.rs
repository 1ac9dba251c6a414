//! Client command parser.
//!
//! Line protocol, ASCII, one command per line. Whitespace around tokens
//! is tolerated; commands are case-sensitive except for MAC hex digits.
//! Unrecognized lines never close the connection.

use crate::mac::MacAddr;

/// A recognized client command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
   /// `<mac>|<interval>`: subscribe this session to a MAC.
   Subscribe { mac: MacAddr, interval_s: u64 },
   /// `now`: emit an update at the next tick.
   Now,
   /// `ping`: answer with stats, then disconnect.
   Ping,
   /// `stop`: drop this session's subscription.
   Stop,
}

/// Parses one trimmed input line. `None` means the line is not a command;
/// the caller logs it and keeps the connection open.
pub fn parse(line: &str) -> Option<Command> {
   let line = line.trim();
   match line {
      "now" => return Some(Command::Now),
      "ping" => return Some(Command::Ping),
      "stop" => return Some(Command::Stop),
      _ => {},
   }

   let (mac, interval) = line.split_once('|')?;
   let mac: MacAddr = mac.trim().parse().ok()?;
   let interval_s: u64 = interval.trim().parse().ok()?;
   if interval_s == 0 {
      return None;
   }
   Some(Command::Subscribe { mac, interval_s })
}

#[cfg(test)]
mod tests {
   use super::*;

   fn mac(s: &str) -> MacAddr {
      s.parse().unwrap()
   }

   #[test]
   fn parses_subscribe() {
      assert_eq!(
         parse("aa:bb:cc:dd:ee:ff|30"),
         Some(Command::Subscribe {
            mac: mac("aa:bb:cc:dd:ee:ff"),
            interval_s: 30,
         })
      );
   }

   #[test]
   fn tolerates_whitespace_around_tokens() {
      assert_eq!(
         parse("  AA:BB:CC:DD:EE:FF  |  10  "),
         Some(Command::Subscribe {
            mac: mac("aa:bb:cc:dd:ee:ff"),
            interval_s: 10,
         })
      );
      assert_eq!(parse(" now "), Some(Command::Now));
   }

   #[test]
   fn parses_bare_commands() {
      assert_eq!(parse("now"), Some(Command::Now));
      assert_eq!(parse("ping"), Some(Command::Ping));
      assert_eq!(parse("stop"), Some(Command::Stop));
   }

   #[test]
   fn commands_are_case_sensitive() {
      assert_eq!(parse("NOW"), None);
      assert_eq!(parse("Ping"), None);
      assert_eq!(parse("STOP"), None);
   }

   #[test]
   fn rejects_malformed_lines() {
      for line in [
         "",
         "garbage",
         "aa:bb:cc:dd:ee:ff",
         "aa:bb:cc:dd:ee:ff|",
         "aa:bb:cc:dd:ee:ff|0",
         "aa:bb:cc:dd:ee:ff|-5",
         "aa:bb:cc:dd:ee:ff|ten",
         "aa:bb:cc:dd:ee|30",
         "zz:bb:cc:dd:ee:ff|30",
      ] {
         assert_eq!(parse(line), None, "accepted {line:?}");
      }
   }
}
