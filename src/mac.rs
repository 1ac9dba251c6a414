//! Bluetooth MAC address type.
//!
//! Canonical form is lower-case colon-separated hex. Parsing accepts
//! either case; anything else is rejected.

use std::fmt;
use std::str::FromStr;

use crate::error::PresenceError;

/// 48-bit Bluetooth device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; 6]);

impl FromStr for MacAddr {
   type Err = PresenceError;

   fn from_str(s: &str) -> Result<Self, Self::Err> {
      let mut octets = [0u8; 6];
      let mut parts = s.split(':');
      for octet in &mut octets {
         let part = parts
            .next()
            .ok_or_else(|| PresenceError::InvalidMac(s.to_string()))?;
         if part.len() != 2 {
            return Err(PresenceError::InvalidMac(s.to_string()));
         }
         *octet =
            u8::from_str_radix(part, 16).map_err(|_| PresenceError::InvalidMac(s.to_string()))?;
      }
      if parts.next().is_some() {
         return Err(PresenceError::InvalidMac(s.to_string()));
      }
      Ok(Self(octets))
   }
}

impl fmt::Display for MacAddr {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let o = &self.0;
      write!(
         f,
         "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
         o[0], o[1], o[2], o[3], o[4], o[5]
      )
   }
}
