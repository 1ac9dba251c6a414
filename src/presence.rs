//! Shared presence table.
//!
//! Maps each probed MAC to its last observation. The scanner is the only
//! writer, the dispatcher reads during emission, stats and cleanup. The
//! lock is held only for the duration of each operation.

use std::collections::HashMap;
use std::sync::Mutex;

use smol_str::SmolStr;

use crate::config::{STALE_SENTINEL, UNKNOWN_NAME};
use crate::mac::MacAddr;

/// One observation in the presence table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
   /// Last successfully observed friendly name, or `(unknown)`.
   pub name: SmolStr,
   /// Opaque lower-case address type, possibly empty.
   pub address_type: SmolStr,
   /// Monotonic seconds of the most recent update, or `STALE_SENTINEL`
   /// after a down edge.
   pub timestamp: u64,
   /// `timestamp` value immediately prior to the last update.
   pub prev_timestamp: u64,
}

impl DeviceEntry {
   /// Whether this observation is recent enough for a subscriber
   /// polling at `interval_s`. An entry pinned at the stale sentinel is
   /// never fresh; its literal age would pass the check while process
   /// uptime is still below the interval.
   pub fn is_fresh(&self, now: u64, interval_s: u64) -> bool {
      self.timestamp != STALE_SENTINEL && now.saturating_sub(self.timestamp) <= interval_s
   }
}

/// Concurrency-safe MAC → observation mapping.
#[derive(Debug, Default)]
pub struct PresenceTable {
   devices: Mutex<HashMap<MacAddr, DeviceEntry>>,
}

impl PresenceTable {
   pub fn new() -> Self {
      Self::default()
   }

   /// Records an observation.
   ///
   /// A fresh entry gets `prev_timestamp == timestamp`; an update shifts
   /// the old timestamp into `prev_timestamp`, clamped so that
   /// `prev_timestamp <= timestamp` holds even when the scanner rewinds
   /// an entry to the distant-past sentinel on a down edge. A real name,
   /// once stored, is never replaced by an empty name or the `(unknown)`
   /// sentinel.
   pub fn upsert(&self, mac: MacAddr, name: &str, address_type: &str, ts: u64) {
      let mut devices = self.devices.lock().unwrap();
      let address_type = SmolStr::from(address_type.to_lowercase());
      match devices.get_mut(&mac) {
         Some(entry) => {
            entry.prev_timestamp = entry.timestamp.min(ts);
            entry.timestamp = ts;
            if !name.is_empty() && name != UNKNOWN_NAME {
               entry.name = SmolStr::from(name);
            }
            entry.address_type = address_type;
         },
         None => {
            devices.insert(
               mac,
               DeviceEntry {
                  name: SmolStr::from(name),
                  address_type,
                  timestamp: ts,
                  prev_timestamp: ts,
               },
            );
         },
      }
   }

   pub fn read(&self, mac: MacAddr) -> Option<DeviceEntry> {
      self.devices.lock().unwrap().get(&mac).cloned()
   }

   pub fn remove(&self, mac: MacAddr) {
      self.devices.lock().unwrap().remove(&mac);
   }

   pub fn len(&self) -> usize {
      self.devices.lock().unwrap().len()
   }

   pub fn is_empty(&self) -> bool {
      self.devices.lock().unwrap().is_empty()
   }

   /// Copies out the whole table, for cleanup and the debug dump.
   pub fn snapshot(&self) -> Vec<(MacAddr, DeviceEntry)> {
      self
         .devices
         .lock()
         .unwrap()
         .iter()
         .map(|(mac, entry)| (*mac, entry.clone()))
         .collect()
   }

   /// Minimum and maximum entry age, or `None` when the table is empty.
   pub fn age_bounds(&self, now: u64) -> Option<(u64, u64)> {
      let devices = self.devices.lock().unwrap();
      let mut bounds: Option<(u64, u64)> = None;
      for entry in devices.values() {
         let age = now.saturating_sub(entry.timestamp);
         bounds = Some(match bounds {
            Some((min, max)) => (min.min(age), max.max(age)),
            None => (age, age),
         });
      }
      bounds
   }
}
