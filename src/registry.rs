//! Subscription registry.
//!
//! Maps each MAC under active probing to the polling interval currently
//! requested by a client, plus a transient force flag raised by the
//! scanner on a presence edge and consumed by the dispatcher. Written by
//! the dispatcher, read by the scanner.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::mac::MacAddr;

#[derive(Debug, Clone)]
struct Subscription {
   interval_s: u64,
   force: bool,
}

/// Concurrency-safe MAC → subscription mapping.
///
/// A MAC is present iff at least one live session references it. There is
/// no reference counting: when any referring session disconnects or sends
/// `stop`, the MAC is removed unconditionally.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
   subscriptions: Mutex<HashMap<MacAddr, Subscription>>,
}

impl SubscriptionRegistry {
   pub fn new() -> Self {
      Self::default()
   }

   /// Adds a MAC or updates its interval.
   pub fn set(&self, mac: MacAddr, interval_s: u64) {
      let mut subs = self.subscriptions.lock().unwrap();
      subs
         .entry(mac)
         .and_modify(|s| s.interval_s = interval_s)
         .or_insert(Subscription {
            interval_s,
            force: false,
         });
   }

   pub fn unset(&self, mac: MacAddr) {
      self.subscriptions.lock().unwrap().remove(&mac);
   }

   pub fn contains(&self, mac: MacAddr) -> bool {
      self.subscriptions.lock().unwrap().contains_key(&mac)
   }

   /// Raises the force flag for a MAC still under subscription.
   pub fn mark_force(&self, mac: MacAddr) {
      if let Some(sub) = self.subscriptions.lock().unwrap().get_mut(&mac) {
         sub.force = true;
      }
   }

   /// Returns all MACs with a raised force flag, clearing the flags.
   pub fn drain_force(&self) -> Vec<MacAddr> {
      let mut subs = self.subscriptions.lock().unwrap();
      let mut forced = Vec::new();
      for (mac, sub) in subs.iter_mut() {
         if sub.force {
            sub.force = false;
            forced.push(*mac);
         }
      }
      forced
   }

   /// Copies out the current (MAC, interval) pairs for a scanner pass.
   pub fn snapshot(&self) -> Vec<(MacAddr, u64)> {
      self
         .subscriptions
         .lock()
         .unwrap()
         .iter()
         .map(|(mac, sub)| (*mac, sub.interval_s))
         .collect()
   }
}
