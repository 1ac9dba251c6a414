//! Scan scheduling and presence state engine.
//!
//! A single task walks the subscription registry, probes each due MAC
//! over the shared radio, applies the up/down hysteresis rules and keeps
//! the presence table fresh. Probes are strictly sequential; while one
//! blocks, no other MAC is probed. With fast presence enabled, the next
//! probe slot for each MAC is packed so probes for different MACs tend
//! not to collide within the calibrated probe duration.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};
use smol_str::SmolStr;
use tokio::time::sleep;

use crate::clock::Clock;
use crate::config::{DOWN_THRESHOLD, REFRESH_SLACK, RETRY_SLEEP, STALE_SENTINEL};
use crate::mac::MacAddr;
use crate::presence::PresenceTable;
use crate::probe::NameResolver;
use crate::registry::SubscriptionRegistry;

// === Per-MAC probe state ===

#[derive(Debug, Clone)]
struct Tracker {
   /// Consecutive probe failures; 0 after a success.
   down_count: u32,
   /// Deadline for the next probe; 0 means probe on the next pass.
   next_probe_at: u64,
   /// Completion time of the last probe that mattered.
   last_probe_at: u64,
   /// Last observed friendly name, possibly empty.
   last_name: SmolStr,
   /// Raised when an edge was detected and the table update must carry
   /// the force flag.
   pending_force: bool,
}

impl Tracker {
   /// A fresh tracker starts beyond the down threshold so the first
   /// successful observation registers as an edge.
   fn fresh() -> Self {
      Self {
         down_count: DOWN_THRESHOLD + 1,
         next_probe_at: 0,
         last_probe_at: 0,
         last_name: SmolStr::default(),
         pending_force: false,
      }
   }
}

// === Scanner ===

/// Single-owner scan loop over the shared radio.
pub struct Scanner<R> {
   resolver: R,
   clock: Clock,
   presence: Arc<PresenceTable>,
   registry: Arc<SubscriptionRegistry>,
   /// Calibrated wall seconds one probe occupies the radio; 0 disables
   /// slot packing.
   t_probe: u64,
   trackers: HashMap<MacAddr, Tracker>,
}

impl<R: NameResolver> Scanner<R> {
   pub fn new(
      resolver: R,
      clock: Clock,
      presence: Arc<PresenceTable>,
      registry: Arc<SubscriptionRegistry>,
      t_probe: u64,
   ) -> Self {
      Self {
         resolver,
         clock,
         presence,
         registry,
         t_probe,
         trackers: HashMap::new(),
      }
   }

   pub async fn run(mut self) {
      info!("scanner started");
      loop {
         self.iterate().await;
         sleep(RETRY_SLEEP).await;
      }
   }

   /// One pass over the subscription registry.
   async fn iterate(&mut self) {
      let snapshot = self.registry.snapshot();
      self
         .trackers
         .retain(|mac, _| snapshot.iter().any(|(m, _)| m == mac));

      for (mac, interval) in &snapshot {
         self.probe_one(*mac, *interval).await;
      }

      self.refresh_static(&snapshot);
   }

   /// Probes one MAC if due and applies the edge state machine.
   async fn probe_one(&mut self, mac: MacAddr, interval: u64) {
      {
         let now = self.clock.now_seconds();
         let tracker = self.trackers.entry(mac).or_insert_with(Tracker::fresh);
         if now < tracker.next_probe_at {
            return;
         }
      }

      let resolved = self.resolver.resolve(mac).await;
      let now = self.clock.now_seconds();

      let Some(tracker) = self.trackers.get_mut(&mac) else {
         return;
      };

      let mut retry_now = false;
      match resolved {
         Some(name) => {
            if tracker.down_count >= DOWN_THRESHOLD {
               debug!("{mac} is reachable again as \"{name}\"");
               tracker.pending_force = true;
               self.presence.upsert(mac, &name, "", now);
            }
            tracker.down_count = 0;
            tracker.last_probe_at = now;
            tracker.last_name = name;
         },
         None => {
            tracker.down_count += 1;
            if tracker.down_count == DOWN_THRESHOLD {
               debug!("{mac} became unreachable");
               tracker.pending_force = true;
               tracker.last_probe_at = STALE_SENTINEL;
            } else if tracker.down_count < DOWN_THRESHOLD {
               retry_now = true;
            }
         },
      }

      let down_count = tracker.down_count;
      let pending_force = tracker.pending_force;
      let last_probe_at = tracker.last_probe_at;
      let last_name = tracker.last_name.clone();

      let next_probe_at = if retry_now {
         0
      } else {
         self.schedule(mac, interval, now, down_count)
      };

      if let Some(tracker) = self.trackers.get_mut(&mac) {
         tracker.next_probe_at = next_probe_at;
         tracker.pending_force = false;
      }

      if pending_force || down_count < DOWN_THRESHOLD {
         self.presence.upsert(mac, &last_name, "", last_probe_at);
         if pending_force {
            self.registry.mark_force(mac);
         }
      }
   }

   /// Keeps table timestamps moving for persistently-present devices
   /// whose scheduled probe slot has slipped.
   fn refresh_static(&mut self, snapshot: &[(MacAddr, u64)]) {
      let now = self.clock.now_seconds();
      for (mac, interval) in snapshot {
         let Some(tracker) = self.trackers.get_mut(mac) else {
            continue;
         };
         if tracker.down_count < DOWN_THRESHOLD
            && now.saturating_sub(tracker.last_probe_at) > interval.saturating_sub(REFRESH_SLACK)
         {
            tracker.last_probe_at = now;
            self.presence.upsert(*mac, &tracker.last_name, "", now);
         }
      }
   }

   // === Slot packing ===

   /// Picks the next probe deadline for a MAC that just completed a
   /// probe. With fast presence disabled every MAC simply probes at its
   /// own interval.
   fn schedule(&self, mac: MacAddr, interval: u64, now: u64, down_count: u32) -> u64 {
      let desired = now + interval;
      if self.t_probe == 0 {
         return desired;
      }
      if down_count < DOWN_THRESHOLD {
         self.upvote(mac, desired, now + interval)
      } else {
         self.downvote(mac, desired, interval)
      }
   }

   fn other_slots(&self, mac: MacAddr) -> Vec<u64> {
      let mut slots: Vec<u64> = self
         .trackers
         .iter()
         .filter(|(m, t)| **m != mac && t.next_probe_at != 0)
         .map(|(_, t)| t.next_probe_at)
         .collect();
      slots.sort_unstable();
      slots
   }

   /// For a device that is up: pushes the desired slot out of every
   /// other probe's collision window, but never delays past this MAC's
   /// own interval budget.
   fn upvote(&self, mac: MacAddr, mut desired: u64, budget: u64) -> u64 {
      for other in self.other_slots(mac) {
         if desired >= other.saturating_sub(self.t_probe) && desired <= other + self.t_probe {
            desired = other + self.t_probe;
         }
      }
      desired.min(budget)
   }

   /// For a device that is down: searches forward in probe-sized steps,
   /// up to 30% of the interval, for a slot that jumps past other
   /// probes packed near the desired time.
   fn downvote(&self, mac: MacAddr, desired: u64, interval: u64) -> u64 {
      let others = self.other_slots(mac);
      let max_offset = interval * 3 / 10;
      let mut offset = 0;
      while offset <= max_offset {
         if others
            .iter()
            .any(|&slot| slot >= desired && slot < desired + offset)
         {
            return desired + offset;
         }
         offset += self.t_probe;
      }
      desired
   }
}

#[cfg(test)]
mod tests {
   use std::collections::VecDeque;
   use std::sync::Mutex;

   use async_trait::async_trait;
   use tokio::time::{advance, Duration};

   use super::*;

   const MAC_A: &str = "aa:bb:cc:dd:ee:01";
   const MAC_B: &str = "aa:bb:cc:dd:ee:02";

   fn mac(s: &str) -> MacAddr {
      s.parse().unwrap()
   }

   /// Replays a canned probe script per MAC; an exhausted script means
   /// the device no longer answers.
   #[derive(Default)]
   struct ScriptedResolver {
      script: Mutex<HashMap<MacAddr, VecDeque<Option<&'static str>>>>,
   }

   impl ScriptedResolver {
      fn push(&self, mac: MacAddr, responses: &[Option<&'static str>]) {
         self
            .script
            .lock()
            .unwrap()
            .entry(mac)
            .or_default()
            .extend(responses.iter().copied());
      }
   }

   #[async_trait]
   impl NameResolver for &ScriptedResolver {
      async fn resolve(&self, mac: MacAddr) -> Option<SmolStr> {
         self
            .script
            .lock()
            .unwrap()
            .get_mut(&mac)
            .and_then(|queue| queue.pop_front())
            .flatten()
            .map(SmolStr::from)
      }
   }

   fn scanner(resolver: &ScriptedResolver, t_probe: u64) -> Scanner<&ScriptedResolver> {
      Scanner::new(
         resolver,
         Clock::new(),
         Arc::new(PresenceTable::new()),
         Arc::new(SubscriptionRegistry::new()),
         t_probe,
      )
   }

   #[tokio::test(start_paused = true)]
   async fn first_success_is_an_up_edge() {
      let resolver = ScriptedResolver::default();
      resolver.push(mac(MAC_A), &[Some("Phone")]);
      let mut scanner = scanner(&resolver, 0);
      scanner.registry.set(mac(MAC_A), 30);

      scanner.iterate().await;

      let entry = scanner.presence.read(mac(MAC_A)).unwrap();
      assert_eq!(entry.name, "Phone");
      assert_eq!(scanner.registry.drain_force(), vec![mac(MAC_A)]);
      assert_eq!(scanner.trackers[&mac(MAC_A)].down_count, 0);
   }

   #[tokio::test(start_paused = true)]
   async fn never_seen_device_stays_out_of_the_table() {
      let resolver = ScriptedResolver::default();
      let mut scanner = scanner(&resolver, 0);
      scanner.registry.set(mac(MAC_A), 30);

      scanner.iterate().await;
      advance(Duration::from_secs(31)).await;
      scanner.iterate().await;

      assert!(scanner.presence.is_empty());
      assert!(scanner.registry.drain_force().is_empty());
   }

   #[tokio::test(start_paused = true)]
   async fn down_edge_fires_at_exactly_the_threshold() {
      let resolver = ScriptedResolver::default();
      resolver.push(mac(MAC_A), &[Some("Phone")]);
      let mut scanner = scanner(&resolver, 0);
      scanner.registry.set(mac(MAC_A), 10);

      scanner.iterate().await;
      assert_eq!(scanner.registry.drain_force(), vec![mac(MAC_A)]);

      // First failure is below the threshold: immediate retry, no edge.
      advance(Duration::from_secs(10)).await;
      scanner.iterate().await;
      assert!(scanner.registry.drain_force().is_empty());
      assert_eq!(scanner.trackers[&mac(MAC_A)].next_probe_at, 0);

      // Second consecutive failure is the edge.
      scanner.iterate().await;
      assert_eq!(scanner.registry.drain_force(), vec![mac(MAC_A)]);
      let entry = scanner.presence.read(mac(MAC_A)).unwrap();
      assert_eq!(entry.timestamp, STALE_SENTINEL);
      assert!(!entry.is_fresh(scanner.clock.now_seconds(), 10));
      assert_eq!(entry.name, "Phone");
   }

   #[tokio::test(start_paused = true)]
   async fn successful_probe_refreshes_the_table() {
      let resolver = ScriptedResolver::default();
      resolver.push(mac(MAC_A), &[Some("Phone"), Some("Phone")]);
      let mut scanner = scanner(&resolver, 0);
      scanner.registry.set(mac(MAC_A), 10);

      scanner.iterate().await;
      let first_probe_at = scanner.clock.now_seconds();
      scanner.registry.drain_force();
      advance(Duration::from_secs(10)).await;
      scanner.iterate().await;

      let entry = scanner.presence.read(mac(MAC_A)).unwrap();
      assert_eq!(entry.timestamp, first_probe_at + 10);
      assert_eq!(entry.prev_timestamp, first_probe_at);
      // Steady-state success does not raise the force flag again.
      assert!(scanner.registry.drain_force().is_empty());
   }

   #[tokio::test(start_paused = true)]
   async fn probe_not_due_is_skipped() {
      let resolver = ScriptedResolver::default();
      resolver.push(mac(MAC_A), &[Some("Phone"), Some("Phone")]);
      let mut scanner = scanner(&resolver, 0);
      scanner.registry.set(mac(MAC_A), 30);

      scanner.iterate().await;
      advance(Duration::from_secs(5)).await;
      scanner.iterate().await;

      // The second response is still queued: the probe was not due.
      assert_eq!(
         resolver.script.lock().unwrap()[&mac(MAC_A)].len(),
         1,
         "probe ran before its deadline"
      );
   }

   #[tokio::test(start_paused = true)]
   async fn static_device_refresh_keeps_timestamp_moving() {
      let resolver = ScriptedResolver::default();
      resolver.push(mac(MAC_A), &[Some("Phone")]);
      let mut scanner = scanner(&resolver, 0);
      scanner.registry.set(mac(MAC_A), 30);

      scanner.iterate().await;
      scanner.registry.drain_force();
      // Past interval - 5 but before the next scheduled probe.
      advance(Duration::from_secs(26)).await;
      scanner.iterate().await;

      let entry = scanner.presence.read(mac(MAC_A)).unwrap();
      assert_eq!(entry.timestamp, scanner.clock.now_seconds());
      assert!(scanner.registry.drain_force().is_empty());
   }

   #[tokio::test(start_paused = true)]
   async fn refresh_skips_down_devices() {
      let resolver = ScriptedResolver::default();
      resolver.push(mac(MAC_A), &[Some("Phone")]);
      let mut scanner = scanner(&resolver, 0);
      scanner.registry.set(mac(MAC_A), 10);

      scanner.iterate().await;
      advance(Duration::from_secs(10)).await;
      scanner.iterate().await; // failure 1, immediate retry
      scanner.iterate().await; // failure 2, down edge
      scanner.registry.drain_force();

      advance(Duration::from_secs(60)).await;
      scanner.iterate().await;

      // Still pinned at the sentinel: the refresh pass must not revive it.
      let entry = scanner.presence.read(mac(MAC_A)).unwrap();
      assert_eq!(entry.timestamp, STALE_SENTINEL);
   }

   #[tokio::test(start_paused = true)]
   async fn unsubscribed_mac_loses_its_tracker() {
      let resolver = ScriptedResolver::default();
      resolver.push(mac(MAC_A), &[Some("Phone")]);
      let mut scanner = scanner(&resolver, 0);
      scanner.registry.set(mac(MAC_A), 30);

      scanner.iterate().await;
      assert!(scanner.trackers.contains_key(&mac(MAC_A)));

      scanner.registry.unset(mac(MAC_A));
      scanner.iterate().await;
      assert!(scanner.trackers.is_empty());
   }

   #[tokio::test(start_paused = true)]
   async fn upvote_never_delays_past_the_interval_budget() {
      let resolver = ScriptedResolver::default();
      let mut scanner = scanner(&resolver, 2);
      let mut other = Tracker::fresh();
      other.next_probe_at = 30;
      scanner.trackers.insert(mac(MAC_B), other);

      // Colliding with the other slot: pushed forward, then clamped.
      assert_eq!(scanner.schedule(mac(MAC_A), 30, 0, 0), 30);
      // No collision: the desired slot stands.
      assert_eq!(scanner.schedule(mac(MAC_A), 60, 0, 0), 60);
   }

   #[tokio::test(start_paused = true)]
   async fn downvote_jumps_past_packed_slots() {
      let resolver = ScriptedResolver::default();
      let mut scanner = scanner(&resolver, 2);
      let mut other = Tracker::fresh();
      other.next_probe_at = 101;
      scanner.trackers.insert(mac(MAC_B), other);

      // Desired 100 collides within the first probe-sized window.
      assert_eq!(scanner.schedule(mac(MAC_A), 100, 0, DOWN_THRESHOLD), 102);
   }

   #[tokio::test(start_paused = true)]
   async fn downvote_without_collision_returns_desired() {
      let resolver = ScriptedResolver::default();
      let mut scanner = scanner(&resolver, 2);
      let mut other = Tracker::fresh();
      other.next_probe_at = 300;
      scanner.trackers.insert(mac(MAC_B), other);

      assert_eq!(scanner.schedule(mac(MAC_A), 100, 0, DOWN_THRESHOLD), 100);
   }

   #[tokio::test(start_paused = true)]
   async fn packing_disabled_probes_at_the_interval() {
      let resolver = ScriptedResolver::default();
      let mut scanner = scanner(&resolver, 0);
      let mut other = Tracker::fresh();
      other.next_probe_at = 101;
      scanner.trackers.insert(mac(MAC_B), other);

      assert_eq!(scanner.schedule(mac(MAC_A), 100, 0, DOWN_THRESHOLD), 100);
   }
}
