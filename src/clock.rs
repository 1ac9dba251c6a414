//! Monotonic clock and probe duration calibration.
//!
//! Integer seconds are sufficient everywhere: subscription intervals,
//! presence timestamps and probe slots are all whole seconds.

use log::info;
use tokio::time::Instant;

use crate::config::{CALIBRATION_MAC, STALE_SENTINEL};
use crate::probe::NameResolver;

/// First reading. Keeping every reading above the stale sentinel means
/// no genuine observation timestamp can ever equal it.
const CLOCK_BASE: u64 = STALE_SENTINEL + 1;

/// Monotonic clock anchored at process start.
#[derive(Debug, Clone)]
pub struct Clock {
   start: Instant,
}

impl Clock {
   pub fn new() -> Self {
      Self {
         start: Instant::now(),
      }
   }

   /// Monotonic seconds, starting at `CLOCK_BASE`.
   pub fn now_seconds(&self) -> u64 {
      CLOCK_BASE + self.start.elapsed().as_secs()
   }
}

impl Default for Clock {
   fn default() -> Self {
      Self::new()
   }
}

/// Estimates the wall time one blocking probe occupies the radio.
///
/// Looks up a reserved MAC that is expected to be absent, so the helper
/// runs into its own timeout and the elapsed time bounds a worst-case
/// probe. Returns at least one second.
pub async fn calibrate_probe_seconds<R: NameResolver>(resolver: &R) -> u64 {
   let mac = CALIBRATION_MAC.parse().expect("calibration MAC is valid");
   let started = Instant::now();
   let _ = resolver.resolve(mac).await;
   let t_probe = started.elapsed().as_secs().max(1);
   info!("calibrated probe duration: {t_probe}s");
   t_probe
}

#[cfg(test)]
mod tests {
   use async_trait::async_trait;
   use smol_str::SmolStr;
   use tokio::time::{advance, Duration};

   use super::*;
   use crate::mac::MacAddr;

   struct SlowResolver(u64);

   #[async_trait]
   impl NameResolver for SlowResolver {
      async fn resolve(&self, _mac: MacAddr) -> Option<SmolStr> {
         tokio::time::sleep(Duration::from_secs(self.0)).await;
         None
      }
   }

   #[tokio::test(start_paused = true)]
   async fn clock_advances_in_whole_seconds() {
      let clock = Clock::new();
      assert_eq!(clock.now_seconds(), CLOCK_BASE);
      advance(Duration::from_millis(2500)).await;
      assert_eq!(clock.now_seconds(), CLOCK_BASE + 2);
   }

   #[tokio::test(start_paused = true)]
   async fn readings_stay_above_the_stale_sentinel() {
      assert!(Clock::new().now_seconds() > STALE_SENTINEL);
   }

   #[tokio::test(start_paused = true)]
   async fn calibration_measures_elapsed_seconds() {
      assert_eq!(calibrate_probe_seconds(&SlowResolver(4)).await, 4);
   }

   #[tokio::test(start_paused = true)]
   async fn calibration_never_reports_zero() {
      assert_eq!(calibrate_probe_seconds(&SlowResolver(0)).await, 1);
   }
}
