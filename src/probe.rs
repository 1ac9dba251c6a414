//! External name lookup.
//!
//! One probe is one invocation of `hcitool name` for one MAC. Non-empty
//! trimmed stdout means the device answered and the output is its
//! friendly name; empty output, a non-zero exit or a spawn failure all
//! mean the device is absent for this probe. stderr is ignored.

use std::env;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use async_trait::async_trait;
use log::{debug, warn};
use smol_str::SmolStr;
use tokio::process::Command;

use crate::error::{PresenceError, Result};
use crate::mac::MacAddr;

/// Name of the lookup helper searched on PATH at startup.
pub const LOOKUP_TOOL: &str = "hcitool";

/// Seam between the scanner and the radio.
#[async_trait]
pub trait NameResolver: Send + Sync {
   /// Resolves a MAC to its friendly name, or `None` when unreachable.
   async fn resolve(&self, mac: MacAddr) -> Option<SmolStr>;
}

/// Production resolver shelling out to `hcitool`.
pub struct HcitoolResolver {
   device: String,
}

impl HcitoolResolver {
   pub fn new(device: String) -> Self {
      Self { device }
   }
}

#[async_trait]
impl NameResolver for HcitoolResolver {
   async fn resolve(&self, mac: MacAddr) -> Option<SmolStr> {
      let output = Command::new(LOOKUP_TOOL)
         .arg("-i")
         .arg(&self.device)
         .arg("name")
         .arg(mac.to_string())
         .kill_on_drop(true)
         .output()
         .await;

      let output = match output {
         Ok(output) => output,
         Err(e) => {
            warn!("failed to run {LOOKUP_TOOL} for {mac}: {e}");
            return None;
         },
      };

      if !output.status.success() {
         debug!("{LOOKUP_TOOL} exited with {} for {mac}", output.status);
         return None;
      }

      let name = String::from_utf8_lossy(&output.stdout);
      let name = name.trim();
      if name.is_empty() {
         None
      } else {
         Some(SmolStr::from(name))
      }
   }
}

/// Verifies the lookup helper exists on PATH before the daemon commits
/// to running. Missing helper is a fatal setup error (exit code 4).
pub fn ensure_tool_available() -> Result<()> {
   let path = env::var_os("PATH").unwrap_or_default();
   for dir in env::split_paths(&path) {
      if is_executable(&dir.join(LOOKUP_TOOL)) {
         return Ok(());
      }
   }
   Err(PresenceError::LookupToolMissing(LOOKUP_TOOL.to_string()))
}

fn is_executable(path: &Path) -> bool {
   path
      .metadata()
      .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
      .unwrap_or(false)
}
