//! Bluetooth presence daemon.
//!
//! Probes subscribed devices by MAC address through an external name
//! lookup helper and reports reachability to home-automation clients
//! over a line-oriented TCP protocol. One scanner task owns the radio;
//! one dispatcher actor owns every client session.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use clap::error::ErrorKind;
use log::{error, info};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

mod clock;
mod config;
mod error;
mod lifecycle;
mod logging;
mod mac;
mod presence;
mod probe;
mod registry;
mod scanner;
mod server;

use crate::clock::Clock;
use crate::config::{Config, DAEMON_NAME, DAEMON_VERSION, PID_FILE};
use crate::error::{PresenceError, Result};
use crate::presence::PresenceTable;
use crate::probe::HcitoolResolver;
use crate::registry::SubscriptionRegistry;
use crate::scanner::Scanner;
use crate::server::dispatcher::Dispatcher;

fn main() -> ExitCode {
   let cfg = match Config::try_parse() {
      Ok(cfg) => cfg,
      Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
         let _ = e.print();
         return ExitCode::SUCCESS;
      },
      Err(e) => {
         // Usage goes to stdout, exit code 1.
         println!("{e}");
         return ExitCode::from(1);
      },
   };

   match setup_and_run(cfg) {
      Ok(code) => code,
      Err(e) => {
         error!("{e}");
         eprintln!("{DAEMON_NAME}: {e}");
         ExitCode::from(e.exit_code() as u8)
      },
   }
}

fn setup_and_run(cfg: Config) -> Result<ExitCode> {
   logging::init(cfg.log_level, cfg.log_target)?;
   info!(
      "{DAEMON_NAME} V{DAEMON_VERSION} starting (level {}, target {})",
      cfg.log_level, cfg.log_target
   );

   probe::ensure_tool_available()?;
   let _lock = lifecycle::acquire_instance_lock(&lifecycle::executable_path()?)?;
   lifecycle::ignore_sigpipe();

   // Forking must precede the runtime: threads do not survive it.
   if cfg.daemon {
      lifecycle::daemonize()?;
      lifecycle::write_pid_file(Path::new(PID_FILE))?;
   }

   let runtime = tokio::runtime::Builder::new_multi_thread()
      .enable_all()
      .build()?;
   let code = runtime.block_on(run(&cfg))?;

   if cfg.daemon {
      lifecycle::remove_pid_file(Path::new(PID_FILE));
   }
   info!("{DAEMON_NAME} stopped");
   Ok(ExitCode::from(code))
}

async fn run(cfg: &Config) -> Result<u8> {
   let clock = Clock::new();
   let resolver = HcitoolResolver::new(cfg.bluetooth_device.clone());

   let t_probe = if cfg.fast {
      clock::calibrate_probe_seconds(&resolver).await
   } else {
      0
   };

   let listener = TcpListener::bind((cfg.listen_address, cfg.listen_port))
      .await
      .map_err(PresenceError::Bind)?;
   info!("listening on {}:{}", cfg.listen_address, cfg.listen_port);

   let presence = Arc::new(PresenceTable::new());
   let registry = Arc::new(SubscriptionRegistry::new());

   let scanner = Scanner::new(
      resolver,
      clock.clone(),
      presence.clone(),
      registry.clone(),
      t_probe,
   );
   let scan_handle = tokio::spawn(scanner.run());

   let (shutdown_tx, shutdown_rx) = oneshot::channel();
   tokio::spawn(async move {
      let sig = lifecycle::shutdown_signal().await;
      info!("received {sig}, shutting down");
      let _ = shutdown_tx.send(());
   });

   let dispatcher = Dispatcher::new(
      listener,
      presence,
      registry,
      clock,
      cfg.log_level.stats_interval(),
      cfg.debug,
   );
   dispatcher.run(shutdown_rx).await;

   scan_handle.abort();
   // Signal-initiated shutdown exits 1.
   Ok(1)
}
