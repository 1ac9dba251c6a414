//! Dispatcher actor and main loop.
//!
//! Owns the listening socket and every client session. Connection
//! readers are small spawned tasks that feed parsed-off lines back over
//! a channel; all protocol handling, update emission and the periodic
//! tasks happen inside this single actor, so per-session ordering needs
//! no further reasoning.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, MissedTickBehavior};

use crate::clock::Clock;
use crate::config::{CLEANUP_INTERVAL, CLEANUP_MAX_AGE, DUMP_INTERVAL, INET_RECV_BUFFER, MAINLOOP_SLEEP};
use crate::mac::MacAddr;
use crate::presence::PresenceTable;
use crate::registry::SubscriptionRegistry;
use crate::server::command::{self, Command};
use crate::server::session::{self, Session, RESP_ACCEPTED, RESP_STOPPED};

type SessionId = u64;

enum SessionEvent {
   Line(SessionId, String),
   Disconnected(SessionId),
}

/// Single-threaded dispatcher over all client sessions.
pub struct Dispatcher {
   listener: TcpListener,
   presence: Arc<PresenceTable>,
   registry: Arc<SubscriptionRegistry>,
   clock: Clock,
   stats_interval: u64,
   dump_enabled: bool,
   sessions: HashMap<SessionId, Session>,
   next_session_id: SessionId,
   events_tx: mpsc::Sender<SessionEvent>,
   events_rx: mpsc::Receiver<SessionEvent>,
   next_cleanup: u64,
   next_stats: u64,
   next_dump: u64,
}

impl Dispatcher {
   pub fn new(
      listener: TcpListener,
      presence: Arc<PresenceTable>,
      registry: Arc<SubscriptionRegistry>,
      clock: Clock,
      stats_interval: u64,
      dump_enabled: bool,
   ) -> Self {
      let (events_tx, events_rx) = mpsc::channel(100);
      Self {
         listener,
         presence,
         registry,
         clock,
         stats_interval,
         dump_enabled,
         sessions: HashMap::new(),
         next_session_id: 0,
         events_tx,
         events_rx,
         next_cleanup: 0,
         next_stats: 0,
         next_dump: 0,
      }
   }

   /// Runs until the shutdown signal fires.
   pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
      let now = self.clock.now_seconds();
      self.next_cleanup = now + CLEANUP_INTERVAL;
      self.next_stats = now + self.stats_interval;
      self.next_dump = now + DUMP_INTERVAL;

      let mut tick = time::interval(MAINLOOP_SLEEP);
      tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

      info!("dispatcher started");
      loop {
         select! {
            _ = &mut shutdown => break,
            accepted = self.listener.accept() => match accepted {
               Ok((stream, peer)) => self.register(stream, peer),
               Err(e) => warn!("accept failed: {e}"),
            },
            Some(event) = self.events_rx.recv() => self.handle_event(event).await,
            _ = tick.tick() => self.tick().await,
         }
      }

      info!("closing {} client sessions", self.sessions.len());
      self.sessions.clear();
   }

   // === Connection handling ===

   fn register(&mut self, stream: TcpStream, peer: SocketAddr) {
      let id = self.next_session_id;
      self.next_session_id += 1;
      let (read_half, write_half) = stream.into_split();
      self.sessions.insert(id, Session::new(write_half, peer));
      info!("client {peer} connected");

      let events = self.events_tx.clone();
      tokio::spawn(async move {
         let mut reader = LineReader::new(read_half);
         loop {
            match reader.next_line().await {
               Ok(LineOutcome::Line(line)) => {
                  if events.send(SessionEvent::Line(id, line)).await.is_err() {
                     return;
                  }
               },
               Ok(LineOutcome::Oversized) => {
                  warn!("dropping oversized line from {peer}");
               },
               Ok(LineOutcome::Eof) => break,
               Err(e) => {
                  debug!("read error from {peer}: {e}");
                  break;
               },
            }
         }
         let _ = events.send(SessionEvent::Disconnected(id)).await;
      });
   }

   async fn handle_event(&mut self, event: SessionEvent) {
      match event {
         SessionEvent::Line(id, line) => self.handle_line(id, line).await,
         SessionEvent::Disconnected(id) => self.drop_session(id, "disconnected"),
      }
   }

   async fn handle_line(&mut self, id: SessionId, line: String) {
      let Some(cmd) = command::parse(&line) else {
         warn!("unrecognized command: {:?}", line.trim());
         return;
      };

      match cmd {
         Command::Subscribe { mac, interval_s } => {
            if let Some(session) = self.sessions.get(&id) {
               // A new subscription replaces the prior MAC outright.
               if let Some(prev) = session.mac {
                  if prev != mac {
                     self.registry.unset(prev);
                  }
               }
            }
            self.registry.set(mac, interval_s);
            if let Some(session) = self.sessions.get_mut(&id) {
               session.mac = Some(mac);
               session.interval_s = interval_s;
               session.next_check = 0;
               info!(
                  "client {} subscribed to {mac} every {interval_s}s",
                  session.peer
               );
            }
            self.respond(id, RESP_ACCEPTED).await;
         },
         Command::Now => {
            if let Some(session) = self.sessions.get_mut(&id) {
               session.next_check = 0;
            }
            self.respond(id, RESP_ACCEPTED).await;
         },
         Command::Ping => {
            let now = self.clock.now_seconds();
            let pong = session::pong_line(
               self.sessions.len(),
               self.presence.len(),
               self.presence.age_bounds(now),
            );
            self.respond(id, &pong).await;
            self.drop_session(id, "ping served");
         },
         Command::Stop => {
            if let Some(session) = self.sessions.get_mut(&id) {
               if let Some(mac) = session.mac.take() {
                  self.registry.unset(mac);
               }
               session.interval_s = 0;
            }
            self.respond(id, RESP_STOPPED).await;
         },
      }
   }

   async fn respond(&mut self, id: SessionId, line: &str) {
      let Some(session) = self.sessions.get_mut(&id) else {
         return;
      };
      if let Err(e) = write_line(&mut session.writer, line).await {
         debug!("write to {} failed: {e}", session.peer);
         self.drop_session(id, "write failed");
      }
   }

   fn drop_session(&mut self, id: SessionId, why: &str) {
      let Some(session) = self.sessions.remove(&id) else {
         return;
      };
      if let Some(mac) = session.mac {
         self.registry.unset(mac);
      }
      info!("client {} gone ({why})", session.peer);
   }

   // === Tick ===

   async fn tick(&mut self) {
      let now = self.clock.now_seconds();

      // An edge zeroes the deadline of every session watching that MAC.
      for mac in self.registry.drain_force() {
         for session in self.sessions.values_mut() {
            if session.mac == Some(mac) {
               session.next_check = 0;
            }
         }
      }

      let due: Vec<SessionId> = self
         .sessions
         .iter()
         .filter(|(_, s)| s.mac.is_some() && s.next_check <= now)
         .map(|(id, _)| *id)
         .collect();

      for id in &due {
         self.emit_update(*id, now).await;
      }

      if due.is_empty() {
         self.periodic_tasks(now);
      }
   }

   async fn emit_update(&mut self, id: SessionId, now: u64) {
      let Some(session) = self.sessions.get_mut(&id) else {
         return;
      };
      let Some(mac) = session.mac else {
         return;
      };

      let line = match self.presence.read(mac) {
         Some(entry) if entry.is_fresh(now, session.interval_s) => {
            session::present_line(entry.name.as_str())
         },
         _ => session::absence_line(),
      };
      session.next_check = now + session.interval_s;

      if let Err(e) = write_line(&mut session.writer, &line).await {
         debug!("write to {} failed: {e}", session.peer);
         self.drop_session(id, "write failed");
      }
   }

   // === Periodic tasks ===

   fn periodic_tasks(&mut self, now: u64) {
      if now >= self.next_cleanup {
         self.next_cleanup = now + CLEANUP_INTERVAL;
         self.cleanup(now);
      } else if now >= self.next_stats {
         self.next_stats = now + self.stats_interval;
         info!(
            "{} clients, {} devices",
            self.sessions.len(),
            self.presence.len()
         );
      } else if self.dump_enabled && now >= self.next_dump {
         self.next_dump = now + DUMP_INTERVAL;
         self.dump(now);
      }
   }

   /// Evicts table entries that went stale and are no longer watched.
   fn cleanup(&mut self, now: u64) {
      let mut evicted = 0usize;
      for (mac, entry) in self.presence.snapshot() {
         let age = now.saturating_sub(entry.timestamp);
         if age > CLEANUP_MAX_AGE && !self.sessions.values().any(|s| s.mac == Some(mac)) {
            self.presence.remove(mac);
            evicted += 1;
         }
      }
      if evicted > 0 {
         info!("cleanup evicted {evicted} stale devices");
      }
   }

   fn dump(&self, now: u64) {
      for (mac, entry) in self.presence.snapshot() {
         debug!(
            "{mac} age={} prev_age={} name=\"{}\"",
            now.saturating_sub(entry.timestamp),
            now.saturating_sub(entry.prev_timestamp),
            entry.name
         );
      }
   }
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> io::Result<()> {
   writer.write_all(line.as_bytes()).await?;
   writer.write_all(b"\n").await
}

// === Bounded line framing ===

enum LineOutcome {
   Line(String),
   Oversized,
   Eof,
}

/// Newline framing over a raw read half, with `INET_RECV_BUFFER` as a
/// hard cap on line length. A line that outgrows the cap is reported as
/// oversized and its remaining bytes are skipped up to the next
/// newline, so a peer cannot grow the buffer without bound.
struct LineReader {
   stream: OwnedReadHalf,
   buf: Vec<u8>,
   filled: usize,
   discarding: bool,
}

impl LineReader {
   fn new(stream: OwnedReadHalf) -> Self {
      Self {
         stream,
         buf: vec![0; INET_RECV_BUFFER],
         filled: 0,
         discarding: false,
      }
   }

   async fn next_line(&mut self) -> io::Result<LineOutcome> {
      loop {
         if let Some(pos) = self.buf[..self.filled].iter().position(|&b| b == b'\n') {
            let rest = pos + 1;
            if self.discarding {
               // Tail of an oversized line; resume at the next one.
               self.discarding = false;
               self.buf.copy_within(rest..self.filled, 0);
               self.filled -= rest;
               continue;
            }
            let line = String::from_utf8_lossy(&self.buf[..pos]).into_owned();
            self.buf.copy_within(rest..self.filled, 0);
            self.filled -= rest;
            return Ok(LineOutcome::Line(line));
         }

         if self.filled == self.buf.len() {
            self.filled = 0;
            if !self.discarding {
               self.discarding = true;
               return Ok(LineOutcome::Oversized);
            }
         }

         let n = self.stream.read(&mut self.buf[self.filled..]).await?;
         if n == 0 {
            return Ok(LineOutcome::Eof);
         }
         self.filled += n;
      }
   }
}
