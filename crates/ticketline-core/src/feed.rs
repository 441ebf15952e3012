//! Change feed: turns entity-change notifications into recomputes.
//!
//! Notifications are queued on a channel and handled by one worker thread.
//! The worker maps each changed record to its ticket, then waits for the
//! ticket to go quiet before acting:
//!
//! - every new notification pushes the ticket's deadline out by `debounce`
//! - no ticket waits longer than `max_delay` after its first notification
//!
//! A burst of N notifications for one ticket therefore costs one recompute.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::config::FeedSettings;
use crate::engine::Engine;
use crate::source::{Backend, EntityTable};

/// What the worker did with one coalesced ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedOutcome {
    Recomputed {
        ticket_id: String,
        version: u64,
        changed: bool,
    },
    /// Only conversation data changed; timelines are rebuilt on read, so there
    /// is nothing to persist.
    TimelineInvalidated { ticket_id: String },
    Failed {
        ticket_id: String,
        code: &'static str,
        error: String,
    },
    /// The changed record could not be mapped to a ticket.
    Unresolved { table: EntityTable, record_id: String },
}

/// A ticket whose quiet period has elapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueTicket {
    pub ticket_id: String,
    pub needs_metadata: bool,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    first_seen: Instant,
    fire_at: Instant,
    needs_metadata: bool,
}

/// Per-ticket debounce bookkeeping. Pure; time is passed in.
#[derive(Debug)]
pub struct DebounceQueue {
    pending: HashMap<String, Pending>,
    debounce: Duration,
    max_delay: Duration,
}

impl DebounceQueue {
    #[must_use]
    pub fn new(settings: &FeedSettings) -> Self {
        Self {
            pending: HashMap::new(),
            debounce: settings.debounce(),
            max_delay: settings.max_delay(),
        }
    }

    /// Record a notification for `ticket_id` seen at `now`.
    pub fn schedule(&mut self, ticket_id: &str, needs_metadata: bool, now: Instant) {
        let debounced = now + self.debounce;
        match self.pending.get_mut(ticket_id) {
            Some(entry) => {
                entry.needs_metadata |= needs_metadata;
                entry.fire_at = debounced.min(entry.first_seen + self.max_delay);
            }
            None => {
                self.pending.insert(
                    ticket_id.to_string(),
                    Pending {
                        first_seen: now,
                        fire_at: debounced.min(now + self.max_delay),
                        needs_metadata,
                    },
                );
            }
        }
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.fire_at).min()
    }

    /// Remove and return every ticket due at `now`, earliest deadline first.
    pub fn take_due(&mut self, now: Instant) -> Vec<DueTicket> {
        let mut due: Vec<(Instant, String)> = self
            .pending
            .iter()
            .filter(|(_, p)| p.fire_at <= now)
            .map(|(id, p)| (p.fire_at, id.clone()))
            .collect();
        due.sort();
        due.into_iter()
            .filter_map(|(_, id)| self.remove(id))
            .collect()
    }

    /// Remove and return everything, earliest deadline first.
    pub fn drain(&mut self) -> Vec<DueTicket> {
        let mut all: Vec<(Instant, DueTicket)> = self
            .pending
            .drain()
            .map(|(ticket_id, p)| {
                (
                    p.fire_at,
                    DueTicket {
                        ticket_id,
                        needs_metadata: p.needs_metadata,
                    },
                )
            })
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.ticket_id.cmp(&b.1.ticket_id)));
        all.into_iter().map(|(_, due)| due).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn remove(&mut self, ticket_id: String) -> Option<DueTicket> {
        self.pending.remove(&ticket_id).map(|p| DueTicket {
            ticket_id,
            needs_metadata: p.needs_metadata,
        })
    }
}

enum FeedMessage {
    Changed { table: EntityTable, record_id: String },
    Flush(Sender<()>),
}

/// Handle to the feed worker. Dropping it flushes and joins like
/// [`ChangeFeed::shutdown`].
pub struct ChangeFeed {
    tx: Option<Sender<FeedMessage>>,
    worker: Option<JoinHandle<()>>,
}

impl ChangeFeed {
    /// Start the worker. Outcomes go to `outcomes` when given.
    pub fn spawn<B>(
        engine: Arc<Engine<B>>,
        settings: &FeedSettings,
        outcomes: Option<Sender<FeedOutcome>>,
    ) -> Self
    where
        B: Backend + 'static,
    {
        let (tx, rx) = channel::unbounded();
        let queue = DebounceQueue::new(settings);
        let worker = std::thread::Builder::new()
            .name("ticketline-feed".to_string())
            .spawn(move || {
                Worker {
                    engine,
                    queue,
                    outcomes,
                }
                .run(&rx);
            });

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(error) => {
                warn!(%error, "failed to start change feed worker");
                None
            }
        };

        Self {
            tx: Some(tx),
            worker,
        }
    }

    /// Queue a change notification. Never blocks on recompute work.
    pub fn on_entity_changed(&self, table: EntityTable, record_id: &str) {
        let Some(tx) = &self.tx else { return };
        if tx
            .send(FeedMessage::Changed {
                table,
                record_id: record_id.to_string(),
            })
            .is_err()
        {
            warn!(%table, record_id, "change feed worker is gone; dropping notification");
        }
    }

    /// Process everything queued so far without waiting for debounce
    /// deadlines, and block until done.
    pub fn flush(&self) {
        let Some(tx) = &self.tx else { return };
        let (ack_tx, ack_rx) = channel::bounded(1);
        if tx.send(FeedMessage::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    /// Flush pending work and stop the worker.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Disconnecting the channel tells the worker to drain and exit.
        self.tx.take();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("change feed worker panicked");
            }
        }
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker<B> {
    engine: Arc<Engine<B>>,
    queue: DebounceQueue,
    outcomes: Option<Sender<FeedOutcome>>,
}

impl<B: Backend> Worker<B> {
    fn run(mut self, rx: &Receiver<FeedMessage>) {
        loop {
            let message = match self.queue.next_deadline() {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match rx.recv_timeout(wait) {
                        Ok(message) => Some(message),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match rx.recv() {
                    Ok(message) => Some(message),
                    Err(_) => break,
                },
            };

            match message {
                Some(FeedMessage::Changed { table, record_id }) => {
                    self.enqueue(table, &record_id);
                }
                Some(FeedMessage::Flush(ack)) => {
                    // Earlier notifications were already enqueued; the channel is FIFO.
                    let due = self.queue.drain();
                    self.process(due);
                    let _ = ack.send(());
                }
                None => {}
            }

            let due = self.queue.take_due(Instant::now());
            self.process(due);
        }

        let rest = self.queue.drain();
        debug!(pending = rest.len(), "change feed shutting down");
        self.process(rest);
    }

    fn enqueue(&mut self, table: EntityTable, record_id: &str) {
        match self.engine.backend().ticket_for_entity(table, record_id) {
            Ok(Some(ticket_id)) => {
                debug!(%table, record_id, ticket_id, "change queued");
                self.queue
                    .schedule(&ticket_id, table.affects_metadata(), Instant::now());
            }
            Ok(None) => {
                debug!(%table, record_id, "change for unknown record");
                self.emit(FeedOutcome::Unresolved {
                    table,
                    record_id: record_id.to_string(),
                });
            }
            Err(error) => {
                warn!(%table, record_id, %error, "failed to resolve changed record");
                self.emit(FeedOutcome::Unresolved {
                    table,
                    record_id: record_id.to_string(),
                });
            }
        }
    }

    fn process(&self, due: Vec<DueTicket>) {
        for DueTicket {
            ticket_id,
            needs_metadata,
        } in due
        {
            if !needs_metadata {
                self.emit(FeedOutcome::TimelineInvalidated { ticket_id });
                continue;
            }
            let outcome = match self.engine.reconstruct_metadata(&ticket_id) {
                Ok(done) => FeedOutcome::Recomputed {
                    ticket_id,
                    version: done.stored.version,
                    changed: done.changed,
                },
                Err(error) => {
                    warn!(ticket_id, code = %error.code(), %error, "feed recompute failed");
                    FeedOutcome::Failed {
                        ticket_id,
                        code: error.code().code(),
                        error: error.to_string(),
                    }
                }
            };
            self.emit(outcome);
        }
    }

    fn emit(&self, outcome: FeedOutcome) {
        if let Some(tx) = &self.outcomes {
            let _ = tx.send(outcome);
        }
    }
}
