// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-sink batching of log entries.
//!
//! Each sink runs one [`Batcher`] per object, fed by its replication queue.
//! Entries are encoded as soon as they arrive and accumulated until one of
//! the sink's limits is reached:
//!
//! 1. **Size limit**: adding the next entry would push the batch over
//!    `max_bytes` (each entry counts its encoded size plus
//!    `per_event_overhead`)
//! 2. **Count limit**: the batch holds `max_count` entries
//! 3. **Timer**: `flush_interval` elapsed since the last tick
//! 4. **Close**: the queue closed or the run was cancelled
//!
//! # Failure handling
//!
//! A failed emit is logged and counted; the batch is not retried and the
//! batcher keeps going. A single entry larger than `max_bytes` can never be
//! delivered and is dropped with a warning.
//!
//! # States
//!
//! ```text
//! Idle --offer--> Filling --limit/timer--> Flushing --> Idle
//!   \_____________________queue closed / cancelled_______--> Closed
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::constants::{EMIT_TIMEOUT, FLUSH_INTERVAL};
use crate::entry::LogEntry;
use crate::errors::SinkError;

/// Limits a sink places on one emitted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_bytes: usize,
    pub max_count: usize,
    /// Added to every entry's encoded size when accounting `max_bytes`.
    pub per_event_overhead: usize,
    pub flush_interval: Duration,
    /// Whether the batch is stably sorted by timestamp before emitting.
    pub sorted_by_time: bool,
}

impl BatchLimits {
    pub const fn new(max_bytes: usize, max_count: usize) -> Self {
        Self {
            max_bytes,
            max_count,
            per_event_overhead: 0,
            flush_interval: FLUSH_INTERVAL,
            sorted_by_time: false,
        }
    }

    #[must_use]
    pub const fn with_overhead(mut self, per_event_overhead: usize) -> Self {
        self.per_event_overhead = per_event_overhead;
        self
    }

    #[must_use]
    pub const fn sorted_by_time(mut self) -> Self {
        self.sorted_by_time = true;
        self
    }
}

/// One encoded entry waiting in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub timestamp: DateTime<Utc>,
    pub payload: Vec<u8>,
}

/// Outcome of an emit that reached the destination.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EmitReport {
    pub sent: usize,
    /// Entries the destination rejected individually.
    pub failed: usize,
}

impl EmitReport {
    pub fn all_sent(count: usize) -> Self {
        Self {
            sent: count,
            failed: 0,
        }
    }
}

/// A destination for batches of encoded entries.
#[async_trait]
pub trait Emitter: Send + Sync {
    fn name(&self) -> &'static str;

    fn limits(&self) -> &BatchLimits;

    /// Encodes one entry into the sink's wire payload.
    fn encode(&self, entry: &LogEntry) -> Result<Vec<u8>, SinkError>;

    /// Sends one batch. Never retried by the caller.
    async fn emit(&self, batch: Vec<Record>) -> Result<EmitReport, SinkError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatcherState {
    Idle,
    Filling,
    Flushing,
    Closed,
}

/// Counters reported when a batcher closes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatcherStats {
    pub batches: u64,
    pub entries: u64,
    pub failed: u64,
    pub dropped: u64,
}

pub struct Batcher {
    emitter: Arc<dyn Emitter>,
    limits: BatchLimits,
    batch: Vec<Record>,
    bytes: usize,
    state: BatcherState,
    stats: BatcherStats,
}

impl Batcher {
    pub fn new(emitter: Arc<dyn Emitter>) -> Self {
        let limits = *emitter.limits();
        Self {
            emitter,
            limits,
            batch: Vec::new(),
            bytes: 0,
            state: BatcherState::Idle,
            stats: BatcherStats::default(),
        }
    }

    pub fn state(&self) -> BatcherState {
        self.state
    }

    pub fn stats(&self) -> BatcherStats {
        self.stats
    }

    /// Adds an entry, flushing first if it would not fit.
    pub async fn offer(&mut self, entry: &LogEntry) {
        let sink = self.emitter.name();
        let payload = match self.emitter.encode(entry) {
            Ok(payload) => payload,
            Err(e) => {
                error!("{sink}: dropping entry that failed to encode: {e}");
                self.stats.dropped += 1;
                return;
            }
        };

        let size = payload.len() + self.limits.per_event_overhead;
        if size > self.limits.max_bytes {
            warn!(
                "{sink}: dropping entry of {size} bytes, larger than the {} byte batch limit",
                self.limits.max_bytes
            );
            self.stats.dropped += 1;
            return;
        }

        if !self.batch.is_empty() && self.bytes + size > self.limits.max_bytes {
            self.flush().await;
        }

        self.batch.push(Record {
            timestamp: entry.timestamp,
            payload,
        });
        self.bytes += size;
        self.state = BatcherState::Filling;

        if self.batch.len() >= self.limits.max_count {
            self.flush().await;
        }
    }

    /// Emits the pending batch, if any.
    pub async fn flush(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        self.state = BatcherState::Flushing;

        let mut batch = std::mem::take(&mut self.batch);
        self.bytes = 0;
        if self.limits.sorted_by_time {
            batch.sort_by_key(|record| record.timestamp);
        }

        let sink = self.emitter.name();
        let count = batch.len();
        match timeout(EMIT_TIMEOUT, self.emitter.emit(batch)).await {
            Ok(Ok(report)) => {
                self.stats.batches += 1;
                self.stats.entries += report.sent as u64;
                self.stats.failed += report.failed as u64;
                if report.failed > 0 {
                    warn!(
                        "{sink}: {} of {count} entries rejected by destination",
                        report.failed
                    );
                } else {
                    debug!("{sink}: emitted batch of {count} entries");
                }
            }
            Ok(Err(e)) => {
                error!("{sink}: failed to emit batch of {count} entries: {e}");
                self.stats.failed += count as u64;
            }
            Err(_) => {
                error!(
                    "{sink}: failed to emit batch of {count} entries: {}",
                    SinkError::Timeout(EMIT_TIMEOUT)
                );
                self.stats.failed += count as u64;
            }
        }

        self.state = BatcherState::Idle;
    }

    /// Consumes the queue until it closes or `cancel` fires, then flushes.
    ///
    /// Once `cancel` fires, whatever flush is in progress plus the final one
    /// get `flush_interval` between them before being abandoned.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<Arc<LogEntry>>,
        cancel: CancellationToken,
    ) -> BatcherStats {
        let sink = self.emitter.name();
        let mut ticker = interval(self.limits.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("{sink}: cancelled, flushing pending batch");
                    let deadline = Instant::now() + self.limits.flush_interval;
                    self.flush_before(deadline).await;
                    break;
                }
                _ = ticker.tick() => Step::Flush,
                entry = rx.recv() => match entry {
                    Some(entry) => Step::Offer(entry),
                    None => Step::Close,
                },
            };

            let closing = matches!(step, Step::Close);
            if let Some(deadline) = self.step(step, &cancel).await {
                self.flush_before(deadline).await;
                break;
            }
            if closing {
                break;
            }
        }

        self.state = BatcherState::Closed;
        info!(
            "{sink}: batches={} entries={} failed={} dropped={}",
            self.stats.batches, self.stats.entries, self.stats.failed, self.stats.dropped
        );
        self.stats
    }

    /// Runs one loop step. Returns the shutdown deadline if `cancel` fired
    /// while the step was still emitting.
    async fn step(&mut self, step: Step, cancel: &CancellationToken) -> Option<Instant> {
        let sink = self.emitter.name();
        let flush_interval = self.limits.flush_interval;

        let work = async {
            match step {
                Step::Offer(entry) => self.offer(&entry).await,
                Step::Flush | Step::Close => self.flush().await,
            }
        };
        tokio::pin!(work);

        let cancelled = tokio::select! {
            biased;
            () = &mut work => false,
            _ = cancel.cancelled() => true,
        };
        if !cancelled {
            return None;
        }

        debug!("{sink}: cancelled during a flush");
        let deadline = Instant::now() + flush_interval;
        if timeout_at(deadline, &mut work).await.is_err() {
            warn!("{sink}: flush in progress did not finish in time, abandoning it");
        }
        Some(deadline)
    }

    async fn flush_before(&mut self, deadline: Instant) {
        let sink = self.emitter.name();
        if timeout_at(deadline, self.flush()).await.is_err() {
            warn!("{sink}: final flush did not finish in time, abandoning it");
        }
    }
}

enum Step {
    Offer(Arc<LogEntry>),
    Flush,
    Close,
}
