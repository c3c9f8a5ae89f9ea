// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fan-out of parsed entries to one bounded queue per sink.
//!
//! Every sink sees every entry, in file order. A full queue blocks the
//! parser, so the slowest sink sets the pace for the object.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::entry::LogEntry;

struct Queue {
    sink: &'static str,
    tx: mpsc::Sender<Arc<LogEntry>>,
}

pub struct Replicator {
    queues: Vec<Option<Queue>>,
}

impl Replicator {
    /// Creates one queue of `capacity` entries per sink name.
    pub fn new(
        sinks: &[&'static str],
        capacity: usize,
    ) -> (Self, Vec<mpsc::Receiver<Arc<LogEntry>>>) {
        let (queues, receivers): (Vec<_>, Vec<_>) = sinks
            .iter()
            .map(|&sink| {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                (Some(Queue { sink, tx }), rx)
            })
            .unzip();
        (Self { queues }, receivers)
    }

    /// Number of queues still accepting entries.
    pub fn open_queues(&self) -> usize {
        self.queues.iter().flatten().count()
    }

    /// Enqueues `entry` on every open queue.
    ///
    /// Returns `false` when cancelled or when every queue has closed.
    pub async fn broadcast(&mut self, entry: LogEntry, cancel: &CancellationToken) -> bool {
        let entry = Arc::new(entry);
        for slot in &mut self.queues {
            let Some(queue) = slot else {
                continue;
            };
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                sent = queue.tx.send(Arc::clone(&entry)) => sent,
            };
            if sent.is_err() {
                warn!("Queue for sink {} closed, no longer replicating to it", queue.sink);
                *slot = None;
            }
        }
        self.open_queues() > 0
    }

    /// Closes every queue; sinks drain what is buffered, then flush.
    pub fn close(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tracing_test::traced_test;

    fn entry(n: usize) -> LogEntry {
        LogEntry {
            timestamp: Utc::now(),
            fields: BTreeMap::from([("n".to_string(), n.to_string())]),
        }
    }

    #[tokio::test]
    async fn test_every_sink_sees_every_entry_in_order() {
        let cancel = CancellationToken::new();
        let (mut replicator, receivers) = Replicator::new(&["a", "b"], 8);

        for n in 0..5 {
            assert!(replicator.broadcast(entry(n), &cancel).await);
        }
        replicator.close();

        for mut rx in receivers {
            let mut seen = Vec::new();
            while let Some(entry) = rx.recv().await {
                seen.push(entry.fields["n"].clone());
            }
            assert_eq!(seen, vec!["0", "1", "2", "3", "4"]);
        }
    }

    #[tokio::test]
    async fn test_entries_are_shared_not_copied() {
        let cancel = CancellationToken::new();
        let (mut replicator, mut receivers) = Replicator::new(&["a", "b"], 1);
        assert!(replicator.broadcast(entry(1), &cancel).await);

        let first = receivers[0].recv().await.unwrap();
        let second = receivers[1].recv().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_closed_queue_is_skipped() {
        let cancel = CancellationToken::new();
        let (mut replicator, mut receivers) = Replicator::new(&["a", "b"], 4);
        drop(receivers.remove(0));

        assert!(replicator.broadcast(entry(1), &cancel).await);
        assert_eq!(replicator.open_queues(), 1);
        assert!(logs_contain("Queue for sink a closed"));
        assert_eq!(receivers[0].recv().await.unwrap().fields["n"], "1");

        drop(receivers);
        assert!(!replicator.broadcast(entry(2), &cancel).await);
    }

    #[tokio::test]
    async fn test_full_queue_yields_to_cancellation() {
        let cancel = CancellationToken::new();
        let (mut replicator, _receivers) = Replicator::new(&["slow"], 1);
        assert!(replicator.broadcast(entry(1), &cancel).await);

        cancel.cancel();
        assert!(!replicator.broadcast(entry(2), &cancel).await);
    }
}
