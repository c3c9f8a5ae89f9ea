// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Writes one `[<time>] <json>` line per entry, unbatched.

use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::SecondsFormat;

use crate::batcher::{BatchLimits, EmitReport, Emitter, Record};
use crate::entry::LogEntry;
use crate::errors::SinkError;

const LIMITS: BatchLimits = BatchLimits::new(usize::MAX, 1);

pub type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

pub struct StdoutSink {
    writer: SharedWriter,
}

impl StdoutSink {
    pub fn new() -> Self {
        let stdout: Box<dyn Write + Send> = Box::new(std::io::stdout());
        Self::with_writer(Arc::new(Mutex::new(stdout)))
    }

    pub fn with_writer(writer: SharedWriter) -> Self {
        Self { writer }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Emitter for StdoutSink {
    fn name(&self) -> &'static str {
        "stdout"
    }

    fn limits(&self) -> &BatchLimits {
        &LIMITS
    }

    fn encode(&self, entry: &LogEntry) -> Result<Vec<u8>, SinkError> {
        let mut line = format!(
            "[{}] ",
            entry.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
        .into_bytes();
        serde_json::to_writer(&mut line, &entry.fields)?;
        line.push(b'\n');
        Ok(line)
    }

    async fn emit(&self, batch: Vec<Record>) -> Result<EmitReport, SinkError> {
        let writer = Arc::clone(&self.writer);
        let sent = batch.len();
        // Blocking pool: the writer is synchronous and may stall on a full pipe.
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
            for record in &batch {
                writer.write_all(&record.payload)?;
            }
            writer.flush()
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(EmitReport::all_sent(sent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batcher::Batcher;
    use chrono::DateTime;
    use std::collections::BTreeMap;
    use std::sync::mpsc;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_writes_one_line_per_entry() {
        let buffer = Buffer::default();
        let writer: Box<dyn Write + Send> = Box::new(buffer.clone());
        let sink = StdoutSink::with_writer(Arc::new(Mutex::new(writer)));
        let mut batcher = Batcher::new(Arc::new(sink));

        for (secs, status) in [(1_711_016_130, "200"), (1_711_016_131, "404")] {
            let entry = LogEntry {
                timestamp: DateTime::from_timestamp(secs, 123_456_000).unwrap(),
                fields: BTreeMap::from([
                    ("elb_status_code".to_string(), status.to_string()),
                    ("type".to_string(), "https".to_string()),
                ]),
            };
            batcher.offer(&entry).await;
        }

        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert_eq!(
            output,
            "[2024-03-21T10:15:30Z] {\"elb_status_code\":\"200\",\"type\":\"https\"}\n\
             [2024-03-21T10:15:31Z] {\"elb_status_code\":\"404\",\"type\":\"https\"}\n"
        );
        assert_eq!(batcher.stats().batches, 2);
    }

    /// Holds every write until the test releases it.
    struct Gated {
        open: mpsc::Receiver<()>,
        out: Buffer,
    }

    impl Write for Gated {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.open
                .recv_timeout(Duration::from_secs(5))
                .map_err(std::io::Error::other)?;
            self.out.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_stalled_writer_does_not_block_runtime() {
        let (release, open) = mpsc::channel();
        let out = Buffer::default();
        let writer: Box<dyn Write + Send> = Box::new(Gated {
            open,
            out: out.clone(),
        });
        let sink = StdoutSink::with_writer(Arc::new(Mutex::new(writer)));
        let batch = vec![Record {
            timestamp: DateTime::from_timestamp(1_711_016_130, 0).unwrap(),
            payload: b"line\n".to_vec(),
        }];

        let (report, ()) = tokio::join!(sink.emit(batch), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            release.send(()).unwrap();
        });

        assert_eq!(report.unwrap(), EmitReport::all_sent(1));
        assert_eq!(out.0.lock().unwrap().as_slice(), b"line\n");
    }
}
