// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Gzip decoding into a bounded in-memory pipe.
//!
//! The decoder runs on the blocking pool and writes fixed-size chunks into a
//! bounded channel; the parser reads the other end. Only `PIPE_CAPACITY`
//! chunks of decompressed data are ever resident, whatever the object size.
//! Decoding errors travel through the same channel so the reader sees them in
//! order with the data.

use std::io::{ErrorKind, Read};

use bytes::Bytes;
use flate2::read::MultiGzDecoder;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::debug;

use crate::constants::{PIPE_CAPACITY, PIPE_CHUNK_SIZE};
use crate::errors::DecodeError;
use crate::fetcher::ByteStream;

type Chunk = Result<Bytes, DecodeError>;

/// Producer half of the pipe.
pub struct PipeWriter {
    tx: mpsc::Sender<Chunk>,
}

impl PipeWriter {
    /// Returns `false` once the reader is gone.
    pub async fn write(&self, chunk: Bytes) -> bool {
        self.tx.send(Ok(chunk)).await.is_ok()
    }

    /// Terminates the pipe with an error.
    pub async fn fail(self, error: DecodeError) {
        let _ = self.tx.send(Err(error)).await;
    }

    fn blocking_write(&self, chunk: Bytes) -> bool {
        self.tx.blocking_send(Ok(chunk)).is_ok()
    }

    fn blocking_fail(self, error: DecodeError) {
        let _ = self.tx.blocking_send(Err(error));
    }
}

/// Consumer half of the pipe. Dropping it stops the producer.
pub struct PipeReader {
    rx: mpsc::Receiver<Chunk>,
}

impl PipeReader {
    /// Next chunk, or `None` once the writer closed the pipe.
    pub async fn read_chunk(&mut self) -> Option<Chunk> {
        self.rx.recv().await
    }
}

/// Creates a pipe holding at most `capacity` chunks.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (PipeWriter { tx }, PipeReader { rx })
}

/// Handle on a running decompressor.
pub struct Decompressor {
    handle: JoinHandle<()>,
}

impl Decompressor {
    /// Waits for the producer to exit.
    pub async fn wait(self) -> Result<(), DecodeError> {
        self.handle.await.map_err(|_| DecodeError::Aborted)
    }
}

/// Starts decoding `body` and returns the reading end of the pipe.
pub fn spawn(body: ByteStream) -> (PipeReader, Decompressor) {
    let (writer, reader) = pipe(PIPE_CAPACITY);
    let bridge = SyncIoBridge::new(StreamReader::new(body));
    let handle = tokio::task::spawn_blocking(move || pump(bridge, writer));
    (reader, Decompressor { handle })
}

fn pump<R: Read>(compressed: R, writer: PipeWriter) {
    let mut decoder = MultiGzDecoder::new(compressed);
    let mut buf = vec![0u8; PIPE_CHUNK_SIZE];
    let mut filled = 0;

    loop {
        match decoder.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled > 0 {
                    writer.blocking_write(Bytes::copy_from_slice(&buf[..filled]));
                }
                return;
            }
            Ok(n) => {
                filled += n;
                if filled < buf.len() {
                    continue;
                }
                if !writer.blocking_write(Bytes::copy_from_slice(&buf)) {
                    debug!("pipe reader dropped, stopping decompression");
                    return;
                }
                filled = 0;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                if filled > 0 && !writer.blocking_write(Bytes::copy_from_slice(&buf[..filled])) {
                    return;
                }
                writer.blocking_fail(DecodeError::Io(e));
                return;
            }
        }
    }
}
