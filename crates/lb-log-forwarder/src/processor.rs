// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Runs the whole pipeline for one object.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::batcher::{Batcher, BatcherStats, Emitter};
use crate::decompress;
use crate::entry::S3ObjectInfo;
use crate::errors::ProcessError;
use crate::fetcher::ObjectSource;
use crate::parser::{Parser, RecordReader};
use crate::replicator::Replicator;
use crate::schema::FieldFilter;

/// What one object produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    /// Entries parsed and handed to the sinks.
    pub entries: u64,
    pub sinks: Vec<(&'static str, BatcherStats)>,
}

pub struct ObjectProcessor {
    source: Arc<dyn ObjectSource>,
    filter: Arc<FieldFilter>,
    sinks: Vec<Arc<dyn Emitter>>,
    buffer_size: usize,
}

impl ObjectProcessor {
    pub fn new(
        source: Arc<dyn ObjectSource>,
        filter: FieldFilter,
        sinks: Vec<Arc<dyn Emitter>>,
        buffer_size: usize,
    ) -> Self {
        Self {
            source,
            filter: Arc::new(filter),
            sinks,
            buffer_size,
        }
    }

    /// Streams `object` through decompression, parsing and every sink.
    ///
    /// Entries already queued when parsing fails are still flushed. Cancellation
    /// stops parsing and lets every sink flush what it holds.
    pub async fn process(
        &self,
        object: &S3ObjectInfo,
        cancel: &CancellationToken,
    ) -> Result<ObjectSummary, ProcessError> {
        info!("Processing {object}");
        let body = self.source.open(object).await?;
        let (pipe, decompressor) = decompress::spawn(body);

        let names: Vec<&'static str> = self.sinks.iter().map(|sink| sink.name()).collect();
        let (mut replicator, receivers) = Replicator::new(&names, self.buffer_size);
        let batchers: Vec<_> = self
            .sinks
            .iter()
            .zip(receivers)
            .map(|(sink, rx)| tokio::spawn(Batcher::new(Arc::clone(sink)).run(rx, cancel.clone())))
            .collect();

        let parsed = Parser::new(Arc::clone(&self.filter))
            .run(RecordReader::new(pipe), &mut replicator, cancel)
            .await;
        replicator.close();

        let mut sinks = Vec::with_capacity(batchers.len());
        for (name, batcher) in names.into_iter().zip(batchers) {
            match batcher.await {
                Ok(stats) => sinks.push((name, stats)),
                Err(e) => error!("{name}: batcher task failed for {object}: {e}"),
            }
        }

        let decoded = decompressor.wait().await;
        let entries = parsed?;
        decoded?;

        info!("Completed {object}: {entries} entries");
        Ok(ObjectSummary { entries, sinks })
    }
}
