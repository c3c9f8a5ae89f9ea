// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Kinesis Data Firehose sink: one newline-terminated JSON record per entry.

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_firehose::error::DisplayErrorContext;
use aws_sdk_firehose::primitives::Blob;
use aws_sdk_firehose::types::Record as FirehoseRecord;

use crate::batcher::{BatchLimits, EmitReport, Emitter, Record};
use crate::constants::{FIREHOSE_MAX_BATCH_BYTES, FIREHOSE_MAX_BATCH_COUNT};
use crate::entry::LogEntry;
use crate::errors::SinkError;

const LIMITS: BatchLimits = BatchLimits::new(FIREHOSE_MAX_BATCH_BYTES, FIREHOSE_MAX_BATCH_COUNT);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirehoseConfig {
    pub stream_name: String,
}

#[async_trait]
pub trait DeliveryStreamApi: Send + Sync {
    /// Returns the number of records Firehose failed to put.
    async fn put_record_batch(&self, stream: &str, records: Vec<Vec<u8>>)
        -> Result<usize, SinkError>;
}

/// [`DeliveryStreamApi`] on the AWS SDK.
pub struct FirehoseClient {
    client: aws_sdk_firehose::Client,
}

impl FirehoseClient {
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_firehose::Client::new(sdk_config),
        }
    }
}

#[async_trait]
impl DeliveryStreamApi for FirehoseClient {
    async fn put_record_batch(
        &self,
        stream: &str,
        records: Vec<Vec<u8>>,
    ) -> Result<usize, SinkError> {
        let records = records
            .into_iter()
            .map(|data| {
                FirehoseRecord::builder()
                    .data(Blob::new(data))
                    .build()
                    .map_err(|e| SinkError::Api(format!("build record: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .put_record_batch()
            .delivery_stream_name(stream)
            .set_records(Some(records))
            .send()
            .await
            .map_err(|e| SinkError::Api(format!("put record batch: {}", DisplayErrorContext(e))))?;
        Ok(output.failed_put_count().max(0) as usize)
    }
}

pub struct FirehoseSink {
    api: Arc<dyn DeliveryStreamApi>,
    config: FirehoseConfig,
}

impl FirehoseSink {
    pub fn new(api: Arc<dyn DeliveryStreamApi>, config: FirehoseConfig) -> Self {
        Self { api, config }
    }
}

#[async_trait]
impl Emitter for FirehoseSink {
    fn name(&self) -> &'static str {
        "firehose"
    }

    fn limits(&self) -> &BatchLimits {
        &LIMITS
    }

    fn encode(&self, entry: &LogEntry) -> Result<Vec<u8>, SinkError> {
        let mut payload = entry.fields_json()?;
        payload.push(b'\n');
        Ok(payload)
    }

    async fn emit(&self, batch: Vec<Record>) -> Result<EmitReport, SinkError> {
        let count = batch.len();
        let records = batch.into_iter().map(|record| record.payload).collect();
        let failed = self
            .api
            .put_record_batch(&self.config.stream_name, records)
            .await?
            .min(count);
        Ok(EmitReport {
            sent: count - failed,
            failed,
        })
    }
}
