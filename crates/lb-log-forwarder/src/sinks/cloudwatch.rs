// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! CloudWatch Logs sink.
//!
//! Each entry becomes one log event whose message is the JSON of its fields.
//! `PutLogEvents` requires events in chronological order, so batches are
//! sorted by timestamp before they are sent.

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_cloudwatchlogs::error::DisplayErrorContext;
use aws_sdk_cloudwatchlogs::types::InputLogEvent;
use tracing::{debug, info};

use crate::batcher::{BatchLimits, EmitReport, Emitter, Record};
use crate::constants::{
    CLOUDWATCH_EVENT_OVERHEAD, CLOUDWATCH_MAX_BATCH_BYTES, CLOUDWATCH_MAX_BATCH_COUNT,
};
use crate::entry::LogEntry;
use crate::errors::SinkError;

const LIMITS: BatchLimits =
    BatchLimits::new(CLOUDWATCH_MAX_BATCH_BYTES, CLOUDWATCH_MAX_BATCH_COUNT)
        .with_overhead(CLOUDWATCH_EVENT_OVERHEAD)
        .sorted_by_time();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudWatchConfig {
    pub log_group: String,
    pub log_stream: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub message: String,
    pub timestamp_millis: i64,
}

/// The CloudWatch Logs calls the sink needs.
#[async_trait]
pub trait LogGroupApi: Send + Sync {
    /// Creates the log group and stream if they do not exist yet.
    async fn ensure_destination(&self, group: &str, stream: &str) -> Result<(), SinkError>;

    /// Returns the number of events CloudWatch rejected.
    async fn put_log_events(
        &self,
        group: &str,
        stream: &str,
        events: Vec<LogEvent>,
    ) -> Result<usize, SinkError>;
}

/// [`LogGroupApi`] on the AWS SDK.
pub struct CloudWatchLogsClient {
    client: aws_sdk_cloudwatchlogs::Client,
}

impl CloudWatchLogsClient {
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_cloudwatchlogs::Client::new(sdk_config),
        }
    }

    async fn log_group_exists(&self, group: &str) -> Result<bool, SinkError> {
        let output = self
            .client
            .describe_log_groups()
            .log_group_name_prefix(group)
            .send()
            .await
            .map_err(|e| SinkError::Api(format!("describe log groups: {}", DisplayErrorContext(e))))?;
        Ok(output
            .log_groups()
            .iter()
            .any(|g| g.log_group_name() == Some(group)))
    }

    async fn log_stream_exists(&self, group: &str, stream: &str) -> Result<bool, SinkError> {
        let output = self
            .client
            .describe_log_streams()
            .log_group_name(group)
            .log_stream_name_prefix(stream)
            .send()
            .await
            .map_err(|e| {
                SinkError::Api(format!("describe log streams: {}", DisplayErrorContext(e)))
            })?;
        Ok(output
            .log_streams()
            .iter()
            .any(|s| s.log_stream_name() == Some(stream)))
    }
}

#[async_trait]
impl LogGroupApi for CloudWatchLogsClient {
    async fn ensure_destination(&self, group: &str, stream: &str) -> Result<(), SinkError> {
        if !self.log_group_exists(group).await? {
            info!("Creating log group {group}");
            self.client
                .create_log_group()
                .log_group_name(group)
                .send()
                .await
                .map_err(|e| {
                    SinkError::Api(format!("create log group: {}", DisplayErrorContext(e)))
                })?;
        }

        if !self.log_stream_exists(group, stream).await? {
            info!("Creating log stream {stream} in {group}");
            self.client
                .create_log_stream()
                .log_group_name(group)
                .log_stream_name(stream)
                .send()
                .await
                .map_err(|e| {
                    SinkError::Api(format!("create log stream: {}", DisplayErrorContext(e)))
                })?;
        }
        Ok(())
    }

    async fn put_log_events(
        &self,
        group: &str,
        stream: &str,
        events: Vec<LogEvent>,
    ) -> Result<usize, SinkError> {
        let count = events.len();
        let events = events
            .into_iter()
            .map(|event| {
                InputLogEvent::builder()
                    .message(event.message)
                    .timestamp(event.timestamp_millis)
                    .build()
                    .map_err(|e| SinkError::Api(format!("build log event: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .put_log_events()
            .log_group_name(group)
            .log_stream_name(stream)
            .set_log_events(Some(events))
            .send()
            .await
            .map_err(|e| SinkError::Api(format!("put log events: {}", DisplayErrorContext(e))))?;

        let Some(rejected) = output.rejected_log_events_info() else {
            return Ok(0);
        };
        let too_old = rejected
            .too_old_log_event_end_index()
            .max(rejected.expired_log_event_end_index())
            .map_or(0, |end| end.max(0) as usize);
        let too_new = rejected
            .too_new_log_event_start_index()
            .map_or(0, |start| count.saturating_sub(start.max(0) as usize));
        Ok((too_old + too_new).min(count))
    }
}

pub struct CloudWatchSink {
    api: Arc<dyn LogGroupApi>,
    config: CloudWatchConfig,
}

impl CloudWatchSink {
    /// Makes sure the log group and stream exist before any batch is sent.
    pub async fn new(api: Arc<dyn LogGroupApi>, config: CloudWatchConfig) -> Result<Self, SinkError> {
        api.ensure_destination(&config.log_group, &config.log_stream)
            .await?;
        debug!(
            "CloudWatch sink ready for {}/{}",
            config.log_group, config.log_stream
        );
        Ok(Self { api, config })
    }
}

#[async_trait]
impl Emitter for CloudWatchSink {
    fn name(&self) -> &'static str {
        "cloudwatch"
    }

    fn limits(&self) -> &BatchLimits {
        &LIMITS
    }

    fn encode(&self, entry: &LogEntry) -> Result<Vec<u8>, SinkError> {
        Ok(entry.fields_json()?)
    }

    async fn emit(&self, batch: Vec<Record>) -> Result<EmitReport, SinkError> {
        let count = batch.len();
        let events = batch
            .into_iter()
            .map(|record| LogEvent {
                message: String::from_utf8_lossy(&record.payload).into_owned(),
                timestamp_millis: record.timestamp.timestamp_millis(),
            })
            .collect();

        let failed = self
            .api
            .put_log_events(&self.config.log_group, &self.config.log_stream, events)
            .await?;
        Ok(EmitReport {
            sent: count.saturating_sub(failed),
            failed,
        })
    }
}
