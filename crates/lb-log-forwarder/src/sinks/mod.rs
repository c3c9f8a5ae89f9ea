// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log destinations.
//!
//! Every sink implements [`Emitter`]; the shared [`crate::batcher::Batcher`]
//! drives them. Sinks are built once at startup and shared by every object.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use aws_config::{BehaviorVersion, SdkConfig};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::batcher::Emitter;
use crate::errors::{ConfigError, SinkError};
use crate::http::get_client;

pub mod cloudwatch;
pub mod firehose;
pub mod opensearch;
pub mod splunk;
pub mod stdout;

use cloudwatch::{CloudWatchConfig, CloudWatchLogsClient, CloudWatchSink};
use firehose::{FirehoseClient, FirehoseConfig, FirehoseSink};
use opensearch::{OpenSearchConfig, OpenSearchSink};
use splunk::{SplunkConfig, SplunkSink};
use stdout::StdoutSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    CloudWatch,
    Firehose,
    Splunk,
    OpenSearch,
    Stdout,
}

impl FromStr for SinkKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cloudwatch" => Ok(SinkKind::CloudWatch),
            "firehose" => Ok(SinkKind::Firehose),
            "splunk" => Ok(SinkKind::Splunk),
            "opensearch" | "elasticsearch" => Ok(SinkKind::OpenSearch),
            "stdout" => Ok(SinkKind::Stdout),
            _ => Err(ConfigError::Invalid(format!("unknown destination {s:?}"))),
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SinkKind::CloudWatch => "cloudwatch",
            SinkKind::Firehose => "firehose",
            SinkKind::Splunk => "splunk",
            SinkKind::OpenSearch => "opensearch",
            SinkKind::Stdout => "stdout",
        };
        f.write_str(name)
    }
}

/// Validated settings for one sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkConfig {
    CloudWatch(CloudWatchConfig),
    Firehose(FirehoseConfig),
    Splunk(SplunkConfig),
    OpenSearch(OpenSearchConfig),
    Stdout,
}

impl SinkConfig {
    pub fn kind(&self) -> SinkKind {
        match self {
            SinkConfig::CloudWatch(_) => SinkKind::CloudWatch,
            SinkConfig::Firehose(_) => SinkKind::Firehose,
            SinkConfig::Splunk(_) => SinkKind::Splunk,
            SinkConfig::OpenSearch(_) => SinkKind::OpenSearch,
            SinkConfig::Stdout => SinkKind::Stdout,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Builds every configured sink. Sinks that fail to initialize are skipped.
pub async fn build(configs: &[SinkConfig]) -> Result<Vec<Arc<dyn Emitter>>, ConfigError> {
    let aws = OnceCell::new();
    let mut sinks = Vec::with_capacity(configs.len());

    for config in configs {
        match build_one(config, &aws).await {
            Ok(sink) => {
                info!("Destination {} enabled", config.kind());
                sinks.push(sink);
            }
            Err(e) => warn!("Skipping destination {}: {e}", config.kind()),
        }
    }

    if sinks.is_empty() {
        return Err(ConfigError::NoSinks);
    }
    Ok(sinks)
}

async fn build_one(
    config: &SinkConfig,
    aws: &OnceCell<SdkConfig>,
) -> Result<Arc<dyn Emitter>, InitError> {
    let sink: Arc<dyn Emitter> = match config {
        SinkConfig::CloudWatch(config) => {
            let sdk_config = aws_sdk_config(aws).await;
            let api = Arc::new(CloudWatchLogsClient::new(sdk_config));
            Arc::new(CloudWatchSink::new(api, config.clone()).await?)
        }
        SinkConfig::Firehose(config) => {
            let sdk_config = aws_sdk_config(aws).await;
            let api = Arc::new(FirehoseClient::new(sdk_config));
            Arc::new(FirehoseSink::new(api, config.clone()))
        }
        SinkConfig::Splunk(config) => {
            let client = get_client(config.skip_verify)?;
            Arc::new(SplunkSink::new(client, config.clone()))
        }
        SinkConfig::OpenSearch(config) => {
            let client = get_client(config.skip_verify)?;
            Arc::new(OpenSearchSink::new(client, config.clone())?)
        }
        SinkConfig::Stdout => Arc::new(StdoutSink::new()),
    };
    Ok(sink)
}

async fn aws_sdk_config(cell: &OnceCell<SdkConfig>) -> &SdkConfig {
    cell.get_or_init(|| aws_config::load_defaults(BehaviorVersion::latest()))
        .await
}
