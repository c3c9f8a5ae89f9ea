// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Splunk HTTP Event Collector sink.
//!
//! A batch is the concatenation of one HEC event object per entry, posted
//! in a single request.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use tracing::debug;

use crate::batcher::{BatchLimits, EmitReport, Emitter, Record};
use crate::constants::{SPLUNK_MAX_BATCH_BYTES, SPLUNK_MAX_BATCH_COUNT};
use crate::entry::LogEntry;
use crate::errors::SinkError;

const LIMITS: BatchLimits = BatchLimits::new(SPLUNK_MAX_BATCH_BYTES, SPLUNK_MAX_BATCH_COUNT);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SplunkConfig {
    pub endpoint: String,
    pub token: String,
    pub source: String,
    pub sourcetype: String,
    pub index: String,
    pub skip_verify: bool,
}

#[derive(Serialize)]
struct HecEvent<'a> {
    time: i64,
    #[serde(skip_serializing_if = "str::is_empty")]
    source: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    sourcetype: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    index: &'a str,
    event: &'a BTreeMap<String, String>,
}

pub struct SplunkSink {
    client: reqwest::Client,
    config: SplunkConfig,
}

impl SplunkSink {
    pub fn new(client: reqwest::Client, config: SplunkConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Emitter for SplunkSink {
    fn name(&self) -> &'static str {
        "splunk"
    }

    fn limits(&self) -> &BatchLimits {
        &LIMITS
    }

    fn encode(&self, entry: &LogEntry) -> Result<Vec<u8>, SinkError> {
        let event = HecEvent {
            time: entry.timestamp.timestamp(),
            source: &self.config.source,
            sourcetype: &self.config.sourcetype,
            index: &self.config.index,
            event: &entry.fields,
        };
        Ok(serde_json::to_vec(&event)?)
    }

    async fn emit(&self, batch: Vec<Record>) -> Result<EmitReport, SinkError> {
        let count = batch.len();
        let body: Vec<u8> = batch.into_iter().flat_map(|record| record.payload).collect();

        let resp = self
            .client
            .post(&self.config.endpoint)
            .header(AUTHORIZATION, format!("Splunk {}", self.config.token))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SinkError::Status { status, body });
        }
        debug!("Splunk accepted {count} events");
        Ok(EmitReport::all_sent(count))
    }
}
