// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! OpenSearch / Elasticsearch bulk API sink.
//!
//! Every entry is an `index` action line followed by the document, which
//! carries the entry's fields plus `@timestamp`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::debug;

use crate::batcher::{BatchLimits, EmitReport, Emitter, Record};
use crate::constants::{OPENSEARCH_MAX_BATCH_BYTES, OPENSEARCH_MAX_BATCH_COUNT};
use crate::entry::LogEntry;
use crate::errors::SinkError;

const LIMITS: BatchLimits =
    BatchLimits::new(OPENSEARCH_MAX_BATCH_BYTES, OPENSEARCH_MAX_BATCH_COUNT);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OpenSearchConfig {
    pub endpoint: String,
    pub index: String,
    pub username: String,
    pub password: String,
    pub skip_verify: bool,
}

#[derive(Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<BTreeMap<String, BulkItem>>,
}

#[derive(Deserialize)]
struct BulkItem {
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl BulkResponse {
    fn failed_items(&self) -> usize {
        if !self.errors {
            return 0;
        }
        self.items
            .iter()
            .filter(|item| item.values().any(|result| result.error.is_some()))
            .count()
    }
}

pub struct OpenSearchSink {
    client: reqwest::Client,
    config: OpenSearchConfig,
    bulk_url: String,
    action_line: Vec<u8>,
}

impl OpenSearchSink {
    pub fn new(client: reqwest::Client, config: OpenSearchConfig) -> Result<Self, SinkError> {
        let bulk_url = format!("{}/_bulk", config.endpoint.trim_end_matches('/'));
        let mut action_line =
            serde_json::to_vec(&serde_json::json!({ "index": { "_index": config.index } }))?;
        action_line.push(b'\n');
        Ok(Self {
            client,
            config,
            bulk_url,
            action_line,
        })
    }
}

#[async_trait]
impl Emitter for OpenSearchSink {
    fn name(&self) -> &'static str {
        "opensearch"
    }

    fn limits(&self) -> &BatchLimits {
        &LIMITS
    }

    fn encode(&self, entry: &LogEntry) -> Result<Vec<u8>, SinkError> {
        let timestamp = entry.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true);
        let mut doc: BTreeMap<&str, &str> = entry
            .fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        doc.insert("@timestamp", &timestamp);

        let mut payload = self.action_line.clone();
        serde_json::to_writer(&mut payload, &doc)?;
        payload.push(b'\n');
        Ok(payload)
    }

    async fn emit(&self, batch: Vec<Record>) -> Result<EmitReport, SinkError> {
        let count = batch.len();
        let body: Vec<u8> = batch.into_iter().flat_map(|record| record.payload).collect();

        let mut request = self
            .client
            .post(&self.bulk_url)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body);
        if !self.config.username.is_empty() && !self.config.password.is_empty() {
            request = request.basic_auth(&self.config.username, Some(&self.config.password));
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SinkError::Status { status, body });
        }

        let failed = match resp.json::<BulkResponse>().await {
            Ok(bulk) => bulk.failed_items().min(count),
            Err(e) => {
                debug!("Could not read bulk response, assuming success: {e}");
                0
            }
        };
        Ok(EmitReport {
            sent: count - failed,
            failed,
        })
    }
}
