// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Schedules objects onto the processor with bounded concurrency.
//!
//! Objects come either from a notification event or from listing an
//! `s3://bucket/prefix` URL. A permit is taken before the next object is
//! pulled, so listing never runs ahead of processing by more than
//! `max_concurrency` objects. One object failing never cancels the others.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::entry::S3ObjectInfo;
use crate::errors::{ConfigError, DispatchError, FetchError, ProcessError};
use crate::fetcher::{ObjectSource, ObjectStream, S3Source};
use crate::processor::{ObjectProcessor, ObjectSummary};
use crate::sinks;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    pub objects: usize,
    pub entries: u64,
}

/// Splits `s3://bucket/prefix` into bucket and (possibly empty) prefix.
pub fn parse_s3_url(url: &str) -> Result<(String, String), DispatchError> {
    let bad_url = |reason| DispatchError::BadUrl {
        url: url.to_string(),
        reason,
    };

    let rest = url.strip_prefix("s3://").ok_or_else(|| bad_url("missing s3:// scheme"))?;
    let (bucket, prefix) = rest
        .split_once('/')
        .ok_or_else(|| bad_url("expected s3://bucket/prefix"))?;
    if bucket.is_empty() {
        return Err(bad_url("empty bucket name"));
    }
    Ok((bucket.to_string(), prefix.to_string()))
}

type Outcome = (S3ObjectInfo, Result<ObjectSummary, ProcessError>);

#[derive(Default)]
struct Tally {
    total: usize,
    entries: u64,
    errors: Vec<String>,
}

impl Tally {
    fn record(&mut self, joined: Result<Outcome, JoinError>) {
        match joined {
            Ok((_, Ok(summary))) => self.entries += summary.entries,
            Ok((object, Err(e))) => {
                error!("Failed to process {object}: {e}");
                self.errors.push(format!("{object}: {e}"));
            }
            Err(e) => {
                error!("Object task failed: {e}");
                self.errors.push(format!("object task failed: {e}"));
            }
        }
    }
}

pub struct Dispatcher {
    processor: Arc<ObjectProcessor>,
    source: Arc<dyn ObjectSource>,
    max_concurrency: usize,
}

impl Dispatcher {
    pub fn new(
        processor: Arc<ObjectProcessor>,
        source: Arc<dyn ObjectSource>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            processor,
            source,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Builds sinks, object source and processor from validated configuration.
    pub async fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let sinks = sinks::build(&config.sinks).await?;
        let source: Arc<dyn ObjectSource> =
            Arc::new(S3Source::from_env(config.aws_endpoint.clone()));
        let processor = ObjectProcessor::new(
            Arc::clone(&source),
            config.field_filter()?,
            sinks,
            config.buffer_size,
        );
        Ok(Self::new(
            Arc::new(processor),
            source,
            config.max_concurrency,
        ))
    }

    /// Processes the objects named by a notification event.
    pub async fn dispatch_objects(
        &self,
        objects: Vec<S3ObjectInfo>,
        cancel: &CancellationToken,
    ) -> Result<DispatchSummary, DispatchError> {
        let objects = stream::iter(objects.into_iter().map(Ok)).boxed();
        self.dispatch(objects, cancel).await
    }

    /// Processes every object under an `s3://bucket/prefix` URL.
    pub async fn dispatch_url(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<DispatchSummary, DispatchError> {
        let (bucket, prefix) = parse_s3_url(url)?;
        info!("Listing s3://{bucket}/{prefix}");
        let objects = self
            .source
            .list(&bucket, &prefix)
            .map_err(DispatchError::List)?;
        self.dispatch(objects, cancel).await
    }

    async fn dispatch(
        &self,
        mut objects: ObjectStream,
        cancel: &CancellationToken,
    ) -> Result<DispatchSummary, DispatchError> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();
        let mut tally = Tally::default();
        let mut list_error: Option<FetchError> = None;

        loop {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = objects.next() => next,
            };
            let object = match next {
                Some(Ok(object)) => object,
                Some(Err(e)) => {
                    error!("Stopped scheduling objects: {e}");
                    list_error = Some(e);
                    break;
                }
                None => break,
            };

            tally.total += 1;
            let processor = Arc::clone(&self.processor);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let result = processor.process(&object, &cancel).await;
                drop(permit);
                (object, result)
            });

            while let Some(joined) = tasks.try_join_next() {
                tally.record(joined);
            }
        }

        if cancel.is_cancelled() {
            debug!("Dispatch cancelled, waiting for {} objects in flight", tasks.len());
        }
        while let Some(joined) = tasks.join_next().await {
            tally.record(joined);
        }

        if let Some(e) = list_error {
            return Err(DispatchError::List(e));
        }
        if !tally.errors.is_empty() {
            return Err(DispatchError::ObjectsFailed {
                failed: tally.errors.len(),
                total: tally.total,
                errors: tally.errors,
            });
        }

        info!(
            "Processed {} objects, {} entries",
            tally.total, tally.entries
        );
        Ok(DispatchSummary {
            objects: tally.total,
            entries: tally.entries,
        })
    }
}
