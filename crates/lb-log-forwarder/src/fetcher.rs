// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Object access: opening an object as a byte stream and listing a prefix.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use futures::future;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::ObjectStore;
use tracing::debug;

use crate::entry::S3ObjectInfo;
use crate::errors::FetchError;

/// Forward-only body of an object. Dropping it releases the connection.
pub type ByteStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// Objects under a prefix, produced one listing page at a time.
pub type ObjectStream = BoxStream<'static, Result<S3ObjectInfo, FetchError>>;

#[async_trait]
pub trait ObjectSource: Send + Sync {
    async fn open(&self, object: &S3ObjectInfo) -> Result<ByteStream, FetchError>;

    fn list(&self, bucket: &str, prefix: &str) -> Result<ObjectStream, FetchError>;
}

type StoreBuilder =
    dyn Fn(&str) -> Result<Arc<dyn ObjectStore>, object_store::Error> + Send + Sync;

/// [`ObjectSource`] backed by `object_store`, with one store per bucket.
pub struct S3Source {
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
    build: Box<StoreBuilder>,
}

impl S3Source {
    /// Stores are configured from the standard `AWS_*` environment.
    ///
    /// `endpoint` points every bucket at an S3-compatible service instead of AWS.
    pub fn from_env(endpoint: Option<String>) -> Self {
        let build = move |bucket: &str| -> Result<Arc<dyn ObjectStore>, object_store::Error> {
            let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
            if let Some(endpoint) = &endpoint {
                builder = builder
                    .with_endpoint(endpoint)
                    .with_allow_http(endpoint.starts_with("http://"))
                    .with_virtual_hosted_style_request(false);
            }
            Ok(Arc::new(builder.build()?))
        };
        Self {
            stores: Mutex::default(),
            build: Box::new(build),
        }
    }

    /// Serves a fixed set of buckets; any other bucket fails to open.
    pub fn with_stores(stores: impl IntoIterator<Item = (String, Arc<dyn ObjectStore>)>) -> Self {
        let build = |bucket: &str| -> Result<Arc<dyn ObjectStore>, object_store::Error> {
            Err(object_store::Error::Generic {
                store: "S3Source",
                source: format!("unknown bucket {bucket}").into(),
            })
        };
        Self {
            stores: Mutex::new(stores.into_iter().collect()),
            build: Box::new(build),
        }
    }

    fn store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, FetchError> {
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(store) = stores.get(bucket) {
            return Ok(Arc::clone(store));
        }

        debug!("Creating object store for bucket {bucket}");
        let store = (self.build)(bucket).map_err(|source| FetchError::Store {
            bucket: bucket.to_string(),
            source,
        })?;
        stores.insert(bucket.to_string(), Arc::clone(&store));
        Ok(store)
    }
}

#[async_trait]
impl ObjectSource for S3Source {
    async fn open(&self, object: &S3ObjectInfo) -> Result<ByteStream, FetchError> {
        let store = self.store(&object.bucket)?;
        let result = store
            .get(&object_path(&object.key)?)
            .await
            .map_err(FetchError::Get)?;

        Ok(result
            .into_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other))
            .boxed())
    }

    fn list(&self, bucket: &str, prefix: &str) -> Result<ObjectStream, FetchError> {
        let store = self.store(bucket)?;
        // S3 prefixes are plain string prefixes; object_store lists whole
        // directories, so list the enclosing one and filter.
        let directory = match prefix.rfind('/') {
            Some(end) => Some(object_path(&prefix[..end])?),
            None => None,
        };
        let bucket = bucket.to_string();
        let prefix = prefix.trim_start_matches('/').to_string();

        Ok(store
            .list(directory.as_ref())
            .try_filter(move |meta| future::ready(meta.location.as_ref().starts_with(&prefix)))
            .map(move |meta| {
                meta.map(|meta| S3ObjectInfo::new(bucket.clone(), meta.location.to_string()))
                    .map_err(FetchError::List)
            })
            .boxed())
    }
}

/// Object keys are used verbatim, without the per-segment encoding `Path::from` applies.
fn object_path(key: &str) -> Result<Path, FetchError> {
    Path::parse(key).map_err(|source| FetchError::InvalidKey {
        key: key.to_string(),
        source,
    })
}
