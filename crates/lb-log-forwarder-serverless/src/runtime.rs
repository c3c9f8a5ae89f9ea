// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Minimal client for the Lambda runtime API.
//!
//! The function polls `invocation/next`, handles the event and reports either
//! a response or an error for the request id it was given.

use bytes::Bytes;
use serde::Serialize;
use tracing::debug;

const API_VERSION: &str = "2018-06-01";
const REQUEST_ID_HEADER: &str = "Lambda-Runtime-Aws-Request-Id";
const ERROR_TYPE_HEADER: &str = "Lambda-Runtime-Function-Error-Type";

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("runtime API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("runtime API returned {0}")]
    Status(reqwest::StatusCode),

    #[error("invocation is missing the {REQUEST_ID_HEADER} header")]
    MissingRequestId,
}

#[derive(Debug)]
pub struct Invocation {
    pub request_id: String,
    pub payload: Bytes,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorReport<'a> {
    error_type: &'a str,
    error_message: &'a str,
}

pub struct RuntimeClient {
    client: reqwest::Client,
    base_url: String,
}

impl RuntimeClient {
    /// `api` is the `host:port` found in `AWS_LAMBDA_RUNTIME_API`.
    pub fn new(api: &str) -> Self {
        Self::with_base_url(format!("http://{api}/{API_VERSION}/runtime"))
    }

    fn with_base_url(base_url: String) -> Self {
        Self {
            // No request timeout: `invocation/next` blocks until an event arrives.
            client: reqwest::Client::new(),
            base_url,
        }
    }

    pub async fn next_invocation(&self) -> Result<Invocation, RuntimeError> {
        let resp = self
            .client
            .get(format!("{}/invocation/next", self.base_url))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(RuntimeError::Status(resp.status()));
        }

        let request_id = resp
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or(RuntimeError::MissingRequestId)?;
        let payload = resp.bytes().await?;
        debug!("Received invocation {request_id}");
        Ok(Invocation {
            request_id,
            payload,
        })
    }

    pub async fn respond<T: Serialize>(
        &self,
        request_id: &str,
        response: &T,
    ) -> Result<(), RuntimeError> {
        let url = format!("{}/invocation/{request_id}/response", self.base_url);
        let resp = self.client.post(url).json(response).send().await?;
        check(resp.status())
    }

    pub async fn report_error(
        &self,
        request_id: &str,
        error_type: &str,
        message: &str,
    ) -> Result<(), RuntimeError> {
        self.post_error(
            format!("{}/invocation/{request_id}/error", self.base_url),
            error_type,
            message,
        )
        .await
    }

    pub async fn report_init_error(
        &self,
        error_type: &str,
        message: &str,
    ) -> Result<(), RuntimeError> {
        self.post_error(format!("{}/init/error", self.base_url), error_type, message)
            .await
    }

    async fn post_error(
        &self,
        url: String,
        error_type: &str,
        message: &str,
    ) -> Result<(), RuntimeError> {
        let report = ErrorReport {
            error_type,
            error_message: message,
        };
        let resp = self
            .client
            .post(url)
            .header(ERROR_TYPE_HEADER, error_type)
            .json(&report)
            .send()
            .await?;
        check(resp.status())
    }
}

fn check(status: reqwest::StatusCode) -> Result<(), RuntimeError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(RuntimeError::Status(status))
    }
}
