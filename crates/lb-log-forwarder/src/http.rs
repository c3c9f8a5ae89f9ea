// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client shared by the Splunk and OpenSearch sinks.

use std::time::Duration;

use reqwest::ClientBuilder;

use crate::constants::EMIT_TIMEOUT;
use crate::errors::ConfigError;

/// Rustls client builder with the emit timeout applied.
pub fn create_reqwest_client_builder() -> ClientBuilder {
    reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(EMIT_TIMEOUT)
        .pool_idle_timeout(Duration::from_secs(30))
}

/// Builds the client for one sink.
///
/// `skip_verify` disables certificate validation for self-signed endpoints.
pub fn get_client(skip_verify: bool) -> Result<reqwest::Client, ConfigError> {
    create_reqwest_client_builder()
        .danger_accept_invalid_certs(skip_verify)
        .build()
        .map_err(|e| ConfigError::Invalid(format!("failed to create HTTP client: {e}")))
}
