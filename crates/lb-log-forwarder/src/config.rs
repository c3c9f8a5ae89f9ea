// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::str::FromStr;

use tracing::warn;

use crate::constants::{DEFAULT_BUFFER_SIZE, DEFAULT_MAX_CONCURRENCY};
use crate::errors::ConfigError;
use crate::schema::{FieldFilter, LbType};
use crate::sinks::cloudwatch::CloudWatchConfig;
use crate::sinks::firehose::FirehoseConfig;
use crate::sinks::opensearch::OpenSearchConfig;
use crate::sinks::splunk::SplunkConfig;
use crate::sinks::{SinkConfig, SinkKind};

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Forwarder configuration, read from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Load balancer log format
    pub lb_type: LbType,
    /// Comma-separated field names to keep; empty keeps all
    pub fields: String,
    /// Sinks whose settings are complete, in configured order
    pub sinks: Vec<SinkConfig>,
    /// Capacity of every per-sink queue
    pub buffer_size: usize,
    /// Objects processed at the same time
    pub max_concurrency: usize,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
    /// S3-compatible endpoint used instead of AWS
    pub aws_endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lb_type: LbType::Alb,
            fields: String::new(),
            sinks: Vec::new(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            log_level: "info".to_string(),
            aws_endpoint: None,
        }
    }
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let lb_type = match get("LB_TYPE") {
            Some(value) => value.parse()?,
            None => LbType::default(),
        };
        let fields = get("FIELDS").unwrap_or_default();
        let buffer_size = parse_number(&get, "BUFFER_SIZE", DEFAULT_BUFFER_SIZE)?;
        let max_concurrency = parse_number(&get, "MAX_CONCURRENCY", DEFAULT_MAX_CONCURRENCY)?;
        let log_level = get("LOG_LEVEL")
            .map(|value| value.to_lowercase())
            .unwrap_or_else(|| "info".to_string());
        let aws_endpoint = get("AWS_ENDPOINT_URL");

        let destinations = get("DESTINATIONS")
            .or_else(|| get("OUTPUTS"))
            .ok_or(ConfigError::MissingVar("DESTINATIONS"))?;
        let sinks = destinations
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .filter_map(|name| match SinkKind::from_str(name) {
                Ok(kind) => Some(kind),
                Err(_) => {
                    warn!("Unknown destination {name:?}, skipping");
                    None
                }
            })
            .filter_map(|kind| match sink_config(kind, &get) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Skipping destination {kind}: {e}");
                    None
                }
            })
            .collect();

        let config = Self {
            lb_type,
            fields,
            sinks,
            buffer_size,
            max_concurrency,
            log_level,
            aws_endpoint,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.field_filter()?;

        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "BUFFER_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "MAX_CONCURRENCY must be greater than 0".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        if self.sinks.is_empty() {
            return Err(ConfigError::NoSinks);
        }

        Ok(())
    }

    pub fn field_filter(&self) -> Result<FieldFilter, ConfigError> {
        FieldFilter::new(self.lb_type, &self.fields)
    }
}

fn parse_number(
    get: impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: usize,
) -> Result<usize, ConfigError> {
    match get(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { key, value }),
        None => Ok(default),
    }
}

fn sink_config(
    kind: SinkKind,
    get: impl Fn(&str) -> Option<String>,
) -> Result<SinkConfig, ConfigError> {
    let required = |key: &'static str| get(key).ok_or(ConfigError::MissingVar(key));
    // OPENSEARCH_* falls back to the ELASTICSEARCH_* spelling
    let search = |key: &str| {
        get(&format!("OPENSEARCH_{key}")).or_else(|| get(&format!("ELASTICSEARCH_{key}")))
    };
    let is_true = |value: Option<String>| value.is_some_and(|v| v.eq_ignore_ascii_case("true"));

    let config = match kind {
        SinkKind::CloudWatch => SinkConfig::CloudWatch(CloudWatchConfig {
            log_group: required("CLOUDWATCH_LOG_GROUP")?,
            log_stream: required("CLOUDWATCH_LOG_STREAM")?,
        }),
        SinkKind::Firehose => SinkConfig::Firehose(FirehoseConfig {
            stream_name: required("FIREHOSE_STREAM_NAME")?,
        }),
        SinkKind::Splunk => SinkConfig::Splunk(SplunkConfig {
            endpoint: required("SPLUNK_HEC_ENDPOINT")?,
            token: required("SPLUNK_HEC_TOKEN")?,
            source: get("SPLUNK_SOURCE").unwrap_or_default(),
            sourcetype: get("SPLUNK_SOURCETYPE").unwrap_or_default(),
            index: get("SPLUNK_INDEX").unwrap_or_default(),
            skip_verify: is_true(get("SPLUNK_SKIP_VERIFY")),
        }),
        SinkKind::OpenSearch => SinkConfig::OpenSearch(OpenSearchConfig {
            endpoint: search("ENDPOINT").ok_or(ConfigError::MissingVar("OPENSEARCH_ENDPOINT"))?,
            index: search("INDEX").ok_or(ConfigError::MissingVar("OPENSEARCH_INDEX"))?,
            username: search("USERNAME").unwrap_or_default(),
            password: search("PASSWORD").unwrap_or_default(),
            skip_verify: is_true(search("SKIP_VERIFY")),
        }),
        SinkKind::Stdout => SinkConfig::Stdout,
    };
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;
    use tracing_test::traced_test;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    fn from_vars(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        Config::from_lookup(lookup(vars))
    }

    #[test]
    fn test_defaults() {
        let config = from_vars(&[("DESTINATIONS", "stdout")]).unwrap();
        assert_eq!(config.lb_type, LbType::Alb);
        assert_eq!(config.buffer_size, 2000);
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.sinks, vec![SinkConfig::Stdout]);
        assert_eq!(config.field_filter().unwrap(), FieldFilter::all(LbType::Alb));
    }

    #[test]
    fn test_destinations_wins_over_outputs() {
        let config = from_vars(&[("DESTINATIONS", "stdout"), ("OUTPUTS", "firehose")]).unwrap();
        assert_eq!(config.sinks, vec![SinkConfig::Stdout]);

        let config = from_vars(&[("OUTPUTS", "stdout")]).unwrap();
        assert_eq!(config.sinks, vec![SinkConfig::Stdout]);
    }

    #[test]
    fn test_missing_destinations() {
        assert!(matches!(
            from_vars(&[("LB_TYPE", "nlb")]),
            Err(ConfigError::MissingVar("DESTINATIONS"))
        ));
    }

    #[test]
    #[traced_test]
    fn test_unknown_and_incomplete_sinks_are_skipped() {
        let config = from_vars(&[
            ("DESTINATIONS", "kafka, cloudwatch ,stdout"),
            ("CLOUDWATCH_LOG_GROUP", "/lb/access"),
        ])
        .unwrap();

        assert_eq!(config.sinks, vec![SinkConfig::Stdout]);
        assert!(logs_contain("Unknown destination \"kafka\""));
        assert!(logs_contain("CLOUDWATCH_LOG_STREAM required"));
    }

    #[test]
    fn test_no_valid_sinks() {
        assert!(matches!(
            from_vars(&[("DESTINATIONS", "splunk")]),
            Err(ConfigError::NoSinks)
        ));
    }

    #[test]
    fn test_sink_settings() {
        let config = from_vars(&[
            ("DESTINATIONS", "cloudwatch,firehose,splunk,elasticsearch"),
            ("CLOUDWATCH_LOG_GROUP", "/lb/access"),
            ("CLOUDWATCH_LOG_STREAM", "alb"),
            ("FIREHOSE_STREAM_NAME", "lb-logs"),
            ("SPLUNK_HEC_ENDPOINT", "https://splunk:8088/services/collector"),
            ("SPLUNK_HEC_TOKEN", "token"),
            ("SPLUNK_INDEX", "main"),
            ("SPLUNK_SKIP_VERIFY", "TRUE"),
            ("ELASTICSEARCH_ENDPOINT", "https://es:9200"),
            ("ELASTICSEARCH_INDEX", "legacy"),
            ("OPENSEARCH_INDEX", "alb"),
            ("ELASTICSEARCH_USERNAME", "elastic"),
        ])
        .unwrap();

        assert_eq!(
            config.sinks,
            vec![
                SinkConfig::CloudWatch(CloudWatchConfig {
                    log_group: "/lb/access".to_string(),
                    log_stream: "alb".to_string(),
                }),
                SinkConfig::Firehose(FirehoseConfig {
                    stream_name: "lb-logs".to_string(),
                }),
                SinkConfig::Splunk(SplunkConfig {
                    endpoint: "https://splunk:8088/services/collector".to_string(),
                    token: "token".to_string(),
                    index: "main".to_string(),
                    skip_verify: true,
                    ..Default::default()
                }),
                SinkConfig::OpenSearch(OpenSearchConfig {
                    endpoint: "https://es:9200".to_string(),
                    index: "alb".to_string(),
                    username: "elastic".to_string(),
                    password: String::new(),
                    skip_verify: false,
                }),
            ]
        );
    }

    #[test]
    fn test_invalid_values_abort() {
        assert!(matches!(
            from_vars(&[("DESTINATIONS", "stdout"), ("LB_TYPE", "clb")]),
            Err(ConfigError::UnknownLbType(_))
        ));
        assert!(matches!(
            from_vars(&[("DESTINATIONS", "stdout"), ("FIELDS", "time,bogus")]),
            Err(ConfigError::UnknownField { .. })
        ));
        assert!(matches!(
            from_vars(&[("DESTINATIONS", "stdout"), ("BUFFER_SIZE", "lots")]),
            Err(ConfigError::InvalidNumber { key: "BUFFER_SIZE", .. })
        ));
        assert!(from_vars(&[("DESTINATIONS", "stdout"), ("BUFFER_SIZE", "0")]).is_err());
        assert!(from_vars(&[("DESTINATIONS", "stdout"), ("MAX_CONCURRENCY", "0")]).is_err());
        assert!(from_vars(&[("DESTINATIONS", "stdout"), ("LOG_LEVEL", "verbose")]).is_err());
    }

    #[test]
    fn test_valid_log_levels() {
        for level in VALID_LOG_LEVELS {
            let config = Config {
                log_level: level.to_string(),
                sinks: vec![SinkConfig::Stdout],
                ..Default::default()
            };
            assert!(
                config.validate().is_ok(),
                "Log level '{}' should be valid",
                level
            );
        }
    }

    #[test]
    fn test_nlb_fields() {
        let config = from_vars(&[
            ("DESTINATIONS", "stdout"),
            ("LB_TYPE", "NLB"),
            ("FIELDS", "time,client_ip"),
            ("LOG_LEVEL", "DEBUG"),
        ])
        .unwrap();
        assert_eq!(config.lb_type, LbType::Nlb);
        assert_eq!(config.log_level, "debug");
        let filter = config.field_filter().unwrap();
        let record: Vec<String> = LbType::Nlb.fields().iter().map(|f| f.to_string()).collect();
        let keys: Vec<String> = filter.apply(&record).into_keys().collect();
        assert_eq!(keys, vec!["client_ip", "time"]);
    }

    #[test]
    #[serial]
    fn test_from_env() {
        env::set_var("DESTINATIONS", "stdout");
        env::set_var("MAX_CONCURRENCY", "3");
        env::set_var("AWS_ENDPOINT_URL", "http://localhost:4566");

        let config = Config::from_env().unwrap();
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.aws_endpoint.as_deref(), Some("http://localhost:4566"));

        env::remove_var("DESTINATIONS");
        env::remove_var("MAX_CONCURRENCY");
        env::remove_var("AWS_ENDPOINT_URL");
    }
}
