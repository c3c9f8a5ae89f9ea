// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Load balancer log schemas and the field include-mask.
//!
//! Each load balancer variant writes a fixed, ordered list of space-separated
//! fields. AWS appends new fields over time, so the parser accepts records that
//! are longer or shorter than the schema; the schema only names positions.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::errors::ConfigError;

/// Application Load Balancer fields, in log order.
///
/// The last three (`transformed_host`, `transformed_uri`,
/// `request_transform_status`) are absent from older logs.
pub const ALB_FIELDS: [&str; 33] = [
    "type",
    "time",
    "elb",
    "client:port",
    "target:port",
    "request_processing_time",
    "target_processing_time",
    "response_processing_time",
    "elb_status_code",
    "target_status_code",
    "received_bytes",
    "sent_bytes",
    "request",
    "user_agent",
    "ssl_cipher",
    "ssl_protocol",
    "target_group_arn",
    "trace_id",
    "domain_name",
    "chosen_cert_arn",
    "matched_rule_priority",
    "request_creation_time",
    "actions_executed",
    "redirect_url",
    "error_reason",
    "target:port_list",
    "target_status_code_list",
    "classification",
    "classification_reason",
    "conn_trace_id",
    "transformed_host",
    "transformed_uri",
    "request_transform_status",
];

/// Network Load Balancer (TLS listener) fields, in log order.
pub const NLB_FIELDS: [&str; 24] = [
    "type",
    "version",
    "time",
    "elb",
    "listener_id",
    "client_ip",
    "client_port",
    "target_ip",
    "target_port",
    "tcp_connection_time_ms",
    "tls_handshake_time_ms",
    "received_bytes",
    "sent_bytes",
    "incoming_tls_alert",
    "cert_arn",
    "certificate_serial",
    "tls_cipher_suite",
    "tls_protocol_version",
    "tls_named_group",
    "domain_name",
    "alpn_fe_protocol",
    "alpn_be_protocol",
    "alpn_client_preference_list",
    "tls_connection_creation_time",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LbType {
    #[default]
    Alb,
    Nlb,
}

impl LbType {
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            LbType::Alb => &ALB_FIELDS,
            LbType::Nlb => &NLB_FIELDS,
        }
    }

    /// Position of the `time` field.
    pub fn time_index(self) -> usize {
        match self {
            LbType::Alb => 1,
            LbType::Nlb => 2,
        }
    }
}

impl FromStr for LbType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "alb" => Ok(LbType::Alb),
            "nlb" => Ok(LbType::Nlb),
            _ => Err(ConfigError::UnknownLbType(s.to_string())),
        }
    }
}

impl fmt::Display for LbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LbType::Alb => write!(f, "alb"),
            LbType::Nlb => write!(f, "nlb"),
        }
    }
}

/// Selects which schema fields end up in a [`crate::entry::LogEntry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFilter {
    lb_type: LbType,
    included: Vec<bool>,
}

impl FieldFilter {
    /// Includes every field of the schema.
    pub fn all(lb_type: LbType) -> Self {
        Self {
            lb_type,
            included: vec![true; lb_type.fields().len()],
        }
    }

    /// Builds a filter from a comma-separated list of field names.
    ///
    /// An empty list keeps every field. Unknown names are rejected.
    pub fn new(lb_type: LbType, field_config: &str) -> Result<Self, ConfigError> {
        let names: Vec<&str> = field_config
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect();
        if names.is_empty() {
            return Ok(Self::all(lb_type));
        }

        let fields = lb_type.fields();
        let mut included = vec![false; fields.len()];
        for name in names {
            let Some(index) = fields.iter().position(|field| *field == name) else {
                return Err(ConfigError::UnknownField {
                    lb_type,
                    name: name.to_string(),
                });
            };
            included[index] = true;
        }

        Ok(Self { lb_type, included })
    }

    pub fn total_fields(&self) -> usize {
        self.included.len()
    }

    pub fn time_index(&self) -> usize {
        self.lb_type.time_index()
    }

    /// Field name at `index`, if the schema has one.
    pub fn name(&self, index: usize) -> Option<&'static str> {
        self.lb_type.fields().get(index).copied()
    }

    pub fn includes(&self, index: usize) -> bool {
        self.included.get(index).copied().unwrap_or(false)
    }

    /// Maps a split record onto the included schema names.
    ///
    /// Values past the end of the schema are ignored; schema fields past the
    /// end of the record are left out.
    pub fn apply(&self, record: &[String]) -> BTreeMap<String, String> {
        record
            .iter()
            .enumerate()
            .filter(|(index, _)| self.includes(*index))
            .filter_map(|(index, value)| {
                self.name(index)
                    .map(|name| (name.to_string(), value.clone()))
            })
            .collect()
    }
}
