// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod runtime;

use std::env;
use std::process::ExitCode;

use clap::Parser;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use lb_log_forwarder::{
    config::Config,
    dispatcher::{DispatchSummary, Dispatcher},
    errors::DispatchError,
    event::S3Event,
};
use runtime::{Invocation, RuntimeClient};

const RUNTIME_API_VAR: &str = "AWS_LAMBDA_RUNTIME_API";

#[derive(Parser, Debug)]
#[command(
    name = "lb-log-forwarder",
    version,
    about = "Forward load balancer access logs from S3 to log destinations"
)]
struct Cli {
    /// Objects to process, as s3://bucket/prefix
    url: String,
}

#[tokio::main]
pub async fn main() -> ExitCode {
    let runtime_api = env::var(RUNTIME_API_VAR).ok().filter(|api| !api.is_empty());
    // Parse arguments before logging so --help stays clean.
    let cli = match runtime_api {
        Some(_) => None,
        None => Some(Cli::parse()),
    };

    init_logging();

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown(cancel.clone()));

    match (runtime_api, cli) {
        (Some(api), _) => run_function(&api, &cancel).await,
        (None, Some(cli)) => run_once(&cli.url, &cancel).await,
        (None, None) => ExitCode::FAILURE,
    }
}

fn init_logging() {
    let log_level = env::var("LOG_LEVEL")
        .map(|val| val.trim().to_lowercase())
        .ok()
        .filter(|val| !val.is_empty())
        .unwrap_or_else(|| "info".to_string());

    let env_filter = format!(
        "h2=off,hyper=off,rustls=off,aws_config=off,aws_smithy_runtime=off,{log_level}"
    );
    let filter = EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
    }

    debug!("Logging subsystem enabled");
}

async fn cancel_on_shutdown(cancel: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {e}");
                return;
            }
        },
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
    cancel.cancel();
}

async fn dispatcher() -> Result<Dispatcher, String> {
    let config = Config::from_env().map_err(|e| e.to_string())?;
    debug!(
        lb_type = %config.lb_type,
        sinks = config.sinks.len(),
        buffer_size = config.buffer_size,
        max_concurrency = config.max_concurrency,
        "Loaded configuration"
    );
    Dispatcher::from_config(&config)
        .await
        .map_err(|e| e.to_string())
}

/// Prefix mode: process one `s3://bucket/prefix` and exit.
async fn run_once(url: &str, cancel: &CancellationToken) -> ExitCode {
    let dispatcher = match dispatcher().await {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            error!("Error creating configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match dispatcher.dispatch_url(url, cancel).await {
        Ok(summary) => {
            info!(
                "Finished {url}: {} objects, {} entries",
                summary.objects, summary.entries
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to process {url}: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Event mode: serve S3 notifications from the Lambda runtime API until shut down.
async fn run_function(api: &str, cancel: &CancellationToken) -> ExitCode {
    let runtime = RuntimeClient::new(api);
    let dispatcher = match dispatcher().await {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            error!("Error creating configuration: {e}");
            if let Err(report) = runtime.report_init_error("Runtime.InitError", &e).await {
                error!("Failed to report init error: {report}");
            }
            return ExitCode::FAILURE;
        }
    };
    info!("Waiting for S3 events");

    loop {
        let invocation = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ExitCode::SUCCESS,
            next = runtime.next_invocation() => next,
        };
        let Invocation {
            request_id,
            payload,
        } = match invocation {
            Ok(invocation) => invocation,
            Err(e) => {
                error!("Failed to fetch next invocation: {e}");
                return ExitCode::FAILURE;
            }
        };

        let reported = match handle_event(&dispatcher, &payload, cancel).await {
            Ok(summary) => {
                let response = json!({
                    "objects": summary.objects,
                    "entries": summary.entries,
                });
                runtime.respond(&request_id, &response).await
            }
            Err((error_type, message)) => {
                error!("Invocation {request_id} failed: {message}");
                runtime
                    .report_error(&request_id, error_type, &message)
                    .await
            }
        };
        if let Err(e) = reported {
            error!("Failed to report result of invocation {request_id}: {e}");
        }
    }
}

async fn handle_event(
    dispatcher: &Dispatcher,
    payload: &[u8],
    cancel: &CancellationToken,
) -> Result<DispatchSummary, (&'static str, String)> {
    let event: S3Event = serde_json::from_slice(payload)
        .map_err(|e| ("InvalidEvent", format!("decode S3 event: {e}")))?;
    let objects = event.objects();
    info!("Received event with {} objects", objects.len());

    dispatcher
        .dispatch_objects(objects, cancel)
        .await
        .map_err(|e| {
            let error_type = match e {
                DispatchError::BadUrl { .. } => "BadUrl",
                DispatchError::List(_) => "ListFailed",
                DispatchError::ObjectsFailed { .. } => "ObjectsFailed",
            };
            (error_type, e.to_string())
        })
}
