// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use nf_sync_core::{CountingTelemetry, Orchestrator, SyncConfig};

#[tokio::main]
pub async fn main() -> ExitCode {
    // Loaded before logging exists, so failures go to stderr.
    let config = match SyncConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error reading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let filter = match EnvFilter::try_new(log_filter(&config.log_level)) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("could not parse log level in configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }
    debug!("Logging subsystem enabled");

    info!(
        registry = %config.registry_uri,
        register_ipv4 = %config.register_ipv4,
        binding_ipv4 = %config.binding_ipv4,
        sbi_port = config.sbi_port,
        mode = ?config.mode,
        "starting NF synchronization agent"
    );

    let telemetry = CountingTelemetry::default();
    let handle = match Orchestrator::new(config.registration_settings(), config.sync_mode())
        .with_telemetry(Arc::new(telemetry.clone()))
        .start()
    {
        Ok(handle) => handle,
        Err(e) => {
            error!("Error starting synchronization: {e}");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = handle.cancellation_token();
    tokio::select! {
        _ = wait_for_signal() => info!("Received shutdown signal"),
        _ = shutdown.cancelled() => {}
    }

    handle.shutdown().await;
    info!("Telemetry: {}", telemetry.counters().snapshot());
    ExitCode::SUCCESS
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!("Failed to listen for SIGTERM: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {e}");
    }
}

/// Filter directives for `level`, with the transport crates silenced.
fn log_filter(level: &str) -> String {
    format!("h2=off,hyper=off,rustls=off,tower=off,{level}")
}
