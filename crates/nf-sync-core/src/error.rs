// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::nrf::RegistryError;
use crate::poller::PollError;
use crate::stream::StreamError;

/// Errors that can occur when configuring or starting the synchronization tasks
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to build registry client: {0}")]
    Registry(#[from] RegistryError),

    #[error("Failed to build configuration poller: {0}")]
    Poller(#[from] PollError),

    #[error("Failed to build configuration stream: {0}")]
    Stream(#[from] StreamError),
}
