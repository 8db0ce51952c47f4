/********************************************************************************
 * Copyright (c) 2026 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! Error taxonomy raised by the telemetry core.
//!
//! Only setup and invariant failures are raised. Sampler-side failures during a
//! phase are recorded as [`crate::TelemetryHealth::Degraded`] and command
//! outcomes travel in [`crate::PipelineOutcome`].

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The hardware query tool could not be located; the pipeline must not start.
    #[error("hardware query tool '{tool}' is unavailable: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    /// `start` was called while a sampler handle is still live.
    #[error("telemetry already active for phase '{active_phase}' (requested '{requested_phase}')")]
    AlreadyActive {
        active_phase: String,
        requested_phase: String,
    },

    #[error("invalid phase name '{name}': {reason}")]
    InvalidPhaseName { name: String, reason: &'static str },

    #[error("artifact already exists: {}", path.display())]
    ArtifactExists { path: PathBuf },

    #[error("unable to spawn sampler for phase '{phase}': {source}")]
    SamplerSpawn {
        phase: String,
        #[source]
        source: io::Error,
    },

    #[error("{context} ({}): {source}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {source}")]
    Json {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid telemetry configuration: {0}")]
    Config(String),
}

impl TelemetryError {
    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }

    /// True for failures that indicate a broken core invariant rather than an
    /// environment problem.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::AlreadyActive { .. })
    }
}

pub type Result<T, E = TelemetryError> = std::result::Result<T, E>;
