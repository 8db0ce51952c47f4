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

//! Telemetry configuration surface and its environment overrides.

use crate::error::{Result, TelemetryError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_TOOL: &str = "nvidia-smi";
pub const DEFAULT_SIGINT_GRACE_MS: u64 = 2000;
pub const DEFAULT_SIGTERM_GRACE_MS: u64 = 2000;
pub const DEFAULT_COMMAND_GRACE_MS: u64 = 10_000;

pub const DEFAULT_FIELDS: &[&str] = &[
    "timestamp",
    "index",
    "utilization.gpu",
    "utilization.memory",
    "power.draw",
    "clocks.current.sm",
    "clocks.current.memory",
    "temperature.gpu",
    "memory.used",
    "memory.total",
];

pub const ENV_BASE_DIR: &str = "PHASE_TELEMETRY_BASE_DIR";
pub const ENV_ARTIFACTS_DIR: &str = "PHASE_TELEMETRY_DIR";
pub const ENV_INTERVAL_MS: &str = "PHASE_TELEMETRY_INTERVAL_MS";
pub const ENV_FIELDS: &str = "PHASE_TELEMETRY_FIELDS";
pub const ENV_TOOL: &str = "PHASE_TELEMETRY_TOOL";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    #[serde(default = "default_artifacts_root")]
    pub artifacts_root: PathBuf,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_fields")]
    pub fields: Vec<String>,
    #[serde(default = "default_tool")]
    pub tool: String,
    #[serde(default = "default_sigint_grace_ms")]
    pub sigint_grace_ms: u64,
    #[serde(default = "default_sigterm_grace_ms")]
    pub sigterm_grace_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            artifacts_root: default_artifacts_root(),
            interval_ms: DEFAULT_INTERVAL_MS,
            fields: default_fields(),
            tool: default_tool(),
            sigint_grace_ms: DEFAULT_SIGINT_GRACE_MS,
            sigterm_grace_ms: DEFAULT_SIGTERM_GRACE_MS,
        }
    }
}

impl TelemetryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn sigint_grace(&self) -> Duration {
        Duration::from_millis(self.sigint_grace_ms)
    }

    pub fn sigterm_grace(&self) -> Duration {
        Duration::from_millis(self.sigterm_grace_ms)
    }

    /// Applies `PHASE_TELEMETRY_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary lookup. Blank values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(dir) = lookup(ENV_ARTIFACTS_DIR) {
            self.artifacts_root = PathBuf::from(dir);
        }
        if let Some(interval) = lookup(ENV_INTERVAL_MS) {
            self.interval_ms = interval.parse().map_err(|_| {
                TelemetryError::Config(format!(
                    "{ENV_INTERVAL_MS} must be a whole number of milliseconds, got '{interval}'"
                ))
            })?;
        }
        if let Some(fields) = lookup(ENV_FIELDS) {
            self.fields = split_fields(&fields);
        }
        if let Some(tool) = lookup(ENV_TOOL) {
            self.tool = tool;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(TelemetryError::Config(
                "sampling interval must be greater than zero".to_string(),
            ));
        }
        if self.fields.is_empty() {
            return Err(TelemetryError::Config(
                "field list must not be empty".to_string(),
            ));
        }
        if self.tool.trim().is_empty() {
            return Err(TelemetryError::Config(
                "hardware query tool must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn split_fields(fields: &str) -> Vec<String> {
    fields
        .split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_artifacts_root() -> PathBuf {
    resolve_default_artifacts_root(|key| std::env::var(key).ok())
}

/// `$PHASE_TELEMETRY_BASE_DIR/metrics`, else `$HOME/.cache/phase-telemetry/metrics`,
/// else `./metrics`.
pub fn resolve_default_artifacts_root<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    let non_blank = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(base) = non_blank(ENV_BASE_DIR) {
        return PathBuf::from(base).join("metrics");
    }
    if let Some(home) = non_blank("HOME") {
        return PathBuf::from(home)
            .join(".cache")
            .join("phase-telemetry")
            .join("metrics");
    }
    PathBuf::from("metrics")
}

fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL_MS
}

fn default_fields() -> Vec<String> {
    DEFAULT_FIELDS.iter().map(|field| field.to_string()).collect()
}

fn default_tool() -> String {
    DEFAULT_TOOL.to_string()
}

fn default_sigint_grace_ms() -> u64 {
    DEFAULT_SIGINT_GRACE_MS
}

fn default_sigterm_grace_ms() -> u64 {
    DEFAULT_SIGTERM_GRACE_MS
}
