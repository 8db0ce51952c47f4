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

use anyhow::{bail, Context, Result};
use clap::Args;
use phase_telemetry::config::{split_fields, DEFAULT_COMMAND_GRACE_MS};
use phase_telemetry::{CommandLine, PhaseName, PhaseSpec, TelemetryConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default)]
    pub(crate) telemetry: TelemetryConfig,
    #[serde(default = "default_command_grace_ms")]
    pub(crate) command_grace_ms: u64,
    pub(crate) phases: Vec<PhaseConfig>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct PhaseConfig {
    pub(crate) name: PhaseName,
    /// `[program, args...]`
    pub(crate) command: Vec<String>,
}

fn default_command_grace_ms() -> u64 {
    DEFAULT_COMMAND_GRACE_MS
}

impl PipelineConfig {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read pipeline file {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("unable to parse pipeline file {}", path.display()))
    }

    pub(crate) fn parse(contents: &str) -> Result<Self> {
        let config: Self = json5::from_str(contents)?;
        if config.phases.is_empty() {
            bail!("pipeline declares no phases");
        }
        Ok(config)
    }

    pub(crate) fn command_grace(&self) -> Duration {
        Duration::from_millis(self.command_grace_ms)
    }

    pub(crate) fn phase_specs(&self) -> Result<Vec<PhaseSpec>> {
        self.phases
            .iter()
            .map(|phase| {
                let command = CommandLine::from_argv(&phase.command)
                    .with_context(|| format!("phase '{}' has an empty command", phase.name))?;
                Ok(PhaseSpec::new(phase.name.clone(), command))
            })
            .collect()
    }
}

/// Command-line overrides shared by `run` and `exec`.
#[derive(Args, Debug, Clone, Default)]
pub struct TelemetryOverrides {
    /// Directory receiving the telemetry bundles.
    #[arg(long, value_name = "DIR")]
    pub(crate) artifacts_root: Option<PathBuf>,

    /// Sampling interval in milliseconds.
    #[arg(long, value_name = "MS")]
    pub(crate) interval_ms: Option<u64>,

    /// Hardware query tool, as a name on PATH or an explicit path.
    #[arg(long, value_name = "PATH")]
    pub(crate) tool: Option<String>,

    /// Comma separated list of fields to sample.
    #[arg(long, value_name = "LIST")]
    pub(crate) fields: Option<String>,
}

/// Layers environment and command-line overrides on top of `base`
/// (command line wins), then validates the result.
pub(crate) fn resolve_telemetry<F>(
    mut base: TelemetryConfig,
    env: F,
    overrides: &TelemetryOverrides,
) -> Result<TelemetryConfig>
where
    F: Fn(&str) -> Option<String>,
{
    base.apply_overrides_from(env)?;

    if let Some(root) = &overrides.artifacts_root {
        base.artifacts_root = root.clone();
    }
    if let Some(interval_ms) = overrides.interval_ms {
        base.interval_ms = interval_ms;
    }
    if let Some(tool) = &overrides.tool {
        base.tool = tool.clone();
    }
    if let Some(fields) = &overrides.fields {
        base.fields = split_fields(fields);
    }

    base.validate()?;
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use phase_telemetry::config::{DEFAULT_INTERVAL_MS, ENV_INTERVAL_MS, ENV_TOOL};
    use std::collections::HashMap;

    const SAMPLE_PIPELINE: &str = include_str!("../PIPELINE.json5");

    #[test]
    fn sample_pipeline_parses() {
        let config = PipelineConfig::parse(SAMPLE_PIPELINE).expect("sample pipeline");
        let specs = config.phase_specs().expect("phase specs");

        assert!(specs.len() >= 4);
        assert_eq!(specs[0].name.as_str(), "tokenizer");
        assert_eq!(config.command_grace(), Duration::from_secs(30));
    }

    #[test]
    fn defaults_apply_when_sections_are_missing() {
        let config = PipelineConfig::parse(
            r#"{
                // only the mandatory part
                phases: [{ name: "sft", command: ["python", "-m", "scripts.chat_sft"] }],
            }"#,
        )
        .expect("minimal pipeline");

        assert_eq!(config.command_grace_ms, DEFAULT_COMMAND_GRACE_MS);
        assert_eq!(config.telemetry.interval_ms, DEFAULT_INTERVAL_MS);
        let specs = config.phase_specs().unwrap();
        assert_eq!(specs[0].command.program, "python");
        assert_eq!(specs[0].command.args, ["-m", "scripts.chat_sft"]);
    }

    #[test]
    fn unknown_fields_and_bad_names_are_rejected() {
        assert!(PipelineConfig::parse(r#"{ phases: [], extra: 1 }"#).is_err());
        assert!(PipelineConfig::parse(r#"{ phases: [] }"#).is_err());
        assert!(PipelineConfig::parse(
            r#"{ phases: [{ name: "../escape", command: ["true"] }] }"#
        )
        .is_err());
        assert!(PipelineConfig::parse(
            r#"{ telemetry: { interval: 5 }, phases: [{ name: "a", command: ["true"] }] }"#
        )
        .is_err());
    }

    #[test]
    fn empty_command_is_reported_with_phase_name() {
        let config =
            PipelineConfig::parse(r#"{ phases: [{ name: "eval", command: [] }] }"#).unwrap();
        let error = config.phase_specs().expect_err("empty command");
        assert!(error.to_string().contains("eval"));
    }

    #[test]
    fn command_line_beats_environment_beats_file() {
        let file = TelemetryConfig {
            interval_ms: 250,
            tool: "/opt/file/nvidia-smi".to_string(),
            ..TelemetryConfig::default()
        };
        let env: HashMap<&str, &str> =
            HashMap::from([(ENV_INTERVAL_MS, "500"), (ENV_TOOL, "/opt/env/nvidia-smi")]);
        let overrides = TelemetryOverrides {
            interval_ms: Some(2000),
            fields: Some("timestamp, power.draw".to_string()),
            ..TelemetryOverrides::default()
        };

        let resolved = resolve_telemetry(
            file,
            move |key: &str| env.get(key).map(|value| value.to_string()),
            &overrides,
        )
        .expect("resolved");

        assert_eq!(resolved.interval_ms, 2000);
        assert_eq!(resolved.tool, "/opt/env/nvidia-smi");
        assert_eq!(resolved.fields, ["timestamp", "power.draw"]);
    }

    #[test]
    fn invalid_override_fails_validation() {
        let overrides = TelemetryOverrides {
            interval_ms: Some(0),
            ..TelemetryOverrides::default()
        };
        assert!(resolve_telemetry(TelemetryConfig::default(), |_: &str| None, &overrides).is_err());
    }
}
