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

mod config;

use crate::config::{resolve_telemetry, PipelineConfig, TelemetryOverrides};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use phase_telemetry::config::DEFAULT_COMMAND_GRACE_MS;
use phase_telemetry::report::{build_index, write_index, write_run_summary, RunSummary};
use phase_telemetry::{
    ArtifactStore, CommandLine, ExecutorOptions, PhaseExecutor, PhaseName, PhaseSpec,
    SignalGuard, TelemetryConfig, TelemetrySupervisor,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit status for failures before or outside the pipeline itself.
const SETUP_FAILURE_EXIT_CODE: u8 = 2;

#[derive(Parser)]
#[command(version, about = "Runs pipeline phases with per-phase GPU telemetry")]
struct RunnerArgs {
    #[command(subcommand)]
    command: RunnerCommand,
}

#[derive(Subcommand)]
enum RunnerCommand {
    /// Run every phase of a json5 pipeline file in order.
    Run {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
        #[command(flatten)]
        overrides: TelemetryOverrides,
    },
    /// Run a single command as a one-phase pipeline.
    Exec {
        #[arg(long, value_name = "NAME")]
        phase: PhaseName,
        /// Time the command gets to exit after a forwarded signal.
        #[arg(long, value_name = "MS", default_value_t = DEFAULT_COMMAND_GRACE_MS)]
        command_grace_ms: u64,
        #[command(flatten)]
        overrides: TelemetryOverrides,
        #[arg(last = true, required = true, value_name = "COMMAND")]
        command: Vec<String>,
    },
    /// Write index.json for everything under the artifact root.
    Index {
        #[arg(long, value_name = "DIR")]
        artifacts_root: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_tracing();

    let args = RunnerArgs::parse();
    match dispatch(args.command).await {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(error) => {
            error!("{error:#}");
            ExitCode::from(SETUP_FAILURE_EXIT_CODE)
        }
    }
}

// Logs go to stderr; the wrapped commands own stdout.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn dispatch(command: RunnerCommand) -> Result<i32> {
    match command {
        RunnerCommand::Run { config, overrides } => {
            let pipeline = PipelineConfig::load(&config)?;
            let telemetry = resolve_telemetry(
                pipeline.telemetry.clone(),
                |key| std::env::var(key).ok(),
                &overrides,
            )?;
            info!(
                pipeline = %config.display(),
                phases = pipeline.phases.len(),
                "Started phase-runner"
            );
            run_pipeline(pipeline.phase_specs()?, telemetry, pipeline.command_grace()).await
        }
        RunnerCommand::Exec {
            phase,
            command_grace_ms,
            overrides,
            command,
        } => {
            let telemetry = resolve_telemetry(
                TelemetryConfig::default(),
                |key| std::env::var(key).ok(),
                &overrides,
            )?;
            let command = CommandLine::from_argv(&command).context("no command given")?;
            run_pipeline(
                vec![PhaseSpec::new(phase, command)],
                telemetry,
                Duration::from_millis(command_grace_ms),
            )
            .await
        }
        RunnerCommand::Index { artifacts_root } => {
            let overrides = TelemetryOverrides {
                artifacts_root,
                ..TelemetryOverrides::default()
            };
            let telemetry = resolve_telemetry(
                TelemetryConfig::default(),
                |key| std::env::var(key).ok(),
                &overrides,
            )?;
            let store = ArtifactStore::new(telemetry.artifacts_root);
            let index = build_index(&store).context("unable to build artifact index")?;
            let path = write_index(&index, &store).context("unable to write artifact index")?;
            info!(bundles = index.bundles.len(), "artifact index written");
            println!("{}", path.display());
            Ok(0)
        }
    }
}

async fn run_pipeline(
    phases: Vec<PhaseSpec>,
    telemetry: TelemetryConfig,
    command_grace: Duration,
) -> Result<i32> {
    let supervisor =
        TelemetrySupervisor::from_config(telemetry).context("invalid telemetry configuration")?;
    let store = supervisor.store().clone();
    let guard = SignalGuard::install().context("unable to install signal handlers")?;
    let mut executor = PhaseExecutor::new(supervisor, guard, ExecutorOptions { command_grace });

    let result = executor.run(phases).await;
    executor.shutdown().await;
    let mut result = result.context("pipeline could not start")?;
    executor.absorb_late_signal(&mut result.outcome).await;

    let summary = RunSummary::from_result(&result, store.root());
    match write_run_summary(&summary, &store, result.started_at) {
        Ok((json, _)) => info!(path = %json.display(), "run summary written"),
        Err(error) => warn!("unable to write run summary: {error}"),
    }

    // A request that arrived while the summary was written still decides the status.
    executor.absorb_late_signal(&mut result.outcome).await;
    Ok(result.outcome.exit_code())
}
