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

//! Phase Executor: runs phases strictly in order, each inside its own
//! telemetry window.
//!
//! ```text
//! Pending -> Running(0) -> Running(1) -> ... -> Completed
//!                 |             |
//!                 +-> Aborted   +-> Interrupted
//! ```
//!
//! `start` for phase N returns before phase N's command is spawned, and `stop`
//! for phase N runs only after that command has returned, whatever the outcome.
//! A termination request that lands after the last command returned still
//! ends the run as `Interrupted`.

use crate::config::DEFAULT_COMMAND_GRACE_MS;
use crate::error::Result;
use crate::guard::{SignalGuard, TerminationSignal};
use crate::metadata::EndReason;
use crate::observability as events;
use crate::phase::{CommandLine, Phase, PhaseName, PhaseSpec};
use crate::supervisor::{PhaseTelemetry, StopReport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io;
use std::process::ExitStatus;
use std::time::{Duration, Instant};

/// Exit status when telemetry could not be opened for a phase mid-run.
pub const TELEMETRY_FAILURE_EXIT_CODE: i32 = 2;
use tokio::process::{Child, Command};
use tracing::{error, info, warn};

#[derive(Clone, Debug)]
pub struct ExecutorOptions {
    /// How long an interrupted command may take to exit before it is killed.
    pub command_grace: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            command_grace: Duration::from_millis(DEFAULT_COMMAND_GRACE_MS),
        }
    }
}

/// How a phase's primary command ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CommandStatus {
    Exited { code: i32 },
    Signaled { signal: i32 },
    SpawnFailed { reason: String },
    WaitFailed { reason: String },
}

impl CommandStatus {
    fn from_exit_status(status: ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match (status.code(), status.signal()) {
            (Some(code), _) => Self::Exited { code },
            (None, Some(signal)) => Self::Signaled { signal },
            (None, None) => Self::WaitFailed {
                reason: format!("unrecognized exit status {status}"),
            },
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, Self::Exited { code: 0 })
    }

    /// Status the orchestrator should exit with when this command aborts the pipeline.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Exited { code } if (1..=255).contains(code) => *code,
            Self::Exited { .. } => 1,
            Self::Signaled { signal } => 128 + signal,
            Self::SpawnFailed { .. } => 127,
            Self::WaitFailed { .. } => 1,
        }
    }
}

/// Run-log entry for one executed phase.
#[derive(Clone, Debug, Serialize)]
pub struct PhaseRecord {
    pub phase: PhaseName,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u128,
    pub status: CommandStatus,
    pub interrupted_by: Option<TerminationSignal>,
    pub telemetry: Option<StopReport>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum PipelineOutcome {
    Completed,
    /// A primary command failed; remaining phases were not run.
    Aborted {
        phase: PhaseName,
        status: CommandStatus,
    },
    /// An external signal ended the run. `phase` is `None` when it arrived
    /// between phases or after the last one.
    Interrupted {
        phase: Option<PhaseName>,
        signal: TerminationSignal,
    },
    /// Telemetry could not be opened for `phase`, so its command never ran.
    TelemetryFailed { phase: PhaseName, reason: String },
}

impl PipelineOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::Aborted { status, .. } => status.exit_code(),
            Self::Interrupted { signal, .. } => signal.exit_code(),
            Self::TelemetryFailed { .. } => TELEMETRY_FAILURE_EXIT_CODE,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PipelineResult {
    pub outcome: PipelineOutcome,
    pub phases: Vec<PhaseRecord>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Pending { total: usize },
    Running { index: usize, phase: PhaseName },
    Aborted { phase: PhaseName },
    Interrupted { signal: TerminationSignal },
    Completed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Aborted { .. } | Self::Interrupted { .. } | Self::Completed
        )
    }
}

/// An open telemetry window. Closed explicitly on the normal path; if dropped
/// while still open (panic, cancelled future) it stops the sampler blocking.
pub struct TelemetryScope<'a, T: PhaseTelemetry> {
    telemetry: Option<&'a mut T>,
}

impl<'a, T: PhaseTelemetry> TelemetryScope<'a, T> {
    pub async fn open(telemetry: &'a mut T, phase: &PhaseName) -> Result<Self> {
        telemetry.start(phase).await?;
        Ok(Self {
            telemetry: Some(telemetry),
        })
    }

    pub async fn close(mut self, reason: EndReason) -> Option<StopReport> {
        let telemetry = self.telemetry.take()?;
        telemetry.stop_with(reason).await
    }
}

impl<T: PhaseTelemetry> Drop for TelemetryScope<'_, T> {
    fn drop(&mut self) {
        if let Some(telemetry) = self.telemetry.take() {
            warn!(
                event = events::TELEMETRY_TEARDOWN,
                "telemetry scope dropped while open, stopping sampler"
            );
            telemetry.stop_blocking(EndReason::Cancelled);
        }
    }
}

pub struct PhaseExecutor<T: PhaseTelemetry> {
    telemetry: T,
    guard: SignalGuard,
    options: ExecutorOptions,
    state: PipelineState,
}

impl<T: PhaseTelemetry> PhaseExecutor<T> {
    pub fn new(telemetry: T, guard: SignalGuard, options: ExecutorOptions) -> Self {
        Self {
            telemetry,
            guard,
            options,
            state: PipelineState::Pending { total: 0 },
        }
    }

    pub fn telemetry(&self) -> &T {
        &self.telemetry
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Runs `phases` in order. Only preflight failures (e.g. the hardware
    /// query tool is missing) are returned as errors; everything that happens
    /// once the first phase is underway is reported through [`PipelineOutcome`]
    /// together with the records of the phases that ran.
    pub async fn run(&mut self, phases: Vec<PhaseSpec>) -> Result<PipelineResult> {
        self.telemetry.preflight()?;

        let started_at = Utc::now();
        self.transition(PipelineState::Pending {
            total: phases.len(),
        });

        let mut records = Vec::with_capacity(phases.len());
        let mut outcome = PipelineOutcome::Completed;

        for (index, spec) in phases.into_iter().enumerate() {
            if let Some(signal) = self.guard.pending() {
                outcome = PipelineOutcome::Interrupted {
                    phase: None,
                    signal,
                };
                break;
            }

            let phase = Phase::begin(spec);
            self.transition(PipelineState::Running {
                index,
                phase: phase.name().clone(),
            });
            let record = match self.run_phase(&phase).await {
                Ok(record) => record,
                Err(error) => {
                    outcome = PipelineOutcome::TelemetryFailed {
                        phase: phase.name().clone(),
                        reason: error.to_string(),
                    };
                    break;
                }
            };

            let stop_after = if let Some(signal) = record.interrupted_by {
                Some(PipelineOutcome::Interrupted {
                    phase: Some(record.phase.clone()),
                    signal,
                })
            } else if !record.status.success() {
                Some(PipelineOutcome::Aborted {
                    phase: record.phase.clone(),
                    status: record.status.clone(),
                })
            } else {
                None
            };
            records.push(record);

            if let Some(stop_after) = stop_after {
                outcome = stop_after;
                break;
            }
        }

        self.absorb_late_signal(&mut outcome).await;

        match &outcome {
            PipelineOutcome::Completed => {
                info!(event = events::PIPELINE_COMPLETED, phases = records.len(), "pipeline completed");
                self.transition(PipelineState::Completed);
            }
            PipelineOutcome::Aborted { phase, status } => {
                error!(event = events::PIPELINE_ABORTED, phase = %phase, status = ?status, "pipeline aborted");
                self.transition(PipelineState::Aborted {
                    phase: phase.clone(),
                });
            }
            PipelineOutcome::Interrupted { phase, signal } => {
                warn!(
                    event = events::PIPELINE_INTERRUPTED,
                    phase = phase.as_ref().map(PhaseName::as_str).unwrap_or("<between phases>"),
                    signal = %signal,
                    "pipeline interrupted"
                );
                self.transition(PipelineState::Interrupted { signal: *signal });
            }
            PipelineOutcome::TelemetryFailed { phase, reason } => {
                error!(event = events::PIPELINE_ABORTED, phase = %phase, reason = %reason, "unable to open telemetry, pipeline aborted");
                self.transition(PipelineState::Aborted {
                    phase: phase.clone(),
                });
            }
        }

        Ok(PipelineResult {
            outcome,
            phases: records,
            started_at,
            ended_at: Utc::now(),
        })
    }

    /// Stops a sampler that is still live, e.g. before the process exits.
    pub async fn shutdown(&mut self) -> Option<StopReport> {
        self.telemetry.active_handle()?;
        self.telemetry.stop_with(EndReason::OrchestratorExit).await
    }

    /// Turns a termination request that is still queued into an
    /// `Interrupted` outcome. An outcome that is already `Interrupted` keeps
    /// its original signal.
    pub async fn absorb_late_signal(
        &mut self,
        outcome: &mut PipelineOutcome,
    ) -> Option<TerminationSignal> {
        if matches!(outcome, PipelineOutcome::Interrupted { .. }) {
            return None;
        }
        let signal = self.guard.settle().await?;
        warn!(
            event = events::GUARD_SIGNAL,
            signal = %signal,
            replaced = ?outcome,
            "termination requested after the last command returned"
        );
        *outcome = PipelineOutcome::Interrupted {
            phase: None,
            signal,
        };
        self.state = PipelineState::Interrupted { signal };
        Some(signal)
    }

    async fn run_phase(&mut self, phase: &Phase) -> Result<PhaseRecord> {
        let Self {
            telemetry,
            guard,
            options,
            ..
        } = self;

        info!(
            event = events::PHASE_BEGIN,
            phase = %phase.name(),
            command = %phase.command().render(),
            "phase starting"
        );
        let clock = Instant::now();

        let scope = TelemetryScope::open(telemetry, phase.name()).await?;
        let run = run_primary(phase.command(), guard, options.command_grace).await;
        let reason = match run.interrupted_by {
            Some(_) => EndReason::Interrupted,
            None => EndReason::PhaseFinished,
        };
        let stop = scope.close(reason).await;

        info!(
            event = events::PHASE_END,
            phase = %phase.name(),
            status = ?run.status,
            duration_ms = clock.elapsed().as_millis() as u64,
            "phase finished"
        );

        Ok(PhaseRecord {
            phase: phase.name().clone(),
            command: phase.command().render(),
            started_at: phase.started_at(),
            ended_at: Utc::now(),
            duration_ms: clock.elapsed().as_millis(),
            status: run.status,
            interrupted_by: run.interrupted_by,
            telemetry: stop,
        })
    }

    fn transition(&mut self, next: PipelineState) {
        info!(event = events::PIPELINE_STATE, from = ?self.state, to = ?next, "pipeline state change");
        self.state = next;
    }
}

struct PrimaryRun {
    status: CommandStatus,
    interrupted_by: Option<TerminationSignal>,
}

enum Waited {
    Exited(io::Result<ExitStatus>),
    Signalled(TerminationSignal),
}

/// Runs the command with inherited stdio. A termination request is forwarded
/// to the command, which then gets `grace` to exit before it is killed.
async fn run_primary(command: &CommandLine, guard: &mut SignalGuard, grace: Duration) -> PrimaryRun {
    let mut child = match Command::new(&command.program)
        .args(&command.args)
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(error) => {
            error!(program = %command.program, "unable to spawn command: {error}");
            return PrimaryRun {
                status: CommandStatus::SpawnFailed {
                    reason: error.to_string(),
                },
                interrupted_by: None,
            };
        }
    };

    let waited = tokio::select! {
        status = child.wait() => Waited::Exited(status),
        signal = guard.recv() => Waited::Signalled(signal),
    };

    match waited {
        Waited::Exited(status) => PrimaryRun {
            status: command_status(status),
            interrupted_by: None,
        },
        Waited::Signalled(signal) => {
            forward_signal(&child, signal);
            let status = match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    warn!(program = %command.program, "command outlived its grace window, killing");
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            PrimaryRun {
                status: command_status(status),
                interrupted_by: Some(signal),
            }
        }
    }
}

fn command_status(status: io::Result<ExitStatus>) -> CommandStatus {
    match status {
        Ok(status) => CommandStatus::from_exit_status(status),
        Err(error) => CommandStatus::WaitFailed {
            reason: error.to_string(),
        },
    }
}

fn forward_signal(child: &Child, signal: TerminationSignal) {
    let Some(pid) = child.id() else {
        return;
    };
    let rc = unsafe { libc::kill(pid as i32, signal.signo()) };
    if rc != 0 {
        let error = io::Error::last_os_error();
        if error.raw_os_error() != Some(libc::ESRCH) {
            warn!(pid, signal = %signal, "unable to forward signal to command: {error}");
        }
    }
}
