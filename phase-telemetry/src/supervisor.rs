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

//! Telemetry Supervisor: a single-slot owner of the live sampler.
//!
//! `start` and `stop` are the only code paths that touch the slot. A `start`
//! while the slot is occupied is rejected with
//! [`TelemetryError::AlreadyActive`] instead of replacing the live sampler.

use crate::artifacts::ArtifactStore;
use crate::config::TelemetryConfig;
use crate::error::{Result, TelemetryError};
use crate::hardware::{HardwareQuery, NvidiaSmi};
use crate::metadata::{EndReason, PhaseMetadata, RunEndMarker, SamplerExit, TelemetryHealth};
use crate::observability as events;
use crate::phase::PhaseName;
use crate::sampler::{tail_lines, SamplerHandle, SamplerProcess};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const STDERR_TAIL_LINES: usize = 3;

/// What `stop` observed while closing a telemetry window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StopReport {
    pub handle: SamplerHandle,
    pub ended_at: DateTime<Utc>,
    pub end_reason: EndReason,
    pub sampler_exit: SamplerExit,
    pub health: TelemetryHealth,
    /// Lines copied into the sample stream, header included. `None` when the
    /// pump could not be drained.
    pub sample_lines: Option<u64>,
}

/// The seam the phase executor drives.
#[async_trait]
pub trait PhaseTelemetry: Send {
    /// Checks preconditions before any phase runs.
    fn preflight(&self) -> Result<()>;

    async fn start(&mut self, phase: &PhaseName) -> Result<SamplerHandle>;

    /// Closes the live window, if any. Never fails.
    async fn stop_with(&mut self, reason: EndReason) -> Option<StopReport>;

    /// Blocking variant of [`Self::stop_with`] for drop and exit paths.
    fn stop_blocking(&mut self, reason: EndReason) -> Option<StopReport>;

    fn active_handle(&self) -> Option<&SamplerHandle>;

    async fn stop(&mut self) -> Option<StopReport> {
        self.stop_with(EndReason::PhaseFinished).await
    }
}

pub struct TelemetrySupervisor<Q: HardwareQuery = NvidiaSmi> {
    config: TelemetryConfig,
    store: ArtifactStore,
    query: Q,
    active: Option<SamplerProcess>,
    last_started_at: Option<DateTime<Utc>>,
}

impl TelemetrySupervisor<NvidiaSmi> {
    pub fn from_config(config: TelemetryConfig) -> Result<Self> {
        let query = NvidiaSmi::new(config.tool.clone());
        Self::new(config, query)
    }
}

impl<Q: HardwareQuery> TelemetrySupervisor<Q> {
    pub fn new(config: TelemetryConfig, query: Q) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store: ArtifactStore::new(config.artifacts_root.clone()),
            config,
            query,
            active: None,
            last_started_at: None,
        })
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn preflight(&self) -> Result<()> {
        let tool = self.query.locate()?;
        info!(tool = %tool.display(), "hardware query tool located");
        self.store.ensure_root()
    }

    pub fn active_handle(&self) -> Option<&SamplerHandle> {
        self.active.as_ref().map(SamplerProcess::handle)
    }

    /// Launches the sampler for `phase` and records its metadata sidecar
    /// before returning.
    pub async fn start(&mut self, phase: &PhaseName) -> Result<SamplerHandle> {
        if let Some(active) = self.active_handle() {
            return Err(TelemetryError::AlreadyActive {
                active_phase: active.phase_name.to_string(),
                requested_phase: phase.to_string(),
            });
        }

        let tool = self.query.locate()?;
        self.store.ensure_root()?;

        let started_at = self.next_started_at();
        let paths = self.store.path_for(phase, started_at);
        let command =
            self.query
                .sampling_command(&tool, &self.config.fields, self.config.interval());

        let process = SamplerProcess::spawn(phase, &command, paths, started_at)?;
        let handle = process.handle().clone();
        self.active = Some(process);

        info!(
            event = events::TELEMETRY_START,
            phase = %phase,
            pid = handle.pid,
            sample_path = %handle.paths.sample_path.display(),
            "telemetry window opened"
        );

        let devices = self.query.snapshot(&tool).await;
        let metadata = PhaseMetadata {
            phase_name: phase.clone(),
            started_at,
            interval: self.config.interval(),
            sampling_command: command.render(),
            fields: self.config.fields.clone(),
            devices,
        };

        if let Err(error) = metadata.write_to(&handle.paths.meta_path) {
            // A sampler without its reproducibility record is not worth keeping.
            self.stop_with(EndReason::Cancelled).await;
            return Err(error);
        }

        Ok(handle)
    }

    pub async fn stop(&mut self) -> Option<StopReport> {
        self.stop_with(EndReason::PhaseFinished).await
    }

    pub async fn stop_with(&mut self, reason: EndReason) -> Option<StopReport> {
        let mut process = self.active.take()?;

        let (sampler_exit, health) = match process.try_exit_status() {
            Ok(Some(status)) => {
                let exit = SamplerExit::from_status(status);
                process.sweep_process_group(self.config.sigterm_grace()).await;
                (exit, self.crashed_health(process.handle(), exit))
            }
            Ok(None) => match process
                .terminate(self.config.sigint_grace(), self.config.sigterm_grace())
                .await
            {
                Ok(exit) => (exit, TelemetryHealth::Ok),
                Err(error) => (
                    SamplerExit::Unknown,
                    TelemetryHealth::Degraded(format!("unable to terminate sampler: {error}")),
                ),
            },
            Err(error) => (
                SamplerExit::Unknown,
                TelemetryHealth::Degraded(format!("unable to query sampler status: {error}")),
            ),
        };

        let sample_lines = process.finish_pump(PUMP_DRAIN_TIMEOUT).await;
        Some(self.close_window(process, reason, sampler_exit, health, sample_lines))
    }

    pub fn stop_blocking(&mut self, reason: EndReason) -> Option<StopReport> {
        let mut process = self.active.take()?;

        let (sampler_exit, health) = match process.try_exit_status() {
            Ok(Some(status)) => {
                let exit = SamplerExit::from_status(status);
                process.sweep_process_group_blocking(self.config.sigterm_grace());
                (exit, self.crashed_health(process.handle(), exit))
            }
            Ok(None) => match process
                .terminate_blocking(self.config.sigint_grace(), self.config.sigterm_grace())
            {
                Ok(exit) => (exit, TelemetryHealth::Ok),
                Err(error) => (
                    SamplerExit::Unknown,
                    TelemetryHealth::Degraded(format!("unable to terminate sampler: {error}")),
                ),
            },
            Err(error) => (
                SamplerExit::Unknown,
                TelemetryHealth::Degraded(format!("unable to query sampler status: {error}")),
            ),
        };

        process.abandon_pump();
        Some(self.close_window(process, reason, sampler_exit, health, None))
    }

    fn close_window(
        &self,
        process: SamplerProcess,
        end_reason: EndReason,
        sampler_exit: SamplerExit,
        health: TelemetryHealth,
        sample_lines: Option<u64>,
    ) -> StopReport {
        let handle = process.handle().clone();
        drop(process);

        let marker = RunEndMarker {
            ended_at: Utc::now(),
            end_reason,
            sampler_exit,
            health,
        };
        if let Err(error) = marker.append_to(&handle.paths.meta_path) {
            warn!(phase = %handle.phase_name, "unable to record run-end marker: {error}");
        }

        if let TelemetryHealth::Degraded(reason) = &marker.health {
            warn!(
                event = events::TELEMETRY_DEGRADED,
                phase = %handle.phase_name,
                pid = handle.pid,
                reason = %reason,
                "telemetry degraded"
            );
        }
        info!(
            event = events::TELEMETRY_STOP,
            phase = %handle.phase_name,
            pid = handle.pid,
            status = %sampler_exit,
            reason = end_reason.as_str(),
            sample_lines = ?sample_lines,
            "telemetry window closed"
        );

        StopReport {
            handle,
            ended_at: marker.ended_at,
            end_reason,
            sampler_exit,
            health: marker.health,
            sample_lines,
        }
    }

    fn crashed_health(&self, handle: &SamplerHandle, exit: SamplerExit) -> TelemetryHealth {
        let tail = tail_lines(&handle.paths.err_path, STDERR_TAIL_LINES);
        let mut reason = format!("sampler exited before stop ({exit})");
        if !tail.is_empty() {
            reason.push_str(&format!("; stderr: {}", tail.join(" | ")));
        }
        TelemetryHealth::Degraded(reason)
    }

    /// Millisecond-resolution start time, strictly after the previous one so
    /// repeated phase names never share a stamp within this supervisor.
    fn next_started_at(&mut self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_millis();
        let millis = match self.last_started_at {
            Some(last) => now.max(last.timestamp_millis() + 1),
            None => now,
        };
        let started_at = DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_else(Utc::now);
        self.last_started_at = Some(started_at);
        started_at
    }
}

#[async_trait]
impl<Q: HardwareQuery> PhaseTelemetry for TelemetrySupervisor<Q> {
    fn preflight(&self) -> Result<()> {
        TelemetrySupervisor::<Q>::preflight(self)
    }

    async fn start(&mut self, phase: &PhaseName) -> Result<SamplerHandle> {
        TelemetrySupervisor::<Q>::start(self, phase).await
    }

    async fn stop_with(&mut self, reason: EndReason) -> Option<StopReport> {
        TelemetrySupervisor::<Q>::stop_with(self, reason).await
    }

    fn stop_blocking(&mut self, reason: EndReason) -> Option<StopReport> {
        TelemetrySupervisor::<Q>::stop_blocking(self, reason)
    }

    fn active_handle(&self) -> Option<&SamplerHandle> {
        TelemetrySupervisor::<Q>::active_handle(self)
    }
}

impl<Q: HardwareQuery> Drop for TelemetrySupervisor<Q> {
    fn drop(&mut self) {
        if self.active.is_some() {
            warn!(
                event = events::TELEMETRY_TEARDOWN,
                "supervisor dropped with a live sampler, stopping it"
            );
            self.stop_blocking(EndReason::OrchestratorExit);
        }
    }
}
