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

use crate::artifacts::{ArtifactStore, RUN_SUMMARY_PREFIX};
use crate::error::{Result, TelemetryError};
use crate::executor::{CommandStatus, PhaseRecord, PipelineOutcome, PipelineResult};
use crate::metadata::{read_sidecar, timestamp_to_string, DeviceEntry, TelemetryHealth};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const RUN_SUMMARY_SCHEMA_VERSION: &str = "1.0";
pub const ARTIFACT_INDEX_SCHEMA_VERSION: &str = "1.0";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub phase: String,
    pub command: String,
    pub status: String,
    pub exit_code: i32,
    pub interrupted_by: Option<String>,
    pub start_ts: String,
    pub end_ts: String,
    pub duration_ms: u128,
    pub sampler_pid: Option<i32>,
    pub sampler_exit: Option<String>,
    pub telemetry: String,
    pub degraded_reason: Option<String>,
    pub sample_lines: Option<u64>,
    pub sample_path: Option<String>,
    pub meta_path: Option<String>,
    pub err_path: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub schema_version: String,
    pub outcome: String,
    pub exit_code: i32,
    pub failed_phase: Option<String>,
    pub signal: Option<String>,
    pub artifacts_root: String,
    pub phases: Vec<PhaseSummary>,
    pub start_ts: String,
    pub end_ts: String,
    pub duration_ms: i64,
}

impl RunSummary {
    pub fn from_result(result: &PipelineResult, artifacts_root: &Path) -> Self {
        let (outcome, failed_phase, signal) = match &result.outcome {
            PipelineOutcome::Completed => ("completed", None, None),
            PipelineOutcome::Aborted { phase, .. } => ("aborted", Some(phase.to_string()), None),
            PipelineOutcome::Interrupted { phase, signal } => (
                "interrupted",
                phase.as_ref().map(ToString::to_string),
                Some(signal.to_string()),
            ),
            PipelineOutcome::TelemetryFailed { phase, .. } => {
                ("telemetry_failed", Some(phase.to_string()), None)
            }
        };

        Self {
            schema_version: RUN_SUMMARY_SCHEMA_VERSION.to_string(),
            outcome: outcome.to_string(),
            exit_code: result.outcome.exit_code(),
            failed_phase,
            signal,
            artifacts_root: artifacts_root.display().to_string(),
            phases: result.phases.iter().map(summarize_phase).collect(),
            start_ts: timestamp_to_string(result.started_at),
            end_ts: timestamp_to_string(result.ended_at),
            duration_ms: (result.ended_at - result.started_at).num_milliseconds(),
        }
    }
}

fn summarize_phase(record: &PhaseRecord) -> PhaseSummary {
    let stop = record.telemetry.as_ref();
    let degraded_reason = stop.and_then(|stop| match &stop.health {
        TelemetryHealth::Degraded(reason) => Some(reason.clone()),
        TelemetryHealth::Ok => None,
    });

    PhaseSummary {
        phase: record.phase.to_string(),
        command: record.command.clone(),
        status: render_status(&record.status),
        exit_code: if record.status.success() {
            0
        } else {
            record.status.exit_code()
        },
        interrupted_by: record.interrupted_by.map(|signal| signal.to_string()),
        start_ts: timestamp_to_string(record.started_at),
        end_ts: timestamp_to_string(record.ended_at),
        duration_ms: record.duration_ms,
        sampler_pid: stop.map(|stop| stop.handle.pid),
        sampler_exit: stop.map(|stop| stop.sampler_exit.to_string()),
        telemetry: match stop {
            Some(stop) if stop.health.is_degraded() => "degraded".to_string(),
            Some(_) => "ok".to_string(),
            None => "missing".to_string(),
        },
        degraded_reason,
        sample_lines: stop.and_then(|stop| stop.sample_lines),
        sample_path: stop.map(|stop| stop.handle.paths.sample_path.display().to_string()),
        meta_path: stop.map(|stop| stop.handle.paths.meta_path.display().to_string()),
        err_path: stop.map(|stop| stop.handle.paths.err_path.display().to_string()),
    }
}

fn render_status(status: &CommandStatus) -> String {
    match status {
        CommandStatus::Exited { code } => format!("exited:{code}"),
        CommandStatus::Signaled { signal } => format!("signaled:{signal}"),
        CommandStatus::SpawnFailed { reason } => format!("spawn_failed: {reason}"),
        CommandStatus::WaitFailed { reason } => format!("wait_failed: {reason}"),
    }
}

/// Writes `run_<stamp>.json` and `run_<stamp>.txt` next to the phase bundles.
pub fn write_run_summary(
    summary: &RunSummary,
    store: &ArtifactStore,
    started_at: DateTime<Utc>,
) -> Result<(PathBuf, PathBuf)> {
    store.ensure_root()?;
    let (summary_json, summary_txt) = store.run_summary_paths(started_at);

    let json_payload = serde_json::to_string_pretty(summary).map_err(|source| TelemetryError::Json {
        context: "serialize run summary",
        source,
    })?;
    fs::write(&summary_json, json_payload)
        .map_err(|e| TelemetryError::io("unable to write run summary JSON", &summary_json, e))?;
    fs::write(&summary_txt, render_run_summary_text(summary))
        .map_err(|e| TelemetryError::io("unable to write run summary text", &summary_txt, e))?;

    Ok((summary_json, summary_txt))
}

pub fn load_run_summary(path: &Path) -> Result<RunSummary> {
    let payload = fs::read_to_string(path)
        .map_err(|e| TelemetryError::io("unable to read run summary", path, e))?;
    serde_json::from_str(&payload).map_err(|source| TelemetryError::Json {
        context: "parse run summary",
        source,
    })
}

fn render_run_summary_text(summary: &RunSummary) -> String {
    let mut lines = vec![
        format!("outcome: {}", summary.outcome),
        format!("exit_code: {}", summary.exit_code),
        format!("artifacts_root: {}", summary.artifacts_root),
        format!("duration_ms: {}", summary.duration_ms),
    ];
    if let Some(phase) = &summary.failed_phase {
        lines.push(format!("failed_phase: {phase}"));
    }
    if let Some(signal) = &summary.signal {
        lines.push(format!("signal: {signal}"));
    }

    lines.push("phases:".to_string());
    for phase in &summary.phases {
        lines.push(format!(
            "  - {}: {} (duration_ms={}, telemetry={}, samples={})",
            phase.phase,
            phase.status,
            phase.duration_ms,
            phase.telemetry,
            phase
                .sample_path
                .as_deref()
                .unwrap_or("<not available>")
        ));
        if let Some(reason) = &phase.degraded_reason {
            lines.push(format!("    degraded: {reason}"));
        }
    }

    let mut text = lines.join("\n");
    text.push('\n');
    text
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexedBundle {
    pub key: String,
    pub phase: String,
    pub stamp: String,
    pub start_ts: String,
    pub sample_path: String,
    pub meta_path: String,
    pub err_path: String,
    pub sample_bytes: u64,
    pub has_err_output: bool,
    /// `key=value` lines of the sidecar, run-end marker included.
    pub meta: BTreeMap<String, String>,
    pub devices: Vec<DeviceEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexedRun {
    pub file: String,
    pub outcome: String,
    pub exit_code: i32,
    pub start_ts: String,
}

/// Everything under an artifact root, grouped for downstream tooling.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactIndex {
    pub schema_version: String,
    pub generated_at: String,
    pub artifacts_root: String,
    pub bundles: Vec<IndexedBundle>,
    /// UTC date (`YYYY-MM-DD`) to bundle keys, in chronological order.
    pub days: BTreeMap<String, Vec<String>>,
    pub runs: Vec<IndexedRun>,
}

pub fn build_index(store: &ArtifactStore) -> Result<ArtifactIndex> {
    let mut bundles = Vec::new();
    let mut days: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for bundle in store.discover()? {
        let sidecar = match read_sidecar(&bundle.paths.meta_path) {
            Ok(sidecar) => Some(sidecar),
            Err(error) => {
                warn!(key = %bundle.key(), "sidecar unreadable, indexing without it: {error}");
                None
            }
        };

        days.entry(bundle.started_at.format("%Y-%m-%d").to_string())
            .or_default()
            .push(bundle.key());

        bundles.push(IndexedBundle {
            key: bundle.key(),
            phase: bundle.phase.to_string(),
            stamp: bundle.stamp.clone(),
            start_ts: timestamp_to_string(bundle.started_at),
            sample_path: bundle.paths.sample_path.display().to_string(),
            meta_path: bundle.paths.meta_path.display().to_string(),
            err_path: bundle.paths.err_path.display().to_string(),
            sample_bytes: file_len(&bundle.paths.sample_path),
            has_err_output: file_len(&bundle.paths.err_path) > 0,
            meta: sidecar
                .as_ref()
                .map(|sidecar| sidecar.fields.clone())
                .unwrap_or_default(),
            devices: sidecar.map(|sidecar| sidecar.devices).unwrap_or_default(),
        });
    }

    Ok(ArtifactIndex {
        schema_version: ARTIFACT_INDEX_SCHEMA_VERSION.to_string(),
        generated_at: timestamp_to_string(Utc::now()),
        artifacts_root: store.root().display().to_string(),
        bundles,
        days,
        runs: discover_runs(store.root())?,
    })
}

pub fn write_index(index: &ArtifactIndex, store: &ArtifactStore) -> Result<PathBuf> {
    store.ensure_root()?;
    let index_path = store.index_path();
    let payload = serde_json::to_string_pretty(index).map_err(|source| TelemetryError::Json {
        context: "serialize artifact index",
        source,
    })?;
    fs::write(&index_path, payload)
        .map_err(|e| TelemetryError::io("unable to write artifact index", &index_path, e))?;
    Ok(index_path)
}

fn discover_runs(root: &Path) -> Result<Vec<IndexedRun>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let entries =
        fs::read_dir(root).map_err(|e| TelemetryError::io("unable to read artifact root", root, e))?;
    let mut runs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| TelemetryError::io("unable to read artifact root", root, e))?;
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if !file_name.starts_with(RUN_SUMMARY_PREFIX) || !file_name.ends_with(".json") {
            continue;
        }
        match load_run_summary(&entry.path()) {
            Ok(summary) => runs.push(IndexedRun {
                file: file_name,
                outcome: summary.outcome,
                exit_code: summary.exit_code,
                start_ts: summary.start_ts,
            }),
            Err(error) => warn!(file = %file_name, "skipping unreadable run summary: {error}"),
        }
    }

    runs.sort_by(|a, b| a.file.cmp(&b.file));
    Ok(runs)
}

fn file_len(path: &Path) -> u64 {
    fs::metadata(path).map(|meta| meta.len()).unwrap_or(0)
}
