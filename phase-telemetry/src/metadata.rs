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

//! Metadata sidecar: the reproducibility record written once at `start`, and
//! the run-end marker appended once when the telemetry window closes.

use crate::error::{Result, TelemetryError};
use crate::hardware::DeviceSnapshot;
use crate::phase::PhaseName;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::process::ExitStatus;
use std::time::Duration;

pub const SECTION_DEVICE_INVENTORY: &str = "[device_inventory]";
pub const SECTION_DEVICE_STATIC_INFO: &str = "[device_static_info]";
pub const SECTION_RUN_END: &str = "[run_end]";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhaseMetadata {
    pub phase_name: PhaseName,
    pub started_at: DateTime<Utc>,
    pub interval: Duration,
    pub sampling_command: String,
    pub fields: Vec<String>,
    pub devices: DeviceSnapshot,
}

impl PhaseMetadata {
    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("phase={}", self.phase_name),
            format!("started_at={}", timestamp_to_string(self.started_at)),
            format!("interval_seconds={}", self.interval.as_secs_f64()),
            format!("sampling_command={}", self.sampling_command),
            format!("fields={}", self.fields.join(",")),
        ];
        for error in &self.devices.errors {
            lines.push(format!("snapshot_error={error}"));
        }

        lines.push(SECTION_DEVICE_INVENTORY.to_string());
        lines.extend(self.devices.inventory.iter().cloned());
        lines.push(SECTION_DEVICE_STATIC_INFO.to_string());
        lines.extend(self.devices.static_info.iter().cloned());

        let mut rendered = lines.join("\n");
        rendered.push('\n');
        rendered
    }

    /// Writes the sidecar. Fails if it already exists: the record is written exactly once.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => TelemetryError::ArtifactExists {
                    path: path.to_path_buf(),
                },
                _ => TelemetryError::io("unable to create metadata sidecar", path, e),
            })?;
        file.write_all(self.render().as_bytes())
            .map_err(|e| TelemetryError::io("unable to write metadata sidecar", path, e))
    }
}

/// Why a telemetry window closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    PhaseFinished,
    Interrupted,
    OrchestratorExit,
    Cancelled,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PhaseFinished => "phase_finished",
            Self::Interrupted => "interrupted",
            Self::OrchestratorExit => "orchestrator_exit",
            Self::Cancelled => "cancelled",
        }
    }
}

/// How the sampler process ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum SamplerExit {
    Code(i32),
    Signal(i32),
    Unknown,
}

impl SamplerExit {
    pub fn from_status(status: ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match (status.code(), status.signal()) {
            (Some(code), _) => Self::Code(code),
            (None, Some(signal)) => Self::Signal(signal),
            (None, None) => Self::Unknown,
        }
    }
}

impl fmt::Display for SamplerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "code:{code}"),
            Self::Signal(signal) => write!(f, "signal:{signal}"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum TelemetryHealth {
    Ok,
    Degraded(String),
}

impl TelemetryHealth {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunEndMarker {
    pub ended_at: DateTime<Utc>,
    pub end_reason: EndReason,
    pub sampler_exit: SamplerExit,
    pub health: TelemetryHealth,
}

impl RunEndMarker {
    pub fn render(&self) -> String {
        let mut lines = vec![
            SECTION_RUN_END.to_string(),
            format!("ended_at={}", timestamp_to_string(self.ended_at)),
            format!("end_reason={}", self.end_reason.as_str()),
            format!("sampler_exit={}", self.sampler_exit),
        ];
        match &self.health {
            TelemetryHealth::Ok => lines.push("telemetry=ok".to_string()),
            TelemetryHealth::Degraded(reason) => {
                lines.push("telemetry=degraded".to_string());
                lines.push(format!("degraded_reason={}", single_line(reason)));
            }
        }
        let mut rendered = lines.join("\n");
        rendered.push('\n');
        rendered
    }

    pub fn append_to(&self, path: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|e| TelemetryError::io("unable to open metadata sidecar", path, e))?;
        file.write_all(self.render().as_bytes())
            .map_err(|e| TelemetryError::io("unable to append run-end marker", path, e))
    }
}

/// A GPU line of the device inventory, e.g. `GPU 0: NVIDIA A100 (UUID: GPU-...)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub index: u32,
    pub name: String,
    pub uuid: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarContents {
    pub fields: BTreeMap<String, String>,
    pub devices: Vec<DeviceEntry>,
    pub static_info: Vec<String>,
}

impl SidecarContents {
    pub fn has_run_end(&self) -> bool {
        self.fields.contains_key("end_reason")
    }
}

/// Best-effort parse; unknown lines are ignored.
pub fn parse_sidecar(text: &str) -> SidecarContents {
    let mut contents = SidecarContents::default();
    let mut section = "";

    for line in text.lines() {
        if line.starts_with('[') && line.ends_with(']') {
            section = line;
            continue;
        }
        match section {
            SECTION_DEVICE_INVENTORY => {
                if let Some(device) = parse_device_line(line) {
                    contents.devices.push(device);
                }
            }
            SECTION_DEVICE_STATIC_INFO => {
                if !line.trim().is_empty() {
                    contents.static_info.push(line.to_string());
                }
            }
            _ => {
                if let Some((key, value)) = line.split_once('=') {
                    contents
                        .fields
                        .insert(key.trim().to_string(), value.trim().to_string());
                }
            }
        }
    }

    contents
}

pub fn read_sidecar(path: &Path) -> Result<SidecarContents> {
    let text = fs::read_to_string(path)
        .map_err(|e| TelemetryError::io("unable to read metadata sidecar", path, e))?;
    Ok(parse_sidecar(&text))
}

fn parse_device_line(line: &str) -> Option<DeviceEntry> {
    let rest = line.trim().strip_prefix("GPU ")?;
    let (index, rest) = rest.split_once(':')?;
    let index = index.trim().parse().ok()?;
    let (name, uuid) = rest.rsplit_once("(UUID:")?;
    let uuid = uuid.trim().strip_suffix(')')?.trim();
    Some(DeviceEntry {
        index,
        name: name.trim().to_string(),
        uuid: uuid.to_string(),
    })
}

pub fn timestamp_to_string(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn single_line(text: &str) -> String {
    text.lines().map(str::trim).collect::<Vec<_>>().join(" ")
}
