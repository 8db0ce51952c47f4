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

//! Hardware query tool capability contract.
//!
//! The core needs two things from the tool: given a field list and an interval,
//! a command that streams structured rows at that cadence; given no interval, a
//! one-shot snapshot of the devices.

use crate::error::{Result, TelemetryError};
use crate::phase::render_command_line;
use async_trait::async_trait;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

pub const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(15);

pub const STATIC_INFO_FIELDS: &str = "index,name,driver_version,pci.bus_id,memory.total,power.limit";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SamplingCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl SamplingCommand {
    pub fn render(&self) -> String {
        render_command_line(&self.program.to_string_lossy(), &self.args)
    }
}

/// One-shot device description captured at the start of a telemetry window.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub inventory: Vec<String>,
    pub static_info: Vec<String>,
    /// Query failures; recorded in the sidecar, never raised.
    pub errors: Vec<String>,
}

#[async_trait]
pub trait HardwareQuery: Send + Sync {
    /// Name or path the tool was configured with.
    fn tool(&self) -> &str;

    /// Resolves the tool to an executable path.
    fn locate(&self) -> Result<PathBuf>;

    fn sampling_command(&self, tool: &Path, fields: &[String], interval: Duration)
        -> SamplingCommand;

    async fn snapshot(&self, tool: &Path) -> DeviceSnapshot;
}

/// `nvidia-smi` backed implementation.
#[derive(Clone, Debug)]
pub struct NvidiaSmi {
    tool: String,
}

impl NvidiaSmi {
    pub fn new(tool: impl Into<String>) -> Self {
        Self { tool: tool.into() }
    }
}

#[async_trait]
impl HardwareQuery for NvidiaSmi {
    fn tool(&self) -> &str {
        &self.tool
    }

    fn locate(&self) -> Result<PathBuf> {
        locate_executable(&self.tool, std::env::var_os("PATH").as_deref()).ok_or_else(|| {
            TelemetryError::ToolUnavailable {
                tool: self.tool.clone(),
                reason: "not found or not executable".to_string(),
            }
        })
    }

    fn sampling_command(
        &self,
        tool: &Path,
        fields: &[String],
        interval: Duration,
    ) -> SamplingCommand {
        let mut args = vec![
            format!("--query-gpu={}", fields.join(",")),
            "--format=csv".to_string(),
        ];
        let millis = interval.as_millis().max(1);
        if millis % 1000 == 0 {
            args.push("-l".to_string());
            args.push((millis / 1000).to_string());
        } else {
            args.push("-lms".to_string());
            args.push(millis.to_string());
        }

        SamplingCommand {
            program: tool.to_path_buf(),
            args,
        }
    }

    async fn snapshot(&self, tool: &Path) -> DeviceSnapshot {
        let mut snapshot = DeviceSnapshot::default();

        match query_lines(tool, &["-L"]).await {
            Ok(lines) => snapshot.inventory = lines,
            Err(error) => snapshot.errors.push(format!("device inventory: {error}")),
        }

        let static_query = format!("--query-gpu={STATIC_INFO_FIELDS}");
        match query_lines(tool, &[static_query.as_str(), "--format=csv"]).await {
            Ok(lines) => snapshot.static_info = lines,
            Err(error) => snapshot.errors.push(format!("static info: {error}")),
        }

        snapshot
    }
}

async fn query_lines(tool: &Path, args: &[&str]) -> std::result::Result<Vec<String>, String> {
    debug!(tool = %tool.display(), ?args, "running one-shot hardware query");

    let output = Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(SNAPSHOT_TIMEOUT, output).await {
        Ok(Ok(output)) => output,
        Ok(Err(error)) => return Err(format!("unable to run query: {error}")),
        Err(_) => {
            return Err(format!(
                "query timed out after {}s",
                SNAPSHOT_TIMEOUT.as_secs()
            ))
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "query exited with {}: {}",
            output.status,
            stderr.trim()
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| line.trim_end().to_string())
        .filter(|line| !line.is_empty())
        .collect())
}

/// An explicit path must name an executable file; a bare name is searched on `search_path`.
pub fn locate_executable(tool: &str, search_path: Option<&std::ffi::OsStr>) -> Option<PathBuf> {
    if tool.contains('/') {
        let candidate = PathBuf::from(tool);
        return is_executable(&candidate).then_some(candidate);
    }

    std::env::split_paths(search_path?)
        .map(|dir| dir.join(tool))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
