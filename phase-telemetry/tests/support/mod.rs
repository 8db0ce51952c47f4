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

use async_trait::async_trait;
use phase_telemetry::{
    CommandLine, EndReason, PhaseName, PhaseSpec, PhaseTelemetry, SamplerHandle, SignalTrigger,
    StopReport, TelemetryConfig, TelemetrySupervisor, TerminationSignal,
};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Stand-in for `nvidia-smi`: `-L` lists one GPU, a loop flag streams rows
/// until SIGINT/SIGTERM, anything else prints a one-shot CSV.
const FAKE_NVIDIA_SMI: &str = r#"#!/bin/sh
loop_ms=""
prev=""
for arg in "$@"; do
  if [ "$arg" = "-L" ]; then
    echo "GPU 0: NVIDIA A100-SXM4-80GB (UUID: GPU-00000000-fake)"
    exit 0
  fi
  case "$prev" in
    -l) loop_ms=$(( $arg * 1000 )) ;;
    -lms) loop_ms=$arg ;;
  esac
  prev=$arg
done

if [ -z "$loop_ms" ]; then
  echo "index, name, driver_version, pci.bus_id, memory.total [MiB], power.limit [W]"
  echo "0, NVIDIA A100-SXM4-80GB, 550.54.15, 00000000:07:00.0, 81920 MiB, 400.00 W"
  exit 0
fi

trap 'exit 0' INT TERM
echo "timestamp, index, utilization.gpu [%], memory.used [MiB]"
while true; do
  echo "2026/10/18 12:00:00.000, 0, 97 %, 40000 MiB"
  sleep 0.05
done
"#;

#[allow(dead_code)]
pub(crate) fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub(crate) struct Fixture {
    // Held so the directory outlives the test.
    _dir: TempDir,
    pub(crate) tool: PathBuf,
    pub(crate) artifacts_root: PathBuf,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = dir.path().join("nvidia-smi");
        fs::write(&tool, FAKE_NVIDIA_SMI).expect("write fake tool");
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).expect("chmod fake tool");
        let artifacts_root = dir.path().join("metrics");

        Self {
            _dir: dir,
            tool,
            artifacts_root,
        }
    }

    pub(crate) fn config(&self) -> TelemetryConfig {
        TelemetryConfig {
            artifacts_root: self.artifacts_root.clone(),
            interval_ms: 100,
            fields: vec![
                "timestamp".to_string(),
                "index".to_string(),
                "utilization.gpu".to_string(),
                "memory.used".to_string(),
            ],
            tool: self.tool.display().to_string(),
            sigint_grace_ms: 1000,
            sigterm_grace_ms: 1000,
        }
    }

    pub(crate) fn supervisor(&self) -> TelemetrySupervisor {
        TelemetrySupervisor::from_config(self.config()).expect("valid config")
    }
}

pub(crate) fn phase(name: &str, script: &str) -> PhaseSpec {
    PhaseSpec::new(
        PhaseName::new(name).expect("valid phase name"),
        CommandLine::new("sh", ["-c", script]),
    )
}

#[allow(dead_code)]
pub(crate) fn process_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

#[allow(dead_code)]
pub(crate) fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| panic!("read {}: {e}", path.display()))
}

/// Wraps a real supervisor and delivers a signal as the given phase starts.
#[allow(dead_code)]
pub(crate) struct InterruptingTelemetry {
    pub(crate) inner: TelemetrySupervisor,
    pub(crate) fire_on_start: usize,
    pub(crate) signal: TerminationSignal,
    pub(crate) trigger: SignalTrigger,
    pub(crate) handles: Vec<SamplerHandle>,
}

#[async_trait]
impl PhaseTelemetry for InterruptingTelemetry {
    fn preflight(&self) -> phase_telemetry::Result<()> {
        self.inner.preflight()
    }

    async fn start(&mut self, phase: &PhaseName) -> phase_telemetry::Result<SamplerHandle> {
        let handle = self.inner.start(phase).await?;
        self.handles.push(handle.clone());
        if self.handles.len() == self.fire_on_start + 1 {
            self.trigger.fire(self.signal);
        }
        Ok(handle)
    }

    async fn stop_with(&mut self, reason: EndReason) -> Option<StopReport> {
        self.inner.stop_with(reason).await
    }

    fn stop_blocking(&mut self, reason: EndReason) -> Option<StopReport> {
        self.inner.stop_blocking(reason)
    }

    fn active_handle(&self) -> Option<&SamplerHandle> {
        self.inner.active_handle()
    }
}
