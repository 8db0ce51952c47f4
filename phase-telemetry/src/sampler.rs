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

//! One live background sampler process and its output sinks.

use crate::artifacts::ArtifactPaths;
use crate::error::{Result, TelemetryError};
use crate::hardware::SamplingCommand;
use crate::metadata::SamplerExit;
use crate::phase::PhaseName;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const BLOCKING_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Public view of a live sampler, owned by the supervisor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SamplerHandle {
    pub phase_name: PhaseName,
    pub pid: i32,
    pub paths: ArtifactPaths,
    pub started_at: DateTime<Utc>,
}

pub(crate) struct SamplerProcess {
    handle: SamplerHandle,
    child: Child,
    pump: Option<JoinHandle<io::Result<u64>>>,
}

impl SamplerProcess {
    /// Creates the sample and error sinks, then launches the sampler in its
    /// own process group with stdout piped through a line pump. Nothing is
    /// left on disk when this fails.
    pub(crate) fn spawn(
        phase: &PhaseName,
        command: &SamplingCommand,
        paths: ArtifactPaths,
        started_at: DateTime<Utc>,
    ) -> Result<Self> {
        let (sample_file, err_file) = create_sinks(&paths)?;
        Self::launch(phase, command, paths.clone(), started_at, sample_file, err_file).map_err(
            |error| {
                discard_sinks(&paths);
                error
            },
        )
    }

    fn launch(
        phase: &PhaseName,
        command: &SamplingCommand,
        paths: ArtifactPaths,
        started_at: DateTime<Utc>,
        sample_file: File,
        err_file: File,
    ) -> Result<Self> {
        let mut process = Command::new(&command.program);
        process
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(err_file))
            .kill_on_drop(true);

        // SAFETY: only async-signal-safe libc calls run between fork and exec.
        unsafe {
            process.pre_exec(|| {
                if libc::setpgid(0, 0) != 0 {
                    return Err(io::Error::last_os_error());
                }
                // The parent-death signal follows the forking thread; samplers
                // are spawned from runtime threads that live as long as the run.
                #[cfg(target_os = "linux")]
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) != 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = process.spawn().map_err(|source| match source.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                TelemetryError::ToolUnavailable {
                    tool: command.program.display().to_string(),
                    reason: source.to_string(),
                }
            }
            _ => TelemetryError::SamplerSpawn {
                phase: phase.to_string(),
                source,
            },
        })?;

        let pid = child.id().ok_or_else(|| TelemetryError::SamplerSpawn {
            phase: phase.to_string(),
            source: io::Error::new(io::ErrorKind::Other, "spawned sampler has no pid"),
        })? as i32;

        let pump = child
            .stdout
            .take()
            .map(|stdout| tokio::spawn(pump_lines(stdout, tokio::fs::File::from_std(sample_file))));

        Ok(Self {
            handle: SamplerHandle {
                phase_name: phase.clone(),
                pid,
                paths,
                started_at,
            },
            child,
            pump,
        })
    }

    pub(crate) fn handle(&self) -> &SamplerHandle {
        &self.handle
    }

    /// Exit status if the sampler has already ended on its own.
    pub(crate) fn try_exit_status(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// SIGINT, then SIGTERM, then SIGKILL, each stage bounded by its grace window.
    pub(crate) async fn terminate(
        &mut self,
        sigint_grace: Duration,
        sigterm_grace: Duration,
    ) -> io::Result<SamplerExit> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(SamplerExit::from_status(status));
        }

        for (signal, grace) in [(libc::SIGINT, sigint_grace), (libc::SIGTERM, sigterm_grace)] {
            self.signal_process_group(signal)?;
            if let Ok(status) = tokio::time::timeout(grace, self.child.wait()).await {
                return status.map(SamplerExit::from_status);
            }
        }

        warn!(
            phase = %self.handle.phase_name,
            pid = self.handle.pid,
            "sampler ignored SIGINT/SIGTERM grace windows, killing"
        );
        self.signal_process_group(libc::SIGKILL)?;
        self.child.wait().await.map(SamplerExit::from_status)
    }

    /// Same escalation as [`Self::terminate`] for callers without an async context.
    pub(crate) fn terminate_blocking(
        &mut self,
        sigint_grace: Duration,
        sigterm_grace: Duration,
    ) -> io::Result<SamplerExit> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(SamplerExit::from_status(status));
        }

        for (signal, grace) in [(libc::SIGINT, sigint_grace), (libc::SIGTERM, sigterm_grace)] {
            self.signal_process_group(signal)?;
            if let Some(status) = self.poll_exit_until(Instant::now() + grace)? {
                return Ok(SamplerExit::from_status(status));
            }
        }

        self.signal_process_group(libc::SIGKILL)?;
        let reaped = self.poll_exit_until(Instant::now() + sigterm_grace)?;
        Ok(reaped.map_or(SamplerExit::Unknown, SamplerExit::from_status))
    }

    /// Clears out whatever is left in the process group of a leader that has
    /// already exited: SIGTERM, then SIGKILL once `grace` runs out.
    pub(crate) async fn sweep_process_group(&self, grace: Duration) {
        if !self.sweep_started() {
            return;
        }
        let deadline = tokio::time::Instant::now() + grace;
        while self.process_group_alive() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(BLOCKING_POLL_INTERVAL).await;
        }
        self.kill_leftovers();
    }

    /// Blocking variant of [`Self::sweep_process_group`].
    pub(crate) fn sweep_process_group_blocking(&self, grace: Duration) {
        if !self.sweep_started() {
            return;
        }
        let deadline = Instant::now() + grace;
        while self.process_group_alive() && Instant::now() < deadline {
            std::thread::sleep(BLOCKING_POLL_INTERVAL);
        }
        self.kill_leftovers();
    }

    fn sweep_started(&self) -> bool {
        if !self.process_group_alive() {
            return false;
        }
        warn!(
            phase = %self.handle.phase_name,
            pid = self.handle.pid,
            "sampler exited but left processes in its group, terminating them"
        );
        if let Err(error) = self.signal_process_group(libc::SIGTERM) {
            warn!(pid = self.handle.pid, "unable to signal sampler process group: {error}");
        }
        true
    }

    fn kill_leftovers(&self) {
        if self.process_group_alive() {
            if let Err(error) = self.signal_process_group(libc::SIGKILL) {
                warn!(pid = self.handle.pid, "unable to kill sampler process group: {error}");
            }
        }
    }

    fn process_group_alive(&self) -> bool {
        unsafe { libc::kill(-self.handle.pid, 0) == 0 }
    }

    /// Waits for the pump to drain the closed pipe; returns the rows written.
    pub(crate) async fn finish_pump(&mut self, timeout: Duration) -> Option<u64> {
        let pump = self.pump.take()?;
        match tokio::time::timeout(timeout, pump).await {
            Ok(Ok(Ok(rows))) => Some(rows),
            Ok(Ok(Err(error))) => {
                warn!(phase = %self.handle.phase_name, "sample pump failed: {error}");
                None
            }
            Ok(Err(join_error)) => {
                warn!(phase = %self.handle.phase_name, "sample pump task ended abnormally: {join_error}");
                None
            }
            Err(_) => {
                warn!(phase = %self.handle.phase_name, "sample pump did not drain in time");
                None
            }
        }
    }

    /// Stops the pump without waiting on it.
    pub(crate) fn abandon_pump(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }

    fn poll_exit_until(&mut self, deadline: Instant) -> io::Result<Option<ExitStatus>> {
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(BLOCKING_POLL_INTERVAL);
        }
    }

    fn signal_process_group(&self, signal: i32) -> io::Result<()> {
        debug!(pid = self.handle.pid, signal, "signalling sampler process group");
        let rc = unsafe { libc::kill(-self.handle.pid, signal) };
        if rc == 0 {
            return Ok(());
        }

        let error = io::Error::last_os_error();
        if error.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        Err(error)
    }
}

/// Copies sampler stdout into the sample file one complete line per write, so
/// a reader never sees more than the line currently being produced as missing.
async fn pump_lines(stdout: ChildStdout, mut sink: tokio::fs::File) -> io::Result<u64> {
    let mut reader = BufReader::new(stdout);
    let mut line = Vec::new();
    let mut rows = 0;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        if !line.ends_with(b"\n") {
            line.push(b'\n');
        }
        sink.write_all(&line).await?;
        sink.flush().await?;
        rows += 1;
    }

    Ok(rows)
}

/// Creates both sinks or neither.
fn create_sinks(paths: &ArtifactPaths) -> Result<(File, File)> {
    let sample_file = create_new(&paths.sample_path, "unable to create sample stream")?;
    match create_new(&paths.err_path, "unable to create sampler error log") {
        Ok(err_file) => Ok((sample_file, err_file)),
        Err(error) => {
            drop(sample_file);
            remove_quietly(&paths.sample_path);
            Err(error)
        }
    }
}

fn discard_sinks(paths: &ArtifactPaths) {
    remove_quietly(&paths.sample_path);
    remove_quietly(&paths.err_path);
}

fn remove_quietly(path: &Path) {
    if let Err(error) = fs::remove_file(path) {
        if error.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), "unable to remove partial artifact: {error}");
        }
    }
}

fn create_new(path: &Path, context: &'static str) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => TelemetryError::ArtifactExists {
                path: path.to_path_buf(),
            },
            _ => TelemetryError::io(context, path, e),
        })
}

/// Last `max_lines` lines of a file; empty if it is missing or unreadable.
pub(crate) fn tail_lines(path: &Path, max_lines: usize) -> Vec<String> {
    let Ok(content) = fs::read_to_string(path) else {
        return Vec::new();
    };

    let mut deque = VecDeque::with_capacity(max_lines);
    for line in content.lines().filter(|line| !line.trim().is_empty()) {
        if deque.len() == max_lines {
            deque.pop_front();
        }
        deque.push_back(line.to_string());
    }
    deque.into_iter().collect()
}
