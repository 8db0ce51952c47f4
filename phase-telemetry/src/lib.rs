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

//! # phase-telemetry
//!
//! `phase-telemetry` runs a multi-stage pipeline and records GPU telemetry for
//! each stage in its own bundle of files: a CSV sample stream, a metadata
//! sidecar and a sampler error log.
//!
//! Typical usage is centered on [`TelemetrySupervisor`] and [`PhaseExecutor`].
//!
//! ## Running a pipeline
//!
//! ```no_run
//! use phase_telemetry::{
//!     CommandLine, ExecutorOptions, PhaseExecutor, PhaseName, PhaseSpec, SignalGuard,
//!     TelemetryConfig, TelemetrySupervisor,
//! };
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let config = TelemetryConfig {
//!     artifacts_root: "/tmp/metrics".into(),
//!     ..TelemetryConfig::default()
//! };
//! let supervisor = TelemetrySupervisor::from_config(config).unwrap();
//! let guard = SignalGuard::install().unwrap();
//! let mut executor = PhaseExecutor::new(supervisor, guard, ExecutorOptions::default());
//!
//! let phases = vec![
//!     PhaseSpec::new(
//!         PhaseName::new("tokenizer").unwrap(),
//!         CommandLine::new("python", ["-m", "scripts.tok_train"]),
//!     ),
//!     PhaseSpec::new(
//!         PhaseName::new("base_train").unwrap(),
//!         CommandLine::new("torchrun", ["-m", "scripts.base_train"]),
//!     ),
//! ];
//!
//! let result = executor.run(phases).await.unwrap();
//! executor.shutdown().await;
//! std::process::exit(result.outcome.exit_code());
//! # });
//! ```
//!
//! ## Artifact naming
//!
//! Naming is a pure function of the phase name and the window's start time.
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use phase_telemetry::{ArtifactStore, PhaseName};
//!
//! let store = ArtifactStore::new("/metrics");
//! let started = Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 5).unwrap();
//! let paths = store.path_for(&PhaseName::new("sft").unwrap(), started);
//!
//! assert_eq!(
//!     paths.sample_path.to_str(),
//!     Some("/metrics/gpu_20261018T093005000Z_sft.csv")
//! );
//! assert_eq!(paths.meta_path.extension().and_then(|e| e.to_str()), Some("txt"));
//! ```
//!
//! ## Architecture map
//!
//! - Supervisor: the single sampler slot, `start` / `stop` and the degraded marker
//! - Sampler: process group, escalating termination and the line pump
//! - Executor: sequential phases, one telemetry window per phase
//! - Guard: SIGINT/SIGTERM intake and `128 + signo` exit codes
//! - Artifacts and report: file naming, discovery, run summaries and the index
//!
//! ## Observability model
//!
//! The workspace uses `tracing` for logs/events. Event names live in
//! [`observability`]. Library code never initializes a global subscriber;
//! binaries and tests own `tracing_subscriber` setup.

mod artifacts;
pub use artifacts::{
    format_stamp, parse_stamp, ArtifactBundle, ArtifactPaths, ArtifactStore, ERR_SUFFIX,
    INDEX_FILE_NAME, META_SUFFIX, SAMPLE_PREFIX, SAMPLE_SUFFIX,
};

pub mod config;
pub use config::TelemetryConfig;

mod error;
pub use error::{Result, TelemetryError};

mod executor;
pub use executor::{
    CommandStatus, ExecutorOptions, PhaseExecutor, PhaseRecord, PipelineOutcome, PipelineResult,
    PipelineState, TelemetryScope, TELEMETRY_FAILURE_EXIT_CODE,
};

mod guard;
pub use guard::{SignalGuard, SignalTrigger, TerminationSignal};

mod hardware;
pub use hardware::{locate_executable, DeviceSnapshot, HardwareQuery, NvidiaSmi, SamplingCommand};

pub mod metadata;
pub use metadata::{EndReason, SamplerExit, TelemetryHealth};

#[doc(hidden)]
pub mod observability;

mod phase;
pub use phase::{CommandLine, Phase, PhaseName, PhaseSpec};

pub mod report;

mod sampler;
pub use sampler::SamplerHandle;

mod supervisor;
pub use supervisor::{PhaseTelemetry, StopReport, TelemetrySupervisor};
