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

mod support;

use phase_telemetry::metadata::read_sidecar;
use phase_telemetry::report::{build_index, write_index, write_run_summary, RunSummary};
use phase_telemetry::{
    ArtifactStore, CommandStatus, EndReason, ExecutorOptions, PhaseExecutor, PhaseName,
    PipelineOutcome, SignalGuard, TelemetryError, TerminationSignal,
};
use std::time::Duration;
use support::{phase, process_alive, read, Fixture, InterruptingTelemetry};

fn options() -> ExecutorOptions {
    ExecutorOptions {
        command_grace: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn failure_in_second_phase_leaves_exactly_two_bundles() {
    support::init_logging();
    let fixture = Fixture::new();
    let (guard, _trigger) = SignalGuard::manual();
    let mut executor = PhaseExecutor::new(fixture.supervisor(), guard, options());

    let result = executor
        .run(vec![
            phase("tokenizer", "sleep 0.3"),
            phase("base_train", "sleep 0.3; exit 4"),
            phase("mid_train", "sleep 0.3"),
            phase("sft", "sleep 0.3"),
        ])
        .await
        .expect("pipeline runs");

    assert_eq!(
        result.outcome,
        PipelineOutcome::Aborted {
            phase: PhaseName::new("base_train").unwrap(),
            status: CommandStatus::Exited { code: 4 },
        }
    );
    assert_eq!(result.outcome.exit_code(), 4);
    assert!(executor.telemetry().active_handle().is_none());

    let bundles = ArtifactStore::new(&fixture.artifacts_root)
        .discover()
        .expect("discover");
    let names: Vec<_> = bundles.iter().map(|bundle| bundle.phase.as_str()).collect();
    assert_eq!(names, ["tokenizer", "base_train"]);

    for bundle in &bundles {
        let samples = read(&bundle.paths.sample_path);
        assert!(samples.starts_with("timestamp, index"), "header first: {samples}");
        assert!(samples.lines().count() >= 2, "at least one row: {samples}");

        let sidecar = read_sidecar(&bundle.paths.meta_path).expect("sidecar");
        assert_eq!(sidecar.fields["phase"], bundle.phase.as_str());
        assert_eq!(sidecar.fields["end_reason"], EndReason::PhaseFinished.as_str());
        assert_eq!(sidecar.fields["telemetry"], "ok");
        assert_eq!(sidecar.devices.len(), 1);
        assert!(sidecar.static_info.iter().any(|line| line.contains("550.54.15")));
        assert!(bundle.paths.err_path.exists());
    }
}

#[tokio::test]
async fn interrupt_during_third_phase_stops_its_sampler() {
    support::init_logging();
    let fixture = Fixture::new();
    let (guard, trigger) = SignalGuard::manual();
    let telemetry = InterruptingTelemetry {
        inner: fixture.supervisor(),
        fire_on_start: 2,
        signal: TerminationSignal::Interrupt,
        trigger,
        handles: Vec::new(),
    };
    let mut executor = PhaseExecutor::new(telemetry, guard, options());

    let result = executor
        .run(vec![
            phase("tokenizer", "true"),
            phase("base_train", "true"),
            phase("mid_train", "exec sleep 30"),
            phase("sft", "true"),
        ])
        .await
        .expect("pipeline runs");

    assert_eq!(
        result.outcome,
        PipelineOutcome::Interrupted {
            phase: Some(PhaseName::new("mid_train").unwrap()),
            signal: TerminationSignal::Interrupt,
        }
    );
    assert_eq!(result.outcome.exit_code(), 130);

    let handles = &executor.telemetry().handles;
    assert_eq!(handles.len(), 3);
    let interrupted = &handles[2];
    assert!(!process_alive(interrupted.pid), "sampler must not outlive the run");

    let sidecar = read_sidecar(&interrupted.paths.meta_path).expect("sidecar");
    assert_eq!(sidecar.fields["end_reason"], EndReason::Interrupted.as_str());
    assert!(executor.shutdown().await.is_none());
}

#[tokio::test]
async fn sidecars_differ_only_in_timestamps() {
    let fixture = Fixture::new();
    let mut supervisor = fixture.supervisor();
    let name = PhaseName::new("eval").unwrap();

    let mut sidecars = Vec::new();
    for _ in 0..2 {
        let handle = supervisor.start(&name).await.expect("start");
        tokio::time::sleep(Duration::from_millis(300)).await;
        supervisor.stop().await.expect("live window");
        sidecars.push(read(&handle.paths.meta_path));
    }

    let without_timestamps = |text: &str| {
        text.lines()
            .filter(|line| !line.starts_with("started_at=") && !line.starts_with("ended_at="))
            .map(str::to_string)
            .collect::<Vec<_>>()
    };
    assert_eq!(without_timestamps(&sidecars[0]), without_timestamps(&sidecars[1]));
    assert_ne!(sidecars[0], sidecars[1]);
}

#[tokio::test]
async fn missing_tool_starts_nothing() {
    let fixture = Fixture::new();
    let mut config = fixture.config();
    config.tool = fixture
        .artifacts_root
        .join("no-such-tool")
        .display()
        .to_string();

    let mut supervisor = phase_telemetry::TelemetrySupervisor::from_config(config.clone())
        .expect("valid config");
    let error = supervisor
        .start(&PhaseName::new("tokenizer").unwrap())
        .await
        .expect_err("tool is missing");
    assert!(matches!(error, TelemetryError::ToolUnavailable { .. }));
    assert!(supervisor.active_handle().is_none());

    let (guard, _trigger) = SignalGuard::manual();
    let mut executor = PhaseExecutor::new(supervisor, guard, options());
    let error = executor
        .run(vec![phase("tokenizer", "true")])
        .await
        .expect_err("preflight fails");
    assert!(matches!(error, TelemetryError::ToolUnavailable { .. }));

    let bundles = ArtifactStore::new(&config.artifacts_root)
        .discover()
        .expect("discover");
    assert!(bundles.is_empty());
}

#[tokio::test]
async fn second_start_is_rejected_and_first_window_survives() {
    let fixture = Fixture::new();
    let mut supervisor = fixture.supervisor();

    let first = supervisor
        .start(&PhaseName::new("base_train").unwrap())
        .await
        .expect("first start");
    let error = supervisor
        .start(&PhaseName::new("sft").unwrap())
        .await
        .expect_err("slot is occupied");

    assert!(error.is_invariant_violation());
    assert_eq!(supervisor.active_handle(), Some(&first));
    assert!(process_alive(first.pid));

    let report = supervisor.stop().await.expect("live window");
    assert_eq!(report.handle, first);
    assert!(!report.health.is_degraded());
    assert!(supervisor.stop().await.is_none());
}

#[tokio::test]
async fn completed_run_is_summarized_and_indexed() {
    let fixture = Fixture::new();
    let (guard, _trigger) = SignalGuard::manual();
    let mut executor = PhaseExecutor::new(fixture.supervisor(), guard, options());

    let result = executor
        .run(vec![phase("tokenizer", "sleep 0.2"), phase("sft", "sleep 0.2")])
        .await
        .expect("pipeline runs");
    assert!(result.outcome.is_success());

    let store = executor.telemetry().store().clone();
    let summary = RunSummary::from_result(&result, store.root());
    write_run_summary(&summary, &store, result.started_at).expect("summary");

    let index = build_index(&store).expect("index");
    write_index(&index, &store).expect("write index");

    assert_eq!(index.bundles.len(), 2);
    assert!(index
        .bundles
        .iter()
        .all(|bundle| bundle.meta["telemetry"] == "ok" && bundle.sample_bytes > 0));
    assert_eq!(index.runs.len(), 1);
    assert_eq!(index.runs[0].outcome, "completed");
    assert!(store.index_path().exists());
}
