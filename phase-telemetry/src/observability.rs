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

//! Canonical event names for structured log lines.
//!
//! Field keys used alongside them: `event`, `phase`, `pid`, `sample_path`,
//! `status`, `reason`, `signal`.

pub const TELEMETRY_START: &str = "telemetry.start";
pub const TELEMETRY_STOP: &str = "telemetry.stop";
pub const TELEMETRY_DEGRADED: &str = "telemetry.degraded";
pub const TELEMETRY_TEARDOWN: &str = "telemetry.teardown";

pub const PHASE_BEGIN: &str = "phase.begin";
pub const PHASE_END: &str = "phase.end";

pub const PIPELINE_STATE: &str = "pipeline.state";
pub const PIPELINE_ABORTED: &str = "pipeline.aborted";
pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
pub const PIPELINE_INTERRUPTED: &str = "pipeline.interrupted";

pub const GUARD_SIGNAL: &str = "guard.signal";
