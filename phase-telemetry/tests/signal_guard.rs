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

// Delivers real signals to this test process, so it lives in its own binary.

use phase_telemetry::{SignalGuard, TerminationSignal};
use std::time::Duration;

#[tokio::test]
async fn installed_guard_turns_process_signals_into_requests() {
    let mut guard = SignalGuard::install().expect("install guard");

    for (signo, expected) in [
        (libc::SIGTERM, TerminationSignal::Terminate),
        (libc::SIGINT, TerminationSignal::Interrupt),
    ] {
        assert_eq!(unsafe { libc::kill(libc::getpid(), signo) }, 0);
        let received = tokio::time::timeout(Duration::from_secs(5), guard.recv())
            .await
            .expect("signal delivered");
        assert_eq!(received, expected);
        assert_eq!(received.exit_code(), 128 + signo);
    }
}
