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

//! Signal/Exit Guard.
//!
//! Once installed, SIGINT and SIGTERM no longer kill the orchestrator outright:
//! they are delivered here so the executor can stop the live sampler first and
//! then exit with the conventional `128 + signo` status.

use crate::observability as events;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationSignal {
    Interrupt,
    Terminate,
}

impl TerminationSignal {
    pub fn signo(self) -> i32 {
        match self {
            Self::Interrupt => libc::SIGINT,
            Self::Terminate => libc::SIGTERM,
        }
    }

    /// Shell convention for a process ended by this signal.
    pub fn exit_code(self) -> i32 {
        128 + self.signo()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
        }
    }
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct SignalGuard {
    receiver: mpsc::UnboundedReceiver<TerminationSignal>,
    listener: Option<JoinHandle<()>>,
}

/// Test-side handle that delivers signals to a [`SignalGuard::manual`] guard.
#[derive(Clone)]
pub struct SignalTrigger {
    sender: mpsc::UnboundedSender<TerminationSignal>,
}

impl SignalTrigger {
    pub fn fire(&self, signal: TerminationSignal) {
        let _ = self.sender.send(signal);
    }
}

impl SignalGuard {
    /// Registers SIGINT/SIGTERM listeners. Must be called inside a tokio runtime.
    pub fn install() -> io::Result<Self> {
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let (sender, receiver) = mpsc::unbounded_channel();

        let listener = tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    Some(()) = sigint.recv() => TerminationSignal::Interrupt,
                    Some(()) = sigterm.recv() => TerminationSignal::Terminate,
                    else => break,
                };
                info!(event = events::GUARD_SIGNAL, signal = %received, "termination requested");
                if sender.send(received).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            receiver,
            listener: Some(listener),
        })
    }

    /// A guard fed only by the returned trigger.
    pub fn manual() -> (Self, SignalTrigger) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                receiver,
                listener: None,
            },
            SignalTrigger { sender },
        )
    }

    /// Waits for the next termination request. Never resolves once every
    /// sender is gone.
    pub async fn recv(&mut self) -> TerminationSignal {
        match self.receiver.recv().await {
            Some(signal) => signal,
            None => std::future::pending().await,
        }
    }

    /// A request that already arrived, if any.
    pub fn pending(&mut self) -> Option<TerminationSignal> {
        self.receiver.try_recv().ok()
    }

    /// Like [`Self::pending`], but first yields once so a signal the runtime
    /// has already observed reaches the channel before it is checked.
    pub async fn settle(&mut self) -> Option<TerminationSignal> {
        tokio::task::yield_now().await;
        self.pending()
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}
