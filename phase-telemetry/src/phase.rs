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

//! Named pipeline stages.

use crate::error::{Result, TelemetryError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A validated phase name, safe to embed in artifact file names.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhaseName(String);

impl PhaseName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("must not be empty")
        } else if name.starts_with('.') {
            Some("must not start with '.'")
        } else if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            Some("only [A-Za-z0-9._-] are allowed")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(TelemetryError::InvalidPhaseName { name, reason }),
            None => Ok(Self(name)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PhaseName {
    type Err = TelemetryError;

    fn from_str(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<String> for PhaseName {
    type Error = TelemetryError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<PhaseName> for String {
    fn from(value: PhaseName) -> Self {
        value.0
    }
}

/// Executable plus argument list of a phase's primary command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Splits `[program, args...]`; `None` when the list is empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.iter().cloned()))
    }

    pub fn render(&self) -> String {
        render_command_line(&self.program, &self.args)
    }
}

/// A planned stage: what to run, not yet started.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhaseSpec {
    pub name: PhaseName,
    pub command: CommandLine,
}

impl PhaseSpec {
    pub fn new(name: PhaseName, command: CommandLine) -> Self {
        Self { name, command }
    }
}

/// A stage that has begun. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Phase {
    name: PhaseName,
    command: CommandLine,
    started_at: DateTime<Utc>,
}

impl Phase {
    pub fn begin(spec: PhaseSpec) -> Self {
        Self {
            name: spec.name,
            command: spec.command,
            started_at: Utc::now(),
        }
    }

    pub fn name(&self) -> &PhaseName {
        &self.name
    }

    pub fn command(&self) -> &CommandLine {
        &self.command
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// Renders an argv for humans, quoting only tokens that need it.
pub fn render_command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .map(quote_if_needed)
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote_if_needed(token: &str) -> String {
    let plain = !token.is_empty()
        && token.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/' | '=' | ',' | ':' | '+')
        });
    if plain {
        token.to_string()
    } else {
        shell_escape(token)
    }
}

pub fn shell_escape(value: &str) -> String {
    let escaped = value.replace('\'', "'\"'\"'");
    format!("'{escaped}'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_name_accepts_pipeline_style_names() {
        for name in ["tokenizer", "base_train", "mid-train", "sft.eval", "Phase2"] {
            assert!(PhaseName::new(name).is_ok(), "{name} should be accepted");
        }
    }

    #[test]
    fn phase_name_rejects_path_like_names() {
        for name in ["", ".hidden", "a/b", "a b", "../up", "naïve"] {
            let error = PhaseName::new(name).expect_err(name);
            assert!(matches!(error, TelemetryError::InvalidPhaseName { .. }));
        }
    }

    #[test]
    fn command_line_from_argv_splits_program() {
        let argv = vec!["python".to_string(), "-m".to_string(), "train".to_string()];
        let command = CommandLine::from_argv(&argv).expect("non-empty argv");
        assert_eq!(command.program, "python");
        assert_eq!(command.args, vec!["-m", "train"]);
        assert!(CommandLine::from_argv(&[]).is_none());
    }

    #[test]
    fn render_quotes_only_unsafe_tokens() {
        let rendered = render_command_line(
            "nvidia-smi",
            &["--query-gpu=index,name".to_string(), "it's here".to_string()],
        );
        assert_eq!(rendered, "nvidia-smi --query-gpu=index,name 'it'\"'\"'s here'");
    }
}
