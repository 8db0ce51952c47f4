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

//! Artifact Store naming and layout.
//!
//! Every file this crate produces is named here. Layout under the root:
//!
//! ```text
//! gpu_<stamp>_<phase>.csv       sample stream
//! gpu_<stamp>_<phase>.meta.txt  metadata sidecar
//! gpu_<stamp>_<phase>.err       sampler stderr
//! run_<stamp>.json / .txt       run summary
//! index.json                    artifact index
//! ```
//!
//! `<stamp>` is fixed width UTC with millisecond resolution, so a plain
//! filename sort is chronological.

use crate::error::{Result, TelemetryError};
use crate::phase::PhaseName;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const SAMPLE_PREFIX: &str = "gpu_";
pub const SAMPLE_SUFFIX: &str = ".csv";
pub const META_SUFFIX: &str = ".meta.txt";
pub const ERR_SUFFIX: &str = ".err";
pub const RUN_SUMMARY_PREFIX: &str = "run_";
pub const INDEX_FILE_NAME: &str = "index.json";

const STAMP_FORMAT: &str = "%Y%m%dT%H%M%S%3fZ";
const STAMP_LEN: usize = 19;

/// The three files of one phase's telemetry window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPaths {
    pub sample_path: PathBuf,
    pub meta_path: PathBuf,
    pub err_path: PathBuf,
}

/// One discovered bundle, as parsed back from the file names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactBundle {
    pub phase: PhaseName,
    pub stamp: String,
    pub started_at: DateTime<Utc>,
    pub paths: ArtifactPaths,
}

impl ArtifactBundle {
    /// Stable identifier for selecting a bundle in a report.
    pub fn key(&self) -> String {
        format!("{}__{}", self.phase, self.stamp)
    }
}

#[derive(Clone, Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the root directory; calling it again is harmless.
    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .map_err(|e| TelemetryError::io("unable to create artifact root", &self.root, e))
    }

    /// Names the bundle for `phase` started at `timestamp`. Pure: touches no files.
    pub fn path_for(&self, phase: &PhaseName, timestamp: DateTime<Utc>) -> ArtifactPaths {
        let base = format!("{SAMPLE_PREFIX}{}_{phase}", format_stamp(timestamp));
        ArtifactPaths {
            sample_path: self.root.join(format!("{base}{SAMPLE_SUFFIX}")),
            meta_path: self.root.join(format!("{base}{META_SUFFIX}")),
            err_path: self.root.join(format!("{base}{ERR_SUFFIX}")),
        }
    }

    /// JSON and text paths of the summary for a run started at `timestamp`.
    pub fn run_summary_paths(&self, timestamp: DateTime<Utc>) -> (PathBuf, PathBuf) {
        let base = format!("{RUN_SUMMARY_PREFIX}{}", format_stamp(timestamp));
        (
            self.root.join(format!("{base}.json")),
            self.root.join(format!("{base}.txt")),
        )
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE_NAME)
    }

    /// Lists every bundle under the root in chronological order. Files that do
    /// not follow the naming convention are skipped. A missing root is empty.
    pub fn discover(&self) -> Result<Vec<ArtifactBundle>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.root)
            .map_err(|e| TelemetryError::io("unable to read artifact root", &self.root, e))?;

        let mut bundles = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| TelemetryError::io("unable to read artifact root", &self.root, e))?;
            let file_name = entry.file_name();
            let Some((stamp, phase)) = parse_sample_file_name(&file_name.to_string_lossy()) else {
                continue;
            };
            let Some(started_at) = parse_stamp(&stamp) else {
                continue;
            };
            bundles.push(ArtifactBundle {
                paths: self.path_for(&phase, started_at),
                phase,
                stamp,
                started_at,
            });
        }

        bundles.sort_by(|a, b| {
            a.stamp
                .cmp(&b.stamp)
                .then_with(|| a.phase.as_str().cmp(b.phase.as_str()))
        });
        Ok(bundles)
    }
}

pub fn format_stamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format(STAMP_FORMAT).to_string()
}

pub fn parse_stamp(stamp: &str) -> Option<DateTime<Utc>> {
    if stamp.len() != STAMP_LEN || !stamp.is_ascii() || !stamp.ends_with('Z') {
        return None;
    }
    let (seconds_part, rest) = stamp.split_at(15);
    let millis = rest.trim_end_matches('Z');
    if millis.len() != 3 || !millis.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(seconds_part, "%Y%m%dT%H%M%S").ok()?;
    let millis: i64 = millis.parse().ok()?;
    Some(naive.and_utc() + ChronoDuration::milliseconds(millis))
}

/// Splits `gpu_<stamp>_<phase>.csv` into its stamp and phase name.
fn parse_sample_file_name(file_name: &str) -> Option<(String, PhaseName)> {
    let body = file_name
        .strip_prefix(SAMPLE_PREFIX)?
        .strip_suffix(SAMPLE_SUFFIX)?;
    let (stamp, phase) = body.split_once('_')?;
    let phase = PhaseName::new(phase).ok()?;
    Some((stamp.to_string(), phase))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn phase(name: &str) -> PhaseName {
        PhaseName::new(name).expect("valid phase name")
    }

    fn instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 5).unwrap() + ChronoDuration::milliseconds(42)
    }

    #[test]
    fn path_for_builds_sibling_files_from_phase_and_stamp() {
        let store = ArtifactStore::new("/metrics");
        let paths = store.path_for(&phase("base_train"), instant());

        assert_eq!(
            paths.sample_path,
            PathBuf::from("/metrics/gpu_20261018T093005042Z_base_train.csv")
        );
        assert_eq!(
            paths.meta_path,
            PathBuf::from("/metrics/gpu_20261018T093005042Z_base_train.meta.txt")
        );
        assert_eq!(
            paths.err_path,
            PathBuf::from("/metrics/gpu_20261018T093005042Z_base_train.err")
        );
    }

    #[test]
    fn same_instant_different_phases_do_not_collide() {
        let store = ArtifactStore::new("/metrics");
        let a = store.path_for(&phase("tokenizer"), instant());
        let b = store.path_for(&phase("tok_eval"), instant());
        assert_ne!(a.sample_path, b.sample_path);
        assert_ne!(a.meta_path, b.meta_path);
        assert_ne!(a.err_path, b.err_path);
    }

    #[test]
    fn same_phase_one_millisecond_apart_does_not_collide() {
        let store = ArtifactStore::new("/metrics");
        let a = store.path_for(&phase("sft"), instant());
        let b = store.path_for(&phase("sft"), instant() + ChronoDuration::milliseconds(1));
        assert_ne!(a.sample_path, b.sample_path);
    }

    #[test]
    fn filename_sort_is_chronological_across_phases() {
        let store = ArtifactStore::new("/metrics");
        let earlier = store.path_for(&phase("zeta"), instant());
        let later = store.path_for(&phase("alpha"), instant() + ChronoDuration::seconds(1));
        assert!(earlier.sample_path < later.sample_path);
    }

    #[test]
    fn stamp_round_trips_through_parse() {
        let stamp = format_stamp(instant());
        assert_eq!(stamp, "20261018T093005042Z");
        assert_eq!(parse_stamp(&stamp), Some(instant()));
        assert_eq!(parse_stamp("20261018T093005Z"), None);
        assert_eq!(parse_stamp("20261018T0930050x2Z"), None);
    }

    #[test]
    fn ensure_root_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path().join("nested").join("metrics"));
        store.ensure_root().expect("first create");
        store.ensure_root().expect("second create");
        assert!(store.root().is_dir());
    }

    #[test]
    fn discover_ignores_foreign_files_and_sorts_by_stamp() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path());

        let later = store.path_for(&phase("mid_train"), instant() + ChronoDuration::seconds(30));
        let earlier = store.path_for(&phase("base_train"), instant());
        fs::write(&later.sample_path, "").unwrap();
        fs::write(&earlier.sample_path, "").unwrap();
        fs::write(dir.path().join("gpu_notastamp_x.csv"), "").unwrap();
        fs::write(dir.path().join("report.html"), "").unwrap();
        fs::write(&earlier.meta_path, "").unwrap();

        let bundles = store.discover().expect("discover");
        let phases = bundles
            .iter()
            .map(|bundle| bundle.phase.as_str())
            .collect::<Vec<_>>();
        assert_eq!(phases, vec!["base_train", "mid_train"]);
        assert_eq!(bundles[0].paths, earlier);
        assert_eq!(bundles[0].key(), "base_train__20261018T093005042Z");
    }

    #[test]
    fn discover_on_missing_root_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path().join("absent"));
        assert!(store.discover().expect("discover").is_empty());
    }
}
