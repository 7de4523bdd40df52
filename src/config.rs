// Copyright (c) 2026-present, journal-log
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::file::WASTE_FOLDER;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// Journal configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Folder the journal lives in
    pub path: PathBuf,

    /// Maximum size of one segment file; an append that would push the
    /// cursor past this bound is answered with a roll request instead
    pub max_file_size: u64,

    /// Number of record positions sampled per file when scoring
    pub sample_size: usize,

    /// Batch size for record fetches during a compaction rewrite
    pub batch_size: usize,

    /// Upper bound on the number of files rewritten in one compaction run
    pub max_compaction_run: usize,

    /// Score target for a run of length 1
    pub single_file_compaction_target: f64,

    /// Score target for a run of maximum length
    pub max_run_compaction_target: f64,

    /// How long retired files are kept in the waste folder
    pub waste_retention_period: Duration,

    /// Whether deleted segments are parked in the waste folder instead of
    /// being unlinked outright
    pub use_waste_folder: bool,

    /// Poll interval of the delete-pending handshake
    pub delete_timeout: Duration,

    /// Idle poll interval of the ledger merge coordinator
    pub merge_poll_interval: Duration,

    /// Seed for the sampling/selection PRNG; `None` seeds from the OS
    pub prng_seed: Option<u64>,
}

impl Config {
    /// Creates a config with the default parameters.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().into(),
            max_file_size: /* 3 GiB */ 3 * 1_024 * 1_024 * 1_024,
            sample_size: 200,
            batch_size: 32,
            max_compaction_run: 4,
            single_file_compaction_target: 60.0,
            max_run_compaction_target: 80.0,
            waste_retention_period: Duration::from_secs(86_400),
            use_waste_folder: true,
            delete_timeout: Duration::from_millis(10_000),
            merge_poll_interval: Duration::from_secs(10),
            prng_seed: None,
        }
    }

    /// Sets the maximum segment file size.
    #[must_use]
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Sets the per-file scoring sample size.
    #[must_use]
    pub fn sample_size(mut self, n: usize) -> Self {
        self.sample_size = n;
        self
    }

    /// Sets the rewrite fetch batch size.
    #[must_use]
    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    /// Sets the maximum compaction run length.
    ///
    /// # Panics
    ///
    /// Panics if `n` is zero.
    #[must_use]
    pub fn max_compaction_run(mut self, n: usize) -> Self {
        assert!(n > 0, "compaction run length must be positive");
        self.max_compaction_run = n;
        self
    }

    /// Sets the single-file and max-run score targets.
    #[must_use]
    pub fn compaction_targets(mut self, single: f64, max_run: f64) -> Self {
        self.single_file_compaction_target = single;
        self.max_run_compaction_target = max_run;
        self
    }

    /// Sets the waste retention period.
    #[must_use]
    pub fn waste_retention_period(mut self, period: Duration) -> Self {
        self.waste_retention_period = period;
        self
    }

    /// Enables or disables the waste folder.
    #[must_use]
    pub fn use_waste_folder(mut self, yes: bool) -> Self {
        self.use_waste_folder = yes;
        self
    }

    /// Sets the delete-pending poll interval.
    #[must_use]
    pub fn delete_timeout(mut self, timeout: Duration) -> Self {
        self.delete_timeout = timeout;
        self
    }

    /// Sets the PRNG seed, for reproducible sampling.
    #[must_use]
    pub fn prng_seed(mut self, seed: u64) -> Self {
        self.prng_seed = Some(seed);
        self
    }

    /// Path of the waste folder.
    #[must_use]
    pub fn waste_path(&self) -> PathBuf {
        self.path.join(WASTE_FOLDER)
    }
}
