// Copyright (c) 2026-present, journal-log
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::Config;

/// Score targets for compaction runs, lifted from the configuration.
#[derive(Copy, Clone, Debug)]
pub struct CompactionTargets {
    /// Target mean score for a run of length 1
    pub single_file: f64,

    /// Target mean score for a run of maximum length
    pub max_run: f64,
}

impl From<&Config> for CompactionTargets {
    fn from(config: &Config) -> Self {
        Self {
            single_file: config.single_file_compaction_target,
            max_run: config.max_run_compaction_target,
        }
    }
}

/// One sampled record, reduced to what scoring needs.
#[derive(Copy, Clone, Debug)]
pub struct Sample {
    /// Whether the snapshot counts the record as active
    pub active: bool,

    /// Payload bytes of the record (value, CRC excluded)
    pub payload_bytes: u64,
}

/// Scores one file from its sample: the percentage of sampled payload
/// bytes that are still active.
///
/// 100.0 means nothing to reclaim; an empty sample scores 100.0 as well,
/// since an empty file is not worth a rewrite.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn score_file(samples: &[Sample]) -> f64 {
    let mut active = 0u64;
    let mut replaced = 0u64;

    for sample in samples {
        if sample.active {
            active += sample.payload_bytes;
        } else {
            replaced += sample.payload_bytes;
        }
    }

    if active + replaced == 0 {
        return 100.0;
    }

    100.0 * active as f64 / (active + replaced) as f64
}

/// Scores a run of files against its length-adjusted target.
///
/// A longer run is allowed a higher mean file score: rewriting four files
/// in one go amortizes better than rewriting one. The target grows
/// linearly from the single-file target to the max-run target; the run
/// score is target minus mean, so positive means "worth executing".
///
/// The empty run scores 0.0.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn score_run(scores: &[f64], max_run_length: usize, targets: CompactionTargets) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }

    let len = scores.len();

    let target = if max_run_length <= 1 || len == 1 {
        targets.single_file
    } else {
        targets.single_file
            + (targets.max_run - targets.single_file) * (len - 1) as f64
                / (max_run_length - 1) as f64
    };

    let mean = scores.iter().sum::<f64>() / len as f64;

    target - mean
}

/// A contiguous run of candidates, by index into the scored list.
#[derive(Clone, Debug, PartialEq)]
pub struct RunSelection {
    /// Index of the run's first candidate
    pub start: usize,

    /// Number of candidates in the run
    pub len: usize,

    /// The run's score
    pub score: f64,
}

impl RunSelection {
    /// Index range of the run within the candidate list.
    #[must_use]
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.len
    }
}

/// Selects the best contiguous run of candidates to rewrite.
///
/// One forward pass over the candidates (which must be in manifest
/// order). At every candidate the current run either extends by it or
/// restarts at it, whichever scores better; a run at maximum length
/// always restarts. The best run seen anywhere along the pass wins.
///
/// The restart choice doubles as back-tracking: a promising run can be
/// abandoned for a single low-scoring file and regrow from there.
///
/// Returns `None` for an empty candidate list.
#[must_use]
pub fn select_best_run(
    scores: &[f64],
    max_run_length: usize,
    targets: CompactionTargets,
) -> Option<RunSelection> {
    if scores.is_empty() || max_run_length == 0 {
        return None;
    }

    let score_of = |start: usize, len: usize| {
        scores
            .get(start..start + len)
            .map_or(f64::MIN, |run| score_run(run, max_run_length, targets))
    };

    let mut current = RunSelection {
        start: 0,
        len: 0,
        score: 0.0,
    };
    let mut best: Option<RunSelection> = None;

    for idx in 0..scores.len() {
        let restarted = RunSelection {
            start: idx,
            len: 1,
            score: score_of(idx, 1),
        };

        current = if current.len >= max_run_length || current.len == 0 {
            restarted
        } else {
            let extended = RunSelection {
                start: current.start,
                len: current.len + 1,
                score: score_of(current.start, current.len + 1),
            };

            if extended.score > restarted.score {
                extended
            } else {
                restarted
            }
        };

        if best.as_ref().map_or(true, |b| current.score > b.score) {
            best = Some(current.clone());
        }
    }

    best
}
