//! Session runner: fuse every sample of one chain and hand the clouds to a sink.
//!
//! The chain is walked first (sequentially, it is a linked list), then the
//! samples are fused in parallel on a rayon pool. Reports come back in chain
//! order regardless of scheduling.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use rayon::prelude::*;

use super::chain::{walk_chain, ChainBreak};
use super::fusion::{FusionError, FusionWarning, SampleFusion};
use crate::config::FusionParams;
use crate::core::dataset::Dataset;
use crate::core::writers::CloudSink;

/// Exit status when every sample fused and was written.
pub const EXIT_OK: u8 = 0;
/// Exit status when at least one sample produced nothing.
pub const EXIT_SAMPLES_FAILED: u8 = 2;
/// Exit status when the run was interrupted.
pub const EXIT_CANCELLED: u8 = 130;

/// Shared flag checked before each sample starts.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What happened to one sample.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleStatus {
    /// Fused and written to `path`.
    Written { path: PathBuf, points: usize },
    /// No channel contributed a point; nothing was written.
    Empty,
    /// The sample could not be fused or written.
    Failed { reason: String },
    /// Skipped because the run was cancelled.
    Cancelled,
}

/// Per-sample result, in chain order.
#[derive(Debug, Clone)]
pub struct SampleReport {
    pub sample_token: String,
    pub status: SampleStatus,
    pub channels_fused: usize,
    pub warnings: Vec<FusionWarning>,
}

impl SampleReport {
    fn new(sample_token: &str, status: SampleStatus) -> Self {
        Self {
            sample_token: sample_token.to_string(),
            status,
            channels_fused: 0,
            warnings: Vec::new(),
        }
    }

    /// Empty or failed: this sample produced no output.
    pub fn is_failure(&self) -> bool {
        matches!(
            self.status,
            SampleStatus::Empty | SampleStatus::Failed { .. }
        )
    }
}

/// Outcome of a whole session.
#[derive(Debug, Clone, Default)]
pub struct SessionSummary {
    pub samples: Vec<SampleReport>,
    /// Why the chain walk stopped before the last token, if it did.
    pub chain_break: Option<ChainBreak>,
}

impl SessionSummary {
    pub fn written(&self) -> usize {
        self.samples
            .iter()
            .filter(|r| matches!(r.status, SampleStatus::Written { .. }))
            .count()
    }

    pub fn total_points(&self) -> usize {
        self.samples
            .iter()
            .map(|r| match r.status {
                SampleStatus::Written { points, .. } => points,
                _ => 0,
            })
            .sum()
    }

    /// Tokens of samples that produced no output.
    pub fn failed(&self) -> Vec<&str> {
        self.samples
            .iter()
            .filter(|r| r.is_failure())
            .map(|r| r.sample_token.as_str())
            .collect()
    }

    pub fn cancelled(&self) -> usize {
        self.samples
            .iter()
            .filter(|r| r.status == SampleStatus::Cancelled)
            .count()
    }

    /// Every recoverable condition with the sample it was raised for.
    pub fn warnings(&self) -> impl Iterator<Item = (&str, &FusionWarning)> {
        self.samples.iter().flat_map(|r| {
            r.warnings
                .iter()
                .map(move |w| (r.sample_token.as_str(), w))
        })
    }

    /// One line per recoverable condition, each naming the sample it was raised
    /// for, followed by the chain break if the walk stopped early.
    pub fn condition_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .warnings()
            .map(|(sample, warning)| format!("[{}] {}: {}", warning.kind(), sample, warning))
            .collect();
        if let Some(reason) = &self.chain_break {
            lines.push(reason.to_string());
        }
        lines
    }

    /// Occurrences per condition kind, chain breaks included.
    pub fn warning_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for (_, warning) in self.warnings() {
            *counts.entry(warning.kind()).or_insert(0) += 1;
        }
        match &self.chain_break {
            Some(ChainBreak::BrokenChainLink { .. }) => {
                *counts.entry("BrokenChainLink").or_insert(0) += 1;
            }
            Some(ChainBreak::ChainCycle { .. }) => {
                *counts.entry("ChainCycle").or_insert(0) += 1;
            }
            None => {}
        }
        counts
    }

    /// Process exit status for this session.
    pub fn exit_code(&self) -> u8 {
        if self.cancelled() > 0 {
            EXIT_CANCELLED
        } else if self.samples.iter().any(SampleReport::is_failure) {
            EXIT_SAMPLES_FAILED
        } else {
            EXIT_OK
        }
    }
}

type ProgressFn<'a> = dyn Fn(&SampleReport) + Sync + 'a;

/// Fuses the samples of one chain and writes them to a sink.
pub struct SessionRunner<'a, D: Dataset + ?Sized, S: CloudSink + ?Sized> {
    dataset: &'a D,
    params: &'a FusionParams,
    sink: &'a S,
    cancel: CancelFlag,
    workers: Option<usize>,
    on_sample: Option<&'a ProgressFn<'a>>,
}

impl<'a, D: Dataset + ?Sized, S: CloudSink + ?Sized> SessionRunner<'a, D, S> {
    pub fn new(dataset: &'a D, params: &'a FusionParams, sink: &'a S) -> Self {
        Self {
            dataset,
            params,
            sink,
            cancel: CancelFlag::new(),
            workers: None,
            on_sample: None,
        }
    }

    pub fn cancel_flag(mut self, cancel: &CancelFlag) -> Self {
        self.cancel = cancel.clone();
        self
    }

    /// Worker thread count; `None` uses rayon's global pool.
    pub fn workers(mut self, workers: Option<usize>) -> Self {
        self.workers = workers.filter(|&n| n > 0);
        self
    }

    /// Called once per finished sample, from worker threads.
    pub fn on_sample(mut self, callback: &'a ProgressFn<'a>) -> Self {
        self.on_sample = Some(callback);
        self
    }

    /// Walk `first..=last` and process every reachable sample.
    ///
    /// Invalid parameters and an unknown `first` token fail the run; everything
    /// else is reported in the summary.
    pub fn run(&self, first: &str, last: &str) -> Result<SessionSummary, FusionError> {
        let fusion = SampleFusion::new(self.dataset, self.params)?;
        if self.dataset.get_sample(first).is_err() {
            return Err(FusionError::SampleNotFound(first.to_string()));
        }

        let mut walk = walk_chain(self.dataset, first, last);
        let tokens: Vec<String> = walk.by_ref().collect();
        let chain_break = walk.interruption().cloned();
        info!("Sample chain: {} samples from {}", tokens.len(), first);

        let process = || -> Vec<SampleReport> {
            tokens
                .par_iter()
                .map(|token| {
                    let report = self.process_sample(&fusion, token);
                    if let Some(callback) = self.on_sample {
                        callback(&report);
                    }
                    report
                })
                .collect()
        };

        let samples = match self.workers {
            Some(n) => match rayon::ThreadPoolBuilder::new().num_threads(n).build() {
                Ok(pool) => pool.install(process),
                Err(e) => {
                    warn!("Could not start {} workers ({}), using the global pool", n, e);
                    process()
                }
            },
            None => process(),
        };

        let summary = SessionSummary {
            samples,
            chain_break,
        };
        info!(
            "Session finished: {} written, {} failed, {} cancelled",
            summary.written(),
            summary.failed().len(),
            summary.cancelled()
        );
        Ok(summary)
    }

    fn process_sample(&self, fusion: &SampleFusion<'_, D>, token: &str) -> SampleReport {
        if self.cancel.is_cancelled() {
            return SampleReport::new(token, SampleStatus::Cancelled);
        }

        let outcome = match fusion.fuse_sample(token) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Sample {}: {}", token, e);
                return SampleReport::new(
                    token,
                    SampleStatus::Failed {
                        reason: e.to_string(),
                    },
                );
            }
        };

        let channels_fused = outcome.channels_fused();
        let status = if outcome.is_empty() {
            SampleStatus::Empty
        } else {
            match self.sink.write(token, &outcome.cloud.cloud) {
                Ok(path) => {
                    let points = outcome.cloud.len();
                    debug!("Sample {}: {} points -> {}", token, points, path.display());
                    SampleStatus::Written {
                        path,
                        points: outcome.cloud.len(),
                    }
                }
                Err(e) => {
                    error!("Sample {}: {}", token, e);
                    SampleStatus::Failed {
                        reason: e.to_string(),
                    }
                }
            }
        };

        SampleReport {
            sample_token: outcome.sample_token,
            status,
            channels_fused,
            warnings: outcome.warnings,
        }
    }
}

/// Fuse every sample from `first` to `last` and write each to `sink`.
pub fn run_session<D, S>(
    dataset: &D,
    first: &str,
    last: &str,
    params: &FusionParams,
    sink: &S,
    cancel: &CancelFlag,
    workers: Option<usize>,
) -> Result<SessionSummary, FusionError>
where
    D: Dataset + ?Sized,
    S: CloudSink + ?Sized,
{
    SessionRunner::new(dataset, params, sink)
        .cancel_flag(cancel)
        .workers(workers)
        .run(first, last)
}
