//! Sample chain traversal.
//!
//! Walks the `next` links of a session's samples from a first token to a
//! last token. Gaps in recorded metadata are expected, so a missing link
//! truncates the walk with a warning instead of failing it.

use std::collections::HashSet;
use std::fmt;

use log::warn;

use crate::core::dataset::Dataset;

/// Why a chain walk stopped before reaching its last token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainBreak {
    /// `token` was absent from the dataset, or its `next` link was null.
    BrokenChainLink { token: String },
    /// `token` was about to be visited a second time.
    ChainCycle { token: String },
}

impl ChainBreak {
    pub fn token(&self) -> &str {
        match self {
            ChainBreak::BrokenChainLink { token } | ChainBreak::ChainCycle { token } => token,
        }
    }
}

impl fmt::Display for ChainBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainBreak::BrokenChainLink { token } => write!(f, "broken chain link at {token}"),
            ChainBreak::ChainCycle { token } => write!(f, "chain cycle at {token}"),
        }
    }
}

/// Lazy iterator over the sample tokens from `first` to `last` inclusive.
///
/// The walk is finite and cannot be restarted. After it is exhausted,
/// [`ChainWalk::interruption`] tells whether it ended at `last` or stopped
/// early.
pub struct ChainWalk<'a, D: Dataset + ?Sized> {
    dataset: &'a D,
    last: String,
    current: Option<String>,
    visited: HashSet<String>,
    interruption: Option<ChainBreak>,
}

impl<'a, D: Dataset + ?Sized> ChainWalk<'a, D> {
    pub fn new(dataset: &'a D, first: &str, last: &str) -> Self {
        Self {
            dataset,
            last: last.to_string(),
            current: Some(first.to_string()),
            visited: HashSet::new(),
            interruption: None,
        }
    }

    /// The reason the walk stopped early, if it did.
    pub fn interruption(&self) -> Option<&ChainBreak> {
        self.interruption.as_ref()
    }

    /// Whether the walk reached the last token.
    pub fn is_complete(&self) -> bool {
        self.current.is_none() && self.interruption.is_none()
    }

    fn stop(&mut self, reason: ChainBreak) {
        warn!("Sample chain stopped early: {}", reason);
        self.interruption = Some(reason);
    }
}

impl<D: Dataset + ?Sized> Iterator for ChainWalk<'_, D> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let current = self.current.take()?;

        if current == self.last {
            return Some(current);
        }

        if !self.visited.insert(current.clone()) {
            self.stop(ChainBreak::ChainCycle { token: current });
            return None;
        }

        let sample = match self.dataset.get_sample(&current) {
            Ok(sample) => sample,
            Err(_) => {
                self.stop(ChainBreak::BrokenChainLink { token: current });
                return None;
            }
        };

        match &sample.next {
            Some(next) => self.current = Some(next.clone()),
            None => {
                // The chain ends here without reaching `last`; this token is
                // still valid, only its outgoing link is missing.
                self.interruption = Some(ChainBreak::BrokenChainLink {
                    token: current.clone(),
                });
                warn!(
                    "Sample chain stopped early: {} has no next link",
                    current
                );
            }
        }

        Some(current)
    }
}

/// Walk the sample chain of `dataset` from `first` to `last`.
pub fn walk_chain<'a, D: Dataset + ?Sized>(
    dataset: &'a D,
    first: &str,
    last: &str,
) -> ChainWalk<'a, D> {
    ChainWalk::new(dataset, first, last)
}
