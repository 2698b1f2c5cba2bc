//! Data processing modules.

pub mod chain;
pub mod fusion;
pub mod session;

// Re-export key types for convenience
pub use chain::{walk_chain, ChainBreak, ChainWalk};
pub use fusion::{
    fuse_sample, ChannelContribution, FusionError, FusionOutcome, FusionWarning, MergedPointCloud,
    SampleFusion,
};
pub use session::{
    run_session, CancelFlag, SampleReport, SampleStatus, SessionRunner, SessionSummary,
};
