use std::path::PathBuf;

use super::models::Toolchain;

// States of one reconciliation run.
#[derive(Clone, Debug)]
pub enum RunState {
    Check,
    Build,
    Publish {
        toolchain: Toolchain,
        version: String,
        output: PathBuf,
    },
    Skipped {
        version: String,
    },
    Published {
        tag: String,
        asset: String,
        release_id: u64,
    },
}

impl RunState {
    pub fn label(&self) -> &'static str {
        match self {
            RunState::Check => "check",
            RunState::Build => "build",
            RunState::Publish { .. } => "publish",
            RunState::Skipped { .. } => "skipped",
            RunState::Published { .. } => "published",
        }
    }

    #[cfg(test)]
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Skipped { .. } | RunState::Published { .. })
    }
}

/// Whether this run rebuilds, computed once from the two tag lookups.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildDecision {
    Skip { version: String },
    Build { reason: String },
}

/// What to do when a tag lookup fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Rebuild anyway.
    #[default]
    FailOpen,
    /// Stop the run with the lookup error.
    FailClosed,
}
