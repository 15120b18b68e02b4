//! Error taxonomy for the deploy pipeline.
//!
//! Most functions return `anyhow::Result` and attach context to I/O failures.
//! The variants here mark the failures whose class changes how a run ends:
//! configuration and input errors abort before any remote call, remote errors
//! end the run with a failure report.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MdsyncError {
    /// Missing or invalid option, malformed test selection.
    #[error("configuration error: {0}")]
    Config(String),

    /// Unreadable list entry, unknown component directory.
    #[error("input error: {0}")]
    Input(String),

    /// The remote collaborator failed to answer.
    #[error("remote call failed: {0}")]
    Remote(String),
}

impl MdsyncError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    /// True for errors that must stop a run before the deploy call.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Input(_))
    }
}
