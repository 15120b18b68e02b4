//! The remote metadata store.
//!
//! The pipeline only sees [`MetadataRemote`]. Session handling, transport and
//! the server-side deploy live behind it.

pub mod mirror;
pub mod types;

use std::collections::BTreeMap;

pub use mirror::MirrorRemote;
pub use types::{
    ComponentFailure, CoverageResult, CoverageWarning, DeployOptions, DeployOutcome,
    DeployedComponent, RemoteSnapshot, RetrieveOutcome, Severity, TestFailure, TestRunOutcome,
};

pub trait MetadataRemote {
    /// Live last-modified lookup for source-relative keys. Keys unknown to the
    /// remote are absent from the result.
    fn describe(&self, keys: &[String]) -> anyhow::Result<BTreeMap<String, RemoteSnapshot>>;

    /// Send one deployment archive and wait for the outcome.
    fn deploy(&self, archive: &[u8], options: &DeployOptions) -> anyhow::Result<DeployOutcome>;

    /// Fetch the whole remote source tree.
    fn retrieve(&self) -> anyhow::Result<RetrieveOutcome>;
}
