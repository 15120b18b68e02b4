//! mdsync core library
//!
//! Deployment pipeline between a local metadata source tree and a remote
//! metadata store: file-set resolution, conflict detection, test selection,
//! packaging, result interpretation and change tracking.

pub mod archive;
pub mod catalog;
pub mod config;
pub mod conflict;
pub mod destructive;
pub mod error;
pub mod fileset;
pub mod hash;
pub mod interpret;
pub mod orchestrator;
pub mod project;
pub mod remote;
pub mod report;
pub mod tests_selection;
pub mod tracking;

/// Re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::config::{DeployConfig, Settings};
    pub use crate::error::MdsyncError;
    pub use crate::hash::HashAlgorithm;

    // Pipeline
    pub use crate::catalog::{MetadataCatalog, StaticCatalog};
    pub use crate::fileset::{CandidateFile, FileSet, FileSetMode, FileSetResolver};
    pub use crate::orchestrator::{Action, DeployOrchestrator};
    pub use crate::project::Project;
    pub use crate::tests_selection::TestSelection;

    // Remote
    pub use crate::remote::{DeployOptions, DeployOutcome, MetadataRemote, MirrorRemote};

    // Output
    pub use crate::report::{Outcome, Report};

    // Change tracking
    pub use crate::tracking::{ChangeTracker, ChangeTrackingStore};
}
