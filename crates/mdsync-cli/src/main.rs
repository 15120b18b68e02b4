//! mdsync - metadata deployment front end
//!
//! Usage:
//!   mdsync deployModified --projectPath . --remoteMirror ../mirror
//!   mdsync deployAll --checkOnly --testsToRun 'AccountTest.createsAccount'
//!   mdsync deleteMetadata --specificComponents to-delete.txt
//!   mdsync listModified
//!   mdsync refresh
//!
//! The response is written to `--responseFilePath` or stdout; logs go to stderr.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use mdsync_core::config::{keys, parse_defaults_file};
use mdsync_core::prelude::*;

#[derive(Parser)]
#[command(name = "mdsync")]
#[command(about = "Deploy local metadata sources to a remote store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[command(rename_all = "camelCase")]
enum Commands {
    /// Deploy files changed since the last successful deploy
    DeployModified(DeployArgs),
    /// Deploy every source file
    DeployAll(DeployArgs),
    /// Deploy the files named in --specificFiles
    DeploySpecificFiles(DeployArgs),
    /// Delete the components named in --specificComponents from the remote
    DeleteMetadata(DeployArgs),
    /// List files changed since the last successful deploy
    ListModified(CommonArgs),
    /// Pull the remote state into the source tree
    Refresh(CommonArgs),
}

#[derive(Args, Debug, Default)]
struct CommonArgs {
    /// Project root directory
    #[arg(long = "projectPath")]
    project_path: Option<String>,

    /// Write the response here instead of stdout
    #[arg(long = "responseFilePath")]
    response_file_path: Option<PathBuf>,

    /// TOML file with default option values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory of the mirror remote
    #[arg(long = "remoteMirror")]
    remote_mirror: Option<String>,

    /// Directory for change tracking state
    #[arg(long = "stateDir")]
    state_dir: Option<String>,

    /// Content hash (blake3, sha256)
    #[arg(long = "hashAlgorithm")]
    hash_algorithm: Option<String>,

    #[arg(long = "apiVersion")]
    api_version: Option<String>,

    /// Source directory relative to the project root
    #[arg(long = "sourceDir")]
    source_dir: Option<String>,
}

#[derive(Args, Debug, Default)]
struct DeployArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Deploy even when the remote changed since the last sync
    #[arg(long = "ignoreConflicts", num_args = 0..=1, default_missing_value = "true")]
    ignore_conflicts: Option<String>,

    /// Validate without saving anything remotely
    #[arg(long = "checkOnly", num_args = 0..=1, default_missing_value = "true")]
    check_only: Option<String>,

    /// Test classes (Class or Class.method, comma separated, `*` for all)
    #[arg(long = "testsToRun")]
    tests_to_run: Option<String>,

    /// Write per-file coverage to a side-file
    #[arg(long = "reportCoverage", num_args = 0..=1, default_missing_value = "true")]
    report_coverage: Option<String>,

    /// File listing project paths to deploy
    #[arg(long = "specificFiles")]
    specific_files: Option<String>,

    /// File listing components to delete
    #[arg(long = "specificComponents")]
    specific_components: Option<String>,

    /// Record the deployed files as the new baseline
    #[arg(long = "updateSessionDataOnSuccess", num_args = 0..=1, default_missing_value = "true")]
    update_session_data_on_success: Option<String>,

    /// Ask the remote to tolerate package entries with no matching component
    #[arg(long = "allowMissingFiles", num_args = 0..=1, default_missing_value = "true")]
    allow_missing_files: Option<String>,
}

impl Commands {
    fn action(&self) -> Action {
        match self {
            Self::DeployModified(_) => Action::DeployModified,
            Self::DeployAll(_) => Action::DeployAll,
            Self::DeploySpecificFiles(_) => Action::DeploySpecificFiles,
            Self::DeleteMetadata(_) => Action::DeleteMetadata,
            Self::ListModified(_) => Action::ListModified,
            Self::Refresh(_) => Action::Refresh,
        }
    }

    fn common(&self) -> &CommonArgs {
        match self {
            Self::DeployModified(args)
            | Self::DeployAll(args)
            | Self::DeploySpecificFiles(args)
            | Self::DeleteMetadata(args) => &args.common,
            Self::ListModified(args) | Self::Refresh(args) => args,
        }
    }

    /// Options given on the command line, before defaults are applied.
    fn settings(&self) -> Settings {
        let common = self.common();
        let mut pairs: Vec<(&str, Option<&str>)> = vec![
            (keys::PROJECT_PATH, common.project_path.as_deref()),
            (keys::REMOTE_MIRROR, common.remote_mirror.as_deref()),
            (keys::STATE_DIR, common.state_dir.as_deref()),
            (keys::HASH_ALGORITHM, common.hash_algorithm.as_deref()),
            (keys::API_VERSION, common.api_version.as_deref()),
            (keys::SOURCE_DIR, common.source_dir.as_deref()),
        ];
        if let Self::DeployModified(args)
        | Self::DeployAll(args)
        | Self::DeploySpecificFiles(args)
        | Self::DeleteMetadata(args) = self
        {
            pairs.extend([
                (keys::IGNORE_CONFLICTS, args.ignore_conflicts.as_deref()),
                (keys::CHECK_ONLY, args.check_only.as_deref()),
                (keys::TESTS_TO_RUN, args.tests_to_run.as_deref()),
                (keys::REPORT_COVERAGE, args.report_coverage.as_deref()),
                (keys::SPECIFIC_FILES, args.specific_files.as_deref()),
                (keys::SPECIFIC_COMPONENTS, args.specific_components.as_deref()),
                (
                    keys::UPDATE_SESSION_DATA_ON_SUCCESS,
                    args.update_session_data_on_success.as_deref(),
                ),
                (keys::ALLOW_MISSING_FILES, args.allow_missing_files.as_deref()),
            ]);
        }
        Settings::from_pairs(
            pairs
                .into_iter()
                .filter_map(|(key, value)| value.map(|v| (key, v))),
        )
    }
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "mdsync=info,warn".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let response_path = cli.command.common().response_file_path.clone();

    let (report, code) = match execute(&cli.command) {
        Ok(report) => (report, ExitCode::SUCCESS),
        Err(e) => {
            tracing::error!("{:#}", e);
            let code = if is_fatal(&e) { ExitCode::FAILURE } else { ExitCode::SUCCESS };
            (Report::fatal(&e), code)
        }
    };

    if let Err(e) = write_response(&report, response_path.as_deref()) {
        eprintln!("Error: {:#}", e);
        return ExitCode::FAILURE;
    }
    code
}

fn execute(command: &Commands) -> Result<Report> {
    let mut settings = command.settings();
    if let Some(path) = &command.common().config {
        settings = settings.with_defaults(parse_defaults_file(path)?);
    }

    let config = DeployConfig::from_settings(&settings)?;
    let remote = MirrorRemote::new(settings.required(keys::REMOTE_MIRROR)?);
    let catalog = StaticCatalog::default();

    let mut orchestrator = DeployOrchestrator::new(&config, &catalog, &remote);
    orchestrator.run(command.action())
}

/// Bad configuration or input ends the process with a failure code. Remote
/// errors are reported like any other failed deploy.
fn is_fatal(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<MdsyncError>()
        .is_none_or(MdsyncError::is_fatal)
}

fn write_response(report: &Report, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            fs::write(path, report.render())
                .with_context(|| format!("Failed to write response to {}", path.display()))
        }
        None => {
            let mut stdout = io::stdout().lock();
            report.write_to(&mut stdout).context("Failed to write response")?;
            stdout.flush().context("Failed to write response")
        }
    }
}
