//! One invocation, start to finish.
//!
//! Deploy actions move through
//! `Resolve → CheckConflicts → Package → Deploy → Interpret → (Persist | ReportFailure)`.
//! Configuration and input errors are returned as `Err` before any remote call;
//! everything after that ends in a complete [`Report`].

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;

use crate::archive;
use crate::catalog::{MetadataCatalog, companion_of, primary_of};
use crate::config::DeployConfig;
use crate::conflict::ConflictDetector;
use crate::destructive::DestructiveManifest;
use crate::error::MdsyncError;
use crate::fileset::{CandidateFile, FileSet, FileSetMode, FileSetResolver};
use crate::interpret::ResultInterpreter;
use crate::project::Project;
use crate::remote::{DeployOptions, DeployOutcome, DeployedComponent, MetadataRemote};
use crate::report::{Level, Report};
use crate::tests_selection::{TestSelection, write_disabled_copy};
use crate::tracking::{ChangeTracker, ChangeTrackingEntry, ChangeTrackingStore};

/// What the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    DeployModified,
    DeployAll,
    DeploySpecificFiles,
    DeleteMetadata,
    ListModified,
    Refresh,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeployModified => "deployModified",
            Self::DeployAll => "deployAll",
            Self::DeploySpecificFiles => "deploySpecificFiles",
            Self::DeleteMetadata => "deleteMetadata",
            Self::ListModified => "listModified",
            Self::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Resolve,
    CheckConflicts,
    Package,
    Deploy,
    Interpret,
    Persist,
    ReportFailure,
}

impl Stage {
    fn enter(self) {
        tracing::debug!(stage = ?self, "entering stage");
    }
}

pub struct DeployOrchestrator<'a> {
    config: &'a DeployConfig,
    project: Project,
    catalog: &'a dyn MetadataCatalog,
    remote: &'a dyn MetadataRemote,
    tracker: ChangeTracker,
    output_dir: Option<std::path::PathBuf>,
}

impl<'a> DeployOrchestrator<'a> {
    pub fn new(
        config: &'a DeployConfig,
        catalog: &'a dyn MetadataCatalog,
        remote: &'a dyn MetadataRemote,
    ) -> Self {
        let store = ChangeTrackingStore::new(config.state_dir.clone(), config.project_root.clone());
        Self {
            config,
            project: Project::from_config(config),
            catalog,
            remote,
            tracker: ChangeTracker::new(store, config.hash_algorithm),
            output_dir: None,
        }
    }

    /// Directory for coverage and log side-files (system temp dir by default).
    pub fn with_output_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    pub fn run(&mut self, action: Action) -> anyhow::Result<Report> {
        tracing::info!(action = action.as_str(), project = %self.project.root().display(), "starting");
        let report = match action {
            Action::DeployModified => self.deploy(FileSetMode::Modified)?,
            Action::DeployAll => self.deploy(FileSetMode::All)?,
            Action::DeploySpecificFiles => {
                let list = self.config.specific_files_required()?.to_path_buf();
                self.deploy(FileSetMode::Explicit(list))?
            }
            Action::DeleteMetadata => self.delete()?,
            Action::ListModified => self.list_modified()?,
            Action::Refresh => self.refresh()?,
        };
        tracing::info!(
            action = action.as_str(),
            result = report.result.map(|r| r.as_str()).unwrap_or("NONE"),
            "finished"
        );
        Ok(report)
    }

    fn interpreter(&self) -> ResultInterpreter<'_> {
        let interpreter = ResultInterpreter::new(&self.project, self.config.report_coverage);
        match &self.output_dir {
            Some(dir) => interpreter.with_output_dir(dir),
            None => interpreter,
        }
    }

    pub fn deploy(&mut self, mode: FileSetMode) -> anyhow::Result<Report> {
        let mut report = Report::new();

        Stage::Resolve.enter();
        let mut files =
            FileSetResolver::new(&self.project, self.catalog).resolve(&mode, &self.tracker)?;
        let selection = match self.config.tests_to_run.as_deref() {
            Some(spec) => Some(TestSelection::parse(spec, files.keys())?),
            None => None,
        }
        .filter(|selection| !selection.is_empty());

        if let Some(selection) = &selection
            && selection.has_method_filters()
            && !self.config.check_only
        {
            return Err(MdsyncError::config(
                "testsToRun names individual methods, which requires checkOnly",
            )
            .into());
        }

        if files.is_empty() && selection.is_none() {
            tracing::info!("nothing to deploy");
            report.succeed();
            report.file_count = Some(0);
            return Ok(report);
        }

        if !self.config.ignore_conflicts {
            Stage::CheckConflicts.enter();
            let detector = ConflictDetector::new(self.remote, &self.tracker);
            let checked = detector.has_conflicts(files.components(), &self.project, &mut report);
            let conflicted = match checked {
                Ok(conflicted) => conflicted,
                Err(e) if matches!(e.downcast_ref::<MdsyncError>(), Some(MdsyncError::Remote(_))) => {
                    Stage::ReportFailure.enter();
                    tracing::error!(error = %e, "conflict check failed");
                    report.fail();
                    report.message(Level::Error, e.to_string());
                    report.file_count = Some(files.component_count());
                    return Ok(report);
                }
                Err(e) => return Err(e),
            };
            if conflicted {
                Stage::ReportFailure.enter();
                report.fail();
                report.file_count = Some(files.component_count());
                return Ok(report);
            }
        }

        Stage::Package.enter();
        let filters: BTreeMap<String, _> = match &selection {
            Some(selection) => selection
                .filtered_classes()
                .map(|(class, methods)| (format!("classes/{}.cls", class), methods))
                .collect(),
            None => BTreeMap::new(),
        };
        for key in filters.keys() {
            self.force_add(&mut files, key)?;
        }

        let staging = tempfile::TempDir::new().context("Failed to create staging directory")?;
        let archive = {
            let project = &self.project;
            let include = |key: &str| files.contains(key);
            let transform = |path: &Path| match project.key_for(path).and_then(|key| filters.get(&key)) {
                Some(methods) => write_disabled_copy(path, methods, staging.path()),
                None => archive::identity(path),
            };
            archive::build(&project.source_root(), include, transform)?
        };
        tracing::debug!(bytes = archive.len(), files = files.component_count(), "packaged");

        Stage::Deploy.enter();
        let run_tests = selection.as_ref().map(TestSelection::class_names).unwrap_or_default();
        let options = DeployOptions::new(self.config.check_only, self.config.allow_missing_files, run_tests);
        report.file_count = Some(files.component_count());
        let outcome = match self.remote.deploy(&archive, &options) {
            Ok(outcome) => outcome,
            Err(e) => {
                Stage::ReportFailure.enter();
                remote_failure(&mut report, &e);
                return Ok(report);
            }
        };

        Stage::Interpret.enter();
        self.interpreter().interpret(&outcome, &mut report)?;

        if !succeeded(&outcome) {
            Stage::ReportFailure.enter();
            report.fail();
            return Ok(report);
        }

        report.succeed();
        report.deployed_files = deployed_paths(&self.project, &outcome.deployed);
        if self.config.persist_on_success() {
            Stage::Persist.enter();
            self.persist(&outcome.deployed)?;
        }
        Ok(report)
    }

    /// Add a test class and its companion, which must exist locally.
    fn force_add(&self, files: &mut FileSet, key: &str) -> anyhow::Result<()> {
        for key in [key.to_string(), companion_of(key)] {
            let file = CandidateFile::new(&self.project, key);
            if !file.path.is_file() {
                return Err(MdsyncError::input(format!(
                    "test class file not found: {}",
                    file.path.display()
                ))
                .into());
            }
            files.insert(file);
        }
        Ok(())
    }

    /// Refresh baselines of deployed components and their companions.
    fn persist(&mut self, deployed: &[DeployedComponent]) -> anyhow::Result<()> {
        let mut recorded = 0;
        for component in deployed {
            let Some(key) = self.project.normalize(&component.file_name) else {
                continue;
            };
            let partner = match primary_of(&key) {
                Some(_) => None,
                None => Some(companion_of(&key)),
            };
            for key in std::iter::once(key).chain(partner) {
                let path = self.project.absolute(&key);
                if !path.is_file() {
                    continue;
                }
                self.tracker.record(&key, &path, component.snapshot.clone())?;
                recorded += 1;
            }
        }
        self.tracker.save()?;
        tracing::info!(entries = recorded, "updated change tracking");
        Ok(())
    }

    pub fn delete(&mut self) -> anyhow::Result<Report> {
        let mut report = Report::new();

        Stage::Resolve.enter();
        let list = self.config.specific_components_required()?;
        let keys = FileSetResolver::new(&self.project, self.catalog).component_keys(list)?;
        if keys.is_empty() {
            report.succeed();
            report.file_count = Some(0);
            return Ok(report);
        }
        let manifest = DestructiveManifest::build(&keys, self.catalog, &self.config.api_version)?;

        Stage::Package.enter();
        let staging = tempfile::TempDir::new().context("Failed to create staging directory")?;
        manifest.write_package(staging.path())?;
        let archive = archive::build(staging.path(), |_| true, archive::identity)?;

        Stage::Deploy.enter();
        report.file_count = Some(manifest.member_count());
        let options = DeployOptions::new(
            self.config.check_only,
            self.config.allow_missing_files,
            Default::default(),
        );
        let outcome = match self.remote.deploy(&archive, &options) {
            Ok(outcome) => outcome,
            Err(e) => {
                Stage::ReportFailure.enter();
                remote_failure(&mut report, &e);
                return Ok(report);
            }
        };

        Stage::Interpret.enter();
        self.interpreter().interpret(&outcome, &mut report)?;
        if !succeeded(&outcome) {
            Stage::ReportFailure.enter();
            report.fail();
            return Ok(report);
        }

        report.succeed();
        report.deployed_files = keys.iter().map(|k| self.project.project_path(k)).collect();
        if self.config.persist_on_success() {
            Stage::Persist.enter();
            let mut dropped = 0;
            for key in &keys {
                let companion = companion_of(key);
                for key in [key.as_str(), companion.as_str()] {
                    if self.tracker.remove(key)? {
                        dropped += 1;
                    }
                }
            }
            self.tracker.save()?;
            tracing::info!(entries = dropped, "dropped change tracking for deleted components");
        }
        Ok(report)
    }

    pub fn list_modified(&mut self) -> anyhow::Result<Report> {
        let mut report = Report::new();
        Stage::Resolve.enter();
        let modified = FileSetResolver::new(&self.project, self.catalog).modified_keys(&self.tracker)?;
        report.succeed();
        report.file_count = Some(modified.len());
        if !modified.is_empty() {
            report.has_modified_files = true;
            report.modified_files = modified.iter().map(|k| self.project.project_path(k)).collect();
        }
        Ok(report)
    }

    /// Pull the remote tree over the source root and rebase every baseline on it.
    pub fn refresh(&mut self) -> anyhow::Result<Report> {
        let mut report = Report::new();
        let retrieved = match self.remote.retrieve() {
            Ok(retrieved) => retrieved,
            Err(e) => {
                remote_failure(&mut report, &e);
                return Ok(report);
            }
        };

        let extracted = archive::extract(
            &retrieved.archive,
            &self.project.source_root(),
            Some(self.tracker.algorithm()),
        )?;

        let mut refreshed = Vec::new();
        for (key, file) in extracted {
            if !self.catalog.is_source_file(&key) {
                continue;
            }
            let Some(hash) = file.hash else {
                continue;
            };
            let entry = ChangeTrackingEntry {
                local_mtime: file.local_mtime,
                hash_algorithm: self.tracker.algorithm(),
                hash,
                remote: retrieved.snapshots.get(&key).cloned().unwrap_or_default(),
            };
            self.tracker.insert(&key, entry)?;
            refreshed.push(self.project.project_path(&key));
        }
        self.tracker.save()?;

        tracing::info!(files = refreshed.len(), "refreshed from remote");
        report.succeed();
        report.file_count = Some(refreshed.len());
        report.refreshed_files = refreshed;
        Ok(report)
    }
}

fn succeeded(outcome: &DeployOutcome) -> bool {
    outcome.success
        && outcome
            .test_run
            .as_ref()
            .is_none_or(|run| run.failures.is_empty())
}

fn remote_failure(report: &mut Report, error: &anyhow::Error) {
    tracing::error!(error = %format!("{:#}", error), "remote call failed");
    report.fail();
    report.message(Level::Error, MdsyncError::Remote(format!("{:#}", error)).to_string());
}

fn deployed_paths(project: &Project, deployed: &[DeployedComponent]) -> Vec<String> {
    let mut paths: Vec<String> = deployed
        .iter()
        .filter_map(|c| project.normalize(&c.file_name))
        .map(|key| project.project_path(&key))
        .collect();
    paths.sort();
    paths.dedup();
    paths
}
