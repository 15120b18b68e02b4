//! A directory on disk standing in for the remote store.
//!
//! Layout:
//! ```text
//! <root>/files/...      current remote source tree
//! <root>/state.json     last-modified snapshot per source-relative key
//! ```
//!
//! The mirror validates packaging (known types, code files shipped with their
//! `-meta.xml`), applies deletions and records who changed what. It does not
//! compile code or run tests.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MetadataRemote;
use super::types::{
    ComponentFailure, CoverageWarning, DeployOptions, DeployOutcome, DeployedComponent,
    RemoteSnapshot, RetrieveOutcome, Severity, TestRunOutcome,
};
use crate::archive;
use crate::catalog::{MetadataCatalog, PACKAGE_XML, StaticCatalog, companion_of, primary_of};
use crate::destructive::{DESTRUCTIVE_XML, DestructiveManifest};

const FILES_DIR: &str = "files";
const STATE_FILE: &str = "state.json";
const DEFAULT_USER: &str = "mirror";

/// Types whose files are rejected without their `-meta.xml` companion.
const COMPANION_REQUIRED: &[&str] = &["classes", "triggers", "pages", "components"];

#[derive(Debug, Default, Serialize, Deserialize)]
struct MirrorState {
    #[serde(default)]
    components: BTreeMap<String, RemoteSnapshot>,
}

#[derive(Debug, Clone)]
pub struct MirrorRemote {
    root: PathBuf,
    user: String,
    catalog: StaticCatalog,
}

impl MirrorRemote {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            user: DEFAULT_USER.to_string(),
            catalog: StaticCatalog::default(),
        }
    }

    /// Name recorded as last modifier of deployed files.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn files_dir(&self) -> PathBuf {
        self.root.join(FILES_DIR)
    }

    fn state_path(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    fn load_state(&self) -> anyhow::Result<MirrorState> {
        let path = self.state_path();
        if !path.exists() {
            return Ok(MirrorState::default());
        }
        let bytes =
            fs::read(&path).with_context(|| format!("Failed to read mirror state: {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse mirror state: {}", path.display()))
    }

    fn save_state(&self, state: &MirrorState) -> anyhow::Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create mirror: {}", self.root.display()))?;
        let path = self.state_path();
        let tmp = self.root.join(format!("{}.tmp", STATE_FILE));
        let bytes = serde_json::to_vec_pretty(state).context("Failed to serialize mirror state")?;
        fs::write(&tmp, bytes)
            .with_context(|| format!("Failed to write mirror state: {}", tmp.display()))?;
        if cfg!(windows) && path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to replace mirror state: {}", path.display()))?;
        }
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to rename mirror state: {}", tmp.display()))?;
        Ok(())
    }

    /// Record a change made on the remote by someone else.
    ///
    /// Writes `content` under `key` and stamps it with `by` and `at`.
    pub fn edit(&self, key: &str, content: &str, by: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        let path = self.files_dir().join(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        fs::write(&path, content)
            .with_context(|| format!("Failed to write mirror file: {}", path.display()))?;

        let mut state = self.load_state()?;
        let snapshot = stamp(state.components.get(key), key, by, at);
        state.components.insert(key.to_string(), snapshot);
        self.save_state(&state)
    }

    /// Check one packaged file, returning the failure that rejects it.
    fn validate(&self, key: &str, packaged: &BTreeMap<String, archive::ExtractedFile>) -> Option<ComponentFailure> {
        let failure = |problem: String| ComponentFailure {
            severity: Severity::Error,
            file_name: key.to_string(),
            component_type: None,
            full_name: None,
            line: None,
            column: None,
            problem,
        };

        let Some((meta_type, member)) = self.catalog.member_for(key) else {
            return Some(failure(format!("Unknown metadata type for {}", key)));
        };
        if primary_of(key).is_none() && COMPANION_REQUIRED.contains(&meta_type.directory) {
            let companion = companion_of(key);
            if !packaged.contains_key(&companion) {
                return Some(ComponentFailure {
                    component_type: Some(meta_type.type_name.to_string()),
                    full_name: Some(member),
                    ..failure(format!("Missing metadata file: {}", companion))
                });
            }
        }
        None
    }

    /// Paths and state keys removed by deleting `member` of `type_name`.
    fn deletion_targets(&self, type_name: &str, member: &str) -> Option<Vec<String>> {
        let meta_type = self.catalog.by_type_name(type_name)?;
        let keys = match meta_type.suffix {
            Some(suffix) => {
                let primary = format!("{}/{}.{}", meta_type.directory, member, suffix);
                vec![companion_of(&primary), primary]
            }
            None => vec![format!("{}/{}", meta_type.directory, member)],
        };
        Some(keys)
    }
}

fn stamp(previous: Option<&RemoteSnapshot>, key: &str, by: &str, at: DateTime<Utc>) -> RemoteSnapshot {
    let id = previous
        .and_then(|s| s.id.clone())
        .unwrap_or_else(|| blake3::hash(key.as_bytes()).to_hex()[..15].to_string());
    RemoteSnapshot {
        id: Some(id),
        last_modified_by_name: Some(by.to_string()),
        last_modified_date: Some(at),
        extra: previous.map(|s| s.extra.clone()).unwrap_or_default(),
    }
}

fn remove_path(path: &Path) -> anyhow::Result<bool> {
    if path.is_dir() {
        fs::remove_dir_all(path)
            .with_context(|| format!("Failed to remove directory: {}", path.display()))?;
        Ok(true)
    } else if path.is_file() {
        fs::remove_file(path).with_context(|| format!("Failed to remove file: {}", path.display()))?;
        Ok(true)
    } else {
        Ok(false)
    }
}

impl MetadataRemote for MirrorRemote {
    fn describe(&self, keys: &[String]) -> anyhow::Result<BTreeMap<String, RemoteSnapshot>> {
        let state = self.load_state()?;
        Ok(keys
            .iter()
            .filter_map(|key| state.components.get(key).map(|s| (key.clone(), s.clone())))
            .collect())
    }

    fn deploy(&self, data: &[u8], options: &DeployOptions) -> anyhow::Result<DeployOutcome> {
        let staging = tempfile::TempDir::new().context("Failed to create staging directory")?;
        let packaged = archive::extract(data, staging.path(), None)?;
        if !packaged.contains_key(PACKAGE_XML) {
            anyhow::bail!("Deployment archive has no {}", PACKAGE_XML);
        }

        let mut state = self.load_state()?;
        let now = Utc::now();
        let mut outcome = DeployOutcome::default();

        for key in packaged.keys() {
            if key == DESTRUCTIVE_XML {
                continue;
            }
            if key != PACKAGE_XML
                && let Some(failure) = self.validate(key, &packaged)
            {
                outcome.failures.push(failure);
                continue;
            }
            let (component_type, full_name) = match self.catalog.member_for(key) {
                Some((meta_type, member)) => (Some(meta_type.type_name.to_string()), Some(member)),
                None => (None, None),
            };
            let snapshot = if options.check_only {
                state.components.get(key).cloned().unwrap_or_default()
            } else {
                stamp(state.components.get(key), key, &self.user, now)
            };
            outcome.deployed.push(DeployedComponent {
                file_name: key.clone(),
                component_type,
                full_name,
                snapshot,
            });
        }

        let mut deletions = Vec::new();
        if let Some(manifest) = packaged.get(DESTRUCTIVE_XML) {
            let xml = fs::read_to_string(&manifest.path)
                .with_context(|| format!("Failed to read {}", DESTRUCTIVE_XML))?;
            let manifest = DestructiveManifest::from_xml(&xml)?;
            for (type_name, members) in manifest.types() {
                for member in members {
                    let Some(targets) = self.deletion_targets(type_name, member) else {
                        outcome.failures.push(ComponentFailure {
                            severity: Severity::Error,
                            file_name: DESTRUCTIVE_XML.to_string(),
                            component_type: Some(type_name.clone()),
                            full_name: Some(member.clone()),
                            line: None,
                            column: None,
                            problem: format!("Unknown type name '{}'", type_name),
                        });
                        continue;
                    };
                    if !targets.iter().any(|key| self.files_dir().join(key).exists()) {
                        outcome.failures.push(ComponentFailure {
                            severity: Severity::Warning,
                            file_name: DESTRUCTIVE_XML.to_string(),
                            component_type: Some(type_name.clone()),
                            full_name: Some(member.clone()),
                            line: None,
                            column: None,
                            problem: format!("No {} named: {} found", type_name, member),
                        });
                        continue;
                    }
                    deletions.extend(targets);
                }
            }
        }

        outcome.success = !outcome
            .failures
            .iter()
            .any(|f| f.severity == Severity::Error);

        if !options.run_tests.is_empty() {
            outcome.test_run = Some(TestRunOutcome {
                coverage_warnings: vec![CoverageWarning {
                    name: None,
                    message: format!(
                        "Tests were not run by the mirror remote ({} class(es) requested)",
                        options.run_tests.len()
                    ),
                }],
                ..TestRunOutcome::default()
            });
        }

        outcome.log = Some(format!(
            "mirror deploy at {}\ncheckOnly={}\ncomponents={}\ndeletions={}\nfailures={}\n",
            now.to_rfc3339(),
            options.check_only,
            outcome.deployed.len(),
            deletions.len(),
            outcome.failures.len()
        ));

        if !outcome.success || options.check_only {
            tracing::debug!(success = outcome.success, check_only = options.check_only, "mirror left unchanged");
            return Ok(outcome);
        }

        let files = self.files_dir();
        for component in &outcome.deployed {
            let Some(extracted) = packaged.get(&component.file_name) else {
                continue;
            };
            let target = files.join(&component.file_name);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
            fs::copy(&extracted.path, &target)
                .with_context(|| format!("Failed to store {}", component.file_name))?;
            state
                .components
                .insert(component.file_name.clone(), component.snapshot.clone());
        }
        for key in &deletions {
            remove_path(&files.join(key))?;
            let prefix = format!("{}/", key);
            state
                .components
                .retain(|tracked, _| tracked != key && !tracked.starts_with(&prefix));
        }
        self.save_state(&state)?;

        tracing::debug!(
            root = %self.root.display(),
            deployed = outcome.deployed.len(),
            deleted = deletions.len(),
            "mirror updated"
        );
        Ok(outcome)
    }

    fn retrieve(&self) -> anyhow::Result<RetrieveOutcome> {
        let files = self.files_dir();
        fs::create_dir_all(&files)
            .with_context(|| format!("Failed to create mirror: {}", files.display()))?;
        let archive = archive::build(&files, |_| true, archive::identity)?;
        let state = self.load_state()?;
        Ok(RetrieveOutcome {
            archive,
            snapshots: state.components,
        })
    }
}
