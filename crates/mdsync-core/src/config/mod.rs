//! Resolved configuration for one invocation.
//!
//! Frontends merge their sources (defaults file, command-line flags) into a
//! single [`Settings`] lookup. The pipeline only ever sees the typed
//! [`DeployConfig`] built from it, passed by reference.

pub mod parser;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::MdsyncError;
use crate::hash::HashAlgorithm;

pub use parser::{parse_defaults_file, parse_defaults_str};

/// Option keys understood by the pipeline.
pub mod keys {
    pub const PROJECT_PATH: &str = "projectPath";
    pub const SOURCE_DIR: &str = "sourceDir";
    pub const STATE_DIR: &str = "stateDir";
    pub const HASH_ALGORITHM: &str = "hashAlgorithm";
    pub const API_VERSION: &str = "apiVersion";
    pub const CHECK_ONLY: &str = "checkOnly";
    pub const IGNORE_CONFLICTS: &str = "ignoreConflicts";
    pub const TESTS_TO_RUN: &str = "testsToRun";
    pub const REPORT_COVERAGE: &str = "reportCoverage";
    pub const SPECIFIC_FILES: &str = "specificFiles";
    pub const SPECIFIC_COMPONENTS: &str = "specificComponents";
    pub const UPDATE_SESSION_DATA_ON_SUCCESS: &str = "updateSessionDataOnSuccess";
    pub const ALLOW_MISSING_FILES: &str = "allowMissingFiles";
    pub const REMOTE_MIRROR: &str = "remoteMirror";
    pub const RESPONSE_FILE_PATH: &str = "responseFilePath";
}

const DEFAULT_SOURCE_DIR: &str = "src";
const DEFAULT_API_VERSION: &str = "60.0";

/// Flat key/value lookup with typed accessors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Set a value, replacing any previous one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Fill keys that are not set yet from `defaults`.
    pub fn with_defaults(mut self, defaults: BTreeMap<String, String>) -> Self {
        for (key, value) in defaults {
            self.values.entry(key).or_insert(value);
        }
        self
    }

    /// Value for `key`; blank values count as unset.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn required(&self, key: &str) -> Result<&str, MdsyncError> {
        self.get(key)
            .ok_or_else(|| MdsyncError::config(format!("missing required option '{}'", key)))
    }

    pub fn bool(&self, key: &str) -> Result<Option<bool>, MdsyncError> {
        self.get(key)
            .map(|raw| match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" => Ok(false),
                _ => Err(MdsyncError::config(format!(
                    "invalid boolean for '{}': {}",
                    key, raw
                ))),
            })
            .transpose()
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, MdsyncError> {
        Ok(self.bool(key)?.unwrap_or(default))
    }

    pub fn path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).map(PathBuf::from)
    }
}

/// Typed configuration of one deploy-family invocation.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub project_root: PathBuf,
    pub source_dir: String,
    pub state_dir: PathBuf,
    pub hash_algorithm: HashAlgorithm,
    pub api_version: String,
    pub check_only: bool,
    pub ignore_conflicts: bool,
    pub report_coverage: bool,
    pub update_session_data_on_success: bool,
    pub allow_missing_files: bool,
    pub tests_to_run: Option<String>,
    pub specific_files: Option<PathBuf>,
    pub specific_components: Option<PathBuf>,
}

impl DeployConfig {
    /// Build the typed view, failing on missing or malformed values.
    pub fn from_settings(settings: &Settings) -> Result<Self, MdsyncError> {
        let project_root = PathBuf::from(settings.required(keys::PROJECT_PATH)?);
        let state_dir = match settings.path(keys::STATE_DIR) {
            Some(dir) => dir,
            None => default_state_dir()?,
        };
        let hash_algorithm = match settings.get(keys::HASH_ALGORITHM) {
            Some(raw) => raw.parse()?,
            None => HashAlgorithm::default(),
        };

        Ok(Self {
            project_root,
            source_dir: settings
                .get(keys::SOURCE_DIR)
                .unwrap_or(DEFAULT_SOURCE_DIR)
                .to_string(),
            state_dir,
            hash_algorithm,
            api_version: settings
                .get(keys::API_VERSION)
                .unwrap_or(DEFAULT_API_VERSION)
                .to_string(),
            check_only: settings.bool_or(keys::CHECK_ONLY, false)?,
            ignore_conflicts: settings.bool_or(keys::IGNORE_CONFLICTS, false)?,
            report_coverage: settings.bool_or(keys::REPORT_COVERAGE, false)?,
            update_session_data_on_success: settings
                .bool_or(keys::UPDATE_SESSION_DATA_ON_SUCCESS, false)?,
            allow_missing_files: settings.bool_or(keys::ALLOW_MISSING_FILES, false)?,
            tests_to_run: settings.get(keys::TESTS_TO_RUN).map(str::to_string),
            specific_files: settings.path(keys::SPECIFIC_FILES),
            specific_components: settings.path(keys::SPECIFIC_COMPONENTS),
        })
    }

    /// Minimal config for a project, everything else at its default.
    pub fn for_project(project_root: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            source_dir: DEFAULT_SOURCE_DIR.to_string(),
            state_dir: state_dir.into(),
            hash_algorithm: HashAlgorithm::default(),
            api_version: DEFAULT_API_VERSION.to_string(),
            check_only: false,
            ignore_conflicts: false,
            report_coverage: false,
            update_session_data_on_success: false,
            allow_missing_files: false,
            tests_to_run: None,
            specific_files: None,
            specific_components: None,
        }
    }

    pub fn source_root(&self) -> PathBuf {
        self.project_root.join(&self.source_dir)
    }

    /// Whether a successful run should refresh change-tracking baselines.
    pub fn persist_on_success(&self) -> bool {
        !self.check_only || self.update_session_data_on_success
    }

    pub fn specific_files_required(&self) -> Result<&Path, MdsyncError> {
        self.specific_files
            .as_deref()
            .ok_or_else(|| MdsyncError::config(format!("missing required option '{}'", keys::SPECIFIC_FILES)))
    }

    pub fn specific_components_required(&self) -> Result<&Path, MdsyncError> {
        self.specific_components.as_deref().ok_or_else(|| {
            MdsyncError::config(format!(
                "missing required option '{}'",
                keys::SPECIFIC_COMPONENTS
            ))
        })
    }
}

/// Default cache directory
///
/// - Unix: `$XDG_STATE_HOME/mdsync/sessions` or `~/.local/state/mdsync/sessions`
/// - Windows: `%LOCALAPPDATA%\mdsync\sessions`
pub fn default_state_dir() -> Result<PathBuf, MdsyncError> {
    let base = if cfg!(unix) {
        dirs::state_dir().or_else(dirs::data_local_dir)
    } else {
        dirs::data_local_dir()
    };
    base.map(|b| b.join("mdsync").join("sessions"))
        .ok_or_else(|| MdsyncError::config("cannot determine state directory, set stateDir"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        Settings::from_pairs(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())))
    }

    #[test]
    fn missing_project_path_is_config_error() {
        let err = DeployConfig::from_settings(&settings(&[("stateDir", "/tmp/state")]))
            .unwrap_err();
        assert!(matches!(err, MdsyncError::Config(_)));
        assert!(err.to_string().contains("projectPath"));
    }

    #[test]
    fn invalid_boolean_is_config_error() {
        let err = DeployConfig::from_settings(&settings(&[
            ("projectPath", "/work/acme"),
            ("stateDir", "/tmp/state"),
            ("checkOnly", "maybe"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("checkOnly"));
    }

    #[test]
    fn defaults_apply() {
        let config = DeployConfig::from_settings(&settings(&[
            ("projectPath", "/work/acme"),
            ("stateDir", "/tmp/state"),
        ]))
        .unwrap();
        assert_eq!(config.source_root(), PathBuf::from("/work/acme/src"));
        assert_eq!(config.hash_algorithm, HashAlgorithm::Blake3);
        assert_eq!(config.api_version, "60.0");
        assert!(!config.check_only);
        assert!(config.persist_on_success());
    }

    #[test]
    fn check_only_skips_persist_unless_requested() {
        let mut config = DeployConfig::for_project("/work/acme", "/tmp/state");
        config.check_only = true;
        assert!(!config.persist_on_success());
        config.update_session_data_on_success = true;
        assert!(config.persist_on_success());
    }

    #[test]
    fn cli_values_win_over_defaults() {
        let mut defaults = BTreeMap::new();
        defaults.insert("checkOnly".to_string(), "true".to_string());
        defaults.insert("apiVersion".to_string(), "59.0".to_string());

        let merged = settings(&[("checkOnly", "false")]).with_defaults(defaults);
        assert_eq!(merged.bool("checkOnly").unwrap(), Some(false));
        assert_eq!(merged.get("apiVersion"), Some("59.0"));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let s = settings(&[("testsToRun", "   ")]);
        assert_eq!(s.get("testsToRun"), None);
    }
}
