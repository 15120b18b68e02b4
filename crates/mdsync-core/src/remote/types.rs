//! Data exchanged with the remote metadata store.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Remote-reported metadata for one file, echoed into change-tracking entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_by_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_date: Option<DateTime<Utc>>,

    /// Fields this crate does not interpret.
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, String>,
}

impl RemoteSnapshot {
    pub fn modified(by: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: None,
            last_modified_by_name: Some(by.into()),
            last_modified_date: Some(at),
            extra: BTreeMap::new(),
        }
    }

    /// Whether this snapshot is strictly newer than `baseline`.
    ///
    /// A snapshot without a date is never newer; a baseline without a date is
    /// older than any dated snapshot.
    pub fn is_newer_than(&self, baseline: &RemoteSnapshot) -> bool {
        match (self.last_modified_date, baseline.last_modified_date) {
            (Some(remote), Some(local)) => remote > local,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// Options sent with one deploy request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOptions {
    pub check_only: bool,
    pub rollback_on_error: bool,
    pub allow_missing_files: bool,
    pub run_tests: BTreeSet<String>,
}

impl DeployOptions {
    pub fn new(check_only: bool, allow_missing_files: bool, run_tests: BTreeSet<String>) -> Self {
        Self {
            check_only,
            rollback_on_error: true,
            allow_missing_files,
            run_tests,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

/// A component the remote rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentFailure {
    pub severity: Severity,
    /// File name as reported by the remote, source-relative when known.
    pub file_name: String,
    #[serde(default)]
    pub component_type: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub column: Option<u32>,
    pub problem: String,
}

/// A component the remote accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployedComponent {
    pub file_name: String,
    #[serde(default)]
    pub component_type: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub snapshot: RemoteSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestFailure {
    /// `Class` or `Trigger`, when the remote says.
    #[serde(default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub method_name: Option<String>,
    pub message: String,
    #[serde(default)]
    pub stack_trace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageResult {
    pub name: String,
    pub num_locations: u32,
    pub num_locations_not_covered: u32,
    #[serde(default)]
    pub uncovered_lines: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageWarning {
    /// `None` for org-wide warnings.
    #[serde(default)]
    pub name: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunOutcome {
    #[serde(default)]
    pub failures: Vec<TestFailure>,
    #[serde(default)]
    pub coverage: Vec<CoverageResult>,
    #[serde(default)]
    pub coverage_warnings: Vec<CoverageWarning>,
}

/// Result of one deploy request. Read-only for the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployOutcome {
    pub success: bool,
    #[serde(default)]
    pub failures: Vec<ComponentFailure>,
    #[serde(default)]
    pub deployed: Vec<DeployedComponent>,
    #[serde(default)]
    pub test_run: Option<TestRunOutcome>,
    #[serde(default)]
    pub log: Option<String>,
}

/// Result of a retrieve request: a zip of the remote tree plus per-file snapshots.
#[derive(Debug, Clone, Default)]
pub struct RetrieveOutcome {
    pub archive: Vec<u8>,
    pub snapshots: BTreeMap<String, RemoteSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn newer_comparison() {
        let early = RemoteSnapshot::modified("ann", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let late = RemoteSnapshot::modified("bob", Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());

        assert!(late.is_newer_than(&early));
        assert!(!early.is_newer_than(&late));
        assert!(!early.is_newer_than(&early));
        assert!(early.is_newer_than(&RemoteSnapshot::default()));
        assert!(!RemoteSnapshot::default().is_newer_than(&early));
    }

    #[test]
    fn snapshot_keeps_unknown_fields() {
        let json = r#"{"lastModifiedByName":"ann","createdByName":"bob"}"#;
        let snapshot: RemoteSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.last_modified_by_name.as_deref(), Some("ann"));
        assert_eq!(snapshot.extra.get("createdByName").map(String::as_str), Some("bob"));

        let back = serde_json::to_string(&snapshot).unwrap();
        assert!(back.contains("createdByName"));
    }

    #[test]
    fn rollback_is_always_on() {
        let options = DeployOptions::new(true, false, BTreeSet::new());
        assert!(options.rollback_on_error);
    }
}
