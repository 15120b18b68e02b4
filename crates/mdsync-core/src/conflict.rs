//! Optimistic concurrency check against the remote store.

use crate::error::MdsyncError;
use crate::fileset::CandidateFile;
use crate::project::Project;
use crate::remote::{MetadataRemote, RemoteSnapshot};
use crate::report::{Level, Report};
use crate::tracking::ChangeTracker;

/// A local file whose remote counterpart moved past the recorded baseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub key: String,
    pub remote: RemoteSnapshot,
}

pub struct ConflictDetector<'a> {
    remote: &'a dyn MetadataRemote,
    tracker: &'a ChangeTracker,
}

impl<'a> ConflictDetector<'a> {
    pub fn new(remote: &'a dyn MetadataRemote, tracker: &'a ChangeTracker) -> Self {
        Self { remote, tracker }
    }

    /// Files changed remotely since their baseline, in key order.
    ///
    /// One remote lookup covers all files; no lookup happens for an empty set.
    pub fn find<'f, I>(&self, files: I) -> anyhow::Result<Vec<Conflict>>
    where
        I: IntoIterator<Item = &'f CandidateFile>,
    {
        let keys: Vec<String> = files.into_iter().map(|f| f.key.clone()).collect();
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let live = self
            .remote
            .describe(&keys)
            .map_err(|e| MdsyncError::Remote(format!("{:#}", e)))?;

        let mut conflicts = Vec::new();
        for key in keys {
            let Some(remote) = live.get(&key) else {
                continue;
            };
            let newer = match self.tracker.entry(&key)? {
                Some(baseline) => remote.is_newer_than(&baseline.remote),
                None => true,
            };
            if newer {
                conflicts.push(Conflict {
                    key,
                    remote: remote.clone(),
                });
            }
        }
        tracing::debug!(conflicts = conflicts.len(), "checked remote state");
        Ok(conflicts)
    }

    /// Whether any file conflicts. Each conflict is added to `report` as a
    /// detail of one warning message.
    pub fn has_conflicts<'f, I>(
        &self,
        files: I,
        project: &Project,
        report: &mut Report,
    ) -> anyhow::Result<bool>
    where
        I: IntoIterator<Item = &'f CandidateFile>,
    {
        let conflicts = self.find(files)?;
        if conflicts.is_empty() {
            return Ok(false);
        }

        let id = report.message(
            Level::Warn,
            format!(
                "{} file(s) were modified on the remote since the last sync; refresh them or deploy with ignoreConflicts",
                conflicts.len()
            ),
        );
        for conflict in &conflicts {
            tracing::warn!(file = %conflict.key, "remote has a newer version");
            report.detail(id, project.project_path(&conflict.key), describe_change(&conflict.remote));
        }
        Ok(true)
    }
}

fn describe_change(snapshot: &RemoteSnapshot) -> String {
    let by = snapshot
        .last_modified_by_name
        .as_deref()
        .unwrap_or("another user");
    match snapshot.last_modified_date {
        Some(at) => format!("Modified by {} at {}", by, at.to_rfc3339()),
        None => format!("Modified by {}", by),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgorithm;
    use crate::remote::{DeployOptions, DeployOutcome, RetrieveOutcome};
    use crate::tracking::ChangeTrackingStore;
    use chrono::{TimeZone, Utc};
    use std::cell::Cell;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    struct FixedRemote {
        snapshots: BTreeMap<String, RemoteSnapshot>,
        lookups: Cell<usize>,
    }

    impl MetadataRemote for FixedRemote {
        fn describe(&self, keys: &[String]) -> anyhow::Result<BTreeMap<String, RemoteSnapshot>> {
            self.lookups.set(self.lookups.get() + 1);
            Ok(keys
                .iter()
                .filter_map(|k| self.snapshots.get(k).map(|s| (k.clone(), s.clone())))
                .collect())
        }

        fn deploy(&self, _: &[u8], _: &DeployOptions) -> anyhow::Result<DeployOutcome> {
            anyhow::bail!("not used")
        }

        fn retrieve(&self) -> anyhow::Result<RetrieveOutcome> {
            anyhow::bail!("not used")
        }
    }

    fn at(day: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 9, 0, 0).unwrap()
    }

    struct Fixture {
        _tmp: TempDir,
        project: Project,
        tracker: ChangeTracker,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let project = Project::new(tmp.path().join("project"), "src");
        for key in ["classes/A.cls", "classes/B.cls", "classes/C.cls"] {
            let path = project.absolute(key);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, key).unwrap();
        }
        let store = ChangeTrackingStore::new(tmp.path().join("state"), project.root().to_path_buf());
        let mut tracker = ChangeTracker::new(store, HashAlgorithm::Blake3);
        for key in ["classes/A.cls", "classes/B.cls"] {
            tracker
                .record(key, &project.absolute(key), RemoteSnapshot::modified("me", at(1)))
                .unwrap();
        }
        Fixture { _tmp: tmp, project, tracker }
    }

    fn candidates(project: &Project, keys: &[&str]) -> Vec<CandidateFile> {
        keys.iter().map(|k| CandidateFile::new(project, *k)).collect()
    }

    #[test]
    fn empty_input_makes_no_lookup() {
        let fx = fixture();
        let remote = FixedRemote { snapshots: BTreeMap::new(), lookups: Cell::new(0) };
        let detector = ConflictDetector::new(&remote, &fx.tracker);
        let mut report = Report::new();

        assert!(!detector.has_conflicts(&Vec::<CandidateFile>::new(), &fx.project, &mut report).unwrap());
        assert_eq!(remote.lookups.get(), 0);
        assert!(report.messages.is_empty());
    }

    #[test]
    fn newer_remote_and_untracked_remote_files_conflict() {
        let fx = fixture();
        let remote = FixedRemote {
            snapshots: BTreeMap::from([
                ("classes/A.cls".to_string(), RemoteSnapshot::modified("me", at(1))),
                ("classes/B.cls".to_string(), RemoteSnapshot::modified("bob", at(2))),
                ("classes/C.cls".to_string(), RemoteSnapshot::modified("eve", at(3))),
            ]),
            lookups: Cell::new(0),
        };
        let detector = ConflictDetector::new(&remote, &fx.tracker);
        let files = candidates(&fx.project, &["classes/A.cls", "classes/B.cls", "classes/C.cls"]);

        let keys: Vec<String> = detector.find(&files).unwrap().into_iter().map(|c| c.key).collect();
        assert_eq!(keys, vec!["classes/B.cls", "classes/C.cls"]);
        assert_eq!(remote.lookups.get(), 1);
    }

    #[test]
    fn conflicts_are_reported_with_details() {
        let fx = fixture();
        let remote = FixedRemote {
            snapshots: BTreeMap::from([(
                "classes/B.cls".to_string(),
                RemoteSnapshot::modified("bob", at(2)),
            )]),
            lookups: Cell::new(0),
        };
        let detector = ConflictDetector::new(&remote, &fx.tracker);
        let files = candidates(&fx.project, &["classes/A.cls", "classes/B.cls"]);
        let mut report = Report::new();

        assert!(detector.has_conflicts(&files, &fx.project, &mut report).unwrap());
        assert_eq!(report.messages.len(), 1);
        let detail = &report.messages[0].details[0];
        assert_eq!(detail.file_path, "src/classes/B.cls");
        assert!(detail.text.starts_with("Modified by bob at 2024-03-02"));
    }

    #[test]
    fn files_unknown_to_remote_do_not_conflict() {
        let fx = fixture();
        let remote = FixedRemote { snapshots: BTreeMap::new(), lookups: Cell::new(0) };
        let detector = ConflictDetector::new(&remote, &fx.tracker);
        let files = candidates(&fx.project, &["classes/C.cls"]);
        let mut report = Report::new();
        assert!(!detector.has_conflicts(&files, &fx.project, &mut report).unwrap());
    }
}
