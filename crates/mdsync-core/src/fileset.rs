//! Candidate file resolution for each deployment mode.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::Context;
use walkdir::WalkDir;

use crate::archive::is_excluded;
use crate::catalog::{META_SUFFIX, MetadataCatalog, PACKAGE_XML, companion_of, primary_of};
use crate::error::MdsyncError;
use crate::project::Project;
use crate::tracking::ChangeTracker;

/// A file selected for deployment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CandidateFile {
    pub path: PathBuf,
    /// Source-relative key, `/`-separated.
    pub key: String,
    /// Type suffix: `cls`, `cls-meta.xml`, `xml`.
    pub suffix: String,
}

impl CandidateFile {
    pub fn new(project: &Project, key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            path: project.absolute(&key),
            suffix: suffix_of(&key),
            key,
        }
    }

    pub fn is_descriptor(&self) -> bool {
        self.key == PACKAGE_XML
    }

    pub fn is_companion(&self) -> bool {
        self.key.ends_with(META_SUFFIX)
    }
}

fn suffix_of(key: &str) -> String {
    let file_name = key.rsplit('/').next().unwrap_or(key);
    match file_name.strip_suffix(META_SUFFIX) {
        Some(primary) => primary
            .rsplit_once('.')
            .map(|(_, ext)| format!("{}{}", ext, META_SUFFIX))
            .unwrap_or_else(|| META_SUFFIX.trim_start_matches('-').to_string()),
        None => file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_string())
            .unwrap_or_default(),
    }
}

/// Files of one deployment, keyed and ordered by source-relative key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSet {
    files: BTreeMap<String, CandidateFile>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, file: CandidateFile) {
        self.files.insert(file.key.clone(), file);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.files.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&CandidateFile> {
        self.files.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CandidateFile> {
        self.files.values()
    }

    /// Files other than the package descriptor.
    pub fn components(&self) -> impl Iterator<Item = &CandidateFile> {
        self.files.values().filter(|f| !f.is_descriptor())
    }

    pub fn component_count(&self) -> usize {
        self.components().count()
    }

    /// True when nothing but (at most) the descriptor is selected.
    pub fn is_empty(&self) -> bool {
        self.component_count() == 0
    }
}

/// How candidate files are chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSetMode {
    /// Files changed since their last recorded baseline.
    Modified,
    /// Every source file of the project.
    All,
    /// Files named in a line-oriented list file.
    Explicit(PathBuf),
}

pub struct FileSetResolver<'a> {
    project: &'a Project,
    catalog: &'a dyn MetadataCatalog,
}

impl<'a> FileSetResolver<'a> {
    pub fn new(project: &'a Project, catalog: &'a dyn MetadataCatalog) -> Self {
        Self { project, catalog }
    }

    /// Resolve the files to deploy for `mode`, descriptor included.
    pub fn resolve(&self, mode: &FileSetMode, tracker: &ChangeTracker) -> anyhow::Result<FileSet> {
        let keys = match mode {
            FileSetMode::Modified => {
                let modified = self.modified_keys(tracker)?;
                self.with_companions(modified)
            }
            FileSetMode::All => self.source_keys()?,
            FileSetMode::Explicit(list) => {
                let listed = self.explicit_keys(list)?;
                self.with_companions(listed)
            }
        };

        let mut files = FileSet::new();
        for key in keys {
            files.insert(CandidateFile::new(self.project, key));
        }
        self.add_descriptor(&mut files)?;
        tracing::debug!(?mode, files = files.component_count(), "resolved file set");
        Ok(files)
    }

    /// Every deployable file under the source root, sorted.
    pub fn source_keys(&self) -> anyhow::Result<Vec<String>> {
        let root = self.project.source_root();
        if !root.is_dir() {
            return Err(MdsyncError::input(format!(
                "source directory not found: {}",
                root.display()
            ))
            .into());
        }

        let mut keys = Vec::new();
        let walker = WalkDir::new(&root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_excluded(&e.file_name().to_string_lossy()));
        for entry in walker {
            let entry = entry.with_context(|| format!("Failed to walk directory: {}", root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(key) = self.project.key_for(entry.path()) else {
                continue;
            };
            if self.catalog.is_source_file(&key) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    /// Source files whose content moved away from their recorded baseline.
    pub fn modified_keys(&self, tracker: &ChangeTracker) -> anyhow::Result<Vec<String>> {
        let mut modified = Vec::new();
        for key in self.source_keys()? {
            if key == PACKAGE_XML {
                continue;
            }
            if tracker.is_modified(&key, &self.project.absolute(&key))? {
                modified.push(key);
            }
        }
        Ok(modified)
    }

    /// Keys named in a list file; the first unreadable entry fails the whole list.
    pub fn explicit_keys(&self, list: &Path) -> anyhow::Result<Vec<String>> {
        let mut keys = Vec::new();
        for line in read_list(list)? {
            let key = self.project.normalize(&line).ok_or_else(|| {
                MdsyncError::input(format!("path is outside the source tree: {}", line))
            })?;
            let path = self.project.absolute(&key);
            if !path.is_file() || File::open(&path).is_err() {
                return Err(MdsyncError::input(format!(
                    "cannot read file: {}",
                    path.display()
                ))
                .into());
            }
            if !self.catalog.is_source_file(&key) {
                tracing::warn!(file = %key, "not a recognized source file, skipping");
                continue;
            }
            keys.push(key);
        }
        Ok(keys)
    }

    /// Component keys named in a deletion list. Files need not exist locally.
    pub fn component_keys(&self, list: &Path) -> anyhow::Result<Vec<String>> {
        read_list(list)?
            .into_iter()
            .map(|line| {
                self.project.normalize(&line).ok_or_else(|| {
                    anyhow::Error::from(MdsyncError::input(format!(
                        "path is outside the source tree: {}",
                        line
                    )))
                })
            })
            .collect()
    }

    /// Add existing `-meta.xml` companions of primaries and primaries of
    /// companions, so a component never travels without its descriptor.
    fn with_companions(&self, keys: Vec<String>) -> Vec<String> {
        let mut all: Vec<String> = Vec::with_capacity(keys.len() * 2);
        for key in keys {
            let partner = match primary_of(&key) {
                Some(primary) => primary.to_string(),
                None => companion_of(&key),
            };
            if self.project.absolute(&partner).is_file() {
                all.push(partner);
            }
            all.push(key);
        }
        all.sort();
        all.dedup();
        all
    }

    fn add_descriptor(&self, files: &mut FileSet) -> anyhow::Result<()> {
        let descriptor = CandidateFile::new(self.project, PACKAGE_XML);
        if !descriptor.path.is_file() {
            return Err(MdsyncError::input(format!(
                "package descriptor not found: {}",
                descriptor.path.display()
            ))
            .into());
        }
        files.insert(descriptor);
        Ok(())
    }
}

/// Read a line-oriented list file, skipping blank lines and `#` comments.
pub fn read_list(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        MdsyncError::input(format!("cannot read list file {}: {}", path.display(), e))
    })?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::hash::HashAlgorithm;
    use crate::remote::RemoteSnapshot;
    use crate::tracking::ChangeTrackingStore;
    use tempfile::TempDir;

    struct Fixture {
        tmp: TempDir,
        project: Project,
        catalog: StaticCatalog,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().expect("tempdir should succeed");
            let project = Project::new(tmp.path().join("project"), "src");
            let fixture = Self {
                tmp,
                project,
                catalog: StaticCatalog::default(),
            };
            fixture.write("package.xml", "<Package/>");
            fixture.write("classes/Foo.cls", "public class Foo {}");
            fixture.write("classes/Foo.cls-meta.xml", "<ApexClass/>");
            fixture.write("classes/Bar.cls", "public class Bar {}");
            fixture.write("classes/Bar.cls-meta.xml", "<ApexClass/>");
            fixture.write("classes/notes.txt", "ignored");
            fixture.write("pages/Home.page", "<apex:page/>");
            fixture
        }

        fn write(&self, key: &str, content: &str) {
            let path = self.project.absolute(key);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }

        /// Rewrite a file and move its mtime past any recorded baseline.
        fn edit(&self, key: &str, content: &str) {
            self.write(key, content);
            filetime::set_file_mtime(
                self.project.absolute(key),
                filetime::FileTime::from_unix_time(2_000_000_000, 0),
            )
            .unwrap();
        }

        fn tracker(&self) -> ChangeTracker {
            let store = ChangeTrackingStore::new(
                self.tmp.path().join("state"),
                self.project.root().to_path_buf(),
            );
            ChangeTracker::new(store, HashAlgorithm::Blake3)
        }

        fn resolver(&self) -> FileSetResolver<'_> {
            FileSetResolver::new(&self.project, &self.catalog)
        }

        fn list(&self, lines: &[&str]) -> PathBuf {
            let path = self.tmp.path().join("list.txt");
            std::fs::write(&path, lines.join("\n")).unwrap();
            path
        }
    }

    fn keys(files: &FileSet) -> Vec<&str> {
        files.keys().collect()
    }

    #[test]
    fn all_mode_takes_every_source_file() {
        let fx = Fixture::new();
        let files = fx.resolver().resolve(&FileSetMode::All, &fx.tracker()).unwrap();
        assert_eq!(
            keys(&files),
            vec![
                "classes/Bar.cls",
                "classes/Bar.cls-meta.xml",
                "classes/Foo.cls",
                "classes/Foo.cls-meta.xml",
                "package.xml",
                "pages/Home.page",
            ]
        );
        assert_eq!(files.component_count(), 5);
    }

    #[test]
    fn modified_mode_pairs_primary_and_companion() {
        let fx = Fixture::new();
        let mut tracker = fx.tracker();
        for key in fx.resolver().source_keys().unwrap() {
            tracker
                .record(&key, &fx.project.absolute(&key), RemoteSnapshot::default())
                .unwrap();
        }

        fx.edit("classes/Foo.cls", "public class Foo { Integer x; }");
        fx.edit("classes/Bar.cls-meta.xml", "<ApexClass><status/></ApexClass>");

        let files = fx.resolver().resolve(&FileSetMode::Modified, &tracker).unwrap();
        assert_eq!(
            keys(&files),
            vec![
                "classes/Bar.cls",
                "classes/Bar.cls-meta.xml",
                "classes/Foo.cls",
                "classes/Foo.cls-meta.xml",
                "package.xml",
            ]
        );
    }

    #[test]
    fn nothing_modified_leaves_only_descriptor() {
        let fx = Fixture::new();
        let mut tracker = fx.tracker();
        for key in fx.resolver().source_keys().unwrap() {
            tracker
                .record(&key, &fx.project.absolute(&key), RemoteSnapshot::default())
                .unwrap();
        }
        let files = fx.resolver().resolve(&FileSetMode::Modified, &tracker).unwrap();
        assert!(files.is_empty());
        assert!(files.contains(PACKAGE_XML));
    }

    #[test]
    fn explicit_list_accepts_project_and_source_paths() {
        let fx = Fixture::new();
        let list = fx.list(&["# deploy these", "src/classes/Foo.cls", "", "pages/Home.page"]);
        let files = fx
            .resolver()
            .resolve(&FileSetMode::Explicit(list), &fx.tracker())
            .unwrap();
        assert_eq!(
            keys(&files),
            vec![
                "classes/Foo.cls",
                "classes/Foo.cls-meta.xml",
                "package.xml",
                "pages/Home.page",
            ]
        );
    }

    #[test]
    fn explicit_list_fails_fast_on_unreadable_entry() {
        let fx = Fixture::new();
        let list = fx.list(&["classes/Foo.cls", "classes/Missing.cls", "classes/Bar.cls"]);
        let err = fx
            .resolver()
            .resolve(&FileSetMode::Explicit(list), &fx.tracker())
            .unwrap_err();
        let err = err.downcast_ref::<MdsyncError>().expect("typed error");
        assert!(matches!(err, MdsyncError::Input(_)));
        assert!(err.to_string().contains("Missing.cls"));
    }

    #[test]
    fn missing_descriptor_is_input_error() {
        let fx = Fixture::new();
        std::fs::remove_file(fx.project.absolute(PACKAGE_XML)).unwrap();
        let err = fx
            .resolver()
            .resolve(&FileSetMode::All, &fx.tracker())
            .unwrap_err();
        assert!(err.to_string().contains("package descriptor"));
    }

    #[test]
    fn component_list_does_not_require_files() {
        let fx = Fixture::new();
        let list = fx.list(&["src/classes/Gone.cls", "objects/Old__c.object"]);
        let keys = fx.resolver().component_keys(&list).unwrap();
        assert_eq!(keys, vec!["classes/Gone.cls", "objects/Old__c.object"]);
    }

    #[test]
    fn suffixes() {
        assert_eq!(suffix_of("classes/Foo.cls"), "cls");
        assert_eq!(suffix_of("classes/Foo.cls-meta.xml"), "cls-meta.xml");
        assert_eq!(suffix_of("package.xml"), "xml");
    }
}
