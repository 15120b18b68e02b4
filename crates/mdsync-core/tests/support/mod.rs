#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use mdsync_core::config::DeployConfig;
use mdsync_core::remote::{
    DeployOptions, DeployOutcome, MetadataRemote, MirrorRemote, RemoteSnapshot, RetrieveOutcome,
};
use mdsync_core::tracking::{ChangeTrackingCache, ChangeTrackingStore};
use tempfile::TempDir;

pub const ACCOUNT_TEST: &str = r#"@isTest
private class AccountTest {
    @isTest static void createsAccount() {
        System.assert(true);
    }

    @isTest static void updatesAccount() {
        System.assert(true);
    }
}
"#;

/// A project, a state directory and a mirror remote under one temp dir.
pub struct Workspace {
    pub temp: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let ws = Self { temp };
        ws.write("package.xml", "<Package/>");
        ws.write("classes/Foo.cls", "public class Foo {}");
        ws.write("classes/Foo.cls-meta.xml", "<ApexClass/>");
        ws.write("classes/Bar.cls", "public class Bar {}");
        ws.write("classes/Bar.cls-meta.xml", "<ApexClass/>");
        ws.write("classes/AccountTest.cls", ACCOUNT_TEST);
        ws.write("classes/AccountTest.cls-meta.xml", "<ApexClass/>");
        std::fs::create_dir_all(ws.output_dir()).expect("Failed to create output dir");
        ws
    }

    pub fn project_root(&self) -> PathBuf {
        self.temp.path().join("project")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.temp.path().join("state")
    }

    pub fn mirror_root(&self) -> PathBuf {
        self.temp.path().join("mirror")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.temp.path().join("out")
    }

    pub fn source(&self, key: &str) -> PathBuf {
        self.project_root().join("src").join(key)
    }

    pub fn write(&self, key: &str, content: &str) {
        let path = self.source(key);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("Failed to create dir");
        std::fs::write(path, content).expect("Failed to write source file");
    }

    /// Change a file and push its mtime past any baseline taken earlier.
    pub fn edit(&self, key: &str, content: &str) {
        self.write(key, content);
        filetime::set_file_mtime(
            self.source(key),
            filetime::FileTime::from_unix_time(4_000_000_000, 0),
        )
        .expect("Failed to set mtime");
    }

    pub fn list(&self, name: &str, lines: &[&str]) -> PathBuf {
        let path = self.temp.path().join(name);
        std::fs::write(&path, lines.join("\n")).expect("Failed to write list");
        path
    }

    pub fn config(&self) -> DeployConfig {
        DeployConfig::for_project(self.project_root(), self.state_dir())
    }

    pub fn mirror(&self) -> MirrorRemote {
        MirrorRemote::new(self.mirror_root()).with_user("me")
    }

    pub fn cache(&self) -> ChangeTrackingCache {
        ChangeTrackingStore::new(self.state_dir(), self.project_root())
            .load()
            .expect("Failed to load cache")
    }
}

/// Wraps a remote and counts calls, keeping the last deployed archive.
pub struct CountingRemote<R> {
    pub inner: R,
    pub deploys: Cell<usize>,
    pub lookups: Cell<usize>,
    pub last_archive: RefCell<Option<Vec<u8>>>,
    pub last_options: RefCell<Option<DeployOptions>>,
}

impl<R: MetadataRemote> CountingRemote<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            deploys: Cell::new(0),
            lookups: Cell::new(0),
            last_archive: RefCell::new(None),
            last_options: RefCell::new(None),
        }
    }
}

impl<R: MetadataRemote> MetadataRemote for CountingRemote<R> {
    fn describe(&self, keys: &[String]) -> anyhow::Result<BTreeMap<String, RemoteSnapshot>> {
        self.lookups.set(self.lookups.get() + 1);
        self.inner.describe(keys)
    }

    fn deploy(&self, archive: &[u8], options: &DeployOptions) -> anyhow::Result<DeployOutcome> {
        self.deploys.set(self.deploys.get() + 1);
        *self.last_archive.borrow_mut() = Some(archive.to_vec());
        *self.last_options.borrow_mut() = Some(options.clone());
        self.inner.deploy(archive, options)
    }

    fn retrieve(&self) -> anyhow::Result<RetrieveOutcome> {
        self.inner.retrieve()
    }
}

/// Answers every deploy with the same outcome.
pub struct ScriptedRemote {
    pub outcome: Option<DeployOutcome>,
}

impl MetadataRemote for ScriptedRemote {
    fn describe(&self, _keys: &[String]) -> anyhow::Result<BTreeMap<String, RemoteSnapshot>> {
        Ok(BTreeMap::new())
    }

    fn deploy(&self, _archive: &[u8], _options: &DeployOptions) -> anyhow::Result<DeployOutcome> {
        self.outcome
            .clone()
            .ok_or_else(|| anyhow::anyhow!("connection reset by peer"))
    }

    fn retrieve(&self) -> anyhow::Result<RetrieveOutcome> {
        anyhow::bail!("retrieve is not scripted")
    }
}

/// Fails every call, as a remote with an expired session does.
pub struct ExpiredSessionRemote;

impl MetadataRemote for ExpiredSessionRemote {
    fn describe(&self, _keys: &[String]) -> anyhow::Result<BTreeMap<String, RemoteSnapshot>> {
        anyhow::bail!("session expired")
    }

    fn deploy(&self, _archive: &[u8], _options: &DeployOptions) -> anyhow::Result<DeployOutcome> {
        anyhow::bail!("session expired")
    }

    fn retrieve(&self) -> anyhow::Result<RetrieveOutcome> {
        anyhow::bail!("session expired")
    }
}

pub fn read_source(path: &Path) -> String {
    std::fs::read_to_string(path).expect("Failed to read file")
}
