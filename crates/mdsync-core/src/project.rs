//! Project layout: where sources live and how paths are named.
//!
//! Three path forms are used throughout the pipeline:
//! - absolute filesystem paths,
//! - source-relative keys (`classes/Foo.cls`), which are also the archive
//!   entry names and the change-tracking keys,
//! - project-relative paths (`src/classes/Foo.cls`), used in reports.

use std::path::{Component, Path, PathBuf};

use crate::config::DeployConfig;

/// Kind of code unit a diagnostic points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeUnit {
    Class,
    Trigger,
}

impl CodeUnit {
    /// Infer the unit from the type token of a location (`Class`, `Trigger`).
    pub fn from_type_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "class" => Some(Self::Class),
            "trigger" => Some(Self::Trigger),
            _ => None,
        }
    }

    fn directory(&self) -> &'static str {
        match self {
            Self::Class => "classes",
            Self::Trigger => "triggers",
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            Self::Class => "cls",
            Self::Trigger => "trigger",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
    source_dir: String,
}

impl Project {
    pub fn new(root: impl Into<PathBuf>, source_dir: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            source_dir: source_dir.into(),
        }
    }

    pub fn from_config(config: &DeployConfig) -> Self {
        Self::new(config.project_root.clone(), config.source_dir.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_root(&self) -> PathBuf {
        self.root.join(&self.source_dir)
    }

    /// Absolute path for a source-relative key.
    pub fn absolute(&self, key: &str) -> PathBuf {
        self.source_root().join(key)
    }

    /// Project-relative path for a source-relative key.
    pub fn project_path(&self, key: &str) -> String {
        format!("{}/{}", self.source_dir, key)
    }

    /// Source-relative key for an absolute path under the source root.
    pub fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(self.source_root()).ok()?;
        to_key(relative)
    }

    /// Normalize a user-supplied path (absolute, project-relative or
    /// source-relative) into a source-relative key.
    pub fn normalize(&self, raw: &str) -> Option<String> {
        let raw = raw.trim().replace('\\', "/");
        let path = Path::new(&raw);
        if path.is_absolute() {
            return self.key_for(path);
        }
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return None;
        }
        match path.strip_prefix(&self.source_dir) {
            Ok(inner) => to_key(inner),
            Err(_) => to_key(path),
        }
    }

    /// Project-relative path of the source file for a code unit, if it exists.
    pub fn relative_path_for(&self, unit: CodeUnit, name: &str) -> Option<String> {
        if name.is_empty() {
            return None;
        }
        let key = format!("{}/{}.{}", unit.directory(), name, unit.suffix());
        if self.absolute(&key).is_file() {
            Some(self.project_path(&key))
        } else {
            None
        }
    }

    /// Resolve a covered component, trying the class directory then the
    /// trigger directory.
    pub fn coverage_path_for(&self, name: &str) -> Option<String> {
        self.relative_path_for(CodeUnit::Class, name)
            .or_else(|| self.relative_path_for(CodeUnit::Trigger, name))
    }
}

fn to_key(relative: &Path) -> Option<String> {
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
