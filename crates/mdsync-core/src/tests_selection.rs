//! Test selection and test-method disabling.
//!
//! A selection string is either `*` (every class file in the deployment) or a
//! comma separated list of `Class` and `Class.method` tokens. When specific
//! methods are requested, the owning class is deployed in check-only mode with
//! every other test method short-circuited by an early `return;`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Context;
use regex::Regex;

use crate::error::MdsyncError;

/// Selects every eligible class.
pub const WILDCARD: &str = "*";

const CLASS_SUFFIX: &str = ".cls";

/// Statement inserted after the opening brace of a disabled method. No line
/// break, so line numbers reported by the remote still match the local file.
const DISABLE_STATEMENT: &str = " return; ";

/// Test marker (annotation with optional arguments, or the legacy keyword),
/// then within one statement at most one parameter list, then the opening
/// brace.
static TEST_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:@isTest(?:\s*\([^)]*\))?|\btestMethod\b)[^;{}()]*?(?:\([^)]*\)[^;{}()]*?)?\{",
    )
    .expect("test declaration pattern is valid")
});

static CLASS_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bclass\b").expect("class keyword pattern is valid"));

/// Class name → methods to run. An empty set runs every method of the class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestSelection {
    classes: BTreeMap<String, BTreeSet<String>>,
}

impl TestSelection {
    /// Parse a selection string against the files being deployed.
    ///
    /// `eligible` holds source-relative keys; only `*` consults it, taking
    /// every file with the class suffix (whether or not it contains tests).
    pub fn parse<I, S>(spec: &str, eligible: I) -> Result<Self, MdsyncError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let spec = spec.trim();
        if spec == WILDCARD {
            let classes = eligible
                .into_iter()
                .filter_map(|key| class_name_of(key.as_ref()))
                .map(|name| (name, BTreeSet::new()))
                .collect();
            return Ok(Self { classes });
        }

        let classes = spec
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .try_fold(BTreeMap::new(), |acc, token| add_token(acc, token))?;
        Ok(Self { classes })
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn classes(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.classes
    }

    /// Class names to hand to the remote test runner.
    pub fn class_names(&self) -> BTreeSet<String> {
        self.classes.keys().cloned().collect()
    }

    /// Methods kept for `class`; `None` when the class is not selected, an
    /// empty set when every method runs.
    pub fn methods_for(&self, class: &str) -> Option<&BTreeSet<String>> {
        self.classes.get(class)
    }

    /// Classes narrowed to specific methods.
    pub fn filtered_classes(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.classes
            .iter()
            .filter(|(_, methods)| !methods.is_empty())
            .map(|(class, methods)| (class.as_str(), methods))
    }

    pub fn has_method_filters(&self) -> bool {
        self.filtered_classes().next().is_some()
    }
}

fn add_token(
    mut acc: BTreeMap<String, BTreeSet<String>>,
    token: &str,
) -> Result<BTreeMap<String, BTreeSet<String>>, MdsyncError> {
    if token == WILDCARD {
        return Err(MdsyncError::config(
            "testsToRun: '*' cannot be combined with class names",
        ));
    }
    let (class, method) = match token.split_once('.') {
        Some((class, method)) => (class.trim(), Some(method.trim())),
        None => (token, None),
    };
    if class.is_empty() {
        return Err(MdsyncError::config(format!(
            "testsToRun: missing class name in '{}'",
            token
        )));
    }

    match method {
        None => {
            acc.insert(class.to_string(), BTreeSet::new());
        }
        Some("") => {
            return Err(MdsyncError::config(format!(
                "testsToRun: missing method name in '{}'",
                token
            )));
        }
        Some(method) => match acc.get_mut(class) {
            // Already running every method
            Some(methods) if methods.is_empty() => {}
            Some(methods) => {
                methods.insert(method.to_string());
            }
            None => {
                acc.insert(class.to_string(), BTreeSet::from([method.to_string()]));
            }
        },
    }
    Ok(acc)
}

fn class_name_of(key: &str) -> Option<String> {
    let file_name = key.rsplit('/').next()?;
    file_name
        .strip_suffix(CLASS_SUFFIX)
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
}

/// Short-circuit every test method of `source` not named in `retain`.
///
/// Best effort on raw text: a declaration is a test marker followed, within a
/// single statement, by one parameter list and `{`. Declarations without a
/// parameter list, or that declare a class, are left alone. A declaration is
/// retained when a retained name appears in it as a whole word followed by
/// `()` and `{`. Every other method gets `return;` right after its opening
/// brace, leaving the body dead but compilable. Braces inside the body are
/// never inspected, only the opening brace position matters.
///
/// Methods whose body already starts with `return;` are skipped, so applying
/// the transform twice with the same `retain` set changes nothing.
pub fn disable_unlisted_methods(source: &str, retain: &BTreeSet<String>) -> String {
    let retained = retention_pattern(retain);
    let mut output = source.to_string();
    let mut offset = 0;

    for declaration in TEST_DECLARATION.find_iter(source) {
        let text = declaration.as_str();
        if !text.contains('(') || CLASS_KEYWORD.is_match(text) {
            continue;
        }
        if retained.as_ref().is_some_and(|re| re.is_match(text)) {
            continue;
        }
        if source[declaration.end()..]
            .trim_start()
            .starts_with(DISABLE_STATEMENT.trim())
        {
            continue;
        }

        let at = declaration.end() + offset;
        output.insert_str(at, DISABLE_STATEMENT);
        offset += DISABLE_STATEMENT.len();
    }

    output
}

fn retention_pattern(retain: &BTreeSet<String>) -> Option<Regex> {
    if retain.is_empty() {
        return None;
    }
    let names: Vec<String> = retain.iter().map(|name| regex::escape(name)).collect();
    let pattern = format!(r"(?i)\b(?:{})\s*\(\s*\)\s*\{{", names.join("|"));
    Regex::new(&pattern).ok()
}

/// Write a disabled copy of `path` into `dir` and return its location.
///
/// The original file is never modified.
pub fn write_disabled_copy(path: &Path, retain: &BTreeSet<String>, dir: &Path) -> anyhow::Result<PathBuf> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read class: {}", path.display()))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("Not a file path: {}", path.display()))?;
    let target = dir.join(file_name);
    std::fs::write(&target, disable_unlisted_methods(&source, retain))
        .with_context(|| format!("Failed to write disabled copy: {}", target.display()))?;
    tracing::debug!(
        class = %path.display(),
        copy = %target.display(),
        retained = retain.len(),
        "disabled unlisted test methods"
    );
    Ok(target)
}
