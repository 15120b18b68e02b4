//! Turns a deploy outcome into report rows.
//!
//! Diagnostics that do not parse are reported with an unknown location rather
//! than dropped.

pub mod location;

use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use serde::Serialize;

pub use location::Location;

use crate::project::{CodeUnit, Project};
use crate::remote::{ComponentFailure, CoverageResult, DeployOutcome, TestFailure, TestRunOutcome};
use crate::report::{CoverageRow, ErrorRow, Level, Report};

/// Coverage at or above this percentage is informational.
pub const COVERAGE_THRESHOLD: u32 = 75;

const TEST_FAILURE_KIND: &str = "ERROR";

/// One line of the coverage side-file.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CoverageLine<'a> {
    path: String,
    lines_total_num: u32,
    lines_not_covered_num: u32,
    lines_not_covered: &'a [u32],
}

pub struct ResultInterpreter<'a> {
    project: &'a Project,
    report_coverage: bool,
    output_dir: Option<PathBuf>,
}

impl<'a> ResultInterpreter<'a> {
    pub fn new(project: &'a Project, report_coverage: bool) -> Self {
        Self {
            project,
            report_coverage,
            output_dir: None,
        }
    }

    /// Write coverage and log side-files into `dir` instead of the system
    /// temp directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Add every diagnostic of `outcome` to `report`.
    pub fn interpret(&self, outcome: &DeployOutcome, report: &mut Report) -> anyhow::Result<()> {
        for failure in &outcome.failures {
            report.error(self.component_failure(failure));
        }
        if let Some(test_run) = &outcome.test_run {
            for failure in &test_run.failures {
                for row in self.test_failure(failure) {
                    report.error(row);
                }
            }
            self.coverage(test_run, report)?;
        }
        if let Some(log) = outcome.log.as_deref().filter(|log| !log.trim().is_empty()) {
            let path = self.write_side_file("mdsync-deploy-", ".log", log.as_bytes())?;
            report.log_file = Some(path);
        }
        tracing::debug!(
            failures = outcome.failures.len(),
            rows = report.errors.len(),
            "interpreted deploy outcome"
        );
        Ok(())
    }

    pub fn component_failure(&self, failure: &ComponentFailure) -> ErrorRow {
        let parsed = location::parse(&failure.problem);
        let line = failure.line.or(parsed.as_ref().map(|l| l.line));
        let column = failure.column.or(parsed.as_ref().map(|l| l.column));

        let file_path = self
            .local_path(&failure.file_name)
            .or_else(|| parsed.as_ref().and_then(|l| self.unit_path(&l.type_name, &l.name)))
            .unwrap_or_default();

        ErrorRow {
            kind: failure.severity.as_str().to_string(),
            line,
            column,
            file_path,
            text: failure.problem.clone(),
        }
    }

    /// One row for the failure, then one per further stack line.
    pub fn test_failure(&self, failure: &TestFailure) -> Vec<ErrorRow> {
        let mut frames = failure
            .stack_trace
            .as_deref()
            .unwrap_or_default()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty());

        let first_text = frames.next().unwrap_or(failure.message.as_str());
        let first = location::parse(first_text);
        let file_path = first
            .as_ref()
            .and_then(|l| self.unit_path(&l.type_name, &l.name))
            .or_else(|| {
                self.unit_path(
                    failure.type_name.as_deref().unwrap_or_default(),
                    failure.name.as_deref().unwrap_or_default(),
                )
            })
            .unwrap_or_default();

        let mut rows = vec![ErrorRow {
            kind: TEST_FAILURE_KIND.to_string(),
            line: first.as_ref().map(|l| l.line),
            column: first.as_ref().map(|l| l.column),
            file_path: file_path.clone(),
            text: failure.message.clone(),
        }];

        for frame in frames {
            let parsed = location::parse(frame);
            let text = match parsed.as_ref().map(|l| l.method.as_str()) {
                Some(method) if !method.is_empty() => format!(
                    "...continuing stack trace in method {}. Details see above",
                    method
                ),
                _ => "...continuing stack trace. Details see above".to_string(),
            };
            rows.push(ErrorRow {
                kind: TEST_FAILURE_KIND.to_string(),
                line: parsed.as_ref().map(|l| l.line),
                column: parsed.as_ref().map(|l| l.column),
                file_path: file_path.clone(),
                text,
            });
        }
        rows
    }

    /// Coverage rows, deduplicated coverage warnings and the optional side-file.
    pub fn coverage(&self, test_run: &TestRunOutcome, report: &mut Report) -> anyhow::Result<()> {
        for result in &test_run.coverage {
            let percent = percent_covered(result.num_locations, result.num_locations_not_covered);
            report.coverage.push(CoverageRow {
                level: classify(percent),
                name: result.name.clone(),
                percent,
                lines_total: result.num_locations,
                lines_not_covered: result.num_locations_not_covered,
            });
        }

        // A component with its own coverage row has already been reported.
        let mut warned: BTreeSet<&str> =
            test_run.coverage.iter().map(|result| result.name.as_str()).collect();
        for warning in &test_run.coverage_warnings {
            match warning.name.as_deref() {
                Some(name) => {
                    if !warned.insert(name) {
                        continue;
                    }
                    report.message(
                        Level::Warn,
                        format!("Code coverage warning for {}: {}", name, warning.message),
                    );
                }
                None => {
                    report.message(Level::Warn, format!("Code coverage warning: {}", warning.message));
                }
            }
        }

        if self.report_coverage && !test_run.coverage.is_empty() {
            let path = self.write_coverage_file(&test_run.coverage)?;
            report.coverage_file = Some(path);
        }
        Ok(())
    }

    fn write_coverage_file(&self, results: &[CoverageResult]) -> anyhow::Result<PathBuf> {
        let mut content = Vec::new();
        for result in results {
            let Some(path) = self.project.coverage_path_for(&result.name) else {
                tracing::debug!(component = %result.name, "no local source for covered component");
                continue;
            };
            let line = CoverageLine {
                path,
                lines_total_num: result.num_locations,
                lines_not_covered_num: result.num_locations_not_covered,
                lines_not_covered: &result.uncovered_lines,
            };
            serde_json::to_writer(&mut content, &line).context("Failed to serialize coverage")?;
            content.push(b'\n');
        }
        self.write_side_file("mdsync-coverage-", ".json", &content)
    }

    fn write_side_file(&self, prefix: &str, suffix: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix).suffix(suffix);
        let file = match &self.output_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .context("Failed to create output file")?;

        let (mut handle, path) = file
            .keep()
            .map_err(|e| anyhow::anyhow!("Failed to keep output file: {}", e))?;
        handle
            .write_all(content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Project path of a file the remote named, when it exists locally.
    fn local_path(&self, file_name: &str) -> Option<String> {
        let key = self.project.normalize(file_name)?;
        if self.project.absolute(&key).is_file() {
            Some(self.project.project_path(&key))
        } else {
            None
        }
    }

    fn unit_path(&self, type_name: &str, name: &str) -> Option<String> {
        let unit = CodeUnit::from_type_token(type_name)?;
        self.project.relative_path_for(unit, name)
    }
}

/// Covered share in whole percent, 0 for components without locations.
pub fn percent_covered(total: u32, uncovered: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    let covered = u64::from(total.saturating_sub(uncovered));
    (covered * 100 / u64::from(total)) as u32
}

pub fn classify(percent: u32) -> Level {
    if percent >= COVERAGE_THRESHOLD {
        Level::Info
    } else {
        Level::Warn
    }
}
