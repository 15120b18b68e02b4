//! Response model and the line-oriented writer.
//!
//! Output shape:
//! ```text
//! RESULT=FAILURE
//! FILE_COUNT=2
//! MESSAGE,id=1,type=WARN,text=...
//! MESSAGE_DETAIL,messageId=1,filePath=src/classes/Foo.cls,text=...
//! #SECTION START: ERROR LIST
//! ERROR,type=ERROR,line=3,column=7,filePath=src/classes/Foo.cls,text=...
//! #SECTION END: ERROR LIST
//! ```

use std::io::{self, Write};
use std::path::PathBuf;

/// Value written for a line or column that could not be determined.
pub const UNKNOWN_POSITION: i64 = -1;

pub const SECTION_ERRORS: &str = "ERROR LIST";
pub const SECTION_DEPLOYED: &str = "DEPLOYED FILES";
pub const SECTION_MODIFIED: &str = "MODIFIED FILE LIST";
pub const SECTION_REFRESHED: &str = "REFRESHED FILES";
pub const SECTION_COVERAGE: &str = "CODE COVERAGE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }
}

/// Message levels used in `MESSAGE` and `COVERAGE` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

/// One `ERROR` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRow {
    /// `ERROR` or `WARNING`, as reported by the remote.
    pub kind: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
    /// Project-relative path, empty when unknown.
    pub file_path: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDetail {
    pub file_path: String,
    pub text: String,
}

/// One `MESSAGE` row and the `MESSAGE_DETAIL` rows attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u32,
    pub level: Level,
    pub text: String,
    pub details: Vec<MessageDetail>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageRow {
    pub level: Level,
    pub name: String,
    pub percent: u32,
    pub lines_total: u32,
    pub lines_not_covered: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub result: Option<Outcome>,
    pub file_count: Option<usize>,
    pub has_modified_files: bool,
    pub coverage_file: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub messages: Vec<Message>,
    pub errors: Vec<ErrorRow>,
    pub deployed_files: Vec<String>,
    pub modified_files: Vec<String>,
    pub refreshed_files: Vec<String>,
    pub coverage: Vec<CoverageRow>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report of an error that stopped the run before any remote work.
    pub fn fatal(error: &anyhow::Error) -> Self {
        let mut report = Self::new();
        report.result = Some(Outcome::Failure);
        report.message(Level::Error, format!("{:#}", error));
        report
    }

    pub fn succeed(&mut self) {
        self.result = Some(Outcome::Success);
    }

    pub fn fail(&mut self) {
        self.result = Some(Outcome::Failure);
    }

    pub fn is_success(&self) -> bool {
        self.result == Some(Outcome::Success)
    }

    /// Append a message and return its id for attaching details.
    pub fn message(&mut self, level: Level, text: impl Into<String>) -> u32 {
        let id = self.messages.len() as u32 + 1;
        self.messages.push(Message {
            id,
            level,
            text: text.into(),
            details: Vec::new(),
        });
        id
    }

    pub fn detail(&mut self, message_id: u32, file_path: impl Into<String>, text: impl Into<String>) {
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == message_id) {
            message.details.push(MessageDetail {
                file_path: file_path.into(),
                text: text.into(),
            });
        }
    }

    pub fn error(&mut self, row: ErrorRow) {
        self.errors.push(row);
    }

    /// Render the response.
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        if let Some(result) = self.result {
            writeln!(out, "RESULT={}", result.as_str())?;
        }
        if let Some(count) = self.file_count {
            writeln!(out, "FILE_COUNT={}", count)?;
        }
        if self.has_modified_files {
            writeln!(out, "HAS_MODIFIED_FILES=true")?;
        }
        if let Some(path) = &self.coverage_file {
            writeln!(out, "COVERAGE_FILE={}", path.display())?;
        }
        if let Some(path) = &self.log_file {
            writeln!(out, "LOG_FILE={}", path.display())?;
        }

        for message in &self.messages {
            let id = message.id.to_string();
            write_row(
                out,
                "MESSAGE",
                &[
                    ("id", id.as_str()),
                    ("type", message.level.as_str()),
                    ("text", message.text.as_str()),
                ],
            )?;
            for detail in &message.details {
                write_row(
                    out,
                    "MESSAGE_DETAIL",
                    &[
                        ("messageId", id.as_str()),
                        ("filePath", detail.file_path.as_str()),
                        ("text", detail.text.as_str()),
                    ],
                )?;
            }
        }

        if !self.errors.is_empty() {
            section(out, SECTION_ERRORS, |out| {
                for error in &self.errors {
                    let line = position(error.line);
                    let column = position(error.column);
                    write_row(
                        out,
                        "ERROR",
                        &[
                            ("type", error.kind.as_str()),
                            ("line", line.as_str()),
                            ("column", column.as_str()),
                            ("filePath", error.file_path.as_str()),
                            ("text", error.text.as_str()),
                        ],
                    )?;
                }
                Ok(())
            })?;
        }

        for (name, files) in [
            (SECTION_DEPLOYED, &self.deployed_files),
            (SECTION_MODIFIED, &self.modified_files),
            (SECTION_REFRESHED, &self.refreshed_files),
        ] {
            if files.is_empty() {
                continue;
            }
            section(out, name, |out| {
                for file in files {
                    writeln!(out, "{}", file)?;
                }
                Ok(())
            })?;
        }

        if !self.coverage.is_empty() {
            section(out, SECTION_COVERAGE, |out| {
                for row in &self.coverage {
                    let percent = row.percent.to_string();
                    let total = row.lines_total.to_string();
                    let not_covered = row.lines_not_covered.to_string();
                    write_row(
                        out,
                        "COVERAGE",
                        &[
                            ("type", row.level.as_str()),
                            ("name", row.name.as_str()),
                            ("percent", percent.as_str()),
                            ("linesTotalNum", total.as_str()),
                            ("linesNotCoveredNum", not_covered.as_str()),
                        ],
                    )?;
                }
                Ok(())
            })?;
        }

        Ok(())
    }

    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail
        let _ = self.write_to(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

fn position(value: Option<u32>) -> String {
    value.map_or(UNKNOWN_POSITION, i64::from).to_string()
}

fn section<W, F>(out: &mut W, name: &str, body: F) -> io::Result<()>
where
    W: Write,
    F: FnOnce(&mut W) -> io::Result<()>,
{
    writeln!(out, "#SECTION START: {}", name)?;
    body(out)?;
    writeln!(out, "#SECTION END: {}", name)
}

fn write_row<W: Write>(out: &mut W, tag: &str, fields: &[(&str, &str)]) -> io::Result<()> {
    let mut line = String::from(tag);
    for (key, value) in fields {
        line.push(',');
        line.push_str(key);
        line.push('=');
        line.push_str(&quote(value));
    }
    writeln!(out, "{}", line)
}

/// Quote a row value when it would break the row grammar.
pub fn quote(value: &str) -> String {
    if value.contains([',', '=', '"', '\n', '\r']) {
        serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    }
}
