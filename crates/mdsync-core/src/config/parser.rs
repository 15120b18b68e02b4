//! TOML defaults file parser with helpful error messages

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Parse a defaults file into flat key/value pairs
pub fn parse_defaults_file(path: &Path) -> Result<BTreeMap<String, String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_defaults_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse defaults from a TOML string
///
/// Only top-level scalars are accepted: strings, booleans, integers and floats.
/// Every value is kept as its textual form so it can go through the same
/// typed accessors as command-line values.
pub fn parse_defaults_str(content: &str) -> Result<BTreeMap<String, String>> {
    let table: toml::Table = toml::from_str(content).map_err(|e| enhance_toml_error(e, content))?;

    table
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                toml::Value::String(s) => s,
                toml::Value::Boolean(b) => b.to_string(),
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Float(f) => format!("{:?}", f),
                other => anyhow::bail!(
                    "Unsupported value for '{}': expected a scalar, found {}",
                    key,
                    other.type_str()
                ),
            };
            Ok((key, text))
        })
        .collect()
}

/// Enhance TOML parsing errors with helpful context
fn enhance_toml_error(error: toml::de::Error, content: &str) -> anyhow::Error {
    let error_msg = error.to_string();

    // Try to extract line number from error message
    let line_hint = error_msg
        .lines()
        .find(|line| line.contains("line "))
        .and_then(|line| {
            line.split("line ")
                .nth(1)
                .and_then(|s| s.split_whitespace().next())
                .and_then(|s| s.trim_end_matches(',').parse::<usize>().ok())
        });

    if let Some(line_num) = line_hint {
        let context = get_line_context(content, line_num);
        anyhow::anyhow!(
            "TOML parsing error at line {}:\n{}\n\nError: {}",
            line_num,
            context,
            error_msg
        )
    } else {
        anyhow::anyhow!("TOML parsing error: {}", error_msg)
    }
}

/// Get context lines around an error
fn get_line_context(content: &str, line_num: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = line_num.saturating_sub(2);
    let end = (line_num + 2).min(lines.len());

    lines[start.min(end)..end]
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let num = start + i + 1;
            let marker = if num == line_num { ">>>" } else { "   " };
            format!("{} {:4} | {}", marker, num, line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
