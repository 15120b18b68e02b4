//! Source locations in remote diagnostic text.
//!
//! Three shapes are recognized, most specific first:
//!
//! 1. `Class.Test1.prepareData: line 13, column 1`
//! 2. `Class.Test1: line 19, column 1`
//! 3. `... line 155, column 41 ...` anywhere in the text

use std::sync::LazyLock;

use regex::{Captures, Regex};

static QUALIFIED_METHOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\w+)\.(\w+)\.(\w+): line (\d+), column (\d+)")
        .expect("method location pattern is valid")
});

static QUALIFIED_UNIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\w+)\.(\w+): line (\d+), column (\d+)").expect("unit location pattern is valid")
});

static POSITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"line (\d+), column (\d+)").expect("position pattern is valid")
});

/// Where a diagnostic points. Empty strings mean "not stated".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub type_name: String,
    pub name: String,
    pub method: String,
    pub line: u32,
    pub column: u32,
}

type Matcher = fn(&str) -> Option<Location>;

const MATCHERS: &[Matcher] = &[qualified_method, qualified_unit, position];

/// Parse the first recognizable location in `text`.
pub fn parse(text: &str) -> Option<Location> {
    MATCHERS.iter().find_map(|matcher| matcher(text))
}

fn number(captures: &Captures<'_>, group: usize) -> Option<u32> {
    captures.get(group)?.as_str().parse().ok()
}

fn qualified_method(text: &str) -> Option<Location> {
    let c = QUALIFIED_METHOD.captures(text)?;
    Some(Location {
        type_name: c[1].to_string(),
        name: c[2].to_string(),
        method: c[3].to_string(),
        line: number(&c, 4)?,
        column: number(&c, 5)?,
    })
}

fn qualified_unit(text: &str) -> Option<Location> {
    let c = QUALIFIED_UNIT.captures(text)?;
    Some(Location {
        type_name: c[1].to_string(),
        name: c[2].to_string(),
        line: number(&c, 3)?,
        column: number(&c, 4)?,
        ..Location::default()
    })
}

fn position(text: &str) -> Option<Location> {
    let c = POSITION.captures(text)?;
    Some(Location {
        line: number(&c, 1)?,
        column: number(&c, 2)?,
        ..Location::default()
    })
}
