use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::Lines;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

const BEGIN_MARKER: &str = "---------- Begin";
const END_MARKER: &str = "---------- End";

// name, value, then anything (units, percentages, `# description`)
static COUNTER_LINE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\S+)\s+(\S+)").expect("failed to compile regex"));

/// Counters dumped by the simulator for one phase of the workload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    counters: HashMap<String, f64>,
}

impl Snapshot {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.counters.get(name).copied()
    }

    /// Reads a counter as an integer count, truncating the stored float.
    ///
    /// `None` if the counter is absent or not a finite non-negative number.
    pub fn count(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(as_count)
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    fn insert(&mut self, line: usize, name: &str, value: f64) -> Result<()> {
        if self.counters.contains_key(name) {
            return Err(Error::DuplicateCounter {
                line,
                name: name.to_string(),
            });
        }
        self.counters.insert(name.to_string(), value);
        Ok(())
    }
}

/// Truncates like Python's `int()`, but refuses NaN, infinities and negatives.
pub fn as_count(value: f64) -> Option<u64> {
    (value.is_finite() && value >= 0.0).then_some(value as u64)
}

impl<S: Into<String>> FromIterator<(S, f64)> for Snapshot {
    fn from_iter<T: IntoIterator<Item = (S, f64)>>(iter: T) -> Self {
        Snapshot {
            counters: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        }
    }
}

/// Streams snapshots out of a statistics report, one per begin/end block.
///
/// Stops after the first error.
pub struct SnapshotParser<'a> {
    lines: Lines<'a>,
    line_no: usize,
    failed: bool,
}

impl<'a> SnapshotParser<'a> {
    pub fn new(text: &'a str) -> Self {
        SnapshotParser {
            lines: text.lines(),
            line_no: 0,
            failed: false,
        }
    }

    fn next_snapshot(&mut self) -> Option<Result<Snapshot>> {
        let mut current: Option<Snapshot> = None;

        for line in self.lines.by_ref() {
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }

            if line.starts_with(BEGIN_MARKER) {
                if current.is_some() {
                    return Some(Err(malformed(self.line_no, line)));
                }
                current = Some(Snapshot::default());
            } else if line.starts_with(END_MARKER) {
                return Some(current.ok_or_else(|| malformed(self.line_no, line)));
            } else if let Some(caps) = COUNTER_LINE_PATTERN.captures(line) {
                let (Some(snapshot), Ok(value)) = (current.as_mut(), caps[2].parse::<f64>())
                else {
                    return Some(Err(malformed(self.line_no, line)));
                };
                if let Err(e) = snapshot.insert(self.line_no, &caps[1], value) {
                    return Some(Err(e));
                }
            } else {
                return Some(Err(malformed(self.line_no, line)));
            }
        }

        // input ended inside a phase
        current.map(|_| Err(malformed(self.line_no, "")))
    }
}

fn malformed(line: usize, content: &str) -> Error {
    Error::MalformedReport {
        line,
        content: content.to_string(),
    }
}

impl Iterator for SnapshotParser<'_> {
    type Item = Result<Snapshot>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = self.next_snapshot();
        if matches!(item, Some(Err(_))) {
            self.failed = true;
        }
        item
    }
}

pub fn parse_report(text: &str) -> Result<Vec<Snapshot>> {
    SnapshotParser::new(text).collect()
}

pub fn parse_report_file(path: &Path) -> Result<Vec<Snapshot>> {
    let text = fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_report(&text)
}
