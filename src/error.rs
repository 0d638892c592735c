use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

use crate::driver::CounterKind;

#[derive(Debug, Error)]
pub enum Error {
    #[error("line {line}: unrecognized report line {content:?}")]
    MalformedReport { line: usize, content: String },

    #[error("line {line}: counter `{name}` appears twice in the same phase")]
    DuplicateCounter { line: usize, name: String },

    #[error("phase {phase}: counter `{name}` missing from snapshot")]
    MissingCounter { phase: usize, name: String },

    #[error("phase {phase}: counter `{name}` holds {value}, not a count")]
    InvalidCounter {
        phase: usize,
        name: String,
        value: f64,
    },

    #[error("report holds {found} phases, at least {expected} required")]
    MissingPhase { expected: usize, found: usize },

    #[error("simulator failed ({status})")]
    ExternalProcess { status: ExitStatus },

    #[error("phase {phase} ({label}): expected {expected} {counter}, found {actual}")]
    Mismatch {
        phase: usize,
        label: &'static str,
        counter: CounterKind,
        expected: u64,
        actual: u64,
    },

    #[error(
        "invalid geometry: {size} bytes, {associativity}-way, {line_size}-byte lines \
         does not give a whole number of sets"
    )]
    InvalidGeometry {
        size: u64,
        associativity: u64,
        line_size: u64,
    },

    #[error("{}: invalid harness config: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
