pub mod cache;
pub mod config;
pub mod driver;
pub mod error;
pub mod oracle;
pub mod runner;
pub mod stats_parser;

pub use error::{Error, Result};
