//! Report rendering for the command line.

mod generator;

pub use generator::{generate_json_report, generate_markdown_report};
