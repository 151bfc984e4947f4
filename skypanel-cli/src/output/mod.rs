//! Output formatting for CLI.

mod json;
mod text;

pub use json::{AccountOutput, JsonFormatter, StatsOutput, StatusOutput};
pub use text::TextFormatter;
