//! Command line interface for the threshold engine.
//!
//! Parsing is hand-rolled; every command maps onto one
//! [`ServiceHandle`](crate::thresholds::ServiceHandle) request, and output is
//! plain text or, with `--json`, the serialized result.

mod commands;
mod dispatch;
mod duration;
mod errors;
mod help;
mod output;


// Re-export main types
pub use commands::{CliArgs, ThresholdCommand};
pub use dispatch::execute;
pub use duration::{format_duration, parse_duration};
pub use errors::CommandParseError;
pub use help::help_text;
pub use output::{
    render_adjustment, render_analysis, render_check, render_config, render_history,
    render_sample, render_service_status, render_status, render_thresholds,
};
