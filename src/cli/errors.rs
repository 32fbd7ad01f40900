//! Errors from parsing command-line arguments.

use thiserror::Error;

/// Reasons a command line could not be turned into a [`super::ThresholdCommand`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandParseError {
    /// Nothing after the program name.
    #[error("No command given. Run 'perf-thresholds help' for usage.")]
    MissingCommand,

    /// First word is not a known command.
    #[error("Unknown command '{0}'. Run 'perf-thresholds help' for usage.")]
    UnknownCommand(String),

    /// Flag the command does not accept.
    #[error("Unknown flag: '{0}'")]
    UnknownFlag(String),

    /// Flag or positional argument given without its value.
    #[error("Missing value for '{0}'")]
    MissingValue(String),

    /// Value present but unparseable.
    #[error("Invalid value '{value}' for '{flag}'")]
    InvalidValue {
        /// Flag or argument the value was given for.
        flag: String,
        /// Raw value as typed.
        value: String,
    },
}
