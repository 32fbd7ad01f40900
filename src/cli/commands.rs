//! CLI command definitions and parsing.

use std::time::Duration;

use super::duration::parse_duration;
use super::errors::CommandParseError;

/// Threshold engine CLI commands.
#[derive(Debug, Clone, PartialEq)]
pub enum ThresholdCommand {
    /// Collect and store one sample.
    Collect,

    /// Analyze the learning window.
    Analyze,

    /// Run an adjustment.
    Adjust {
        /// Ignore the rate limit.
        force: bool,
    },

    /// Check current metrics.
    Check,

    /// Show engine status.
    Status,

    /// Show current thresholds.
    Thresholds,

    /// Show engine configuration.
    Config,

    /// Update engine configuration.
    ConfigSet {
        /// `(key, value)` pairs in the order given.
        pairs: Vec<(String, String)>,
    },

    /// Override one metric's thresholds.
    SetThreshold {
        /// Metric name as typed.
        metric: String,
        /// New warning boundary.
        warning: f64,
        /// New critical boundary.
        critical: f64,
    },

    /// Show the adjustment audit log.
    History {
        /// Maximum number of records to show.
        limit: Option<usize>,
    },

    /// Run the scheduler until interrupted.
    Run {
        /// Overrides the configured collection interval.
        interval: Option<Duration>,
    },

    /// Show usage.
    Help,
}

impl ThresholdCommand {
    /// Parse a command from string arguments.
    ///
    /// # Errors
    ///
    /// Returns [`CommandParseError`] for a missing or unknown command, an
    /// unknown flag, or a missing or malformed value.
    pub fn parse(args: &[String]) -> Result<Self, CommandParseError> {
        let Some(first) = args.first() else {
            return Err(CommandParseError::MissingCommand);
        };

        let cmd = first.to_lowercase();
        let rest = &args[1..];
        match cmd.as_str() {
            "collect" => no_args(rest).map(|()| Self::Collect),
            "analyze" | "analyse" => no_args(rest).map(|()| Self::Analyze),
            "check" => no_args(rest).map(|()| Self::Check),
            "status" => no_args(rest).map(|()| Self::Status),
            "thresholds" => no_args(rest).map(|()| Self::Thresholds),
            "help" | "--help" | "-h" => Ok(Self::Help),

            "adjust" => {
                let mut force = false;
                for arg in rest {
                    match arg.as_str() {
                        "--force" | "-f" => force = true,
                        _ => return Err(CommandParseError::UnknownFlag(arg.clone())),
                    }
                }
                Ok(Self::Adjust { force })
            }

            "config" => match rest.first().map(String::as_str) {
                None => Ok(Self::Config),
                Some("set") => parse_config_set(&rest[1..]),
                Some(other) => Err(CommandParseError::UnknownCommand(format!("config {other}"))),
            },

            "set-threshold" => {
                let [metric, warning, critical] = rest else {
                    return Err(CommandParseError::MissingValue(
                        "METRIC WARNING CRITICAL".into(),
                    ));
                };
                Ok(Self::SetThreshold {
                    metric: metric.clone(),
                    warning: parse_number("WARNING", warning)?,
                    critical: parse_number("CRITICAL", critical)?,
                })
            }

            "history" => {
                let mut limit = None;

                let mut i = 0;
                while i < rest.len() {
                    match rest[i].as_str() {
                        "--limit" | "-l" => {
                            i += 1;
                            let value = rest
                                .get(i)
                                .ok_or_else(|| CommandParseError::MissingValue("--limit".into()))?;
                            limit = Some(value.parse().map_err(|_| {
                                CommandParseError::InvalidValue {
                                    flag: "--limit".into(),
                                    value: value.clone(),
                                }
                            })?);
                        }
                        _ => {
                            return Err(CommandParseError::UnknownFlag(rest[i].clone()));
                        }
                    }
                    i += 1;
                }

                Ok(Self::History { limit })
            }

            "run" => {
                let mut interval = None;

                let mut i = 0;
                while i < rest.len() {
                    match rest[i].as_str() {
                        "--interval" | "-i" => {
                            i += 1;
                            let value = rest.get(i).ok_or_else(|| {
                                CommandParseError::MissingValue("--interval".into())
                            })?;
                            let parsed = parse_duration(value).map_err(|_| {
                                CommandParseError::InvalidValue {
                                    flag: "--interval".into(),
                                    value: value.clone(),
                                }
                            })?;
                            if parsed.is_zero() {
                                return Err(CommandParseError::InvalidValue {
                                    flag: "--interval".into(),
                                    value: value.clone(),
                                });
                            }
                            interval = Some(parsed);
                        }
                        _ => {
                            return Err(CommandParseError::UnknownFlag(rest[i].clone()));
                        }
                    }
                    i += 1;
                }

                Ok(Self::Run { interval })
            }

            _ => Err(CommandParseError::UnknownCommand(cmd)),
        }
    }

    /// Whether the command keeps the process alive until interrupted.
    #[must_use]
    pub const fn is_long_running(&self) -> bool {
        matches!(self, Self::Run { .. })
    }
}

fn no_args(rest: &[String]) -> Result<(), CommandParseError> {
    rest.first()
        .map_or(Ok(()), |arg| Err(CommandParseError::UnknownFlag(arg.clone())))
}

fn parse_number(name: &str, value: &str) -> Result<f64, CommandParseError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| CommandParseError::InvalidValue {
            flag: name.into(),
            value: value.into(),
        })
}

fn parse_config_set(rest: &[String]) -> Result<ThresholdCommand, CommandParseError> {
    if rest.is_empty() {
        return Err(CommandParseError::MissingValue("KEY=VALUE".into()));
    }

    let pairs = rest
        .iter()
        .map(|arg| {
            arg.split_once('=')
                .filter(|(key, _)| !key.trim().is_empty())
                .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
                .ok_or_else(|| CommandParseError::InvalidValue {
                    flag: "KEY=VALUE".into(),
                    value: arg.clone(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ThresholdCommand::ConfigSet { pairs })
}

/// Parsed command line: global flags plus the command.
#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    /// Print results as JSON.
    pub json: bool,
    /// The command to run.
    pub command: ThresholdCommand,
}

impl CliArgs {
    /// Parse arguments, excluding the program name.
    ///
    /// `--json` is accepted anywhere on the line.
    ///
    /// # Errors
    ///
    /// Returns [`CommandParseError`] if the command does not parse.
    pub fn parse(args: &[String]) -> Result<Self, CommandParseError> {
        let json = args.iter().any(|arg| arg == "--json");
        let rest: Vec<String> = args.iter().filter(|arg| *arg != "--json").cloned().collect();
        let command = ThresholdCommand::parse(&rest)?;
        Ok(Self { json, command })
    }
}
