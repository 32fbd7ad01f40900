//! Command execution against a running threshold service.

use serde::Serialize;

use super::commands::ThresholdCommand;
use super::help::help_text;
use super::output;
use crate::config::ConfigUpdate;
use crate::error::AppError;
use crate::thresholds::ServiceHandle;

fn json<T: Serialize>(value: &T) -> Result<String, AppError> {
    let mut rendered = serde_json::to_string_pretty(value)?;
    rendered.push('\n');
    Ok(rendered)
}

/// Run one command and return what should be printed on stdout.
///
/// `Run` does not block here; the caller drives the scheduler and calls this
/// afterwards to report its final counters.
///
/// # Errors
///
/// Returns [`AppError`] if the engine call fails, a config update does not
/// parse, or the result cannot be serialized.
pub async fn execute(
    handle: &ServiceHandle,
    command: &ThresholdCommand,
    as_json: bool,
) -> Result<String, AppError> {
    tracing::debug!(?command, as_json, "Executing command");

    match command {
        ThresholdCommand::Help => Ok(help_text().to_string()),

        ThresholdCommand::Collect => {
            let sample = handle.collect().await?;
            if as_json {
                return json(&sample);
            }
            let thresholds = handle.thresholds().await?;
            Ok(output::render_sample(&sample, &thresholds))
        }

        ThresholdCommand::Analyze => {
            let result = handle.analyze().await?;
            if as_json {
                json(&result)
            } else {
                Ok(output::render_analysis(&result))
            }
        }

        ThresholdCommand::Adjust { force } => {
            let outcome = handle.adjust(*force).await?;
            if as_json {
                json(&outcome)
            } else {
                Ok(output::render_adjustment(&outcome))
            }
        }

        ThresholdCommand::Check => {
            let check = handle.check().await?;
            if as_json {
                json(&check)
            } else {
                Ok(output::render_check(&check))
            }
        }

        ThresholdCommand::Status => {
            let status = handle.status().await?;
            if as_json {
                json(&status)
            } else {
                Ok(output::render_status(&status))
            }
        }

        ThresholdCommand::Thresholds => {
            let table = handle.thresholds().await?;
            if as_json {
                json(&table)
            } else {
                Ok(output::render_thresholds(&table))
            }
        }

        ThresholdCommand::Config => {
            let config = handle.config().await?;
            if as_json {
                json(&config)
            } else {
                Ok(output::render_config(&config))
            }
        }

        ThresholdCommand::ConfigSet { pairs } => {
            let update = ConfigUpdate::from_pairs(pairs.iter().map(|(k, v)| (k, v)))?;
            let config = handle.update_config(update).await?;
            if as_json {
                json(&config)
            } else {
                Ok(output::render_config(&config))
            }
        }

        ThresholdCommand::SetThreshold {
            metric,
            warning,
            critical,
        } => {
            let threshold = handle.set_threshold(metric, *warning, *critical).await?;
            if as_json {
                json(&threshold)
            } else {
                Ok(format!(
                    "{metric}: warning {:.2}, critical {:.2}\n",
                    threshold.warning_value, threshold.critical_value
                ))
            }
        }

        ThresholdCommand::History { limit } => {
            let records = handle.history(*limit).await?;
            if as_json {
                json(&records)
            } else {
                Ok(output::render_history(&records))
            }
        }

        ThresholdCommand::Run { .. } => {
            let status = handle.service_status();
            if as_json {
                json(&status)
            } else {
                Ok(output::render_service_status(&status))
            }
        }
    }
}
