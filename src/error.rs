//! Error types for the forecasting engine

use thiserror::Error;

/// Errors raised while fitting or forecasting a single ARIMA model
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ForecastError {
    /// The series is too short for the requested order
    #[error("Series of length {available} is too short (need {needed})")]
    InsufficientData { needed: usize, available: usize },

    /// The series holds NaN or infinite values
    #[error("Series contains non-finite values")]
    NonFinite,

    /// The estimator failed or produced unusable output
    #[error("Fit failed: {0}")]
    FitFailed(String),

    /// No candidate order could be fitted
    #[error("No candidate model could be fitted")]
    NoModel,

    /// Invalid argument passed to the engine
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<anofox_forecast::ForecastError> for ForecastError {
    fn from(err: anofox_forecast::ForecastError) -> Self {
        use anofox_forecast::ForecastError as Engine;
        match err {
            Engine::EmptyData => ForecastError::InsufficientData {
                needed: 1,
                available: 0,
            },
            Engine::InsufficientData { needed, got, .. } => ForecastError::InsufficientData {
                needed,
                available: got,
            },
            Engine::MissingValues => ForecastError::NonFinite,
            Engine::InvalidParameter(message) => ForecastError::InvalidArgument(message),
            other => ForecastError::FitFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_errors_map_to_forecast_errors() {
        let short = anofox_forecast::ForecastError::InsufficientData {
            needed: 5,
            got: 3,
            hint: None,
        };
        assert_eq!(
            ForecastError::from(short),
            ForecastError::InsufficientData {
                needed: 5,
                available: 3
            }
        );
        assert_eq!(
            ForecastError::from(anofox_forecast::ForecastError::MissingValues),
            ForecastError::NonFinite
        );
        assert!(matches!(
            ForecastError::from(anofox_forecast::ForecastError::ConvergenceFailure(
                "stalled".to_string()
            )),
            ForecastError::FitFailed(message) if message.contains("stalled")
        ));
    }
}
