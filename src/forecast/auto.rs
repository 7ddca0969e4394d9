//! Automatic ARIMA order selection
//!
//! The engine's stepwise `AutoARIMA` picks `d` from repeated KPSS tests and
//! then searches p and q by information criterion around a small set of
//! starting orders.

use super::arima::{forecast_with, to_time_series, Forecast, Order, Result};
use crate::data::RegionSeries;
use crate::error::ForecastError;
use anofox_forecast::models::arima::{ndiffs_kpss, AutoARIMA, AutoARIMAConfig};
use anofox_forecast::models::Forecaster;
use tracing::debug;

/// Significance level of the KPSS tests choosing `d`
pub const KPSS_ALPHA: f64 = 0.05;

/// Number of differences needed for KPSS level stationarity, at most `max_d`
pub fn ndiffs(series: &[f64], max_d: usize) -> usize {
    ndiffs_kpss(series, KPSS_ALPHA, max_d)
}

/// Score of one fitted candidate order
#[derive(Debug, Clone, PartialEq)]
pub struct ModelScore {
    pub order: Order,
    pub aic: f64,
}

/// Outcome of an automatic search
#[derive(Debug, Clone)]
pub struct AutoArimaFit {
    model: AutoARIMA,
    order: Order,
    scores: Vec<ModelScore>,
}

impl AutoArimaFit {
    pub fn selected_order(&self) -> Order {
        self.order
    }

    /// Every candidate the search fitted, in evaluation order
    pub fn scores(&self) -> &[ModelScore] {
        &self.scores
    }

    pub fn predict(&self, horizon: usize, level: f64) -> Result<Forecast> {
        forecast_with(&self.model, horizon, level)
    }
}

/// Stepwise search bounds
#[derive(Debug, Clone)]
pub struct AutoArima {
    pub max_p: usize,
    pub max_q: usize,
    pub max_d: usize,
}

impl Default for AutoArima {
    fn default() -> Self {
        Self {
            max_p: 3,
            max_q: 3,
            max_d: 2,
        }
    }
}

impl AutoArima {
    pub fn new() -> Self {
        Self::default()
    }

    fn config(&self) -> AutoARIMAConfig {
        AutoARIMAConfig::default().with_max_orders(self.max_p, self.max_d, self.max_q)
    }

    pub fn fit(&self, series: &RegionSeries) -> Result<AutoArimaFit> {
        let mut model = AutoARIMA::with_config(self.config());
        model.fit(&to_time_series(series)?)?;

        let (p, d, q) = model.selected_order().ok_or(ForecastError::NoModel)?;
        let scores: Vec<ModelScore> = model
            .model_scores()
            .iter()
            .filter(|(order, _)| !order.is_seasonal())
            .map(|(order, aic)| ModelScore {
                order: Order::new(order.p, order.d, order.q),
                aic: *aic,
            })
            .collect();

        let order = Order::new(p, d, q);
        debug!(region = %series.region, %order, evaluated = scores.len(), "Selected order");
        Ok(AutoArimaFit {
            model,
            order,
            scores,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Months, NaiveDate};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn monthly(values: Vec<f64>) -> RegionSeries {
        let start = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
        RegionSeries {
            region: "Boise, ID metro area".to_string(),
            dates: (0..values.len())
                .map(|i| start + Months::new(i as u32))
                .collect(),
            values,
        }
    }

    fn noise(n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    #[test]
    fn test_ndiffs() {
        let wave: Vec<f64> = (0..200).map(|t| (t as f64 * 2.0).sin()).collect();
        assert_eq!(ndiffs(&wave, 2), 0);

        let mut level = 0.0;
        let trend: Vec<f64> = wave
            .iter()
            .map(|v| {
                level += 1.0 + v;
                level
            })
            .collect();
        assert_eq!(ndiffs(&trend, 2), 1);
        assert_eq!(ndiffs(&trend, 0), 0);
    }

    #[test]
    fn test_auto_selects_within_bounds() {
        let e = noise(300, 5);
        let mut y = vec![0.0; 300];
        for t in 1..300 {
            y[t] = 0.6 * y[t - 1] + e[t];
        }
        let fit = AutoArima::new().fit(&monthly(y)).unwrap();
        let selected = fit.selected_order();

        assert!(selected.d <= 2);
        assert!(selected.p <= 3 && selected.q <= 3);
        assert!(!fit.scores().is_empty());
        assert!(fit.scores().iter().all(|s| s.aic.is_finite()));

        let forecast = fit.predict(6, 0.95).unwrap();
        assert_eq!(forecast.len(), 6);
        assert!(forecast.lower[0] < forecast.upper[0]);
    }

    #[test]
    fn test_auto_respects_narrow_bounds() {
        let y: Vec<f64> = (0..120)
            .map(|t| 50.0 + 0.5 * t as f64 + 3.0 * (t as f64 * 0.9).sin())
            .collect();
        let search = AutoArima {
            max_p: 1,
            max_q: 0,
            max_d: 1,
        };
        let selected = search.fit(&monthly(y)).unwrap().selected_order();
        assert!(selected.p <= 1);
        assert_eq!(selected.q, 0);
        assert!(selected.d <= 1);
    }

    #[test]
    fn test_auto_errors() {
        let mut values = noise(30, 1);
        values[4] = f64::INFINITY;
        assert_eq!(
            AutoArima::new().fit(&monthly(values)).unwrap_err(),
            ForecastError::NonFinite
        );
        assert!(matches!(
            AutoArima::new().fit(&monthly(vec![1.0, 2.0, 3.0])),
            Err(ForecastError::InsufficientData { .. })
        ));
    }
}
