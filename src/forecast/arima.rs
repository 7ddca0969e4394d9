//! Non-seasonal ARIMA(p, d, q) models over region series
//!
//! Estimation, prediction and intervals come from `anofox_forecast`. This
//! module owns the order type, the per-order length guard and the mapping
//! between region series, engine time series and forecast rows.

use crate::data::RegionSeries;
use crate::error::ForecastError;
use anofox_forecast::core::TimeSeries;
use anofox_forecast::models::arima::ARIMA;
use anofox_forecast::models::Forecaster;
use chrono::NaiveTime;
use std::fmt;
use std::str::FromStr;

pub(crate) type Result<T> = std::result::Result<T, ForecastError>;

/// ARIMA order, displayed as `(p, d, q)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Order {
    pub p: usize,
    pub d: usize,
    pub q: usize,
}

impl Order {
    pub const fn new(p: usize, d: usize, q: usize) -> Self {
        Self { p, d, q }
    }

    /// Every order with p, d and q below `bound`, p varying slowest
    pub fn grid(bound: usize) -> Vec<Order> {
        let mut orders = Vec::with_capacity(bound.pow(3));
        for p in 0..bound {
            for d in 0..bound {
                for q in 0..bound {
                    orders.push(Order::new(p, d, q));
                }
            }
        }
        orders
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.p, self.d, self.q)
    }
}

impl FromStr for Order {
    type Err = ForecastError;

    /// Accepts `(p, d, q)` with or without parentheses and spaces
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ForecastError::InvalidArgument(format!("invalid order '{}'", s));
        let inner = s.trim().trim_start_matches('(').trim_end_matches(')');
        let parts: Vec<usize> = inner
            .split(',')
            .map(|part| part.trim().parse::<usize>().map_err(|_| invalid()))
            .collect::<Result<_>>()?;
        match parts.as_slice() {
            [p, d, q] => Ok(Order::new(*p, *d, *q)),
            _ => Err(invalid()),
        }
    }
}

/// Point forecasts with a symmetric confidence interval
#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    pub mean: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    pub level: f64,
}

impl Forecast {
    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }
}

/// Engine time series of a region's values stamped at midnight UTC
pub fn to_time_series(series: &RegionSeries) -> Result<TimeSeries> {
    if series.dates.len() != series.values.len() {
        return Err(ForecastError::InvalidArgument(format!(
            "{} dates for {} values in {}",
            series.dates.len(),
            series.values.len(),
            series.region
        )));
    }
    let timestamps = series
        .dates
        .iter()
        .map(|date| date.and_time(NaiveTime::MIN).and_utc())
        .collect();
    Ok(TimeSeries::univariate(timestamps, series.values.clone())?)
}

/// Forecast `horizon` steps from any fitted engine model
pub(crate) fn forecast_with<M: Forecaster>(model: &M, horizon: usize, level: f64) -> Result<Forecast> {
    if horizon == 0 {
        return Err(ForecastError::InvalidArgument(
            "horizon must be positive".to_string(),
        ));
    }
    if !(level > 0.0 && level < 1.0) {
        return Err(ForecastError::InvalidArgument(format!(
            "confidence level {} outside (0, 1)",
            level
        )));
    }

    let output = model.predict_with_intervals(horizon, level)?;
    let forecast = Forecast {
        mean: output.primary().to_vec(),
        lower: output.lower_series(0)?.to_vec(),
        upper: output.upper_series(0)?.to_vec(),
        level,
    };

    let complete = forecast.len() == horizon
        && forecast.lower.len() == horizon
        && forecast.upper.len() == horizon;
    let finite = forecast
        .mean
        .iter()
        .chain(&forecast.lower)
        .chain(&forecast.upper)
        .all(|v| v.is_finite());
    if !(complete && finite) {
        return Err(ForecastError::FitFailed(format!(
            "{} produced an unusable forecast",
            model.name()
        )));
    }
    Ok(forecast)
}

/// Unfitted ARIMA specification
#[derive(Debug, Clone)]
pub struct Arima {
    order: Order,
}

/// ARIMA model fitted to a region series
#[derive(Debug, Clone)]
pub struct FittedArima {
    order: Order,
    model: ARIMA,
}

impl Arima {
    pub fn new(p: usize, d: usize, q: usize) -> Self {
        Self::from_order(Order::new(p, d, q))
    }

    pub fn from_order(order: Order) -> Self {
        Self { order }
    }

    pub fn order(&self) -> Order {
        self.order
    }

    /// Smallest series length this order is fitted on
    pub fn min_length(&self) -> usize {
        let Order { p, d, q } = self.order;
        d + 2 * p + q + 2
    }

    pub fn fit(&self, series: &RegionSeries) -> Result<FittedArima> {
        if series.values.len() < self.min_length() {
            return Err(ForecastError::InsufficientData {
                needed: self.min_length(),
                available: series.values.len(),
            });
        }

        let Order { p, d, q } = self.order;
        let mut model = ARIMA::new(p, d, q);
        model.fit(&to_time_series(series)?)?;
        Ok(FittedArima {
            order: self.order,
            model,
        })
    }
}

impl FittedArima {
    pub fn order(&self) -> Order {
        self.order
    }

    pub fn ar_coefficients(&self) -> &[f64] {
        self.model.ar_coefficients()
    }

    pub fn ma_coefficients(&self) -> &[f64] {
        self.model.ma_coefficients()
    }

    /// Mean (or drift) of the differenced series
    pub fn intercept(&self) -> f64 {
        self.model.intercept()
    }

    /// Innovation variance
    pub fn sigma2(&self) -> Option<f64> {
        self.model.sigma2()
    }

    pub fn aic(&self) -> Option<f64> {
        self.model.aic()
    }

    pub fn bic(&self) -> Option<f64> {
        self.model.bic()
    }

    /// Forecast `horizon` steps with a `level` confidence interval
    pub fn predict(&self, horizon: usize, level: f64) -> Result<Forecast> {
        forecast_with(&self.model, horizon, level)
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
            region: "Austin, TX metro area".to_string(),
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

    fn ar1(phi: f64, n: usize) -> Vec<f64> {
        let e = noise(n, 42);
        let mut y = vec![0.0; n];
        for t in 1..n {
            y[t] = phi * y[t - 1] + e[t];
        }
        y
    }

    #[test]
    fn test_order_display_and_parse() {
        let order = Order::new(1, 2, 3);
        assert_eq!(order.to_string(), "(1, 2, 3)");
        assert_eq!("(1, 2, 3)".parse::<Order>().unwrap(), order);
        assert_eq!("1,2,3".parse::<Order>().unwrap(), order);
        assert!("(1, 2)".parse::<Order>().is_err());
        assert!("(a, b, c)".parse::<Order>().is_err());
    }

    #[test]
    fn test_order_grid() {
        let grid = Order::grid(4);
        assert_eq!(grid.len(), 64);
        assert_eq!(grid[0], Order::new(0, 0, 0));
        assert_eq!(grid[1], Order::new(0, 0, 1));
        assert_eq!(grid[63], Order::new(3, 3, 3));
    }

    #[test]
    fn test_time_series_keeps_dates_and_values() {
        let series = monthly(vec![1.0, 2.0, 3.0]);
        let ts = to_time_series(&series).unwrap();
        assert_eq!(ts.len(), 3);
        assert_eq!(ts.primary_values(), &[1.0, 2.0, 3.0]);
        assert_eq!(ts.timestamps()[1].date_naive(), series.dates[1]);

        let mut unaligned = series.clone();
        unaligned.values.pop();
        assert!(matches!(
            to_time_series(&unaligned),
            Err(ForecastError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_fit_recovers_ar1() {
        let y = monthly(ar1(0.7, 400));
        let model = Arima::new(1, 0, 0).fit(&y).unwrap();
        assert_eq!(model.order(), Order::new(1, 0, 0));
        assert!((model.ar_coefficients()[0] - 0.7).abs() < 0.1);

        let white = Arima::new(0, 0, 0).fit(&y).unwrap();
        assert!(model.aic().unwrap() < white.aic().unwrap());
    }

    #[test]
    fn test_drift_forecast_follows_trend() {
        let y: Vec<f64> = (0..30)
            .map(|t| 100.0 + 2.0 * t as f64 + 0.3 * (t as f64 * 1.7).sin())
            .collect();
        let model = Arima::new(0, 1, 0).fit(&monthly(y)).unwrap();

        let forecast = model.predict(3, 0.95).unwrap();
        assert_eq!(forecast.len(), 3);
        assert_eq!(forecast.level, 0.95);
        for (h, value) in forecast.mean.iter().enumerate() {
            let expected = 158.0 + 2.0 * (h + 1) as f64;
            assert!((value - expected).abs() < 2.0, "h={} value={}", h, value);
        }
    }

    #[test]
    fn test_intervals_widen_with_horizon() {
        let mut level = 100.0;
        let y: Vec<f64> = noise(60, 3)
            .into_iter()
            .map(|e| {
                level += e;
                level
            })
            .collect();
        let model = Arima::new(0, 1, 0).fit(&monthly(y)).unwrap();
        let forecast = model.predict(12, 0.95).unwrap();

        for i in 0..12 {
            assert!(forecast.lower[i] < forecast.mean[i]);
            assert!(forecast.mean[i] < forecast.upper[i]);
        }
        let widths: Vec<f64> = forecast
            .upper
            .iter()
            .zip(&forecast.lower)
            .map(|(u, l)| u - l)
            .collect();
        for pair in widths.windows(2) {
            assert!(pair[1] > pair[0]);
        }

        let narrow = model.predict(12, 0.8).unwrap();
        assert!(narrow.upper[0] - narrow.lower[0] < widths[0]);
    }

    #[test]
    fn test_fit_errors() {
        let short = monthly(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(
            Arima::new(3, 0, 3).fit(&short).unwrap_err(),
            ForecastError::InsufficientData {
                needed: 11,
                available: 5
            }
        );
        assert_eq!(
            Arima::new(0, 0, 0)
                .fit(&monthly(vec![1.0, f64::NAN, 2.0, 3.0]))
                .unwrap_err(),
            ForecastError::NonFinite
        );

        let model = Arima::new(0, 1, 0).fit(&monthly(noise(20, 9))).unwrap();
        assert!(model.predict(0, 0.95).is_err());
        assert!(model.predict(3, 1.5).is_err());
    }

    #[test]
    fn test_differenced_orders_forecast_finite_values() {
        let y: Vec<f64> = (0..40)
            .map(|t| 1000.0 + 5.0 * (t as f64).powi(2) + 10.0 * (t as f64 * 0.7).sin())
            .collect();
        let series = monthly(y);
        for order in [Order::new(1, 2, 1), Order::new(2, 1, 2)] {
            let model = Arima::from_order(order).fit(&series).unwrap();
            let forecast = model.predict(24, 0.95).unwrap();
            assert_eq!(forecast.len(), 24);
            assert!(forecast.mean.iter().all(|v| v.is_finite()));
        }
    }
}
