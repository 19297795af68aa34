//! Seasonal autoregressive model fitted on a differenced series

use ndarray::{Array1, Array2};

use super::{least_squares, FitContext, FittedForecast, Forecaster, Horizon, ModelDiagnostics};
use crate::config::SeasonalArConfig;
use crate::error::FitError;
use crate::features::FeatureRow;

/// One differencing pass plus the tail of its input, which is what undoing it needs
#[derive(Debug, Clone)]
struct DifferenceStep {
    lag: usize,
    tail: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct FittedSeasonalAr {
    steps: Vec<DifferenceStep>,
    lags: Vec<usize>,
    coefficients: Vec<f64>,
    intercept: f64,
    differenced: Vec<f64>,
    seasonal_period: usize,
    seasonal_differences: usize,
    regular_differences: usize,
    dickey_fuller: Option<f64>,
    training_rows: usize,
}

impl SeasonalArConfig {
    /// AR lags 1..=p plus seasonal lags s, 2s, ..., Ps
    pub fn lags(&self) -> Vec<usize> {
        let mut lags: Vec<usize> = (1..=self.ar_order)
            .chain((1..=self.seasonal_ar_order).map(|j| j * self.seasonal_period))
            .collect();
        lags.sort_unstable();
        lags.dedup();
        lags
    }
}

impl Forecaster for SeasonalArConfig {
    type Fitted = FittedSeasonalAr;

    fn fit(&self, history: &[FeatureRow], _ctx: &FitContext<'_>) -> Result<FittedSeasonalAr, FitError> {
        let values: Vec<f64> = history.iter().map(|r| r.units_demanded).collect();
        let lags = self.lags();
        let max_lag = lags.last().copied().unwrap_or(1);
        let required = self.seasonal_differencing * self.seasonal_period
            + self.max_differencing
            + max_lag
            + 2 * lags.len()
            + 2;
        if values.len() < required {
            return Err(FitError::InsufficientHistory {
                required,
                available: values.len(),
            });
        }

        let mut steps = Vec::new();
        let mut series = values;
        for _ in 0..self.seasonal_differencing {
            series = difference(&mut steps, &series, self.seasonal_period);
        }
        for _ in 0..self.differencing {
            series = difference(&mut steps, &series, 1);
        }

        let mut regular = self.differencing;
        let dickey_fuller = loop {
            match dickey_fuller(&series) {
                None => break None,
                Some(t) if t < self.adf_critical_value => break Some(t),
                Some(t) => {
                    if regular >= self.max_differencing {
                        return Err(FitError::NonStationary {
                            differences: regular,
                            statistic: t,
                        });
                    }
                    series = difference(&mut steps, &series, 1);
                    regular += 1;
                }
            }
        };

        let (coefficients, intercept) = if is_flat(&series) {
            let mean = series.iter().sum::<f64>() / series.len() as f64;
            (vec![0.0; lags.len()], mean)
        } else {
            let rows = series.len() - max_lag;
            let mut x = Array2::<f64>::zeros((rows, lags.len()));
            let mut y = Array1::<f64>::zeros(rows);
            for (r, t) in (max_lag..series.len()).enumerate() {
                for (c, &lag) in lags.iter().enumerate() {
                    x[[r, c]] = series[t - lag];
                }
                y[r] = series[t];
            }
            let (params, intercept) = least_squares(x, y)?;
            (params.to_vec(), intercept)
        };

        Ok(FittedSeasonalAr {
            steps,
            lags,
            coefficients,
            intercept,
            differenced: series,
            seasonal_period: self.seasonal_period,
            seasonal_differences: self.seasonal_differencing,
            regular_differences: regular,
            dickey_fuller,
            training_rows: history.len(),
        })
    }
}

impl FittedForecast for FittedSeasonalAr {
    fn predict(&self, horizon: Horizon<'_>) -> Vec<f64> {
        let h = horizon.len();
        let mut w = self.differenced.clone();
        for _ in 0..h {
            let next = self.intercept
                + self
                    .lags
                    .iter()
                    .zip(&self.coefficients)
                    .map(|(&lag, c)| c * w[w.len() - lag])
                    .sum::<f64>();
            w.push(next);
        }

        let mut forecast = w.split_off(self.differenced.len());
        for step in self.steps.iter().rev() {
            let mut level = step.tail.clone();
            forecast = forecast
                .into_iter()
                .map(|d| {
                    let x = d + level[level.len() - step.lag];
                    level.push(x);
                    x
                })
                .collect();
        }

        forecast.into_iter().map(|v| v.max(0.0)).collect()
    }

    fn diagnostics(&self) -> ModelDiagnostics {
        let mut diag = ModelDiagnostics::new(self.training_rows);
        diag.push("seasonal_period", self.seasonal_period);
        diag.push("seasonal_differences", self.seasonal_differences);
        diag.push("regular_differences", self.regular_differences);
        diag.push("ar_lags", format!("{:?}", self.lags));
        match self.dickey_fuller {
            Some(t) => diag.push("dickey_fuller_t", format!("{:.3}", t)),
            None => diag.push("dickey_fuller_t", "flat series"),
        }
        diag
    }
}

fn difference(steps: &mut Vec<DifferenceStep>, series: &[f64], lag: usize) -> Vec<f64> {
    steps.push(DifferenceStep {
        lag,
        tail: series[series.len() - lag..].to_vec(),
    });
    (lag..series.len()).map(|t| series[t] - series[t - lag]).collect()
}

fn is_flat(series: &[f64]) -> bool {
    let min = series.iter().copied().fold(f64::INFINITY, f64::min);
    let max = series.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    max - min <= 1e-9 * (1.0 + max.abs())
}

/// t-statistic of `b` in `Δy_t = a + b·y_{t-1} + e_t`; `None` for a flat series
fn dickey_fuller(series: &[f64]) -> Option<f64> {
    if series.len() < 4 || is_flat(series) {
        return None;
    }

    let x = &series[..series.len() - 1];
    let z: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();
    let m = z.len() as f64;

    let mean_x = x.iter().sum::<f64>() / m;
    let mean_z = z.iter().sum::<f64>() / m;
    let sxx = x.iter().map(|v| (v - mean_x).powi(2)).sum::<f64>();
    if sxx <= f64::EPSILON {
        return None;
    }
    let sxz = x
        .iter()
        .zip(&z)
        .map(|(a, b)| (a - mean_x) * (b - mean_z))
        .sum::<f64>();

    let b = sxz / sxx;
    let a = mean_z - b * mean_x;
    let ssr = x
        .iter()
        .zip(&z)
        .map(|(xi, zi)| (zi - a - b * xi).powi(2))
        .sum::<f64>();
    let se = (ssr / (m - 2.0) / sxx).sqrt();

    if se == 0.0 {
        Some(if b < 0.0 { f64::NEG_INFINITY } else { f64::INFINITY })
    } else {
        Some(b / se)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureConfig;
    use crate::domain::{Component, DemandObservation};
    use crate::features::FeatureBuilder;
    use chrono::{Duration, NaiveDate};

    const PATTERN: [f64; 7] = [0.0, 5.0, 10.0, 5.0, 0.0, -10.0, -10.0];

    fn rows(values: &[f64]) -> Vec<FeatureRow> {
        let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
        let obs: Vec<DemandObservation> = values
            .iter()
            .enumerate()
            .map(|(i, &v)| DemandObservation {
                date: start + Duration::days(i as i64),
                component: Component::Rbc,
                units_demanded: v,
            })
            .collect();
        FeatureBuilder::new(&FeatureConfig::default()).build(&obs)
    }

    #[test]
    fn test_recovers_trend_plus_weekly_pattern() {
        let truth: Vec<f64> = (0..140).map(|t| 50.0 + t as f64 + PATTERN[t % 7]).collect();
        let all = rows(&truth);
        let (train, test) = all.split_at(126);

        let builder = FeatureBuilder::new(&FeatureConfig::default());
        let ctx = FitContext { builder: &builder, seed: 7 };
        let fitted = SeasonalArConfig::default().fit(train, &ctx).unwrap();
        let predicted = fitted.predict(Horizon::Holdout(test));

        assert_eq!(predicted.len(), 14);
        for (p, row) in predicted.iter().zip(test) {
            assert!((p - row.units_demanded).abs() < 1e-6, "{} vs {}", p, row.units_demanded);
        }
    }

    #[test]
    fn test_reports_fit_error_when_differencing_is_not_enough() {
        let explosive: Vec<f64> = (0..80).map(|t| (t as f64).powi(2)).collect();
        let config = SeasonalArConfig {
            differencing: 0,
            seasonal_differencing: 0,
            max_differencing: 0,
            ..SeasonalArConfig::default()
        };

        let builder = FeatureBuilder::new(&FeatureConfig::default());
        let ctx = FitContext { builder: &builder, seed: 7 };
        let result = config.fit(&rows(&explosive), &ctx);
        assert!(matches!(result, Err(FitError::NonStationary { differences: 0, .. })));
    }

    #[test]
    fn test_short_history_is_rejected() {
        let builder = FeatureBuilder::new(&FeatureConfig::default());
        let ctx = FitContext { builder: &builder, seed: 7 };
        let result = SeasonalArConfig::default().fit(&rows(&[10.0; 12]), &ctx);
        assert!(matches!(result, Err(FitError::InsufficientHistory { .. })));
    }

    #[test]
    fn test_seasonal_lags() {
        let config = SeasonalArConfig {
            ar_order: 3,
            seasonal_ar_order: 2,
            seasonal_period: 7,
            ..SeasonalArConfig::default()
        };
        assert_eq!(config.lags(), vec![1, 2, 3, 7, 14]);
    }
}
