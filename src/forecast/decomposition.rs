//! Additive decomposition: piecewise-linear trend, Fourier seasonality, holiday effect

use std::f64::consts::PI;

use chrono::NaiveDate;
use ndarray::{Array1, Array2};

use super::{least_squares, FitContext, FittedForecast, Forecaster, Horizon, ModelDiagnostics};
use crate::config::DecompositionConfig;
use crate::error::FitError;
use crate::features::{FeatureBuilder, FeatureRow};

const WEEK_DAYS: f64 = 7.0;
const YEAR_DAYS: f64 = 365.25;

/// Column layout shared by fitting and prediction
#[derive(Debug, Clone)]
struct Design {
    origin: NaiveDate,
    span_days: f64,
    changepoints: Vec<f64>,
    weekly_order: usize,
    yearly_order: usize,
    holidays: Option<FeatureBuilder>,
}

impl Design {
    fn width(&self) -> usize {
        1 + self.changepoints.len()
            + 2 * self.weekly_order
            + 2 * self.yearly_order
            + usize::from(self.holidays.is_some())
    }

    fn row(&self, date: NaiveDate) -> Vec<f64> {
        let t = (date - self.origin).num_days() as f64;
        let tau = t / self.span_days;

        let mut x = Vec::with_capacity(self.width());
        x.push(tau);
        x.extend(self.changepoints.iter().map(|c| (tau - c).max(0.0)));
        for k in 1..=self.weekly_order {
            let angle = 2.0 * PI * k as f64 * t / WEEK_DAYS;
            x.push(angle.sin());
            x.push(angle.cos());
        }
        for k in 1..=self.yearly_order {
            let angle = 2.0 * PI * k as f64 * t / YEAR_DAYS;
            x.push(angle.sin());
            x.push(angle.cos());
        }
        if let Some(builder) = &self.holidays {
            x.push(if builder.calendar(date).is_holiday { 1.0 } else { 0.0 });
        }
        x
    }
}

#[derive(Debug, Clone)]
pub struct FittedDecomposition {
    design: Design,
    coefficients: Vec<f64>,
    intercept: f64,
    last_date: NaiveDate,
    training_rows: usize,
}

impl Forecaster for DecompositionConfig {
    type Fitted = FittedDecomposition;

    fn fit(&self, history: &[FeatureRow], ctx: &FitContext<'_>) -> Result<FittedDecomposition, FitError> {
        let (first, last) = match (history.first(), history.last()) {
            (Some(first), Some(last)) if history.len() >= 2 => (first.date, last.date),
            _ => {
                return Err(FitError::InsufficientHistory {
                    required: 2,
                    available: history.len(),
                })
            }
        };
        let span_days = ((last - first).num_days() as f64).max(1.0);

        // seasonalities switch on once two full periods are observed
        let weekly_order = if span_days >= 2.0 * WEEK_DAYS {
            self.weekly_fourier_order
        } else {
            0
        };
        let yearly_order = if span_days >= 2.0 * YEAR_DAYS {
            self.yearly_fourier_order
        } else {
            0
        };

        let holiday_count = history.iter().filter(|r| r.calendar.is_holiday).count();
        let holidays = (holiday_count > 0 && holiday_count < history.len())
            .then(|| ctx.builder.clone());

        let changepoints = (1..=self.changepoints)
            .map(|j| self.changepoint_range * j as f64 / self.changepoints as f64)
            .filter(|c| *c > 0.0 && *c < 1.0)
            .collect();

        let design = Design {
            origin: first,
            span_days,
            changepoints,
            weekly_order,
            yearly_order,
            holidays,
        };

        let width = design.width();
        let required = width + 2;
        if history.len() < required {
            return Err(FitError::InsufficientHistory {
                required,
                available: history.len(),
            });
        }

        let mut x = Array2::<f64>::zeros((history.len(), width));
        for (i, row) in history.iter().enumerate() {
            for (j, v) in design.row(row.date).into_iter().enumerate() {
                x[[i, j]] = v;
            }
        }
        let y = Array1::from_iter(history.iter().map(|r| r.units_demanded));
        let (params, intercept) = least_squares(x, y)?;

        Ok(FittedDecomposition {
            design,
            coefficients: params.to_vec(),
            intercept,
            last_date: last,
            training_rows: history.len(),
        })
    }
}

impl FittedForecast for FittedDecomposition {
    fn predict(&self, horizon: Horizon<'_>) -> Vec<f64> {
        horizon
            .dates()
            .into_iter()
            .map(|date| {
                let value = self.intercept
                    + self
                        .design
                        .row(date)
                        .iter()
                        .zip(&self.coefficients)
                        .map(|(x, c)| x * c)
                        .sum::<f64>();
                value.max(0.0)
            })
            .collect()
    }

    fn diagnostics(&self) -> ModelDiagnostics {
        let mut diag = ModelDiagnostics::new(self.training_rows);
        diag.push("changepoints", self.design.changepoints.len());
        diag.push("weekly_fourier_order", self.design.weekly_order);
        diag.push("yearly_fourier_order", self.design.yearly_order);
        diag.push("holiday_regressor", self.design.holidays.is_some());
        // slope of the base trend, in units per day
        if let Some(slope) = self.coefficients.first() {
            diag.push("base_trend_per_day", format!("{:.4}", slope / self.design.span_days));
        }
        diag.push("trained_through", self.last_date);
        diag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureConfig;
    use crate::domain::{Component, DemandObservation};
    use chrono::Duration;

    fn rows(builder: &FeatureBuilder, values: &[f64]) -> Vec<FeatureRow> {
        let start = NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
        let obs: Vec<DemandObservation> = values
            .iter()
            .enumerate()
            .map(|(i, &v)| DemandObservation {
                date: start + Duration::days(i as i64),
                component: Component::Platelets,
                units_demanded: v,
            })
            .collect();
        builder.build(&obs)
    }

    #[test]
    fn test_fits_trend_and_weekly_cycle() {
        let builder = FeatureBuilder::new(&FeatureConfig::default());
        let values: Vec<f64> = (0..400)
            .map(|t| 100.0 + 0.05 * t as f64 + 8.0 * (2.0 * PI * t as f64 / 7.0).sin())
            .collect();
        let all = rows(&builder, &values);
        let (train, test) = all.split_at(372);

        let ctx = FitContext { builder: &builder, seed: 1 };
        let fitted = DecompositionConfig::default().fit(train, &ctx).unwrap();
        let predicted = fitted.predict(Horizon::Holdout(test));

        let mae = predicted
            .iter()
            .zip(test)
            .map(|(p, r)| (p - r.units_demanded).abs())
            .sum::<f64>()
            / test.len() as f64;
        assert!(mae < 0.5, "mae {}", mae);

        let diag = fitted.diagnostics();
        assert_eq!(diag.get("yearly_fourier_order"), Some("0"));
        assert_eq!(diag.get("weekly_fourier_order"), Some("3"));
    }

    #[test]
    fn test_holiday_regressor_picks_up_spikes() {
        let mut config = FeatureConfig::default();
        let start = NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
        config.holidays = (0..10).map(|i| start + Duration::days(17 + 30 * i)).collect();
        let builder = FeatureBuilder::new(&config);

        let values: Vec<f64> = (0..300)
            .map(|t| if (t as i64 - 17) % 30 == 0 && t >= 17 { 80.0 } else { 40.0 })
            .collect();
        let train = rows(&builder, &values);

        let ctx = FitContext { builder: &builder, seed: 1 };
        let fitted = DecompositionConfig::default().fit(&train, &ctx).unwrap();
        let next_holiday = [start + Duration::days(17 + 30 * 9)];
        let ordinary = [start + Duration::days(17 + 30 * 9 + 3)];

        let spike = fitted.predict(Horizon::Future(&next_holiday))[0];
        let normal = fitted.predict(Horizon::Future(&ordinary))[0];
        assert!(spike - normal > 30.0, "spike {} normal {}", spike, normal);
    }
}
