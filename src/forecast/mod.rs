//! Forecasting strategies, holdout evaluation and model selection

pub mod decomposition;
pub mod metrics;
pub mod seasonal;
pub mod tree;

use std::fmt;

use chrono::{Duration, NaiveDate};
use linfa::prelude::*;
use linfa::Dataset;
use linfa_linear::LinearRegression;
use ndarray::{Array1, Array2};
use tracing::{debug, info, warn};

use crate::config::{
    DecompositionConfig, ForecastConfig, GradientBoostingConfig, RandomForestConfig,
    SeasonalArConfig,
};
use crate::domain::Component;
use crate::error::{Diagnostic, FitError};
use crate::features::{FeatureBuilder, FeatureRow};
use crate::workers::map_scoped;

use self::decomposition::FittedDecomposition;
use self::metrics::{compare_for_selection, evaluate, ForecastMetrics};
use self::seasonal::FittedSeasonalAr;
use self::tree::{FittedBoosting, FittedForest};

/// Run-scoped inputs every strategy may draw on while fitting
#[derive(Debug, Clone, Copy)]
pub struct FitContext<'a> {
    pub builder: &'a FeatureBuilder,
    pub seed: u64,
}

/// Dates to predict. Holdout rows carry actuals that feature-driven models
/// may use as lag history; future dates do not.
#[derive(Debug, Clone, Copy)]
pub enum Horizon<'a> {
    Holdout(&'a [FeatureRow]),
    Future(&'a [NaiveDate]),
}

impl Horizon<'_> {
    pub fn len(&self) -> usize {
        match self {
            Horizon::Holdout(rows) => rows.len(),
            Horizon::Future(dates) => dates.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        match self {
            Horizon::Holdout(rows) => rows.iter().map(|r| r.date).collect(),
            Horizon::Future(dates) => dates.to_vec(),
        }
    }
}

/// Fits one strategy on a training prefix
pub trait Forecaster {
    type Fitted: FittedForecast;

    fn fit(&self, history: &[FeatureRow], ctx: &FitContext<'_>) -> Result<Self::Fitted, FitError>;
}

/// A fitted strategy, ready to predict the dates following its training data
pub trait FittedForecast {
    fn predict(&self, horizon: Horizon<'_>) -> Vec<f64>;

    fn diagnostics(&self) -> ModelDiagnostics;
}

/// Key/value description of a fitted model
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelDiagnostics {
    pub training_rows: usize,
    pub details: Vec<(String, String)>,
}

impl ModelDiagnostics {
    pub fn new(training_rows: usize) -> Self {
        Self {
            training_rows,
            details: Vec::new(),
        }
    }

    pub fn push(&mut self, key: &str, value: impl fmt::Display) {
        self.details.push((key.to_string(), value.to_string()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.details
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// `key=value` pairs joined by `;`, the form written to output tables
    pub fn render(&self) -> String {
        let mut parts = vec![format!("training_rows={}", self.training_rows)];
        parts.extend(self.details.iter().map(|(k, v)| format!("{}={}", k, v)));
        parts.join(";")
    }
}

/// Ordinary least squares with intercept, rejecting non-finite solutions
pub(crate) fn least_squares(x: Array2<f64>, y: Array1<f64>) -> Result<(Array1<f64>, f64), FitError> {
    let dataset = Dataset::new(x, y);
    let model = LinearRegression::new()
        .fit(&dataset)
        .map_err(|e| FitError::Solver(e.to_string()))?;

    let params = model.params().clone();
    let intercept = model.intercept();
    if !intercept.is_finite() || params.iter().any(|p| !p.is_finite()) {
        return Err(FitError::Solver("solution is not finite".to_string()));
    }
    Ok((params, intercept))
}

/// A configured forecasting strategy
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    SeasonalAr(SeasonalArConfig),
    Decomposition(DecompositionConfig),
    RandomForest(RandomForestConfig),
    GradientBoosting(GradientBoostingConfig),
}

impl Strategy {
    /// Enabled strategies in a fixed order
    pub fn from_config(config: &ForecastConfig) -> Vec<Strategy> {
        let mut strategies = Vec::new();
        if config.seasonal.enabled {
            strategies.push(Strategy::SeasonalAr(config.seasonal.clone()));
        }
        if config.decomposition.enabled {
            strategies.push(Strategy::Decomposition(config.decomposition.clone()));
        }
        if config.random_forest.enabled {
            strategies.push(Strategy::RandomForest(config.random_forest.clone()));
        }
        if config.gradient_boosting.enabled {
            strategies.push(Strategy::GradientBoosting(config.gradient_boosting.clone()));
        }
        strategies
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::SeasonalAr(_) => "seasonal_ar",
            Strategy::Decomposition(_) => "decomposition",
            Strategy::RandomForest(_) => "random_forest",
            Strategy::GradientBoosting(_) => "gradient_boosting",
        }
    }

    pub fn fit(&self, history: &[FeatureRow], ctx: &FitContext<'_>) -> Result<FittedModel, FitError> {
        Ok(match self {
            Strategy::SeasonalAr(c) => FittedModel::SeasonalAr(c.fit(history, ctx)?),
            Strategy::Decomposition(c) => FittedModel::Decomposition(c.fit(history, ctx)?),
            Strategy::RandomForest(c) => FittedModel::RandomForest(c.fit(history, ctx)?),
            Strategy::GradientBoosting(c) => FittedModel::GradientBoosting(c.fit(history, ctx)?),
        })
    }
}

#[derive(Debug, Clone)]
pub enum FittedModel {
    SeasonalAr(FittedSeasonalAr),
    Decomposition(FittedDecomposition),
    RandomForest(FittedForest),
    GradientBoosting(FittedBoosting),
}

impl FittedForecast for FittedModel {
    fn predict(&self, horizon: Horizon<'_>) -> Vec<f64> {
        match self {
            FittedModel::SeasonalAr(m) => m.predict(horizon),
            FittedModel::Decomposition(m) => m.predict(horizon),
            FittedModel::RandomForest(m) => m.predict(horizon),
            FittedModel::GradientBoosting(m) => m.predict(horizon),
        }
    }

    fn diagnostics(&self) -> ModelDiagnostics {
        match self {
            FittedModel::SeasonalAr(m) => m.diagnostics(),
            FittedModel::Decomposition(m) => m.diagnostics(),
            FittedModel::RandomForest(m) => m.diagnostics(),
            FittedModel::GradientBoosting(m) => m.diagnostics(),
        }
    }
}

/// Holdout result of one strategy that fitted successfully
#[derive(Debug, Clone)]
pub struct StrategyReport {
    pub strategy: &'static str,
    pub dates: Vec<NaiveDate>,
    pub actuals: Vec<f64>,
    pub predictions: Vec<f64>,
    pub metrics: ForecastMetrics,
    pub diagnostics: ModelDiagnostics,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub predicted: f64,
}

/// Everything the ensemble produced for one component
#[derive(Debug, Clone)]
pub struct ComponentForecast {
    pub component: Component,
    pub training_rows: usize,
    pub holdout_rows: usize,
    pub reports: Vec<StrategyReport>,
    pub selected: Option<&'static str>,
    /// Selected strategy refitted on the full series
    pub forward: Vec<ForecastPoint>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ComponentForecast {
    pub fn selected_report(&self) -> Option<&StrategyReport> {
        let name = self.selected?;
        self.reports.iter().find(|r| r.strategy == name)
    }
}

/// Fits every enabled strategy on a training prefix, scores it on the holdout
/// suffix and forecasts forward with the winner
#[derive(Debug, Clone)]
pub struct ForecastEnsemble {
    strategies: Vec<Strategy>,
    builder: FeatureBuilder,
    holdout_length: usize,
    forecast_horizon: usize,
    parallel: bool,
    seed: u64,
}

impl ForecastEnsemble {
    pub fn new(config: &ForecastConfig, builder: FeatureBuilder, seed: u64) -> Self {
        Self {
            strategies: Strategy::from_config(config),
            builder,
            holdout_length: config.holdout_length,
            forecast_horizon: config.forecast_horizon,
            parallel: config.parallel,
            seed,
        }
    }

    /// Evaluate all strategies on one component's featurized series
    pub fn evaluate(&self, component: Component, rows: &[FeatureRow]) -> ComponentForecast {
        let mut result = ComponentForecast {
            component,
            training_rows: 0,
            holdout_rows: 0,
            reports: Vec::new(),
            selected: None,
            forward: Vec::new(),
            diagnostics: Vec::new(),
        };

        if rows.len() <= self.holdout_length {
            warn!(
                component = %component,
                rows = rows.len(),
                holdout = self.holdout_length,
                "series too short to hold out, skipping forecast"
            );
            for strategy in &self.strategies {
                result.diagnostics.push(Diagnostic::Fit {
                    component,
                    strategy: strategy.name().to_string(),
                    error: FitError::InsufficientHistory {
                        required: self.holdout_length + 1,
                        available: rows.len(),
                    },
                });
            }
            return result;
        }

        let (train, test) = rows.split_at(rows.len() - self.holdout_length);
        result.training_rows = train.len();
        result.holdout_rows = test.len();
        info!(
            component = %component,
            train = train.len(),
            holdout = test.len(),
            strategies = self.strategies.len(),
            "fitting forecast strategies"
        );

        let ctx = FitContext {
            builder: &self.builder,
            seed: self.seed,
        };
        let outcomes = map_scoped(&self.strategies, self.parallel, |strategy| {
            strategy.fit(train, &ctx).map(|fitted| {
                let predictions = fitted.predict(Horizon::Holdout(test));
                (predictions, fitted.diagnostics())
            })
        });

        let actuals: Vec<f64> = test.iter().map(|r| r.units_demanded).collect();
        let dates: Vec<NaiveDate> = test.iter().map(|r| r.date).collect();
        for (strategy, outcome) in self.strategies.iter().zip(outcomes) {
            match outcome {
                Ok((predictions, diagnostics)) => {
                    let metrics = evaluate(&actuals, &predictions);
                    debug!(
                        component = %component,
                        strategy = strategy.name(),
                        mae = metrics.mae,
                        mape = ?metrics.mape,
                        "strategy evaluated"
                    );
                    if metrics.excluded_zero_actuals > 0 {
                        result.diagnostics.push(Diagnostic::MapeExclusion {
                            component,
                            strategy: strategy.name().to_string(),
                            excluded: metrics.excluded_zero_actuals,
                        });
                    }
                    result.reports.push(StrategyReport {
                        strategy: strategy.name(),
                        dates: dates.clone(),
                        actuals: actuals.clone(),
                        predictions,
                        metrics,
                        diagnostics,
                    });
                }
                Err(error) => {
                    warn!(
                        component = %component,
                        strategy = strategy.name(),
                        error = %error,
                        "strategy failed to fit"
                    );
                    result.diagnostics.push(Diagnostic::Fit {
                        component,
                        strategy: strategy.name().to_string(),
                        error,
                    });
                }
            }
        }

        let winner = result
            .reports
            .iter()
            .min_by(|a, b| compare_for_selection(&a.metrics, &b.metrics))
            .map(|r| r.strategy);
        result.selected = winner;

        let Some(name) = winner else {
            warn!(component = %component, "no strategy fitted; no forecast selected");
            return result;
        };
        info!(component = %component, strategy = name, "selected forecast strategy");

        if self.forecast_horizon == 0 {
            return result;
        }
        let Some(strategy) = self.strategies.iter().find(|s| s.name() == name) else {
            return result;
        };
        let last = rows[rows.len() - 1].date;
        let future: Vec<NaiveDate> = (1..=self.forecast_horizon as i64)
            .map(|d| last + Duration::days(d))
            .collect();
        match strategy.fit(rows, &ctx) {
            Ok(fitted) => {
                result.forward = future
                    .iter()
                    .zip(fitted.predict(Horizon::Future(&future)))
                    .map(|(&date, predicted)| ForecastPoint { date, predicted })
                    .collect();
            }
            Err(error) => {
                warn!(
                    component = %component,
                    strategy = name,
                    error = %error,
                    "refit on the full series failed; no forward forecast"
                );
                result.diagnostics.push(Diagnostic::Fit {
                    component,
                    strategy: name.to_string(),
                    error,
                });
            }
        }

        result
    }
}
