//! Regression trees and the two tree ensembles built on them

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};

use super::{FitContext, FittedForecast, Forecaster, Horizon, ModelDiagnostics};
use crate::config::{GradientBoostingConfig, RandomForestConfig};
use crate::error::FitError;
use crate::features::{FeatureBuilder, FeatureRow};

/// Fewer complete regressor rows than this is not worth a tree
const MIN_TRAINING_ROWS: usize = 30;
const MIN_GAIN: f64 = 1e-12;
const REPORTED_IMPORTANCES: usize = 5;

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug, Clone, Copy)]
struct TreeParams {
    max_depth: usize,
    min_samples_leaf: usize,
    max_features: usize,
}

/// CART regression tree, variance-reduction splits
#[derive(Debug, Clone)]
struct RegressionTree {
    root: Node,
}

impl RegressionTree {
    fn fit(
        x: &[Vec<f64>],
        y: &[f64],
        mut indices: Vec<usize>,
        params: TreeParams,
        rng: &mut StdRng,
        importances: &mut [f64],
    ) -> Self {
        let root = grow(x, y, &mut indices, 0, params, rng, importances);
        Self { root }
    }

    /// NaN features fall to the right branch
    fn predict(&self, x: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf(value) => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if x[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }
}

fn mean_of(y: &[f64], indices: &[usize]) -> f64 {
    indices.iter().map(|&i| y[i]).sum::<f64>() / indices.len() as f64
}

fn grow(
    x: &[Vec<f64>],
    y: &[f64],
    indices: &mut [usize],
    depth: usize,
    params: TreeParams,
    rng: &mut StdRng,
    importances: &mut [f64],
) -> Node {
    let mean = mean_of(y, indices);
    if depth >= params.max_depth || indices.len() < 2 * params.min_samples_leaf {
        return Node::Leaf(mean);
    }

    let n_features = x[indices[0]].len();
    let candidates = sample(rng, n_features, params.max_features.min(n_features)).into_vec();

    let n = indices.len() as f64;
    let total: f64 = indices.iter().map(|&i| y[i]).sum();
    let parent_score = total * total / n;

    // (gain, feature, threshold)
    let mut best: Option<(f64, usize, f64)> = None;
    for feature in candidates {
        indices.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));
        let mut left_sum = 0.0;
        for split in 1..indices.len() {
            left_sum += y[indices[split - 1]];
            let lo = x[indices[split - 1]][feature];
            let hi = x[indices[split]][feature];
            if split < params.min_samples_leaf
                || indices.len() - split < params.min_samples_leaf
                || lo >= hi
            {
                continue;
            }
            let nl = split as f64;
            let nr = n - nl;
            let right_sum = total - left_sum;
            let gain = left_sum * left_sum / nl + right_sum * right_sum / nr - parent_score;
            if gain > MIN_GAIN && best.map_or(true, |(g, _, _)| gain > g) {
                best = Some((gain, feature, (lo + hi) / 2.0));
            }
        }
    }

    let Some((gain, feature, threshold)) = best else {
        return Node::Leaf(mean);
    };
    importances[feature] += gain;

    indices.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));
    let cut = indices.partition_point(|&i| x[i][feature] <= threshold);
    let (left_idx, right_idx) = indices.split_at_mut(cut);

    Node::Split {
        feature,
        threshold,
        left: Box::new(grow(x, y, left_idx, depth + 1, params, rng, importances)),
        right: Box::new(grow(x, y, right_idx, depth + 1, params, rng, importances)),
    }
}

/// Regressor matrix from rows whose regressors are all present
struct TrainingSet {
    x: Vec<Vec<f64>>,
    y: Vec<f64>,
    values: Vec<f64>,
}

fn training_set(history: &[FeatureRow], builder: &FeatureBuilder) -> Result<TrainingSet, FitError> {
    let values: Vec<f64> = history.iter().map(|r| r.units_demanded).collect();
    let mut x = Vec::new();
    let mut y = Vec::new();
    for (i, row) in history.iter().enumerate() {
        let complete: Option<Vec<f64>> = builder.regressors(&values[..i], row.date).into_iter().collect();
        if let Some(features) = complete {
            x.push(features);
            y.push(row.units_demanded);
        }
    }

    if x.len() < MIN_TRAINING_ROWS {
        return Err(FitError::InsufficientHistory {
            required: MIN_TRAINING_ROWS,
            available: x.len(),
        });
    }
    Ok(TrainingSet { x, y, values })
}

/// Shared recursive predictor: holdout actuals extend the lag history,
/// future predictions feed back into it
fn predict_recursive(
    builder: &FeatureBuilder,
    history: &[f64],
    horizon: Horizon<'_>,
    model: impl Fn(&[f64]) -> f64,
) -> Vec<f64> {
    let mut values = history.to_vec();
    let step = |values: &[f64], date: NaiveDate| {
        let x: Vec<f64> = builder
            .regressors(values, date)
            .into_iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect();
        model(&x).max(0.0)
    };

    match horizon {
        Horizon::Holdout(rows) => rows
            .iter()
            .map(|row| {
                let predicted = step(&values, row.date);
                values.push(row.units_demanded);
                predicted
            })
            .collect(),
        Horizon::Future(dates) => dates
            .iter()
            .map(|&date| {
                let predicted = step(&values, date);
                values.push(predicted);
                predicted
            })
            .collect(),
    }
}

fn top_importances(builder: &FeatureBuilder, importances: &[f64]) -> String {
    let total: f64 = importances.iter().sum();
    if total <= 0.0 {
        return "none".to_string();
    }
    let names = builder.regressor_names();
    let mut ranked: Vec<(usize, f64)> = importances.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked
        .iter()
        .take(REPORTED_IMPORTANCES)
        .map(|(i, v)| format!("{}:{:.3}", names[*i], v / total))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Clone)]
pub struct FittedForest {
    trees: Vec<RegressionTree>,
    builder: FeatureBuilder,
    history: Vec<f64>,
    importances: Vec<f64>,
    training_rows: usize,
}

impl FittedForest {
    fn predict_one(&self, x: &[f64]) -> f64 {
        self.trees.iter().map(|t| t.predict(x)).sum::<f64>() / self.trees.len() as f64
    }
}

impl Forecaster for RandomForestConfig {
    type Fitted = FittedForest;

    fn fit(&self, history: &[FeatureRow], ctx: &FitContext<'_>) -> Result<FittedForest, FitError> {
        let set = training_set(history, ctx.builder)?;
        let n = set.y.len();
        let n_features = ctx.builder.regressor_count();
        let params = TreeParams {
            max_depth: self.max_depth,
            min_samples_leaf: self.min_samples_leaf,
            max_features: ((self.feature_fraction * n_features as f64).ceil() as usize).max(1),
        };

        let mut importances = vec![0.0; n_features];
        let trees = (0..self.n_trees)
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(ctx.seed.wrapping_add(t as u64));
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit(&set.x, &set.y, bootstrap, params, &mut rng, &mut importances)
            })
            .collect();

        Ok(FittedForest {
            trees,
            builder: ctx.builder.clone(),
            history: set.values,
            importances,
            training_rows: n,
        })
    }
}

impl FittedForecast for FittedForest {
    fn predict(&self, horizon: Horizon<'_>) -> Vec<f64> {
        predict_recursive(&self.builder, &self.history, horizon, |x| self.predict_one(x))
    }

    fn diagnostics(&self) -> ModelDiagnostics {
        let mut diag = ModelDiagnostics::new(self.training_rows);
        diag.push("trees", self.trees.len());
        diag.push("top_features", top_importances(&self.builder, &self.importances));
        diag
    }
}

#[derive(Debug, Clone)]
pub struct FittedBoosting {
    base: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
    builder: FeatureBuilder,
    history: Vec<f64>,
    importances: Vec<f64>,
    training_rows: usize,
    final_train_rmse: f64,
}

impl FittedBoosting {
    fn predict_one(&self, x: &[f64]) -> f64 {
        self.base
            + self.learning_rate * self.trees.iter().map(|t| t.predict(x)).sum::<f64>()
    }
}

impl Forecaster for GradientBoostingConfig {
    type Fitted = FittedBoosting;

    fn fit(&self, history: &[FeatureRow], ctx: &FitContext<'_>) -> Result<FittedBoosting, FitError> {
        let set = training_set(history, ctx.builder)?;
        let n = set.y.len();
        let n_features = ctx.builder.regressor_count();
        let params = TreeParams {
            max_depth: self.max_depth,
            min_samples_leaf: self.min_samples_leaf,
            max_features: n_features,
        };
        let rows_per_round = ((self.subsample * n as f64).round() as usize).clamp(1, n);

        let base = set.y.iter().sum::<f64>() / n as f64;
        let mut fitted = vec![base; n];
        let mut importances = vec![0.0; n_features];
        let mut trees = Vec::with_capacity(self.n_estimators);

        for round in 0..self.n_estimators {
            let residuals: Vec<f64> = set.y.iter().zip(&fitted).map(|(y, f)| y - f).collect();
            let mut rng = StdRng::seed_from_u64(ctx.seed.wrapping_add(round as u64));
            let rows = sample(&mut rng, n, rows_per_round).into_vec();
            let tree = RegressionTree::fit(&set.x, &residuals, rows, params, &mut rng, &mut importances);
            for (f, x) in fitted.iter_mut().zip(&set.x) {
                *f += self.learning_rate * tree.predict(x);
            }
            trees.push(tree);
        }

        let final_train_rmse = (set
            .y
            .iter()
            .zip(&fitted)
            .map(|(y, f)| (y - f).powi(2))
            .sum::<f64>()
            / n as f64)
            .sqrt();

        Ok(FittedBoosting {
            base,
            learning_rate: self.learning_rate,
            trees,
            builder: ctx.builder.clone(),
            history: set.values,
            importances,
            training_rows: n,
            final_train_rmse,
        })
    }
}

impl FittedForecast for FittedBoosting {
    fn predict(&self, horizon: Horizon<'_>) -> Vec<f64> {
        predict_recursive(&self.builder, &self.history, horizon, |x| self.predict_one(x))
    }

    fn diagnostics(&self) -> ModelDiagnostics {
        let mut diag = ModelDiagnostics::new(self.training_rows);
        diag.push("rounds", self.trees.len());
        diag.push("train_rmse", format!("{:.4}", self.final_train_rmse));
        diag.push("top_features", top_importances(&self.builder, &self.importances));
        diag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureConfig;
    use crate::domain::{Component, DemandObservation};
    use chrono::{Duration, NaiveDate};

    fn weekend_dip(days: usize) -> (FeatureBuilder, Vec<FeatureRow>) {
        let builder = FeatureBuilder::new(&FeatureConfig::default());
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        let obs: Vec<DemandObservation> = (0..days)
            .map(|i| DemandObservation {
                date: start + Duration::days(i as i64),
                component: Component::Rbc,
                units_demanded: if i % 7 >= 5 { 20.0 } else { 50.0 },
            })
            .collect();
        let rows = builder.build(&obs);
        (builder, rows)
    }

    fn mae(predicted: &[f64], rows: &[FeatureRow]) -> f64 {
        predicted
            .iter()
            .zip(rows)
            .map(|(p, r)| (p - r.units_demanded).abs())
            .sum::<f64>()
            / rows.len() as f64
    }

    #[test]
    fn test_single_tree_finds_step() {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, 0.0]).collect();
        let y: Vec<f64> = (0..20).map(|i| if i < 10 { 1.0 } else { 5.0 }).collect();
        let params = TreeParams {
            max_depth: 3,
            min_samples_leaf: 1,
            max_features: 2,
        };
        let mut rng = StdRng::seed_from_u64(0);
        let mut importances = vec![0.0; 2];
        let tree = RegressionTree::fit(&x, &y, (0..20).collect(), params, &mut rng, &mut importances);

        assert_eq!(tree.predict(&[3.0, 0.0]), 1.0);
        assert_eq!(tree.predict(&[15.0, 0.0]), 5.0);
        assert!(importances[0] > 0.0);
        assert_eq!(importances[1], 0.0);
    }

    #[test]
    fn test_random_forest_learns_weekly_pattern() {
        let (builder, rows) = weekend_dip(200);
        let (train, test) = rows.split_at(172);
        let config = RandomForestConfig {
            n_trees: 25,
            ..RandomForestConfig::default()
        };
        let ctx = FitContext { builder: &builder, seed: 11 };

        let fitted = config.fit(train, &ctx).unwrap();
        let predicted = fitted.predict(Horizon::Holdout(test));
        assert!(mae(&predicted, test) < 1.0);

        let again = config.fit(train, &ctx).unwrap().predict(Horizon::Holdout(test));
        assert_eq!(predicted, again);
    }

    #[test]
    fn test_gradient_boosting_learns_weekly_pattern() {
        let (builder, rows) = weekend_dip(200);
        let (train, test) = rows.split_at(172);
        let ctx = FitContext { builder: &builder, seed: 5 };

        let fitted = GradientBoostingConfig::default().fit(train, &ctx).unwrap();
        assert!(mae(&fitted.predict(Horizon::Holdout(test)), test) < 1.0);

        let dates: Vec<NaiveDate> = (1..=7).map(|d| test[test.len() - 1].date + Duration::days(d)).collect();
        let future = fitted.predict(Horizon::Future(&dates));
        assert_eq!(future.len(), 7);
        assert!(future.iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn test_needs_complete_regressor_rows() {
        let (builder, rows) = weekend_dip(45);
        let ctx = FitContext { builder: &builder, seed: 1 };
        let result = RandomForestConfig::default().fit(&rows, &ctx);
        assert!(matches!(
            result,
            Err(FitError::InsufficientHistory { required: 30, available: 15 })
        ));
    }
}
