//! Holdout accuracy metrics

use std::cmp::Ordering;

/// Accuracy of one strategy over the holdout
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastMetrics {
    pub points: usize,
    pub mae: f64,
    pub rmse: f64,
    /// Percent; `None` when every actual is zero
    pub mape: Option<f64>,
    /// `None` when the actuals have no variance
    pub r2: Option<f64>,
    /// Holdout points left out of MAPE because actual demand was zero
    pub excluded_zero_actuals: usize,
}

/// Compare actuals and predictions of equal length
pub fn evaluate(actuals: &[f64], predictions: &[f64]) -> ForecastMetrics {
    debug_assert_eq!(actuals.len(), predictions.len());
    let n = actuals.len().min(predictions.len());
    if n == 0 {
        return ForecastMetrics {
            points: 0,
            mae: f64::NAN,
            rmse: f64::NAN,
            mape: None,
            r2: None,
            excluded_zero_actuals: 0,
        };
    }

    let pairs = || actuals.iter().zip(predictions.iter()).take(n);
    let mae = pairs().map(|(a, p)| (a - p).abs()).sum::<f64>() / n as f64;
    let ss_res = pairs().map(|(a, p)| (a - p).powi(2)).sum::<f64>();
    let rmse = (ss_res / n as f64).sqrt();

    let mut ape_sum = 0.0;
    let mut ape_count = 0usize;
    for (a, p) in pairs() {
        if *a != 0.0 {
            ape_sum += ((a - p) / a).abs();
            ape_count += 1;
        }
    }
    let mape = (ape_count > 0).then(|| ape_sum / ape_count as f64 * 100.0);

    let mean = actuals.iter().take(n).sum::<f64>() / n as f64;
    let ss_tot = actuals.iter().take(n).map(|a| (a - mean).powi(2)).sum::<f64>();
    let r2 = (ss_tot > 0.0).then(|| 1.0 - ss_res / ss_tot);

    ForecastMetrics {
        points: n,
        mae,
        rmse,
        mape,
        r2,
        excluded_zero_actuals: n - ape_count,
    }
}

/// Selection order: lowest MAPE first, undefined MAPE last, then lowest MAE
pub fn compare_for_selection(a: &ForecastMetrics, b: &ForecastMetrics) -> Ordering {
    let by_mape = match (a.mape, b.mape) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_mape.then_with(|| a.mae.total_cmp(&b.mae))
}
