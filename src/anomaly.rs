//! Rolling z-score anomaly flags on demand

use chrono::NaiveDate;

use crate::config::AnomalyConfig;
use crate::domain::Component;
use crate::features::FeatureRow;

#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyFlag {
    pub date: NaiveDate,
    pub component: Component,
    pub units_demanded: f64,
    pub rolling_mean: Option<f64>,
    pub rolling_std: Option<f64>,
    /// `None` without a full window or with zero spread. A zero-spread
    /// baseline has no z-score, so any departure from its mean is flagged.
    pub z_score: Option<f64>,
    pub is_anomalous: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct AnomalyDetector {
    window: usize,
    threshold: f64,
}

impl AnomalyDetector {
    pub fn new(config: &AnomalyConfig) -> Self {
        Self {
            window: config.window,
            threshold: config.threshold,
        }
    }

    /// `(z, anomalous)` for one value against its baseline
    pub fn classify(&self, value: f64, mean: Option<f64>, std: Option<f64>) -> (Option<f64>, bool) {
        let (Some(mean), Some(std)) = (mean, std) else {
            return (None, false);
        };
        let deviation = (value - mean).abs();
        // zero spread: no z-score, and the threshold collapses to "any deviation"
        let z = (std > 0.0).then(|| (value - mean) / std);
        (z, deviation > self.threshold * std)
    }

    pub fn detect(&self, rows: &[FeatureRow]) -> Vec<AnomalyFlag> {
        rows.iter()
            .map(|row| {
                let mean = row.rolling_mean(self.window);
                let std = row.rolling_std(self.window);
                let (z_score, is_anomalous) = self.classify(row.units_demanded, mean, std);
                AnomalyFlag {
                    date: row.date,
                    component: row.component,
                    units_demanded: row.units_demanded,
                    rolling_mean: mean,
                    rolling_std: std,
                    z_score,
                    is_anomalous,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureConfig;
    use crate::domain::DemandObservation;
    use crate::features::FeatureBuilder;
    use chrono::Duration;

    #[test]
    fn test_threshold_classification() {
        let detector = AnomalyDetector::new(&AnomalyConfig::default());

        let (z, flagged) = detector.classify(100.0, Some(50.0), Some(10.0));
        assert!(flagged);
        assert_eq!(z, Some(5.0));

        let (z, flagged) = detector.classify(70.0, Some(50.0), Some(10.0));
        assert!(!flagged);
        assert_eq!(z, Some(2.0));

        assert_eq!(detector.classify(500.0, None, None), (None, false));
    }

    #[test]
    fn test_zero_spread_baseline() {
        let detector = AnomalyDetector::new(&AnomalyConfig::default());
        assert_eq!(detector.classify(40.0, Some(40.0), Some(0.0)), (None, false));
        assert_eq!(detector.classify(41.0, Some(40.0), Some(0.0)), (None, true));
        assert_eq!(detector.classify(39.5, Some(40.0), Some(0.0)), (None, true));
    }

    #[test]
    fn test_flat_series_has_no_z_scores_and_no_flags() {
        let builder = FeatureBuilder::new(&FeatureConfig::default());
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let obs: Vec<DemandObservation> = (0..40)
            .map(|i| DemandObservation {
                date: start + Duration::days(i),
                component: Component::Ffp,
                units_demanded: 15.0,
            })
            .collect();

        let flags = AnomalyDetector::new(&AnomalyConfig::default()).detect(&builder.build(&obs));
        assert!(flags.iter().all(|f| f.z_score.is_none() && !f.is_anomalous));
        assert_eq!(flags[39].rolling_std, Some(0.0));
    }

    #[test]
    fn test_points_without_full_window_are_never_flagged() {
        let builder = FeatureBuilder::new(&FeatureConfig::default());
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut values = vec![20.0; 40];
        values[10] = 500.0;
        values[35] = 500.0;
        let obs: Vec<DemandObservation> = values
            .iter()
            .enumerate()
            .map(|(i, &v)| DemandObservation {
                date: start + Duration::days(i as i64),
                component: Component::Platelets,
                units_demanded: v,
            })
            .collect();

        let flags = AnomalyDetector::new(&AnomalyConfig::default()).detect(&builder.build(&obs));
        assert!(flags[..29].iter().all(|f| !f.is_anomalous && f.z_score.is_none()));
        assert!(flags[35].is_anomalous);
        assert_eq!(flags.iter().filter(|f| f.is_anomalous).count(), 1);
    }
}
