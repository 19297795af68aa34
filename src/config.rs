//! Pipeline configuration: TOML sections with per-field defaults

use std::collections::BTreeSet;
use std::path::Path;

use chrono::NaiveDate;
use config::{Config, File, FileFormat, Map, Source, Value};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

const WEIGHT_TOLERANCE: f64 = 1e-9;

/// Top-level configuration for one pipeline run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub features: FeatureConfig,
    pub forecast: ForecastConfig,
    pub segmentation: SegmentationConfig,
    pub recommender: RecommenderConfig,
    pub anomaly: AnomalyConfig,
    pub inventory: InventoryConfig,
}

/// Calendar, lag and rolling-window settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeatureConfig {
    pub lags: Vec<usize>,
    pub rolling_windows: Vec<usize>,
    /// Months (1-12) that count as holiday season
    pub holiday_months: Vec<u32>,
    /// Weekday indices counted as weekend, Monday = 0
    pub weekend_days: Vec<u32>,
    /// Holiday calendar
    pub holidays: Vec<NaiveDate>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lags: vec![1, 7, 14, 30],
            rolling_windows: vec![7, 14, 30],
            holiday_months: vec![11, 12],
            weekend_days: vec![5, 6],
            holidays: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ForecastConfig {
    /// Trailing observations withheld for evaluation
    pub holdout_length: usize,
    /// Days forecast past the end of the series with the selected strategy
    pub forecast_horizon: usize,
    /// Fit strategies on separate worker threads
    pub parallel: bool,
    pub seasonal: SeasonalArConfig,
    pub decomposition: DecompositionConfig,
    pub random_forest: RandomForestConfig,
    pub gradient_boosting: GradientBoostingConfig,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            holdout_length: 90,
            forecast_horizon: 30,
            parallel: true,
            seasonal: SeasonalArConfig::default(),
            decomposition: DecompositionConfig::default(),
            random_forest: RandomForestConfig::default(),
            gradient_boosting: GradientBoostingConfig::default(),
        }
    }
}

/// Seasonal autoregressive model on a differenced series
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SeasonalArConfig {
    pub enabled: bool,
    pub seasonal_period: usize,
    pub ar_order: usize,
    pub seasonal_ar_order: usize,
    pub differencing: usize,
    pub seasonal_differencing: usize,
    /// Upper bound on regular differences tried before giving up
    pub max_differencing: usize,
    /// Dickey-Fuller t-statistic must fall below this value
    pub adf_critical_value: f64,
}

impl Default for SeasonalArConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            seasonal_period: 7,
            ar_order: 7,
            seasonal_ar_order: 1,
            differencing: 1,
            seasonal_differencing: 1,
            max_differencing: 2,
            adf_critical_value: -2.86,
        }
    }
}

/// Trend plus Fourier seasonality plus holiday effects
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DecompositionConfig {
    pub enabled: bool,
    pub changepoints: usize,
    /// Share of the training span in which changepoints are placed
    pub changepoint_range: f64,
    pub weekly_fourier_order: usize,
    pub yearly_fourier_order: usize,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            changepoints: 5,
            changepoint_range: 0.8,
            weekly_fourier_order: 3,
            yearly_fourier_order: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RandomForestConfig {
    pub enabled: bool,
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Share of regressors considered at each split
    pub feature_fraction: f64,
}

impl Default for RandomForestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            n_trees: 100,
            max_depth: 10,
            min_samples_leaf: 2,
            feature_fraction: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GradientBoostingConfig {
    pub enabled: bool,
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    /// Row share drawn without replacement for each round
    pub subsample: f64,
    pub min_samples_leaf: usize,
}

impl Default for GradientBoostingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            n_estimators: 200,
            max_depth: 4,
            learning_rate: 0.05,
            subsample: 0.8,
            min_samples_leaf: 2,
        }
    }
}

/// How the number of clusters is picked inside the search range
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum KSelection {
    #[default]
    Silhouette,
    Elbow,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SegmentationConfig {
    pub quintiles: usize,
    pub k_min: usize,
    pub k_max: usize,
    pub k_selection: KSelection,
    pub silhouette_threshold: f64,
    /// Donors sampled when scoring silhouette
    pub silhouette_sample: usize,
    pub max_iterations: u64,
    pub tolerance: f64,
    /// K-Means restarts per k
    pub n_runs: usize,
    /// Run the per-k trials on separate worker threads
    pub parallel: bool,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            quintiles: 5,
            k_min: 3,
            k_max: 8,
            k_selection: KSelection::Silhouette,
            silhouette_threshold: 0.35,
            silhouette_sample: 2000,
            max_iterations: 300,
            tolerance: 1e-4,
            n_runs: 10,
            parallel: true,
        }
    }
}

/// Recommendation score weights
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringWeights {
    pub rfm: f64,
    pub availability: f64,
    pub segment_match: f64,
    pub blood_match: f64,
    pub urgency: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            rfm: 0.4,
            availability: 0.2,
            segment_match: 0.2,
            blood_match: 0.1,
            urgency: 0.1,
        }
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.rfm + self.availability + self.segment_match + self.blood_match + self.urgency
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecommenderConfig {
    pub weights: ScoringWeights,
    /// Segment score for donors outside a campaign's target segments
    pub segment_partial_credit: f64,
    pub min_donation_interval_days: i64,
    /// Keep only the top N donors per campaign, 0 keeps all
    pub max_per_campaign: usize,
}

impl Default for RecommenderConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            segment_partial_credit: 0.0,
            min_donation_interval_days: 56,
            max_per_campaign: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnomalyConfig {
    pub window: usize,
    pub threshold: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            window: 30,
            threshold: 2.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InventoryConfig {
    pub utilization_target: f64,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            utilization_target: 0.929,
        }
    }
}

/// Validated configuration plus the keys that were ignored while loading
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: PipelineConfig,
    pub unknown_keys: Vec<String>,
}

impl PipelineConfig {
    /// Load configuration from a TOML file
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<LoadedConfig, ConfigError> {
        let source = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        Self::from_source(source)
    }

    /// Load configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<LoadedConfig, ConfigError> {
        let source = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        Self::from_source(source)
    }

    fn from_source(source: Config) -> Result<LoadedConfig, ConfigError> {
        let given = source
            .collect()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        let known = Config::try_from(&PipelineConfig::default())
            .and_then(|c| c.collect())
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        let mut unknown_keys = Vec::new();
        collect_unknown_keys(&known, &given, "", &mut unknown_keys);
        unknown_keys.sort();
        for key in &unknown_keys {
            warn!(key = %key, "ignoring unrecognized configuration key");
        }

        let config: PipelineConfig = source
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;

        Ok(LoadedConfig {
            config,
            unknown_keys,
        })
    }

    /// Check cross-field constraints before any data is processed
    pub fn validate(&self) -> Result<(), ConfigError> {
        let f = &self.features;
        if f.lags.iter().any(|&lag| lag == 0) {
            return Err(ConfigError::invalid("features.lags", "lags must be at least 1"));
        }
        if f.rolling_windows.is_empty() || f.rolling_windows.iter().any(|&w| w < 2) {
            return Err(ConfigError::invalid(
                "features.rolling_windows",
                "at least one window, each of size 2 or more",
            ));
        }
        if f.holiday_months.iter().any(|m| !(1..=12).contains(m)) {
            return Err(ConfigError::invalid("features.holiday_months", "months are 1-12"));
        }
        if f.weekend_days.iter().any(|&d| d > 6) {
            return Err(ConfigError::invalid(
                "features.weekend_days",
                "weekday indices are 0 (Monday) to 6 (Sunday)",
            ));
        }

        let fc = &self.forecast;
        if fc.holdout_length == 0 {
            return Err(ConfigError::invalid("forecast.holdout_length", "must be positive"));
        }
        let s = &fc.seasonal;
        if s.seasonal_period < 2 {
            return Err(ConfigError::invalid("forecast.seasonal.seasonal_period", "must be 2 or more"));
        }
        if s.ar_order == 0 && s.seasonal_ar_order == 0 {
            return Err(ConfigError::invalid(
                "forecast.seasonal.ar_order",
                "ar_order and seasonal_ar_order cannot both be zero",
            ));
        }
        if s.max_differencing < s.differencing {
            return Err(ConfigError::invalid(
                "forecast.seasonal.max_differencing",
                "must be at least the configured differencing order",
            ));
        }
        let d = &fc.decomposition;
        if !(0.0..=1.0).contains(&d.changepoint_range) {
            return Err(ConfigError::invalid(
                "forecast.decomposition.changepoint_range",
                "must lie in [0, 1]",
            ));
        }
        if d.weekly_fourier_order > 3 {
            return Err(ConfigError::invalid(
                "forecast.decomposition.weekly_fourier_order",
                "daily data supports at most 3 weekly harmonics",
            ));
        }
        let rf = &fc.random_forest;
        if rf.n_trees == 0 || rf.max_depth == 0 || rf.min_samples_leaf == 0 {
            return Err(ConfigError::invalid(
                "forecast.random_forest",
                "n_trees, max_depth and min_samples_leaf must be positive",
            ));
        }
        if !(rf.feature_fraction > 0.0 && rf.feature_fraction <= 1.0) {
            return Err(ConfigError::invalid(
                "forecast.random_forest.feature_fraction",
                "must lie in (0, 1]",
            ));
        }
        let gb = &fc.gradient_boosting;
        if gb.n_estimators == 0 || gb.max_depth == 0 || gb.min_samples_leaf == 0 {
            return Err(ConfigError::invalid(
                "forecast.gradient_boosting",
                "n_estimators, max_depth and min_samples_leaf must be positive",
            ));
        }
        if !(gb.learning_rate > 0.0 && gb.learning_rate <= 1.0) {
            return Err(ConfigError::invalid(
                "forecast.gradient_boosting.learning_rate",
                "must lie in (0, 1]",
            ));
        }
        if !(gb.subsample > 0.0 && gb.subsample <= 1.0) {
            return Err(ConfigError::invalid(
                "forecast.gradient_boosting.subsample",
                "must lie in (0, 1]",
            ));
        }

        let seg = &self.segmentation;
        if seg.quintiles < 2 {
            return Err(ConfigError::invalid("segmentation.quintiles", "must be 2 or more"));
        }
        if seg.k_min < 2 || seg.k_max < seg.k_min {
            return Err(ConfigError::invalid(
                "segmentation.k_min",
                format!("invalid k range [{}, {}]", seg.k_min, seg.k_max),
            ));
        }
        if !(-1.0..=1.0).contains(&seg.silhouette_threshold) {
            return Err(ConfigError::invalid(
                "segmentation.silhouette_threshold",
                "silhouette lies in [-1, 1]",
            ));
        }
        if seg.silhouette_sample < 2 || seg.n_runs == 0 || seg.max_iterations == 0 {
            return Err(ConfigError::invalid(
                "segmentation",
                "silhouette_sample must be 2 or more; n_runs and max_iterations positive",
            ));
        }

        let rec = &self.recommender;
        let total = rec.weights.sum();
        if (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(ConfigError::WeightsDoNotSumToOne(total));
        }
        let w = &rec.weights;
        if [w.rfm, w.availability, w.segment_match, w.blood_match, w.urgency]
            .iter()
            .any(|&v| v < 0.0)
        {
            return Err(ConfigError::invalid("recommender.weights", "weights cannot be negative"));
        }
        if !(0.0..=1.0).contains(&rec.segment_partial_credit) {
            return Err(ConfigError::invalid(
                "recommender.segment_partial_credit",
                "must lie in [0, 1]",
            ));
        }
        if rec.min_donation_interval_days <= 0 {
            return Err(ConfigError::invalid(
                "recommender.min_donation_interval_days",
                "must be positive",
            ));
        }

        let windows: BTreeSet<usize> = f.rolling_windows.iter().copied().collect();
        if !windows.contains(&self.anomaly.window) {
            return Err(ConfigError::invalid(
                "anomaly.window",
                format!("{} is not one of the rolling windows {:?}", self.anomaly.window, windows),
            ));
        }
        if self.anomaly.threshold <= 0.0 {
            return Err(ConfigError::invalid("anomaly.threshold", "must be positive"));
        }

        if !(0.0..=1.0).contains(&self.inventory.utilization_target) {
            return Err(ConfigError::invalid(
                "inventory.utilization_target",
                "must lie in [0, 1]",
            ));
        }

        Ok(())
    }
}

fn collect_unknown_keys(
    known: &Map<String, Value>,
    given: &Map<String, Value>,
    prefix: &str,
    out: &mut Vec<String>,
) {
    for (key, value) in given {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match known.get(key) {
            None => out.push(path),
            Some(known_value) => {
                if let (Ok(known_table), Ok(given_table)) =
                    (known_value.clone().into_table(), value.clone().into_table())
                {
                    collect_unknown_keys(&known_table, &given_table, &path, out);
                }
            }
        }
    }
}
