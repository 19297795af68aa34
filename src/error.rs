//! Error taxonomy and per-run diagnostics

use std::fmt;

use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::Component;

/// Missing or mistyped input column. Fatal: raised before any model is fitted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{table} table, column `{column}`: {reason}")]
pub struct SchemaError {
    pub table: String,
    pub column: String,
    pub reason: String,
}

impl SchemaError {
    pub fn new(table: &str, column: &str, reason: impl Into<String>) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
            reason: reason.into(),
        }
    }
}

/// A logically inconsistent record. The record is dropped and the run continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("donor {donor_id}: last donation {last_donation} is after reference date {reference_date}")]
    DonationAfterReference {
        donor_id: String,
        last_donation: NaiveDate,
        reference_date: NaiveDate,
    },

    #[error("donor {donor_id}: {donation_count} donations recorded but no last donation date")]
    MissingLastDonation {
        donor_id: String,
        donation_count: u32,
    },

    #[error("duplicate donor id {0}, keeping the first record")]
    DuplicateDonor(String),

    #[error("duplicate demand observation for {component} on {date}, keeping the first")]
    DuplicateObservation { date: NaiveDate, component: Component },

    #[error("duplicate supply record for {component} on {date}, keeping the first")]
    DuplicateSupply { date: NaiveDate, component: Component },

    #[error("no demand recorded for {component} on {date}; supply day left out of inventory metrics")]
    MissingDemandForSupply { date: NaiveDate, component: Component },

    #[error("{table} table, row {row}: {reason}")]
    InvalidRecord {
        table: String,
        row: usize,
        reason: String,
    },
}

impl ValidationError {
    pub fn invalid_record(table: &str, row: usize, reason: impl Into<String>) -> Self {
        ValidationError::InvalidRecord {
            table: table.to_string(),
            row,
            reason: reason.into(),
        }
    }
}

/// A forecasting strategy could not be fitted. Only that strategy is dropped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("needs at least {required} usable observations, got {available}")]
    InsufficientHistory { required: usize, available: usize },

    #[error("series still non-stationary after {differences} regular differences (Dickey-Fuller t = {statistic:.3})")]
    NonStationary { differences: usize, statistic: f64 },

    #[error("least-squares solve failed: {0}")]
    Solver(String),
}

/// Invalid configuration. Fatal: raised before any data is touched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("scoring weights must sum to 1.0, got {0:.6}")]
    WeightsDoNotSumToOne(f64),

    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("failed to load configuration: {0}")]
    Load(String),
}

impl ConfigError {
    pub fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Segmentation finished but its quality is below target
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QualityWarning {
    #[error("silhouette score {silhouette:.3} at k={k} is below the {threshold:.2} target")]
    LowSilhouette { k: usize, silhouette: f64, threshold: f64 },

    #[error("{engaged} engaged donors is too few to cluster (need {required}); labels assigned from score rules")]
    CohortTooSmall { engaged: usize, required: usize },

    #[error("clustering failed for every k in range ({reason}); labels assigned from score rules")]
    ClusteringFailed { reason: String },
}

/// Fatal errors that abort a run
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Recoverable finding attached to a run's output
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    Validation(ValidationError),
    Fit {
        component: Component,
        strategy: String,
        error: FitError,
    },
    Quality(QualityWarning),
    /// Holdout points left out of MAPE because actual demand was zero
    MapeExclusion {
        component: Component,
        strategy: String,
        excluded: usize,
    },
    UnknownConfigKey(String),
}

impl Diagnostic {
    pub fn kind(&self) -> &'static str {
        match self {
            Diagnostic::Validation(_) => "ValidationError",
            Diagnostic::Fit { .. } => "FitError",
            Diagnostic::Quality(_) => "QualityWarning",
            Diagnostic::MapeExclusion { .. } => "MapeExclusion",
            Diagnostic::UnknownConfigKey(_) => "UnknownConfigKey",
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::Validation(err) => write!(f, "{}", err),
            Diagnostic::Fit {
                component,
                strategy,
                error,
            } => write!(f, "{} / {}: {}", component, strategy, error),
            Diagnostic::Quality(warning) => write!(f, "{}", warning),
            Diagnostic::MapeExclusion {
                component,
                strategy,
                excluded,
            } => write!(
                f,
                "{} / {}: {} zero-demand holdout points excluded from MAPE",
                component, strategy, excluded
            ),
            Diagnostic::UnknownConfigKey(key) => {
                write!(f, "unrecognized configuration key `{}` ignored", key)
            }
        }
    }
}
