//! Blood bank analytics: component demand forecasting, donor RFM segmentation,
//! campaign recommendations, demand anomalies and inventory risk.
//!
//! The analytics core is pure computation over in-memory records. The `data`
//! module and the binary handle CSV input and output.

pub mod anomaly;
pub mod cli;
pub mod config;
pub mod data;
pub mod domain;
pub mod error;
pub mod features;
pub mod forecast;
pub mod inventory;
pub mod model;
pub mod pipeline;
pub mod recommender;
pub mod rfm;
pub mod segmentation;
pub mod viz;
pub mod workers;

// Re-export public items for easier access
pub use cli::Args;
pub use config::{LoadedConfig, PipelineConfig};
pub use data::{read_csv, write_outputs, InputTables};
pub use domain::{
    AvailabilityStatus, BloodType, CampaignSpec, Component, DemandObservation, DonorProfile,
    SegmentLabel, SupplyRecord, Urgency,
};
pub use error::{ConfigError, Diagnostic, FitError, PipelineError, QualityWarning, SchemaError, ValidationError};
pub use pipeline::{run, run_tables, PipelineInputs, PipelineOutput, RunContext};

/// Result type for the I/O and binary layer
pub type Result<T> = anyhow::Result<T>;
