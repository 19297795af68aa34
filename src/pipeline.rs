//! One analytics run: forecasts, anomalies, segments, recommendations and inventory

use std::collections::HashSet;

use chrono::{Local, NaiveDate, NaiveDateTime};
use tracing::{info, warn};

use crate::anomaly::{AnomalyDetector, AnomalyFlag};
use crate::config::{LoadedConfig, PipelineConfig};
use crate::data::{self, InputTables, LoadedTable};
use crate::domain::{CampaignSpec, DemandObservation, DonorProfile, SupplyRecord};
use crate::error::{ConfigError, Diagnostic, PipelineError, ValidationError};
use crate::features::{split_by_component, FeatureBuilder};
use crate::forecast::{ComponentForecast, ForecastEnsemble};
use crate::inventory::{InventoryAnalyzer, InventoryMetrics};
use crate::recommender::{Recommendation, RecommenderScorer};
use crate::rfm::{RfmProfiler, RfmRecord};
use crate::segmentation::{SegmentationEngine, SegmentationResult};

/// Everything a run needs besides its data
#[derive(Debug, Clone)]
pub struct RunContext {
    pub config: PipelineConfig,
    /// Keys the configuration source carried that nothing reads
    pub unknown_keys: Vec<String>,
    pub reference_date: NaiveDate,
    pub run_timestamp: NaiveDateTime,
    pub seed: u64,
}

impl RunContext {
    pub fn new(config: PipelineConfig, reference_date: NaiveDate, seed: u64) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            unknown_keys: Vec::new(),
            reference_date,
            run_timestamp: Local::now().naive_local(),
            seed,
        })
    }

    pub fn from_loaded(loaded: LoadedConfig, reference_date: NaiveDate, seed: u64) -> Result<Self, ConfigError> {
        let mut ctx = Self::new(loaded.config, reference_date, seed)?;
        ctx.unknown_keys = loaded.unknown_keys;
        Ok(ctx)
    }

    /// Pin the timestamp stamped on output rows
    pub fn with_run_timestamp(mut self, run_timestamp: NaiveDateTime) -> Self {
        self.run_timestamp = run_timestamp;
        self
    }
}

/// Parsed input records
#[derive(Debug, Clone, Default)]
pub struct PipelineInputs {
    pub demand: Vec<DemandObservation>,
    pub donors: Vec<DonorProfile>,
    pub campaigns: Vec<CampaignSpec>,
    pub supply: Vec<SupplyRecord>,
    /// Rows dropped while parsing the tables
    pub rejected: Vec<ValidationError>,
}

impl PipelineInputs {
    /// Parse and schema-check the raw tables. Any schema error aborts the run.
    pub fn from_tables(tables: &InputTables) -> Result<Self, PipelineError> {
        let demand = data::demand_from_frame(&tables.demand)?;
        let donors = data::donors_from_frame(&tables.donors)?;
        let campaigns = data::campaigns_from_frame(&tables.campaigns)?;
        let supply = match &tables.supply {
            Some(df) => data::supply_from_frame(df)?,
            None => LoadedTable::default(),
        };

        let mut rejected = demand.rejected;
        rejected.extend(donors.rejected);
        rejected.extend(campaigns.rejected);
        rejected.extend(supply.rejected);

        Ok(Self {
            demand: demand.records,
            donors: donors.records,
            campaigns: campaigns.records,
            supply: supply.records,
            rejected,
        })
    }
}

/// All results of one run. Nothing here outlives the value itself.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub reference_date: NaiveDate,
    pub run_timestamp: NaiveDateTime,
    pub forecasts: Vec<ComponentForecast>,
    pub anomalies: Vec<AnomalyFlag>,
    pub rfm: Vec<RfmRecord>,
    pub segmentation: SegmentationResult,
    pub recommendations: Vec<Recommendation>,
    pub inventory: Vec<InventoryMetrics>,
    pub diagnostics: Vec<Diagnostic>,
}

impl PipelineOutput {
    pub fn anomaly_count(&self) -> usize {
        self.anomalies.iter().filter(|f| f.is_anomalous).count()
    }
}

/// Keep the first observation per (date, component)
fn dedupe_demand(observations: &[DemandObservation]) -> (Vec<DemandObservation>, Vec<ValidationError>) {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(observations.len());
    let mut duplicates = Vec::new();
    for obs in observations {
        if seen.insert((obs.date, obs.component)) {
            kept.push(obs.clone());
        } else {
            warn!(date = %obs.date, component = %obs.component, "duplicate demand observation");
            duplicates.push(ValidationError::DuplicateObservation {
                date: obs.date,
                component: obs.component,
            });
        }
    }
    (kept, duplicates)
}

pub fn run_tables(ctx: &RunContext, tables: &InputTables) -> Result<PipelineOutput, PipelineError> {
    let inputs = PipelineInputs::from_tables(tables)?;
    Ok(run(ctx, &inputs))
}

pub fn run(ctx: &RunContext, inputs: &PipelineInputs) -> PipelineOutput {
    let config = &ctx.config;
    let mut diagnostics: Vec<Diagnostic> = ctx
        .unknown_keys
        .iter()
        .cloned()
        .map(Diagnostic::UnknownConfigKey)
        .collect();
    diagnostics.extend(inputs.rejected.iter().cloned().map(Diagnostic::Validation));

    info!(
        reference_date = %ctx.reference_date,
        seed = ctx.seed,
        demand = inputs.demand.len(),
        donors = inputs.donors.len(),
        campaigns = inputs.campaigns.len(),
        supply = inputs.supply.len(),
        "starting run"
    );

    let (demand, duplicates) = dedupe_demand(&inputs.demand);
    diagnostics.extend(duplicates.into_iter().map(Diagnostic::Validation));

    let builder = FeatureBuilder::new(&config.features);
    let ensemble = ForecastEnsemble::new(&config.forecast, builder.clone(), ctx.seed);
    let detector = AnomalyDetector::new(&config.anomaly);

    let mut forecasts = Vec::new();
    let mut anomalies = Vec::new();
    for (component, observations) in split_by_component(&demand) {
        let rows = builder.build(&observations);
        anomalies.extend(detector.detect(&rows));
        let forecast = ensemble.evaluate(component, &rows);
        diagnostics.extend(forecast.diagnostics.iter().cloned());
        forecasts.push(forecast);
    }
    info!(
        components = forecasts.len(),
        anomalies = anomalies.iter().filter(|f| f.is_anomalous).count(),
        "demand analysis complete"
    );

    let cohort = RfmProfiler::new(ctx.reference_date).profile_cohort(&inputs.donors);
    diagnostics.extend(cohort.rejected.iter().cloned().map(Diagnostic::Validation));

    let segmentation = SegmentationEngine::new(config.segmentation.clone(), ctx.seed).segment(&cohort.records);
    diagnostics.extend(segmentation.warnings.iter().cloned().map(Diagnostic::Quality));
    info!(
        donors = segmentation.assignments.len(),
        k = ?segmentation.k,
        silhouette = ?segmentation.silhouette,
        "donor segmentation complete"
    );

    let recommendations = RecommenderScorer::new(config.recommender.clone(), ctx.reference_date).recommend(
        &inputs.campaigns,
        &inputs.donors,
        &segmentation,
    );

    let inventory = InventoryAnalyzer::new(&config.inventory).analyze(&inputs.supply, &demand);
    diagnostics.extend(inventory.rejected.into_iter().map(Diagnostic::Validation));
    let inventory = inventory.metrics;

    info!(
        recommendations = recommendations.len(),
        inventory_components = inventory.len(),
        diagnostics = diagnostics.len(),
        "run complete"
    );

    PipelineOutput {
        reference_date: ctx.reference_date,
        run_timestamp: ctx.run_timestamp,
        forecasts,
        anomalies,
        rfm: cohort.records,
        segmentation,
        recommendations,
        inventory,
        diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AvailabilityStatus, BloodType, Component, SegmentLabel, Urgency};
    use chrono::Duration;

    fn reference() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
    }

    fn small_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.forecast.holdout_length = 14;
        config.forecast.forecast_horizon = 7;
        config.forecast.parallel = false;
        config.segmentation.parallel = false;
        config
    }

    fn donor(id: &str, months_ago: i64, count: u32) -> DonorProfile {
        DonorProfile {
            donor_id: id.to_string(),
            blood_type: BloodType::UNIVERSAL_DONOR,
            last_donation_date: (count > 0).then(|| reference() - Duration::days(months_ago * 31)),
            donation_count: count,
            total_volume_cc: count as f64 * 450.0,
            first_donation_date: None,
            availability_status: AvailabilityStatus::Available,
            deferred_until: None,
        }
    }

    fn inputs() -> PipelineInputs {
        let start = reference() - Duration::days(200);
        let demand = (0..200)
            .map(|i| DemandObservation {
                date: start + Duration::days(i),
                component: Component::Rbc,
                units_demanded: 40.0 + (i % 7) as f64,
            })
            .collect();
        let donors = (0..24)
            .map(|i| donor(&format!("D{:03}", i), (i % 12) as i64, (i % 9) as u32))
            .collect();
        let campaigns = vec![CampaignSpec {
            campaign_id: "C1".to_string(),
            target_segments: [SegmentLabel::Champions, SegmentLabel::Loyal].into_iter().collect(),
            required_blood_types: Default::default(),
            urgency: Urgency::High,
            start_date: reference(),
            end_date: reference() + Duration::days(30),
        }];
        PipelineInputs {
            demand,
            donors,
            campaigns,
            ..Default::default()
        }
    }

    #[test]
    fn test_run_wires_every_stage() {
        let ctx = RunContext::new(small_config(), reference(), 7).unwrap();
        let output = run(&ctx, &inputs());

        assert_eq!(output.forecasts.len(), 1);
        assert!(output.forecasts[0].selected.is_some());
        assert_eq!(output.forecasts[0].forward.len(), 7);
        assert_eq!(output.anomalies.len(), 200);
        assert_eq!(output.segmentation.assignments.len(), 24);
        assert!(!output.recommendations.is_empty());
        assert!(output.inventory.is_empty());
    }

    #[test]
    fn test_duplicate_demand_is_reported_once() {
        let ctx = RunContext::new(small_config(), reference(), 7).unwrap();
        let mut inputs = inputs();
        let dup = inputs.demand[10].clone();
        inputs.demand.push(dup);

        let output = run(&ctx, &inputs);
        let duplicates = output
            .diagnostics
            .iter()
            .filter(|d| matches!(d, Diagnostic::Validation(ValidationError::DuplicateObservation { .. })))
            .count();
        assert_eq!(duplicates, 1);
        assert_eq!(output.anomalies.len(), 200);
    }

    #[test]
    fn test_supply_days_without_demand_become_diagnostics() {
        let ctx = RunContext::new(small_config(), reference(), 7).unwrap();
        let mut inputs = inputs();
        let last_demand = inputs.demand[199].date;
        inputs.supply = vec![
            SupplyRecord {
                date: last_demand,
                component: Component::Rbc,
                supply_units: 50.0,
                utilized_units: 45.0,
                wasted_units: 1.0,
            },
            SupplyRecord {
                date: last_demand + Duration::days(1),
                component: Component::Rbc,
                supply_units: 50.0,
                utilized_units: 0.0,
                wasted_units: 0.0,
            },
        ];

        let output = run(&ctx, &inputs);
        assert_eq!(output.inventory.len(), 1);
        assert_eq!(output.inventory[0].days, 1);
        assert!(output.diagnostics.iter().any(|d| matches!(
            d,
            Diagnostic::Validation(ValidationError::MissingDemandForSupply { date, .. })
                if *date == last_demand + Duration::days(1)
        )));
    }

    #[test]
    fn test_invalid_config_is_rejected_before_the_run() {
        let mut config = small_config();
        config.recommender.weights.rfm = 0.9;
        assert!(RunContext::new(config, reference(), 7).is_err());
    }
}
