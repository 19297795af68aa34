//! CSV tables in and out: schema checks, record parsing and output frames

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use chrono::NaiveDate;
use polars::prelude::*;
use tracing::{debug, info};

use crate::domain::{
    AvailabilityStatus, BloodType, CampaignSpec, Component, DemandObservation, DonorProfile,
    SegmentLabel, SupplyRecord, Urgency,
};
use crate::error::{SchemaError, ValidationError};
use crate::pipeline::PipelineOutput;

pub const DEMAND_TABLE: &str = "demand";
pub const DONOR_TABLE: &str = "donors";
pub const CAMPAIGN_TABLE: &str = "campaigns";
pub const SUPPLY_TABLE: &str = "supply";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Records parsed from one table plus the rows that were dropped
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedTable<T> {
    pub records: Vec<T>,
    pub rejected: Vec<ValidationError>,
}

impl<T> Default for LoadedTable<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

/// Raw input frames for one run
#[derive(Debug, Clone)]
pub struct InputTables {
    pub demand: DataFrame,
    pub donors: DataFrame,
    pub campaigns: DataFrame,
    pub supply: Option<DataFrame>,
}

impl InputTables {
    /// Read every table from disk
    pub fn read(
        demand: &Path,
        donors: &Path,
        campaigns: &Path,
        supply: Option<&Path>,
    ) -> crate::Result<Self> {
        Ok(Self {
            demand: read_csv(demand)?,
            donors: read_csv(donors)?,
            campaigns: read_csv(campaigns)?,
            supply: supply.map(read_csv).transpose()?,
        })
    }
}

/// Load a CSV with a header row, inferring column types from the whole file
pub fn read_csv(path: &Path) -> crate::Result<DataFrame> {
    let df = LazyCsvReader::new(path)
        .with_has_header(true)
        .with_infer_schema_length(None)
        .finish()
        .and_then(|lf| lf.collect())
        .with_context(|| format!("failed to read {}", path.display()))?;
    debug!(path = %path.display(), rows = df.height(), "table loaded");
    Ok(df)
}

fn find_column<'a>(df: &'a DataFrame, aliases: &[&str]) -> Option<&'a Series> {
    aliases.iter().find_map(|name| df.column(name).ok())
}

fn require_column<'a>(df: &'a DataFrame, table: &str, aliases: &[&str]) -> Result<&'a Series, SchemaError> {
    find_column(df, aliases).ok_or_else(|| {
        let reason = if aliases.len() > 1 {
            format!("missing (also accepted: {})", aliases[1..].join(", "))
        } else {
            "missing".to_string()
        };
        SchemaError::new(table, aliases[0], reason)
    })
}

fn numeric_values(series: &Series, table: &str) -> Result<Vec<Option<f64>>, SchemaError> {
    let dtype = series.dtype();
    if !(dtype.is_numeric() || matches!(dtype, DataType::Null)) {
        return Err(SchemaError::new(
            table,
            series.name(),
            format!("expected a numeric column, found {}", dtype),
        ));
    }
    let cast = series
        .cast(&DataType::Float64)
        .map_err(|e| SchemaError::new(table, series.name(), e.to_string()))?;
    let values = cast
        .f64()
        .map_err(|e| SchemaError::new(table, series.name(), e.to_string()))?;
    Ok(values.into_iter().collect())
}

fn string_values(series: &Series, table: &str) -> Result<Vec<Option<String>>, SchemaError> {
    let cast = series
        .cast(&DataType::String)
        .map_err(|e| SchemaError::new(table, series.name(), e.to_string()))?;
    let values = cast
        .str()
        .map_err(|e| SchemaError::new(table, series.name(), e.to_string()))?;
    Ok(values
        .into_iter()
        .map(|v| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()))
        .collect())
}

/// Categorical text column; numbers here mean the wrong column was supplied
fn text_values(series: &Series, table: &str) -> Result<Vec<Option<String>>, SchemaError> {
    if !matches!(series.dtype(), DataType::String | DataType::Null) {
        return Err(SchemaError::new(
            table,
            series.name(),
            format!("expected a text column, found {}", series.dtype()),
        ));
    }
    string_values(series, table)
}

fn date_values(series: &Series, table: &str) -> Result<Vec<Option<String>>, SchemaError> {
    if !matches!(
        series.dtype(),
        DataType::String | DataType::Null | DataType::Date | DataType::Datetime(_, _)
    ) {
        return Err(SchemaError::new(
            table,
            series.name(),
            format!("expected a date column, found {}", series.dtype()),
        ));
    }
    string_values(series, table)
}

/// `YYYY-MM-DD`, optionally followed by a time part
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .ok()
        .or_else(|| value.get(..10).and_then(|d| NaiveDate::parse_from_str(d, DATE_FORMAT).ok()))
}

/// Per-row field parsing; `Err` carries the reason the row is dropped
fn field<T>(value: &Option<String>, name: &str, parse: impl Fn(&str) -> Option<T>) -> Result<T, String> {
    let raw = value.as_deref().ok_or_else(|| format!("{} is empty", name))?;
    parse(raw).ok_or_else(|| format!("{} `{}` is not valid", name, raw))
}

fn optional_field<T>(
    value: Option<&Option<String>>,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>, String> {
    match value.and_then(|v| v.as_deref()) {
        None => Ok(None),
        Some(raw) => parse(raw)
            .map(Some)
            .ok_or_else(|| format!("{} `{}` is not valid", name, raw)),
    }
}

fn non_negative(value: Option<f64>, name: &str) -> Result<f64, String> {
    match value {
        None => Err(format!("{} is empty", name)),
        Some(v) if !v.is_finite() || v < 0.0 => Err(format!("{} {} is negative or not finite", name, v)),
        Some(v) => Ok(v),
    }
}

fn parsed<T: FromStr>(raw: &str) -> Option<T> {
    raw.parse().ok()
}

/// Demand table. A `blood_type` breakdown is summed per (date, component).
pub fn demand_from_frame(df: &DataFrame) -> Result<LoadedTable<DemandObservation>, SchemaError> {
    let dates = date_values(require_column(df, DEMAND_TABLE, &["date"])?, DEMAND_TABLE)?;
    let components = text_values(require_column(df, DEMAND_TABLE, &["component"])?, DEMAND_TABLE)?;
    let units = numeric_values(
        require_column(df, DEMAND_TABLE, &["units_demanded", "demand_units"])?,
        DEMAND_TABLE,
    )?;
    let by_blood_type = find_column(df, &["blood_type"]).is_some();

    let mut table = LoadedTable::default();
    for row in 0..df.height() {
        let parsed_row = (|| -> Result<DemandObservation, String> {
            Ok(DemandObservation {
                date: field(&dates[row], "date", parse_date)?,
                component: field(&components[row], "component", parsed::<Component>)?,
                units_demanded: non_negative(units[row], "units_demanded")?,
            })
        })();
        match parsed_row {
            Ok(obs) => table.records.push(obs),
            Err(reason) => table
                .rejected
                .push(ValidationError::invalid_record(DEMAND_TABLE, row + 1, reason)),
        }
    }

    if by_blood_type {
        let mut totals: BTreeMap<(NaiveDate, Component), f64> = BTreeMap::new();
        for obs in &table.records {
            *totals.entry((obs.date, obs.component)).or_default() += obs.units_demanded;
        }
        table.records = totals
            .into_iter()
            .map(|((date, component), units_demanded)| DemandObservation {
                date,
                component,
                units_demanded,
            })
            .collect();
    }
    Ok(table)
}

pub fn donors_from_frame(df: &DataFrame) -> Result<LoadedTable<DonorProfile>, SchemaError> {
    let t = DONOR_TABLE;
    let ids = string_values(require_column(df, t, &["donor_id"])?, t)?;
    let blood_types = text_values(require_column(df, t, &["blood_type"])?, t)?;
    let last_dates = date_values(require_column(df, t, &["last_donation_date"])?, t)?;
    let counts = numeric_values(require_column(df, t, &["donation_count", "total_donations"])?, t)?;
    let volumes = numeric_values(require_column(df, t, &["total_volume_cc"])?, t)?;
    let statuses = text_values(require_column(df, t, &["availability_status"])?, t)?;
    let first_dates = find_column(df, &["first_donation_date", "registration_date"])
        .map(|s| date_values(s, t))
        .transpose()?;
    let deferrals = find_column(df, &["deferred_until"])
        .map(|s| date_values(s, t))
        .transpose()?;

    let mut table = LoadedTable::default();
    for row in 0..df.height() {
        let parsed_row = (|| -> Result<DonorProfile, String> {
            let count = non_negative(counts[row], "donation_count")?;
            if count.fract() != 0.0 || count > u32::MAX as f64 {
                return Err(format!("donation_count {} is not a whole number", count));
            }
            Ok(DonorProfile {
                donor_id: field(&ids[row], "donor_id", |s| Some(s.to_string()))?,
                blood_type: field(&blood_types[row], "blood_type", parsed::<BloodType>)?,
                last_donation_date: optional_field(Some(&last_dates[row]), "last_donation_date", parse_date)?,
                donation_count: count as u32,
                total_volume_cc: non_negative(volumes[row], "total_volume_cc")?,
                first_donation_date: optional_field(
                    first_dates.as_ref().map(|v| &v[row]),
                    "first_donation_date",
                    parse_date,
                )?,
                availability_status: field(
                    &statuses[row],
                    "availability_status",
                    parsed::<AvailabilityStatus>,
                )?,
                deferred_until: optional_field(
                    deferrals.as_ref().map(|v| &v[row]),
                    "deferred_until",
                    parse_date,
                )?,
            })
        })();
        match parsed_row {
            Ok(donor) => table.records.push(donor),
            Err(reason) => table.rejected.push(ValidationError::invalid_record(t, row + 1, reason)),
        }
    }
    Ok(table)
}

/// `;`-separated list; an empty cell is an empty set
fn parse_list<T: FromStr + Ord>(raw: Option<&str>, name: &str) -> Result<std::collections::BTreeSet<T>, String> {
    raw.unwrap_or("")
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<T>().map_err(|_| format!("{} entry `{}` is not valid", name, s)))
        .collect()
}

pub fn campaigns_from_frame(df: &DataFrame) -> Result<LoadedTable<CampaignSpec>, SchemaError> {
    let t = CAMPAIGN_TABLE;
    let ids = string_values(require_column(df, t, &["campaign_id"])?, t)?;
    let segments = text_values(require_column(df, t, &["target_segments"])?, t)?;
    let blood_types = text_values(require_column(df, t, &["required_blood_types"])?, t)?;
    let urgencies = text_values(require_column(df, t, &["urgency"])?, t)?;
    let starts = date_values(require_column(df, t, &["start_date"])?, t)?;
    let ends = date_values(require_column(df, t, &["end_date"])?, t)?;

    let mut table = LoadedTable::default();
    for row in 0..df.height() {
        let parsed_row = (|| -> Result<CampaignSpec, String> {
            let start_date = field(&starts[row], "start_date", parse_date)?;
            let end_date = field(&ends[row], "end_date", parse_date)?;
            if end_date < start_date {
                return Err(format!("end_date {} is before start_date {}", end_date, start_date));
            }
            Ok(CampaignSpec {
                campaign_id: field(&ids[row], "campaign_id", |s| Some(s.to_string()))?,
                target_segments: parse_list::<SegmentLabel>(segments[row].as_deref(), "target_segments")?,
                required_blood_types: parse_list::<BloodType>(
                    blood_types[row].as_deref(),
                    "required_blood_types",
                )?,
                urgency: field(&urgencies[row], "urgency", parsed::<Urgency>)?,
                start_date,
                end_date,
            })
        })();
        match parsed_row {
            Ok(campaign) => table.records.push(campaign),
            Err(reason) => table.rejected.push(ValidationError::invalid_record(t, row + 1, reason)),
        }
    }
    Ok(table)
}

pub fn supply_from_frame(df: &DataFrame) -> Result<LoadedTable<SupplyRecord>, SchemaError> {
    let t = SUPPLY_TABLE;
    let dates = date_values(require_column(df, t, &["date"])?, t)?;
    let components = text_values(require_column(df, t, &["component"])?, t)?;
    let supplied = numeric_values(require_column(df, t, &["supply_units"])?, t)?;
    let utilized = numeric_values(require_column(df, t, &["utilized_units"])?, t)?;
    let wasted = numeric_values(require_column(df, t, &["wasted_units"])?, t)?;

    let mut table = LoadedTable::default();
    for row in 0..df.height() {
        let parsed_row = (|| -> Result<SupplyRecord, String> {
            Ok(SupplyRecord {
                date: field(&dates[row], "date", parse_date)?,
                component: field(&components[row], "component", parsed::<Component>)?,
                supply_units: non_negative(supplied[row], "supply_units")?,
                utilized_units: non_negative(utilized[row], "utilized_units")?,
                wasted_units: non_negative(wasted[row], "wasted_units")?,
            })
        })();
        match parsed_row {
            Ok(record) => table.records.push(record),
            Err(reason) => table.rejected.push(ValidationError::invalid_record(t, row + 1, reason)),
        }
    }
    Ok(table)
}

fn fmt_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Prepend the run's reference date and timestamp to every row
fn stamp(mut columns: Vec<Series>, output: &PipelineOutput) -> PolarsResult<DataFrame> {
    let height = columns.first().map_or(0, |s| s.len());
    let reference = fmt_date(output.reference_date);
    let timestamp = output.run_timestamp.format("%Y-%m-%dT%H:%M:%S").to_string();
    columns.insert(0, Series::new("run_timestamp", vec![timestamp; height]));
    columns.insert(0, Series::new("reference_date", vec![reference; height]));
    DataFrame::new(columns)
}

pub fn forecast_predictions_frame(output: &PipelineOutput) -> PolarsResult<DataFrame> {
    let (mut component, mut strategy, mut date, mut actual, mut predicted) =
        (Vec::new(), Vec::new(), Vec::new(), Vec::new(), Vec::new());
    for forecast in &output.forecasts {
        for report in &forecast.reports {
            for i in 0..report.dates.len() {
                component.push(forecast.component.as_str());
                strategy.push(report.strategy);
                date.push(fmt_date(report.dates[i]));
                actual.push(report.actuals[i]);
                predicted.push(report.predictions[i]);
            }
        }
    }
    stamp(
        vec![
            Series::new("component", component),
            Series::new("strategy", strategy),
            Series::new("date", date),
            Series::new("actual", actual),
            Series::new("predicted", predicted),
        ],
        output,
    )
}

pub fn forecast_metrics_frame(output: &PipelineOutput) -> PolarsResult<DataFrame> {
    let mut component = Vec::new();
    let mut strategy = Vec::new();
    let mut mae = Vec::new();
    let mut rmse = Vec::new();
    let mut mape = Vec::new();
    let mut r2 = Vec::new();
    let mut excluded = Vec::new();
    let mut selected = Vec::new();
    let mut model = Vec::new();
    for forecast in &output.forecasts {
        for report in &forecast.reports {
            component.push(forecast.component.as_str());
            strategy.push(report.strategy);
            mae.push(report.metrics.mae);
            rmse.push(report.metrics.rmse);
            mape.push(report.metrics.mape);
            r2.push(report.metrics.r2);
            excluded.push(report.metrics.excluded_zero_actuals as u32);
            selected.push(forecast.selected == Some(report.strategy));
            model.push(report.diagnostics.render());
        }
    }
    stamp(
        vec![
            Series::new("component", component),
            Series::new("strategy", strategy),
            Series::new("mae", mae),
            Series::new("rmse", rmse),
            Series::new("mape", mape),
            Series::new("r2", r2),
            Series::new("excluded_zero_actuals", excluded),
            Series::new("selected", selected),
            Series::new("model", model),
        ],
        output,
    )
}

pub fn forward_forecast_frame(output: &PipelineOutput) -> PolarsResult<DataFrame> {
    let (mut component, mut strategy, mut date, mut predicted) = (Vec::new(), Vec::new(), Vec::new(), Vec::new());
    for forecast in &output.forecasts {
        let Some(name) = forecast.selected else { continue };
        for point in &forecast.forward {
            component.push(forecast.component.as_str());
            strategy.push(name);
            date.push(fmt_date(point.date));
            predicted.push(point.predicted);
        }
    }
    stamp(
        vec![
            Series::new("component", component),
            Series::new("strategy", strategy),
            Series::new("date", date),
            Series::new("predicted", predicted),
        ],
        output,
    )
}

pub fn segments_frame(output: &PipelineOutput) -> PolarsResult<DataFrame> {
    let assignments = &output.segmentation.assignments;
    let score = |f: fn(&crate::segmentation::RfmScores) -> u32| -> Vec<Option<u32>> {
        assignments.iter().map(|a| a.scores.as_ref().map(f)).collect()
    };
    stamp(
        vec![
            Series::new(
                "donor_id",
                assignments.iter().map(|a| a.record.donor_id.as_str()).collect::<Vec<_>>(),
            ),
            Series::new(
                "recency_months",
                assignments.iter().map(|a| a.record.recency_months).collect::<Vec<_>>(),
            ),
            Series::new(
                "frequency",
                assignments.iter().map(|a| a.record.frequency).collect::<Vec<_>>(),
            ),
            Series::new(
                "monetary_cc",
                assignments.iter().map(|a| a.record.monetary_cc).collect::<Vec<_>>(),
            ),
            Series::new("r_score", score(|s| s.recency)),
            Series::new("f_score", score(|s| s.frequency)),
            Series::new("m_score", score(|s| s.monetary)),
            Series::new("rfm_composite", score(|s| s.composite())),
            Series::new(
                "cluster",
                assignments.iter().map(|a| a.cluster.map(|c| c as u32)).collect::<Vec<_>>(),
            ),
            Series::new(
                "segment",
                assignments.iter().map(|a| a.label.as_str()).collect::<Vec<_>>(),
            ),
        ],
        output,
    )
}

pub fn segment_summary_frame(output: &PipelineOutput) -> PolarsResult<DataFrame> {
    let summaries = &output.segmentation.summaries;
    let play = |f: fn(&crate::domain::OutreachPlay) -> &'static str| -> Vec<&'static str> {
        summaries.iter().map(|s| f(&s.outreach)).collect()
    };
    stamp(
        vec![
            Series::new("segment", summaries.iter().map(|s| s.label.as_str()).collect::<Vec<_>>()),
            Series::new("donors", summaries.iter().map(|s| s.donors as u32).collect::<Vec<_>>()),
            Series::new("share", summaries.iter().map(|s| s.share).collect::<Vec<_>>()),
            Series::new(
                "mean_recency_months",
                summaries.iter().map(|s| s.mean_recency_months).collect::<Vec<_>>(),
            ),
            Series::new(
                "mean_frequency",
                summaries.iter().map(|s| s.mean_frequency).collect::<Vec<_>>(),
            ),
            Series::new(
                "mean_monetary_cc",
                summaries.iter().map(|s| s.mean_monetary_cc).collect::<Vec<_>>(),
            ),
            Series::new("action", play(|p| p.action)),
            Series::new("strategy", play(|p| p.strategy)),
            Series::new("cadence", play(|p| p.cadence)),
            Series::new("channel", play(|p| p.channel)),
        ],
        output,
    )
}

pub fn recommendations_frame(output: &PipelineOutput) -> PolarsResult<DataFrame> {
    let recs = &output.recommendations;
    let sub = |f: fn(&crate::recommender::Recommendation) -> f64| -> Vec<f64> { recs.iter().map(f).collect() };
    stamp(
        vec![
            Series::new("campaign_id", recs.iter().map(|r| r.campaign_id.as_str()).collect::<Vec<_>>()),
            Series::new("rank", recs.iter().map(|r| r.rank as u32).collect::<Vec<_>>()),
            Series::new("donor_id", recs.iter().map(|r| r.donor_id.as_str()).collect::<Vec<_>>()),
            Series::new("score", sub(|r| r.score)),
            Series::new("segment", recs.iter().map(|r| r.segment.as_str()).collect::<Vec<_>>()),
            Series::new("rfm", sub(|r| r.rfm)),
            Series::new("availability", sub(|r| r.availability)),
            Series::new("segment_match", sub(|r| r.segment_match)),
            Series::new("blood_match", sub(|r| r.blood_match)),
            Series::new("urgency", sub(|r| r.urgency)),
        ],
        output,
    )
}

pub fn anomalies_frame(output: &PipelineOutput) -> PolarsResult<DataFrame> {
    let flags = &output.anomalies;
    stamp(
        vec![
            Series::new("component", flags.iter().map(|f| f.component.as_str()).collect::<Vec<_>>()),
            Series::new("date", flags.iter().map(|f| fmt_date(f.date)).collect::<Vec<_>>()),
            Series::new("units_demanded", flags.iter().map(|f| f.units_demanded).collect::<Vec<_>>()),
            Series::new("rolling_mean", flags.iter().map(|f| f.rolling_mean).collect::<Vec<_>>()),
            Series::new("rolling_std", flags.iter().map(|f| f.rolling_std).collect::<Vec<_>>()),
            Series::new("z_score", flags.iter().map(|f| f.z_score).collect::<Vec<_>>()),
            Series::new("is_anomalous", flags.iter().map(|f| f.is_anomalous).collect::<Vec<_>>()),
        ],
        output,
    )
}

pub fn inventory_frame(output: &PipelineOutput) -> PolarsResult<DataFrame> {
    let rows = &output.inventory;
    let metric = |f: fn(&crate::inventory::InventoryMetrics) -> f64| -> Vec<f64> { rows.iter().map(f).collect() };
    stamp(
        vec![
            Series::new("component", rows.iter().map(|m| m.component.as_str()).collect::<Vec<_>>()),
            Series::new("days", rows.iter().map(|m| m.days as u32).collect::<Vec<_>>()),
            Series::new("total_demand", metric(|m| m.total_demand)),
            Series::new("total_supply", metric(|m| m.total_supply)),
            Series::new("total_utilized", metric(|m| m.total_utilized)),
            Series::new("total_wasted", metric(|m| m.total_wasted)),
            Series::new("utilization_rate", metric(|m| m.utilization_rate)),
            Series::new("shortage_risk", metric(|m| m.shortage_risk)),
            Series::new("wastage_risk", metric(|m| m.wastage_risk)),
            Series::new("wastage_rate", metric(|m| m.wastage_rate)),
            Series::new(
                "meets_utilization_target",
                rows.iter().map(|m| m.meets_utilization_target).collect::<Vec<_>>(),
            ),
        ],
        output,
    )
}

pub fn diagnostics_frame(output: &PipelineOutput) -> PolarsResult<DataFrame> {
    let diags = &output.diagnostics;
    stamp(
        vec![
            Series::new("kind", diags.iter().map(|d| d.kind()).collect::<Vec<_>>()),
            Series::new("message", diags.iter().map(|d| d.to_string()).collect::<Vec<_>>()),
        ],
        output,
    )
}

pub fn write_csv(df: &mut DataFrame, path: &Path) -> crate::Result<()> {
    let mut file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(df)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Write every output table into `dir`, returning the written paths
pub fn write_outputs(output: &PipelineOutput, dir: &Path) -> crate::Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    type FrameFn = fn(&PipelineOutput) -> PolarsResult<DataFrame>;
    let tables: [(&str, FrameFn); 9] = [
        ("forecast_predictions.csv", forecast_predictions_frame),
        ("forecast_metrics.csv", forecast_metrics_frame),
        ("forward_forecast.csv", forward_forecast_frame),
        ("donor_segments.csv", segments_frame),
        ("segment_summary.csv", segment_summary_frame),
        ("recommendations.csv", recommendations_frame),
        ("anomalies.csv", anomalies_frame),
        ("inventory.csv", inventory_frame),
        ("diagnostics.csv", diagnostics_frame),
    ];

    let mut written = Vec::with_capacity(tables.len());
    for (name, build) in tables {
        let path = dir.join(name);
        let mut df = build(output).with_context(|| format!("failed to build {}", name))?;
        write_csv(&mut df, &path)?;
        written.push(path);
    }
    info!(dir = %dir.display(), tables = written.len(), "output tables written");
    Ok(written)
}
