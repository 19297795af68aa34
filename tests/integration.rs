//! End-to-end tests for the blood bank analytics pipeline

use std::io::Write;

use blood_analytics::data::{read_csv, InputTables};
use blood_analytics::forecast::metrics::evaluate;
use blood_analytics::{
    run, run_tables, write_outputs, Component, Diagnostic, PipelineConfig, PipelineError, PipelineInputs,
    RunContext, SegmentLabel,
};
use chrono::{Duration, NaiveDate};
use tempfile::{tempdir, NamedTempFile};

const BLOOD_TYPES: [&str; 8] = ["O+", "O-", "A+", "A-", "B+", "B-", "AB+", "AB-"];

fn reference_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
}

fn csv(lines: &[String]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    file.flush().unwrap();
    file
}

/// 180 days for two components, weekly shape plus one spike in the RBC series
fn create_demand_csv() -> NamedTempFile {
    let start = reference_date() - Duration::days(180);
    let mut lines = vec!["date,component,blood_type,demand_units".to_string()];
    for day in 0..180 {
        let date = start + Duration::days(day);
        let weekly = [4, 6, 7, 6, 5, 1, 0][(day % 7) as usize];
        let rbc = if day == 150 { 400 } else { 40 + weekly };
        // RBC arrives split across two blood types and is summed on load
        lines.push(format!("{},Packed RBC,O+,{}", date, rbc - 10));
        lines.push(format!("{},Packed RBC,A+,10", date));
        lines.push(format!("{},Platelets,O+,{}", date, 12 + weekly / 2));
    }
    csv(&lines)
}

fn create_donor_csv() -> NamedTempFile {
    let mut lines = vec![
        "donor_id,blood_type,last_donation_date,total_donations,total_volume_cc,registration_date,availability_status,deferred_until"
            .to_string(),
    ];
    for i in 0..40u32 {
        let months_ago = (i * 7) % 30;
        let donations = 1 + (i * 5) % 17;
        let last = reference_date() - Duration::days(months_ago as i64 * 31 + 3);
        lines.push(format!(
            "D{:03},{},{},{},{},2018-01-15,Available,",
            i,
            BLOOD_TYPES[i as usize % BLOOD_TYPES.len()],
            last,
            donations,
            donations * 450
        ));
    }
    // never donated
    lines.push("N001,B+,,0,0,2024-06-01,Available,".to_string());
    // open deferral: must never be recommended
    lines.push("X001,O-,2024-06-01,25,11250,2010-03-01,Deferred,".to_string());
    // deferral already over
    lines.push("X002,O-,2024-03-01,20,9000,2012-03-01,Deferred,2024-06-01".to_string());
    // duplicate id, dropped
    lines.push("D000,A+,2024-05-01,3,1350,2020-01-01,Available,".to_string());
    // donation after the reference date, dropped
    lines.push("F001,A+,2024-08-01,3,1350,2020-01-01,Available,".to_string());
    csv(&lines)
}

fn create_campaign_csv() -> NamedTempFile {
    csv(&[
        "campaign_id,target_segments,required_blood_types,urgency,start_date,end_date".to_string(),
        "C-ONEG,Champions;Loyal,O-,Critical,2024-07-01,2024-07-14".to_string(),
        "C-WINBACK,At Risk;Hibernating,,Medium,2024-07-01,2024-08-31".to_string(),
    ])
}

fn create_supply_csv() -> NamedTempFile {
    let start = reference_date() - Duration::days(30);
    let mut lines = vec!["date,component,supply_units,utilized_units,wasted_units".to_string()];
    for day in 0..30 {
        let date = start + Duration::days(day);
        lines.push(format!("{},RBC,50,44,2", date));
    }
    csv(&lines)
}

struct Fixture {
    demand: NamedTempFile,
    donors: NamedTempFile,
    campaigns: NamedTempFile,
    supply: NamedTempFile,
}

impl Fixture {
    fn new() -> Self {
        Self {
            demand: create_demand_csv(),
            donors: create_donor_csv(),
            campaigns: create_campaign_csv(),
            supply: create_supply_csv(),
        }
    }

    fn tables(&self) -> InputTables {
        InputTables::read(
            self.demand.path(),
            self.donors.path(),
            self.campaigns.path(),
            Some(self.supply.path()),
        )
        .unwrap()
    }
}

fn context(seed: u64) -> RunContext {
    let loaded = PipelineConfig::from_toml_str(
        r#"
        [forecast]
        holdout_length = 21
        forecast_horizon = 14
        parallel = false

        [segmentation]
        k_min = 3
        k_max = 5

        [reporting]
        format = "html"
        "#,
    )
    .unwrap();
    let run_timestamp = reference_date().and_hms_opt(6, 0, 0).unwrap();
    RunContext::from_loaded(loaded, reference_date(), seed)
        .unwrap()
        .with_run_timestamp(run_timestamp)
}

#[test]
fn test_end_to_end_pipeline() {
    let fixture = Fixture::new();
    let output = run_tables(&context(42), &fixture.tables()).unwrap();

    // Forecasts for both components, each with a selected strategy and a forward horizon
    assert_eq!(output.forecasts.len(), 2);
    for forecast in &output.forecasts {
        assert_eq!(forecast.holdout_rows, 21);
        let selected = forecast.selected_report().expect("a strategy was selected");
        assert_eq!(selected.predictions.len(), 21);
        assert_eq!(forecast.forward.len(), 14);
        assert!(forecast.forward.iter().all(|p| p.predicted >= 0.0));
    }

    // The spike is flagged
    let spike_date = reference_date() - Duration::days(30);
    let spike = output
        .anomalies
        .iter()
        .find(|f| f.component == Component::Rbc && f.date == spike_date)
        .unwrap();
    assert!(spike.is_anomalous);
    assert_eq!(spike.units_demanded, 400.0);

    // 40 regular donors, one new donor and two deferred donors survive validation
    assert_eq!(output.rfm.len(), 43);
    assert_eq!(output.segmentation.label_of("N001"), Some(SegmentLabel::New));

    // Inventory uses the supply table
    assert_eq!(output.inventory.len(), 1);
    assert_eq!(output.inventory[0].component, Component::Rbc);

    // Dropped donors and the unknown config section show up as diagnostics
    let kinds: Vec<&str> = output.diagnostics.iter().map(|d| d.kind()).collect();
    assert!(kinds.contains(&"ValidationError"));
    assert!(output
        .diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::UnknownConfigKey(key) if key.starts_with("reporting"))));
}

#[test]
fn test_recommendations_respect_eligibility_and_score_bounds() {
    let fixture = Fixture::new();
    let output = run_tables(&context(42), &fixture.tables()).unwrap();

    assert!(!output.recommendations.is_empty());
    assert!(output.recommendations.iter().all(|r| r.donor_id != "X001"));
    assert!(output.recommendations.iter().any(|r| r.donor_id == "X002"));
    assert!(output
        .recommendations
        .iter()
        .all(|r| (0.0..=1.0).contains(&r.score)));

    for campaign in ["C-ONEG", "C-WINBACK"] {
        let ranked: Vec<_> = output
            .recommendations
            .iter()
            .filter(|r| r.campaign_id == campaign)
            .collect();
        assert!(!ranked.is_empty());
        for (i, pair) in ranked.windows(2).enumerate() {
            assert_eq!(pair[0].rank, i + 1);
            assert!(pair[0].score >= pair[1].score);
        }
    }

    // The new donor has no history to score
    let new_donor = output
        .recommendations
        .iter()
        .find(|r| r.donor_id == "N001")
        .unwrap();
    assert_eq!(new_donor.rfm, 0.0);
}

#[test]
fn test_runs_are_deterministic_for_a_fixed_seed() {
    let fixture = Fixture::new();
    let tables = fixture.tables();
    let first = run_tables(&context(7), &tables).unwrap();
    let second = run_tables(&context(7), &tables).unwrap();

    assert_eq!(first.rfm, second.rfm);
    assert_eq!(first.segmentation.assignments, second.segmentation.assignments);
    assert_eq!(first.recommendations, second.recommendations);
    for (a, b) in first.forecasts.iter().zip(&second.forecasts) {
        assert_eq!(a.selected, b.selected);
        for (ra, rb) in a.reports.iter().zip(&b.reports) {
            assert_eq!(ra.predictions, rb.predictions);
        }
    }
}

#[test]
fn test_output_tables_are_stamped() {
    let fixture = Fixture::new();
    let output = run_tables(&context(42), &fixture.tables()).unwrap();

    let dir = tempdir().unwrap();
    let written = write_outputs(&output, dir.path()).unwrap();
    assert_eq!(written.len(), 9);

    for path in &written {
        assert!(path.exists(), "{} missing", path.display());
    }

    let segments = read_csv(&dir.path().join("donor_segments.csv")).unwrap();
    assert_eq!(segments.height(), 43);
    let names = segments.get_column_names();
    assert_eq!(names[0], "reference_date");
    assert_eq!(names[1], "run_timestamp");
    assert!(names.contains(&"segment"));

    let metrics = read_csv(&dir.path().join("forecast_metrics.csv")).unwrap();
    assert!(metrics.get_column_names().contains(&"selected"));
}

#[test]
fn test_missing_column_aborts_before_any_fit() {
    let fixture = Fixture::new();
    let donors = csv(&["donor_id,last_donation_date,donation_count".to_string(), "D1,2024-01-01,3".to_string()]);
    let tables = InputTables::read(fixture.demand.path(), donors.path(), fixture.campaigns.path(), None).unwrap();

    match run_tables(&context(42), &tables) {
        Err(PipelineError::Schema(err)) => {
            assert_eq!(err.table, "donors");
            assert_eq!(err.column, "blood_type");
        }
        other => panic!("expected a schema error, got {:?}", other.map(|o| o.diagnostics.len())),
    }
}

#[test]
fn test_mape_skips_zero_actuals() {
    let metrics = evaluate(&[0.0, 10.0, 20.0], &[5.0, 12.0, 18.0]);
    assert_eq!(metrics.excluded_zero_actuals, 1);
    assert!((metrics.mape.unwrap() - 15.0).abs() < 1e-9);
}

#[test]
fn test_in_memory_run_without_donors() {
    let ctx = RunContext::new(PipelineConfig::default(), reference_date(), 42).unwrap();
    let output = run(&ctx, &PipelineInputs::default());
    assert!(output.forecasts.is_empty());
    assert!(output.segmentation.assignments.is_empty());
    assert!(output.recommendations.is_empty());
}
