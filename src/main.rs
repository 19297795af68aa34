//! blood-analytics: demand forecasting and donor engagement for a blood bank
//!
//! Loads the input tables, runs one analytics pass and writes the output
//! tables (and optionally charts) to the output directory.

use std::time::Instant;

use anyhow::{Context, Result};
use blood_analytics::{
    run_tables, viz, write_outputs, Args, InputTables, LoadedConfig, PipelineConfig, PipelineOutput, RunContext,
};
use clap::Parser;
use tracing::info;

fn main() -> Result<()> {
    let args = Args::parse();

    let directive = if args.verbose {
        "blood_analytics=debug"
    } else {
        "blood_analytics=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?))
        .with_writer(std::io::stderr)
        .init();

    let start_time = Instant::now();
    let reference_date = args.parse_reference_date()?;

    let loaded = match &args.config {
        Some(path) => PipelineConfig::load_from_path(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => LoadedConfig {
            config: PipelineConfig::default(),
            unknown_keys: Vec::new(),
        },
    };
    let ctx = RunContext::from_loaded(loaded, reference_date, args.seed)?;
    info!(reference_date = %ctx.reference_date, seed = ctx.seed, "configuration ready");

    println!("=== Blood Bank Analytics ===\n");
    let tables = InputTables::read(&args.demand, &args.donors, &args.campaigns, args.supply.as_deref())?;
    println!(
        "✓ Tables loaded: {} demand rows, {} donors, {} campaigns",
        tables.demand.height(),
        tables.donors.height(),
        tables.campaigns.height()
    );

    let run_start = Instant::now();
    let output = run_tables(&ctx, &tables)?;
    if args.verbose {
        println!("  Analysis time: {:.2}s", run_start.elapsed().as_secs_f64());
    }

    print_summary(&output);

    let written = write_outputs(&output, &args.output_dir)?;
    println!("\n✓ {} output tables written to {}", written.len(), args.output_dir.display());

    if args.plots {
        let charts = viz::generate_visualization_report(&output, &args.output_dir.join("charts"))?;
        println!("✓ {} charts generated", charts.len());
    }

    println!("\n=== Run Complete ===");
    println!("Total processing time: {:.2}s", start_time.elapsed().as_secs_f64());
    Ok(())
}

fn print_summary(output: &PipelineOutput) {
    println!("\n=== Demand Forecasts ===");
    for forecast in &output.forecasts {
        match forecast.selected_report() {
            Some(report) => {
                let mape = report
                    .metrics
                    .mape
                    .map_or_else(|| "n/a".to_string(), |m| format!("{:.1}%", m));
                println!(
                    "{:<16} {:<18} MAE {:>7.2}  RMSE {:>7.2}  MAPE {:>7}",
                    forecast.component.as_str(),
                    report.strategy,
                    report.metrics.mae,
                    report.metrics.rmse,
                    mape
                );
            }
            None => println!("{:<16} no strategy could be fitted", forecast.component.as_str()),
        }
    }
    println!("Anomalous demand days: {}", output.anomaly_count());

    println!("\n=== Donor Segments ===");
    let seg = &output.segmentation;
    if let (Some(k), Some(silhouette)) = (seg.k, seg.silhouette) {
        println!("Clusters: {}  Silhouette: {:.3}", k, silhouette);
    }
    for summary in &seg.summaries {
        println!(
            "{:<12} {:>6} donors ({:.1}%)  {}",
            summary.label.as_str(),
            summary.donors,
            summary.share * 100.0,
            summary.outreach.action
        );
    }

    println!("\n=== Campaign Recommendations ===");
    println!("Ranked donors: {}", output.recommendations.len());

    if !output.inventory.is_empty() {
        println!("\n=== Inventory ===");
        for metrics in &output.inventory {
            println!(
                "{:<16} utilization {:>5.1}%  wastage {:>5.1}%  shortage risk {:>5.1}%{}",
                metrics.component.as_str(),
                metrics.utilization_rate * 100.0,
                metrics.wastage_rate * 100.0,
                metrics.shortage_risk * 100.0,
                if metrics.meets_utilization_target { "" } else { "  below target" }
            );
        }
    }

    if !output.diagnostics.is_empty() {
        println!("\n=== Diagnostics ({}) ===", output.diagnostics.len());
        for diagnostic in output.diagnostics.iter().take(20) {
            println!("[{}] {}", diagnostic.kind(), diagnostic);
        }
        if output.diagnostics.len() > 20 {
            println!("... {} more in diagnostics.csv", output.diagnostics.len() - 20);
        }
    }
}
