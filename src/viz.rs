//! Optional PNG charts using Plotters: donor segments and holdout forecasts

use std::path::{Path, PathBuf};

use plotters::prelude::*;
use tracing::info;

use crate::domain::SegmentLabel;
use crate::forecast::ComponentForecast;
use crate::pipeline::PipelineOutput;
use crate::segmentation::SegmentationResult;

/// One color per segment label, in `SegmentLabel::ALL` order
const SEGMENT_COLORS: [RGBColor; 6] = [
    RGBColor(214, 39, 40),
    RGBColor(31, 119, 180),
    RGBColor(44, 160, 44),
    RGBColor(255, 127, 14),
    RGBColor(127, 127, 127),
    RGBColor(148, 103, 189),
];

const STRATEGY_COLORS: [RGBColor; 4] = [BLUE, RED, GREEN, MAGENTA];

fn segment_color(label: SegmentLabel) -> RGBColor {
    let index = SegmentLabel::ALL.iter().position(|&l| l == label).unwrap_or(0);
    SEGMENT_COLORS[index]
}

fn padded_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return (0.0, 1.0);
    }
    let pad = ((hi - lo) * 0.05).max(0.5);
    (lo - pad, hi + pad)
}

/// Scatter of donation count against total volume, colored by segment
pub fn create_segment_visualization(
    segmentation: &SegmentationResult,
    output_path: &Path,
    plot_title: Option<&str>,
) -> crate::Result<()> {
    let title = plot_title.unwrap_or("Donor Segments: Frequency vs Volume");
    let points: Vec<(f64, f64, SegmentLabel)> = segmentation
        .assignments
        .iter()
        .map(|a| (a.record.frequency as f64, a.record.monetary_cc, a.label))
        .collect();

    let (x_min, x_max) = padded_range(points.iter().map(|p| p.0));
    let (y_min, y_max) = padded_range(points.iter().map(|p| p.1));

    let root = BitMapBackend::new(output_path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

    chart
        .configure_mesh()
        .x_desc("Donations")
        .y_desc("Total volume (cc)")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for label in SegmentLabel::ALL {
        let color = segment_color(label);
        let members: Vec<(f64, f64)> = points
            .iter()
            .filter(|p| p.2 == label)
            .map(|p| (p.0, p.1))
            .collect();
        if members.is_empty() {
            continue;
        }
        chart
            .draw_series(members.into_iter().map(|p| Circle::new(p, 4, color.filled())))?
            .label(label.as_str())
            .legend(move |(x, y)| Circle::new((x + 5, y), 4, color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    info!(path = %output_path.display(), "segment chart written");
    Ok(())
}

/// Donors per segment as a bar chart
pub fn create_segment_size_chart(segmentation: &SegmentationResult, output_path: &Path) -> crate::Result<()> {
    let summaries = &segmentation.summaries;
    let max_size = summaries.iter().map(|s| s.donors).max().unwrap_or(1).max(1) as f64;

    let root = BitMapBackend::new(output_path, (600, 400)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Donors per Segment", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(-0.5f64..(summaries.len().max(1) as f64 - 0.5), 0f64..(max_size * 1.1))?;

    let names: Vec<&str> = summaries.iter().map(|s| s.label.as_str()).collect();
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(names.len().max(1))
        .x_label_formatter(&|x| {
            let i = x.round();
            if i >= 0.0 && (i as usize) < names.len() {
                names[i as usize].to_string()
            } else {
                String::new()
            }
        })
        .y_desc("Donors")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    chart.draw_series(summaries.iter().enumerate().map(|(i, s)| {
        let x = i as f64;
        Rectangle::new([(x - 0.4, 0.0), (x + 0.4, s.donors as f64)], segment_color(s.label).filled())
    }))?;

    root.present()?;
    info!(path = %output_path.display(), "segment size chart written");
    Ok(())
}

/// Holdout actuals against every fitted strategy for one component
pub fn create_forecast_chart(forecast: &ComponentForecast, output_path: &Path) -> crate::Result<()> {
    let Some(first) = forecast.reports.first() else {
        anyhow::bail!("no fitted strategies for {}", forecast.component);
    };
    let horizon = first.actuals.len();
    let (y_min, y_max) = padded_range(
        forecast
            .reports
            .iter()
            .flat_map(|r| r.actuals.iter().chain(r.predictions.iter()).copied()),
    );

    let title = format!("{} demand: holdout forecasts", forecast.component);
    let root = BitMapBackend::new(output_path, (900, 500)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 26))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..(horizon.max(2) as f64 - 1.0), y_min.max(0.0)..y_max)?;

    chart
        .configure_mesh()
        .x_desc("Day of holdout")
        .y_desc("Units")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    chart
        .draw_series(LineSeries::new(
            first.actuals.iter().enumerate().map(|(i, &v)| (i as f64, v)),
            BLACK.stroke_width(2),
        ))?
        .label("actual")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLACK.stroke_width(2)));

    for (i, report) in forecast.reports.iter().enumerate() {
        let color = STRATEGY_COLORS[i % STRATEGY_COLORS.len()];
        let label = if forecast.selected == Some(report.strategy) {
            format!("{} (selected)", report.strategy)
        } else {
            report.strategy.to_string()
        };
        chart
            .draw_series(LineSeries::new(
                report.predictions.iter().enumerate().map(|(i, &v)| (i as f64, v)),
                color.stroke_width(1),
            ))?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    info!(path = %output_path.display(), component = %forecast.component, "forecast chart written");
    Ok(())
}

/// Write every chart the run supports into `dir`
pub fn generate_visualization_report(output: &PipelineOutput, dir: &Path) -> crate::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::new();

    if !output.segmentation.assignments.is_empty() {
        let path = dir.join("segments.png");
        create_segment_visualization(&output.segmentation, &path, None)?;
        written.push(path);

        let path = dir.join("segment_sizes.png");
        create_segment_size_chart(&output.segmentation, &path)?;
        written.push(path);
    }

    for forecast in output.forecasts.iter().filter(|f| !f.reports.is_empty()) {
        let path = dir.join(format!("forecast_{}.png", forecast.component.as_str().to_lowercase()));
        create_forecast_chart(forecast, &path)?;
        written.push(path);
    }

    Ok(written)
}
