//! Charts and console tables for the report command, using Plotters

use crate::model::CustomerRfm;
use crate::report::{SeasonalitySummary, SegmentSummary};
use plotters::prelude::*;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::info;

/// Palette cycled across segment bars
const SEGMENT_COLORS: [RGBColor; 6] = [
    RGBColor(94, 60, 153),
    RGBColor(29, 105, 150),
    RGBColor(56, 166, 165),
    RGBColor(15, 133, 84),
    RGBColor(237, 173, 8),
    RGBColor(204, 80, 62),
];

/// Value axis from zero to the maximum plus 10% headroom
fn value_range(values: impl Iterator<Item = f64>) -> Range<f64> {
    let max = values.fold(0.0_f64, f64::max);
    0.0..(max.max(1.0) * 1.1)
}

/// Line chart of revenue per month
pub fn create_monthly_revenue_chart(
    summary: &SeasonalitySummary,
    output_path: &Path,
) -> anyhow::Result<()> {
    if summary.monthly.is_empty() {
        anyhow::bail!("No monthly revenue to plot");
    }

    let months: Vec<String> = summary
        .monthly
        .iter()
        .map(|m| m.month.format("%Y-%m").to_string())
        .collect();
    let points: Vec<(f64, f64)> = summary
        .monthly
        .iter()
        .enumerate()
        .map(|(i, m)| (i as f64, m.revenue))
        .collect();

    let root = BitMapBackend::new(output_path, (900, 500)).into_drawing_area();
    root.fill(&WHITE)?;

    let x_max = (points.len() as f64 - 0.5).max(0.5);
    let mut chart = ChartBuilder::on(&root)
        .caption("Monthly Revenue", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(80)
        .build_cartesian_2d(-0.5..x_max, value_range(points.iter().map(|p| p.1)))?;

    chart
        .configure_mesh()
        .x_desc("Month")
        .y_desc("Revenue")
        .x_labels(months.len().min(24))
        .x_label_formatter(&|x| {
            let idx = x.round();
            if idx >= 0.0 && (x - idx).abs() < 1e-6 {
                months.get(idx as usize).cloned().unwrap_or_default()
            } else {
                String::new()
            }
        })
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    chart.draw_series(LineSeries::new(points.iter().copied(), &BLUE))?;
    chart.draw_series(
        points
            .iter()
            .map(|&(x, y)| Circle::new((x, y), 4, BLUE.filled())),
    )?;

    root.present()?;
    info!(path = %output_path.display(), "saved monthly revenue chart");
    Ok(())
}

/// One labelled bar per entry, colors cycling through the segment palette
fn create_bar_chart(
    title: &str,
    x_desc: &str,
    y_desc: &str,
    bars: &[(String, f64)],
    output_path: &Path,
) -> anyhow::Result<()> {
    if bars.is_empty() {
        anyhow::bail!("No data for chart '{}'", title);
    }

    let root = BitMapBackend::new(output_path, (900, 500)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(60)
        .y_label_area_size(80)
        .build_cartesian_2d(
            -0.5..(bars.len() as f64 - 0.5),
            value_range(bars.iter().map(|(_, v)| *v)),
        )?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_desc(x_desc)
        .y_desc(y_desc)
        .x_labels(bars.len())
        .x_label_formatter(&|x| {
            let idx = x.round();
            if idx >= 0.0 && (x - idx).abs() < 1e-6 {
                bars.get(idx as usize).map(|(l, _)| l.clone()).unwrap_or_default()
            } else {
                String::new()
            }
        })
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for (i, (_, value)) in bars.iter().enumerate() {
        let color = SEGMENT_COLORS[i % SEGMENT_COLORS.len()];
        chart.draw_series(std::iter::once(Rectangle::new(
            [(i as f64 - 0.4, 0.0), (i as f64 + 0.4, *value)],
            color.filled(),
        )))?;
    }

    root.present()?;
    info!(path = %output_path.display(), title, "saved bar chart");
    Ok(())
}

fn weekday_bars(summary: &SeasonalitySummary) -> Vec<(String, f64)> {
    summary
        .by_weekday
        .iter()
        .map(|(day, revenue)| (day.to_string(), *revenue))
        .collect()
}

fn hour_bars(summary: &SeasonalitySummary) -> Vec<(String, f64)> {
    summary
        .by_hour
        .iter()
        .map(|(hour, revenue)| (format!("{hour:02}"), *revenue))
        .collect()
}

/// Bar chart of customers per segment
pub fn create_segment_chart(segments: &[SegmentSummary], output_path: &Path) -> anyhow::Result<()> {
    let bars: Vec<(String, f64)> = segments
        .iter()
        .map(|s| (s.segment.label().to_string(), s.customers as f64))
        .collect();
    create_bar_chart(
        "Distribution of Customer Segments",
        "Segment",
        "Customers",
        &bars,
        output_path,
    )
}

/// Bar chart of revenue per segment
pub fn create_segment_revenue_chart(
    segments: &[SegmentSummary],
    output_path: &Path,
) -> anyhow::Result<()> {
    let bars: Vec<(String, f64)> = segments
        .iter()
        .map(|s| (s.segment.label().to_string(), s.revenue))
        .collect();
    create_bar_chart("Revenue by Segment", "Segment", "Revenue", &bars, output_path)
}

/// Revenue per day of the week, Monday first
pub fn create_weekday_chart(summary: &SeasonalitySummary, output_path: &Path) -> anyhow::Result<()> {
    create_bar_chart(
        "Sales by Day of Week",
        "Day",
        "Revenue",
        &weekday_bars(summary),
        output_path,
    )
}

/// Revenue per hour of the day, only hours with sales
pub fn create_hour_chart(summary: &SeasonalitySummary, output_path: &Path) -> anyhow::Result<()> {
    create_bar_chart(
        "Sales by Hour",
        "Hour",
        "Revenue",
        &hour_bars(summary),
        output_path,
    )
}

/// Render every report chart into `output_dir`
pub fn generate_report_charts(
    seasonality: &SeasonalitySummary,
    segments: &[SegmentSummary],
    output_dir: &Path,
) -> anyhow::Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)?;

    let monthly_path = output_dir.join("monthly_revenue.png");
    create_monthly_revenue_chart(seasonality, &monthly_path)?;

    let weekday_path = output_dir.join("sales_by_weekday.png");
    create_weekday_chart(seasonality, &weekday_path)?;

    let hour_path = output_dir.join("sales_by_hour.png");
    create_hour_chart(seasonality, &hour_path)?;

    let segment_path = output_dir.join("segments.png");
    create_segment_chart(segments, &segment_path)?;

    let revenue_path = output_dir.join("segment_revenue.png");
    create_segment_revenue_chart(segments, &revenue_path)?;

    Ok(vec![
        monthly_path,
        weekday_path,
        hour_path,
        segment_path,
        revenue_path,
    ])
}

pub fn print_seasonality(summary: &SeasonalitySummary) {
    println!("\n=== Revenue Trends ===");
    println!("Total revenue: £{:.0}", summary.total_revenue);
    if let Some(best) = &summary.best_month {
        println!("Best month: {} (£{:.0})", best.month.format("%B %Y"), best.revenue);
    }
    println!("Total txns: {}", summary.transaction_count);

    println!("\nSales by day:");
    for (day, revenue) in &summary.by_weekday {
        println!("  {:<3} | {:>12.2}", day.to_string(), revenue);
    }

    println!("\nSales by hour:");
    for (hour, revenue) in &summary.by_hour {
        println!("  {:02}  | {:>12.2}", hour, revenue);
    }
}

pub fn print_segment_summary(segments: &[SegmentSummary]) {
    println!("\n=== Customer Segments ===");
    println!("  {:<20} | {:>9} | {:>12}", "Segment", "Customers", "Revenue");
    println!("  {:-<20}-|-{:->9}-|-{:->12}", "", "", "");
    for s in segments {
        println!("  {:<20} | {:>9} | {:>12.2}", s.segment.label(), s.customers, s.revenue);
    }
}

pub fn print_top_customers(segment: &str, customers: &[&CustomerRfm]) {
    println!("\n=== Top customers in '{}' ===", segment);
    println!("  Customer | Recency | Frequency |     Monetary | RFM");
    for c in customers {
        println!(
            "  {:>8} | {:>7} | {:>9} | {:>12.2} | {}{}{}",
            c.customer_id, c.recency, c.frequency, c.monetary, c.r_score, c.f_score, c.m_score
        );
    }
    println!("Showing top {} customers in '{}'", customers.len(), segment);
}
