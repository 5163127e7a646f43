// SVG chart rendering for region views

use crate::error::{AnalysisError, Result};
use crate::models::short_region_name;
use plotters::coord::ranged1d::SegmentValue;
use plotters::prelude::*;
use std::path::{Path, PathBuf};
use tracing::info;

const FONT: &str = "sans-serif";

fn chart_error<E: std::fmt::Display>(e: E) -> AnalysisError {
    AnalysisError::Chart(e.to_string())
}

/// Keep only characters that are safe in a file name
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn axis_max(items: &[(String, f64)], fixed: Option<f64>) -> f64 {
    if let Some(max) = fixed {
        return max;
    }
    let max = items.iter().map(|(_, v)| *v).fold(0.0_f64, f64::max);
    if max > 0.0 {
        max * 1.15
    } else {
        1.0
    }
}

pub struct ChartWriter {
    output_dir: PathBuf,
    size: (u32, u32),
}

impl ChartWriter {
    pub fn new(output_dir: &Path, width: u32, height: u32) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            size: (width, height),
        }
    }

    /// Horizontal bars, first item drawn on top. Used for top/bottom/similar views.
    pub fn horizontal_bars(
        &self,
        file_stem: &str,
        title: &str,
        x_desc: &str,
        items: &[(String, f64)],
        x_max: Option<f64>,
        color: RGBColor,
    ) -> Result<PathBuf> {
        if items.is_empty() {
            return Err(AnalysisError::EmptyData(format!("nothing to draw for '{}'", title)));
        }
        let path = self.output_dir.join(format!("{}.svg", sanitize_file_name(file_stem)));
        let n = items.len() as i32;
        let x_max = axis_max(items, x_max);
        let labels: Vec<String> = items.iter().map(|(name, _)| short_region_name(name)).collect();

        {
            let root = SVGBackend::new(&path, self.size).into_drawing_area();
            root.fill(&WHITE).map_err(chart_error)?;

            let mut chart = ChartBuilder::on(&root)
                .caption(title, (FONT, 24))
                .margin(15)
                .x_label_area_size(40)
                .y_label_area_size(180)
                .build_cartesian_2d(0f64..x_max, (0..n).into_segmented())
                .map_err(chart_error)?;

            let label_for = |v: &SegmentValue<i32>| match v {
                SegmentValue::CenterOf(y) => labels
                    .get((n - 1 - *y) as usize)
                    .cloned()
                    .unwrap_or_default(),
                _ => String::new(),
            };
            chart
                .configure_mesh()
                .disable_y_mesh()
                .x_desc(x_desc)
                .y_labels(items.len())
                .y_label_formatter(&label_for)
                .draw()
                .map_err(chart_error)?;

            chart
                .draw_series(items.iter().enumerate().map(|(i, (_, value))| {
                    let y = n - 1 - i as i32;
                    let mut bar = Rectangle::new(
                        [(0.0, SegmentValue::Exact(y)), (*value, SegmentValue::Exact(y + 1))],
                        color.filled(),
                    );
                    bar.set_margin(4, 4, 0, 0);
                    bar
                }))
                .map_err(chart_error)?;

            chart
                .draw_series(items.iter().enumerate().map(|(i, (_, value))| {
                    let y = n - 1 - i as i32;
                    Text::new(
                        format!("{:.1}", value),
                        (*value, SegmentValue::CenterOf(y)),
                        (FONT, 14).into_font(),
                    )
                }))
                .map_err(chart_error)?;

            root.present().map_err(chart_error)?;
        }

        info!("📊 Chart saved to {}", path.display());
        Ok(path)
    }

    /// Vertical bars in the given order. Used for population distributions.
    pub fn vertical_bars(
        &self,
        file_stem: &str,
        title: &str,
        x_desc: &str,
        y_desc: &str,
        items: &[(String, f64)],
    ) -> Result<PathBuf> {
        if items.is_empty() {
            return Err(AnalysisError::EmptyData(format!("nothing to draw for '{}'", title)));
        }
        let path = self.output_dir.join(format!("{}.svg", sanitize_file_name(file_stem)));
        let n = items.len() as i32;
        let y_max = axis_max(items, None);
        let labels: Vec<String> = items.iter().map(|(name, _)| short_region_name(name)).collect();

        {
            let root = SVGBackend::new(&path, self.size).into_drawing_area();
            root.fill(&WHITE).map_err(chart_error)?;

            let mut chart = ChartBuilder::on(&root)
                .caption(title, (FONT, 24))
                .margin(15)
                .x_label_area_size(60)
                .y_label_area_size(80)
                .build_cartesian_2d((0..n).into_segmented(), 0f64..y_max)
                .map_err(chart_error)?;

            let label_for = |v: &SegmentValue<i32>| match v {
                SegmentValue::CenterOf(x) => labels.get(*x as usize).cloned().unwrap_or_default(),
                _ => String::new(),
            };
            chart
                .configure_mesh()
                .disable_x_mesh()
                .x_desc(x_desc)
                .y_desc(y_desc)
                .x_labels(items.len())
                .x_label_formatter(&label_for)
                .draw()
                .map_err(chart_error)?;

            chart
                .draw_series(items.iter().enumerate().map(|(i, (_, value))| {
                    let x = i as i32;
                    let mut bar = Rectangle::new(
                        [(SegmentValue::Exact(x), 0.0), (SegmentValue::Exact(x + 1), *value)],
                        BLUE.mix(0.7).filled(),
                    );
                    bar.set_margin(0, 0, 4, 4);
                    bar
                }))
                .map_err(chart_error)?;

            root.present().map_err(chart_error)?;
        }

        info!("📊 Chart saved to {}", path.display());
        Ok(path)
    }

    /// A single line across categories, with a marker per point.
    pub fn line(
        &self,
        file_stem: &str,
        title: &str,
        x_desc: &str,
        y_desc: &str,
        items: &[(String, f64)],
    ) -> Result<PathBuf> {
        if items.is_empty() {
            return Err(AnalysisError::EmptyData(format!("nothing to draw for '{}'", title)));
        }
        let path = self.output_dir.join(format!("{}.svg", sanitize_file_name(file_stem)));
        let last = (items.len() as i32 - 1).max(1);
        let y_max = axis_max(items, None);
        let labels: Vec<String> = items.iter().map(|(name, _)| name.clone()).collect();
        let points: Vec<(i32, f64)> = items
            .iter()
            .enumerate()
            .map(|(i, (_, v))| (i as i32, *v))
            .collect();

        {
            let root = SVGBackend::new(&path, self.size).into_drawing_area();
            root.fill(&WHITE).map_err(chart_error)?;

            let mut chart = ChartBuilder::on(&root)
                .caption(title, (FONT, 24))
                .margin(15)
                .x_label_area_size(60)
                .y_label_area_size(80)
                .build_cartesian_2d(0..last, 0f64..y_max)
                .map_err(chart_error)?;

            let label_for = |x: &i32| labels.get(*x as usize).cloned().unwrap_or_default();
            chart
                .configure_mesh()
                .x_desc(x_desc)
                .y_desc(y_desc)
                .x_labels(items.len())
                .x_label_formatter(&label_for)
                .draw()
                .map_err(chart_error)?;

            chart
                .draw_series(LineSeries::new(points.clone(), RED.stroke_width(2)))
                .map_err(chart_error)?;
            chart
                .draw_series(points.iter().map(|p| Circle::new(*p, 3, RED.filled())))
                .map_err(chart_error)?;

            root.present().map_err(chart_error)?;
        }

        info!("📈 Chart saved to {}", path.display());
        Ok(path)
    }
}
