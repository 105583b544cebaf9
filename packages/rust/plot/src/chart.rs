//! Layered bar chart of two label distributions, rendered to SVG.
//!
//! Both sources share one category axis. The first source is drawn first,
//! the second is layered over it with transparency so overlaps stay visible.
//! Bar shades deepen with the count, relative to each source's maximum.

use std::path::Path;

use plotters::prelude::*;
use tracing::{debug, instrument};

use bridge_rlds_shared::{BridgeRldsError, Result};

use crate::counts::MergedRow;

/// Chart settings.
#[derive(Debug, Clone)]
pub struct PlotOptions {
    pub title: String,
    /// Legend names of the two sources.
    pub labels: (String, String),
    pub x_desc: String,
    pub y_desc: String,
    /// Fixed y-axis maximum; defaults to 110% of the largest count.
    pub y_max: Option<f64>,
    /// Explicit y ticks drawn as guide lines.
    pub y_ticks: Vec<f64>,
    pub log_scale: bool,
    /// Cut the y axis between these two counts, drawing the range above the
    /// cut in a short upper panel. Keeps a few dominant labels from flattening
    /// the rest.
    pub y_break: Option<(f64, f64)>,
    /// Canvas size in pixels.
    pub size: (u32, u32),
}

impl Default for PlotOptions {
    fn default() -> Self {
        Self {
            title: "Label distribution".into(),
            labels: ("first".into(), "second".into()),
            x_desc: "Label".into(),
            y_desc: "# of episodes".into(),
            y_max: None,
            y_ticks: Vec::new(),
            log_scale: false,
            y_break: None,
            size: (2400, 800),
        }
    }
}

const FIRST_LIGHT: RGBColor = RGBColor(158, 202, 225);
const FIRST_DARK: RGBColor = RGBColor(8, 48, 107);
const SECOND_LIGHT: RGBColor = RGBColor(252, 146, 114);
const SECOND_DARK: RGBColor = RGBColor(103, 0, 13);
const SECOND_ALPHA: f64 = 0.7;

fn plot_err(e: impl std::fmt::Display) -> BridgeRldsError {
    BridgeRldsError::Plot(e.to_string())
}

/// Render the comparison chart and write it to `out` as SVG.
#[instrument(skip_all, fields(out = %out.display(), rows = rows.len()))]
pub fn render_comparison(rows: &[MergedRow], opts: &PlotOptions, out: &Path) -> Result<()> {
    let svg = render_svg(rows, opts)?;
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| BridgeRldsError::io(parent, e))?;
    }
    std::fs::write(out, svg).map_err(|e| BridgeRldsError::io(out, e))?;
    debug!("chart written");
    Ok(())
}

/// Render the comparison chart to an SVG document.
pub fn render_svg(rows: &[MergedRow], opts: &PlotOptions) -> Result<String> {
    if rows.is_empty() {
        return Err(BridgeRldsError::Plot("no labels to plot".into()));
    }

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, opts.size).into_drawing_area();
        draw(root, rows, opts)?;
    }
    Ok(svg)
}

/// Which part of the canvas a chart occupies. A broken y axis stacks an
/// upper panel (title, legend) over a lower one (category labels).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Panel {
    Whole,
    Upper,
    Lower,
}

const MARGIN: i32 = 10;
const Y_LABEL_AREA: i32 = 70;
const X_LABEL_AREA: i32 = 220;

fn draw<DB: DrawingBackend>(
    root: DrawingArea<DB, plotters::coord::Shift>,
    rows: &[MergedRow],
    opts: &PlotOptions,
) -> Result<()> {
    root.fill(&WHITE).map_err(plot_err)?;

    let largest = rows.iter().map(MergedRow::max).max().unwrap_or(0) as f64;
    let floor = if opts.log_scale { 1.0 } else { 0.0 };
    let y_max = opts
        .y_max
        .unwrap_or(largest * 1.1)
        .max(floor + 1.0);

    match opts.y_break {
        None => draw_panel(&root, rows, opts, floor..y_max, Panel::Whole)?,
        Some((lo, hi)) => {
            if !(floor < lo && lo < hi && hi < y_max) {
                return Err(BridgeRldsError::Plot(format!(
                    "y break {lo}..{hi} must lie strictly inside {floor}..{y_max}"
                )));
            }
            let seam = opts.size.1 as i32 / 3;
            let (upper, lower) = root.split_vertically(seam);
            draw_panel(&upper, rows, opts, hi..y_max, Panel::Upper)?;
            draw_panel(&lower, rows, opts, floor..lo, Panel::Lower)?;
            draw_break_marks(&root, seam)?;
        }
    }

    root.present().map_err(plot_err)?;
    Ok(())
}

/// One chart over `y_range` on `area`.
fn draw_panel<DB: DrawingBackend>(
    area: &DrawingArea<DB, plotters::coord::Shift>,
    rows: &[MergedRow],
    opts: &PlotOptions,
    y_range: std::ops::Range<f64>,
    panel: Panel,
) -> Result<()> {
    let n = rows.len() as i32;
    let label_of = |v: &SegmentValue<i32>| match v {
        SegmentValue::CenterOf(i) => rows
            .get(*i as usize)
            .map(|r| r.label.clone())
            .unwrap_or_default(),
        _ => String::new(),
    };
    let explicit_ticks = !opts.y_ticks.is_empty();
    let value_label = |v: &f64| if explicit_ticks { String::new() } else { format!("{v:.0}") };
    let label_style = ("sans-serif", 14)
        .into_font()
        .transform(FontTransform::Rotate90);
    let x_labels = if panel == Panel::Upper { 0 } else { rows.len() + 1 };
    let x_desc = if panel == Panel::Upper { "" } else { opts.x_desc.as_str() };

    let mut builder = ChartBuilder::on(area);
    builder.margin(MARGIN).y_label_area_size(Y_LABEL_AREA);
    if panel != Panel::Lower {
        builder.caption(&opts.title, ("sans-serif", 26));
    }
    if panel != Panel::Upper {
        builder.x_label_area_size(X_LABEL_AREA);
    }

    if opts.log_scale {
        let mut chart = builder
            .build_cartesian_2d((0..n).into_segmented(), y_range.clone().log_scale())
            .map_err(plot_err)?;
        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_labels(x_labels)
            .x_label_formatter(&label_of)
            .x_label_style(label_style)
            .y_label_formatter(&value_label)
            .x_desc(x_desc)
            .y_desc(opts.y_desc.as_str())
            .draw()
            .map_err(plot_err)?;
        draw_layers(&mut chart, rows, opts, y_range, panel != Panel::Lower)
    } else {
        let mut chart = builder
            .build_cartesian_2d((0..n).into_segmented(), y_range.clone())
            .map_err(plot_err)?;
        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_labels(x_labels)
            .x_label_formatter(&label_of)
            .x_label_style(label_style)
            .y_label_formatter(&value_label)
            .x_desc(x_desc)
            .y_desc(opts.y_desc.as_str())
            .draw()
            .map_err(plot_err)?;
        draw_layers(&mut chart, rows, opts, y_range, panel != Panel::Lower)
    }
}

/// Bars for both sources, any explicit ticks and optionally the legend.
/// Bars start at the bottom of `y_range` and are cut at its top.
fn draw_layers<'a, DB, X, Y>(
    chart: &mut ChartContext<'a, DB, Cartesian2d<X, Y>>,
    rows: &[MergedRow],
    opts: &PlotOptions,
    y_range: std::ops::Range<f64>,
    legend: bool,
) -> Result<()>
where
    DB: DrawingBackend + 'a,
    X: Ranged<ValueType = SegmentValue<i32>>,
    Y: Ranged<ValueType = f64>,
{
    let (lo, hi) = (y_range.start, y_range.end);
    let first_max = rows.iter().map(|r| r.first).max().unwrap_or(0).max(1) as f64;
    let second_max = rows.iter().map(|r| r.second).max().unwrap_or(0).max(1) as f64;

    let bar = |i: usize, count: u64, color: RGBAColor| {
        let i = i as i32;
        let mut rect = Rectangle::new(
            [
                (SegmentValue::Exact(i), lo),
                (SegmentValue::Exact(i + 1), (count as f64).min(hi)),
            ],
            color.filled(),
        );
        rect.set_margin(0, 0, 2, 2);
        rect
    };

    let first = chart
        .draw_series(rows.iter().enumerate().filter(|(_, r)| r.first as f64 > lo).map(
            |(i, r)| {
                let shade = gradient(FIRST_LIGHT, FIRST_DARK, r.first as f64 / first_max);
                bar(i, r.first, shade.to_rgba())
            },
        ))
        .map_err(plot_err)?;
    if legend {
        first
            .label(opts.labels.0.as_str())
            .legend(|(x, y)| Rectangle::new([(x, y - 6), (x + 16, y + 6)], FIRST_DARK.filled()));
    }

    let second = chart
        .draw_series(rows.iter().enumerate().filter(|(_, r)| r.second as f64 > lo).map(
            |(i, r)| {
                let shade = gradient(SECOND_LIGHT, SECOND_DARK, r.second as f64 / second_max);
                bar(i, r.second, shade.mix(SECOND_ALPHA))
            },
        ))
        .map_err(plot_err)?;
    if legend {
        second.label(opts.labels.1.as_str()).legend(|(x, y)| {
            Rectangle::new([(x, y - 6), (x + 16, y + 6)], SECOND_DARK.mix(SECOND_ALPHA).filled())
        });
    }

    let end = SegmentValue::Exact(rows.len() as i32);
    for &tick in opts.y_ticks.iter().filter(|t| (lo..=hi).contains(*t)) {
        chart
            .draw_series(std::iter::once(PathElement::new(
                vec![(SegmentValue::Exact(0), tick), (end.clone(), tick)],
                BLACK.mix(0.15),
            )))
            .map_err(plot_err)?;
        chart
            .draw_series(std::iter::once(Text::new(
                format!("{tick}"),
                (SegmentValue::Exact(0), tick),
                ("sans-serif", 14),
            )))
            .map_err(plot_err)?;
    }

    if legend {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .position(SeriesLabelPosition::UpperRight)
            .draw()
            .map_err(plot_err)?;
    }
    Ok(())
}

/// Wavy marks across the y axis on both sides of the seam between panels.
fn draw_break_marks<DB: DrawingBackend>(
    root: &DrawingArea<DB, plotters::coord::Shift>,
    seam: i32,
) -> Result<()> {
    let axis_x = MARGIN + Y_LABEL_AREA;
    for edge in [seam - MARGIN, seam + MARGIN] {
        let wave: Vec<(i32, i32)> = (0..=24)
            .map(|k| {
                let t = f64::from(k) / 24.0;
                let y = (t * 3.0 * std::f64::consts::PI).sin() * 4.0;
                (axis_x - 12 + k, edge + y.round() as i32)
            })
            .collect();
        root.draw(&PathElement::new(wave, BLACK.stroke_width(2)))
            .map_err(plot_err)?;
    }
    Ok(())
}

/// Linear blend from `light` (t = 0) to `dark` (t = 1), starting half way in
/// so small counts stay visible.
fn gradient(light: RGBColor, dark: RGBColor, t: f64) -> RGBColor {
    let t = 0.5 + 0.5 * t.clamp(0.0, 1.0);
    let channel = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
    RGBColor(
        channel(light.0, dark.0),
        channel(light.1, dark.1),
        channel(light.2, dark.2),
    )
}
