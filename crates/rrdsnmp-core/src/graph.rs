//! Chart model and renderers.
//!
//! The store turns a time-window query into a [`Chart`]; a [`GraphRenderer`]
//! turns the chart into image bytes. [`SvgRenderer`] draws a plain line chart.

use std::fmt::{self, Write as _};

use chrono::{DateTime, Utc};

use crate::fmt::format_si;

pub const DEFAULT_WIDTH: u32 = 800;
pub const DEFAULT_HEIGHT: u32 = 300;

const MARGIN_LEFT: f64 = 70.0;
const MARGIN_RIGHT: f64 = 20.0;
const MARGIN_TOP: f64 = 30.0;
const MARGIN_BOTTOM: f64 = 40.0;
const GRID_LINES: u32 = 5;
const PALETTE: [&str; 6] = [
    "#00a000", "#0000ff", "#ff0000", "#ff8000", "#8000ff", "#008080",
];

/// One line on the chart. `None` points are gaps.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub label: String,
    pub points: Vec<(i64, Option<f64>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chart {
    pub title: String,
    /// Window start (Unix seconds).
    pub from: i64,
    /// Window end (Unix seconds).
    pub to: i64,
    pub width: u32,
    pub height: u32,
    pub series: Vec<Series>,
}

/// Error type for chart rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderError {
    /// `from` is not before `to`.
    InvalidWindow { from: i64, to: i64 },
    /// Canvas too small to hold the plot area.
    InvalidSize { width: u32, height: u32 },
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::InvalidWindow { from, to } => {
                write!(f, "invalid time window [{}, {}]", from, to)
            }
            RenderError::InvalidSize { width, height } => {
                write!(f, "canvas {}x{} too small", width, height)
            }
        }
    }
}

impl std::error::Error for RenderError {}

/// Draws a chart to image bytes.
pub trait GraphRenderer: Send + Sync {
    fn render(&self, chart: &Chart) -> Result<Vec<u8>, RenderError>;
}

/// Renders charts as standalone SVG documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct SvgRenderer;

impl SvgRenderer {
    pub fn new() -> Self {
        Self
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn format_clock(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Rounds `v` up to 1, 2 or 5 times a power of ten.
fn nice_ceiling(v: f64) -> f64 {
    if v <= 0.0 || !v.is_finite() {
        return 1.0;
    }
    let magnitude = 10f64.powi(v.log10().floor() as i32);
    [1.0, 2.0, 5.0, 10.0]
        .into_iter()
        .map(|m| m * magnitude)
        .find(|c| *c >= v)
        .unwrap_or(10.0 * magnitude)
}

impl GraphRenderer for SvgRenderer {
    fn render(&self, chart: &Chart) -> Result<Vec<u8>, RenderError> {
        if chart.from >= chart.to {
            return Err(RenderError::InvalidWindow {
                from: chart.from,
                to: chart.to,
            });
        }
        let (w, h) = (f64::from(chart.width), f64::from(chart.height));
        if w <= MARGIN_LEFT + MARGIN_RIGHT || h <= MARGIN_TOP + MARGIN_BOTTOM {
            return Err(RenderError::InvalidSize {
                width: chart.width,
                height: chart.height,
            });
        }

        let plot_w = w - MARGIN_LEFT - MARGIN_RIGHT;
        let plot_h = h - MARGIN_TOP - MARGIN_BOTTOM;
        let y_max = nice_ceiling(
            chart
                .series
                .iter()
                .flat_map(|s| s.points.iter().filter_map(|(_, v)| *v))
                .fold(0.0, f64::max),
        );
        let span = (chart.to - chart.from) as f64;
        let x_of = |ts: i64| MARGIN_LEFT + (ts - chart.from) as f64 / span * plot_w;
        let y_of = |v: f64| MARGIN_TOP + plot_h - (v / y_max).clamp(0.0, 1.0) * plot_h;

        let mut svg = String::with_capacity(4096);
        // Writing into a String cannot fail.
        let _ = writeln!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{}" height="{}" viewBox="0 0 {} {}">"#,
            chart.width, chart.height, chart.width, chart.height
        );
        let _ = writeln!(svg, r##"<rect width="100%" height="100%" fill="#ffffff"/>"##);
        let _ = writeln!(
            svg,
            r#"<text x="{:.1}" y="20" font-family="monospace" font-size="14" text-anchor="middle">{}</text>"#,
            w / 2.0,
            escape(&chart.title)
        );

        for i in 0..=GRID_LINES {
            let v = y_max * f64::from(i) / f64::from(GRID_LINES);
            let y = y_of(v);
            let _ = writeln!(
                svg,
                r##"<line x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="#dddddd"/>"##,
                MARGIN_LEFT,
                y,
                MARGIN_LEFT + plot_w,
                y
            );
            let _ = writeln!(
                svg,
                r#"<text x="{:.1}" y="{:.1}" font-family="monospace" font-size="10" text-anchor="end">{}</text>"#,
                MARGIN_LEFT - 5.0,
                y + 3.0,
                format_si(v)
            );
        }

        let _ = writeln!(
            svg,
            r##"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="none" stroke="#000000"/>"##,
            MARGIN_LEFT, MARGIN_TOP, plot_w, plot_h
        );
        let axis_y = MARGIN_TOP + plot_h + 15.0;
        for (ts, anchor, x) in [
            (chart.from, "start", MARGIN_LEFT),
            (chart.to, "end", MARGIN_LEFT + plot_w),
        ] {
            let _ = writeln!(
                svg,
                r#"<text x="{:.1}" y="{:.1}" font-family="monospace" font-size="10" text-anchor="{}">{}</text>"#,
                x,
                axis_y,
                anchor,
                format_clock(ts)
            );
        }

        for (i, series) in chart.series.iter().enumerate() {
            let color = PALETTE[i % PALETTE.len()];
            let mut path = String::new();
            let mut pen_down = false;
            for (ts, value) in &series.points {
                match value {
                    Some(v) if *ts >= chart.from && *ts <= chart.to => {
                        let cmd = if pen_down { 'L' } else { 'M' };
                        let _ = write!(path, "{}{:.1},{:.1} ", cmd, x_of(*ts), y_of(*v));
                        pen_down = true;
                    }
                    _ => pen_down = false,
                }
            }
            if !path.is_empty() {
                let _ = writeln!(
                    svg,
                    r#"<path d="{}" fill="none" stroke="{}" stroke-width="1.5"/>"#,
                    path.trim_end(),
                    color
                );
            }
            let legend_x = MARGIN_LEFT + 120.0 * i as f64;
            let _ = writeln!(
                svg,
                r#"<text x="{:.1}" y="{:.1}" font-family="monospace" font-size="11" fill="{}">{}</text>"#,
                legend_x,
                h - 8.0,
                color,
                escape(&series.label)
            );
        }

        svg.push_str("</svg>\n");
        Ok(svg.into_bytes())
    }
}
