//! Chart frames: everything a renderer needs to draw one chart.
//!
//! A [`ChartConfig`] names a canvas and the series to plot on it. For a
//! given end time, [`build_frame`] resamples each series onto one bucket per
//! plot-area pixel column, scales the series of each axis to a shared peak,
//! and lays out the value and time axis labels. The result is a plain
//! serializable [`ChartFrame`]; drawing pixels and encoding images is left
//! to the renderer.
//!
//! # Layout
//!
//! ```text
//!   ┌──────────────────────────────────────────────┐
//!   │  y0 ┌──────────────────────────────┐          │
//!   │ 9fw │          plot area           │ 11fw     │
//!   │     │           w0 x h0            │          │
//!   │     └──────────────────────────────┘          │
//!   │ x0       time ticks, legend           (4fh)   │
//!   └──────────────────────────────────────────────┘
//! ```
//!
//! Metrics use a 6x13 pixel label font.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::kv::OrderedStore;
use crate::query;
use crate::record::ValueKind;

/// Label font width in pixels.
pub const FONT_W: u32 = 6;

/// Label font height in pixels.
pub const FONT_H: u32 = 13;

/// Most value-axis ticks drawn.
pub const MAX_VALUE_TICKS: u32 = 10;

/// Default time span of a chart: one day.
pub const DEFAULT_SPAN_SECS: u32 = 86_400;

/// Which value axis a series is scaled against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// Left axis.
    #[default]
    Left,
    /// Right axis.
    Right,
}

/// A 24-bit RGB color, written as `"#rrggbb"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(pub u32);

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        let hex = s.strip_prefix('#').unwrap_or(&s);
        if hex.len() != 6 {
            return Err(format!("invalid color '{s}': expected #rrggbb"));
        }
        u32::from_str_radix(hex, 16)
            .map(Color)
            .map_err(|_| format!("invalid color '{s}': expected #rrggbb"))
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:06x}", self.0 & 0x00ff_ffff)
    }
}

/// One plotted series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesConfig {
    /// Unit to read.
    pub unit: u16,
    /// Legend text.
    pub label: String,
    /// Axis caption, e.g. `"bit/s"`.
    #[serde(default)]
    pub unit_label: String,
    /// Line color.
    #[serde(default)]
    pub color: Color,
    /// Fill the area under the curve instead of drawing a line.
    #[serde(default)]
    pub filled: bool,
    /// Values are byte counts: label in bits with binary prefixes.
    #[serde(default)]
    pub bytes: bool,
    /// Field of each sample to plot.
    #[serde(default)]
    pub kind: ValueKind,
    /// Axis to scale against.
    #[serde(default)]
    pub axis: Axis,
}

/// One chart: canvas size, time span and series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartConfig {
    /// Chart name, unique within a configuration.
    pub name: String,
    /// Where the renderer should write the image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    /// Canvas width in pixels.
    pub width: u32,
    /// Canvas height in pixels.
    pub height: u32,
    /// Seconds of history shown, ending at the frame's end time.
    #[serde(default = "default_span")]
    pub span_secs: u32,
    /// Series to plot.
    #[serde(default)]
    pub series: Vec<SeriesConfig>,
}

const fn default_span() -> u32 {
    DEFAULT_SPAN_SECS
}

impl ChartConfig {
    /// Checks the canvas and span.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the canvas leaves no plot area or
    /// the span is zero.
    pub fn validate(&self) -> Result<()> {
        if PlotArea::for_canvas(self.width, self.height).is_none() {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "chart '{}': canvas {}x{} leaves no plot area",
                    self.name, self.width, self.height
                ),
            }
            .into());
        }
        if self.span_secs == 0 {
            return Err(ConfigError::Invalid {
                reason: format!("chart '{}': span_secs must be > 0", self.name),
            }
            .into());
        }
        Ok(())
    }
}

/// The plot rectangle inside a canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlotArea {
    /// Left edge.
    pub x0: u32,
    /// Top edge.
    pub y0: u32,
    /// Width, also the number of buckets per series.
    pub w0: u32,
    /// Height.
    pub h0: u32,
}

impl PlotArea {
    /// Lays out the plot area of a `width` x `height` canvas.
    ///
    /// Returns `None` if the canvas is too small to leave any.
    pub fn for_canvas(width: u32, height: u32) -> Option<Self> {
        let w0 = width.checked_sub(FONT_H + 20 * FONT_W).filter(|w| *w > 0)?;
        let h0 = height.checked_sub(5 * FONT_H).filter(|h| *h > 0)?;
        Some(Self {
            x0: FONT_H + 9 * FONT_W,
            y0: FONT_H,
            w0,
            h0,
        })
    }
}

/// Scales `max` for display, returning the scaled value and its prefix.
///
/// Byte series are shown in bits with 1024 steps; everything else uses 1000.
pub fn scale_unit(max: f64, bytes: bool) -> (f64, char) {
    let (mut m, divisor) = if bytes { (max * 8.0, 1024.0) } else { (max, 1000.0) };
    let mut suffix = ' ';
    for prefix in ['k', 'm', 'g', 't'] {
        if m < 1000.0 {
            break;
        }
        m /= divisor;
        suffix = prefix;
    }
    (m, suffix)
}

/// Unit of the time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    /// Minutes.
    Minutes,
    /// Hours.
    Hours,
    /// Days.
    Days,
    /// Weeks.
    Weeks,
    /// Months of 30 days.
    Months,
    /// Years of 365 days.
    Years,
}

/// A labelled position along an axis, in canvas pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tick {
    /// Pixel coordinate along the axis.
    pub at: u32,
    /// Label text.
    pub label: String,
}

/// Scale and labels of one value axis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueAxis {
    /// Shared peak of the axis' series, in stored units.
    pub max: f64,
    /// Peak after [`scale_unit`].
    pub scaled_max: f64,
    /// Prefix letter from [`scale_unit`].
    pub suffix: char,
    /// Caption.
    pub unit_label: String,
    /// Ticks from top to bottom.
    pub ticks: Vec<Tick>,
}

/// Scale and labels of the time axis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeAxis {
    /// Unit the ticks count.
    pub unit: TimeUnit,
    /// Pixels between ticks.
    pub pitch: f64,
    /// Ticks from the right edge leftwards, the first marking the end time.
    pub ticks: Vec<Tick>,
}

/// One resampled, normalized series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesFrame {
    /// Unit read.
    pub unit: u16,
    /// Legend text.
    pub label: String,
    /// Line color.
    pub color: Color,
    /// Fill below the curve.
    pub filled: bool,
    /// Axis scaled against.
    pub axis: Axis,
    /// Level the values were read from.
    pub level_used: u16,
    /// Largest value before normalization.
    pub peak: f64,
    /// One value per plot-area column, divided by the axis maximum.
    pub values: Vec<f64>,
}

/// Renderer input for one chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartFrame {
    /// Chart name.
    pub name: String,
    /// Requested image path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    /// Canvas width.
    pub width: u32,
    /// Canvas height.
    pub height: u32,
    /// First second covered.
    pub beg: u32,
    /// End of the covered range, exclusive.
    pub end: u32,
    /// Plot rectangle.
    pub plot: PlotArea,
    /// Left value axis, if any series uses it.
    pub left: Option<ValueAxis>,
    /// Right value axis, if any series uses it.
    pub right: Option<ValueAxis>,
    /// Time axis.
    pub time: TimeAxis,
    /// Series in configuration order.
    pub series: Vec<SeriesFrame>,
}

/// Builds the frame of `chart` for the span ending at `end`.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if the chart fails validation, and any
/// query error of [`query::get_values`].
pub fn build_frame<S: OrderedStore>(store: &S, chart: &ChartConfig, end: u32) -> Result<ChartFrame> {
    chart.validate()?;
    let plot = PlotArea::for_canvas(chart.width, chart.height).ok_or_else(|| ConfigError::Invalid {
        reason: format!("chart '{}': no plot area", chart.name),
    })?;
    let beg = end.saturating_sub(chart.span_secs);
    debug!(chart = %chart.name, beg, end, buckets = plot.w0, "building chart frame");

    let mut series = Vec::with_capacity(chart.series.len());
    for config in &chart.series {
        let mut values = vec![0.0; plot.w0 as usize];
        let meta = query::get_values(store, config.unit, beg, end, config.kind, &mut values)?;
        let peak = values.iter().copied().fold(0.0, f64::max);
        series.push(SeriesFrame {
            unit: config.unit,
            label: config.label.clone(),
            color: config.color,
            filled: config.filled,
            axis: config.axis,
            level_used: meta.level_used,
            peak,
            values,
        });
    }

    let left = value_axis(chart, &series, Axis::Left, plot);
    let right = value_axis(chart, &series, Axis::Right, plot);

    for s in &mut series {
        let max = match s.axis {
            Axis::Left => left.as_ref(),
            Axis::Right => right.as_ref(),
        }
        .map_or(0.0, |a| a.max);
        if max != 0.0 {
            for v in &mut s.values {
                *v /= max;
            }
        }
    }

    Ok(ChartFrame {
        name: chart.name.clone(),
        output: chart.output.clone(),
        width: chart.width,
        height: chart.height,
        beg,
        end,
        plot,
        left,
        right,
        time: time_axis(plot, end - beg),
        series,
    })
}

/// Shared scale of the series on `axis`. Labels follow the first of them.
fn value_axis(chart: &ChartConfig, series: &[SeriesFrame], axis: Axis, plot: PlotArea) -> Option<ValueAxis> {
    let first = chart.series.iter().find(|s| s.axis == axis)?;
    let max = series
        .iter()
        .filter(|s| s.axis == axis)
        .map(|s| s.peak)
        .fold(0.0, f64::max);
    let (scaled_max, suffix) = scale_unit(max, first.bytes);

    let steps = (plot.h0 / FONT_H).clamp(1, MAX_VALUE_TICKS);
    let ticks = (0..=steps)
        .map(|i| Tick {
            at: plot.y0 + i * plot.h0 / steps,
            label: format!(
                "{:5.1} {suffix}",
                scaled_max * f64::from(steps - i) / f64::from(steps)
            ),
        })
        .collect();

    Some(ValueAxis {
        max,
        scaled_max,
        suffix,
        unit_label: first.unit_label.clone(),
        ticks,
    })
}

/// Picks the coarsest readable time unit and places its ticks.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // Offsets lie within 0..=w0
pub fn time_axis(plot: PlotArea, span: u32) -> TimeAxis {
    const STEPS: [(f64, TimeUnit); 5] = [
        (60.0, TimeUnit::Hours),
        (24.0, TimeUnit::Days),
        (7.0, TimeUnit::Weeks),
        (30.0 / 7.0, TimeUnit::Months),
        (365.0 / 30.0, TimeUnit::Years),
    ];
    let min_pitch = f64::from(4 * FONT_W);
    let width = f64::from(plot.w0);

    let mut unit = TimeUnit::Minutes;
    let mut pitch = 60.0 * width / f64::from(span.max(1));
    for (factor, next) in STEPS {
        if pitch >= min_pitch {
            break;
        }
        pitch *= factor;
        unit = next;
    }

    let mut ticks = Vec::new();
    let mut i = 0u32;
    while f64::from(i) * pitch <= width && i <= plot.w0 {
        let offset = (f64::from(i) * pitch) as u32;
        ticks.push(Tick {
            at: plot.x0 + plot.w0 - offset,
            label: if i == 0 { "now".to_string() } else { format!("-{i}") },
        });
        i += 1;
    }

    TimeAxis { unit, pitch, ticks }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::put_value;
    use crate::kv::MemStore;

    fn chart(series: Vec<SeriesConfig>) -> ChartConfig {
        ChartConfig {
            name: "test".to_string(),
            output: None,
            width: 133 + 10,
            height: 65 + 100,
            span_secs: 100,
            series,
        }
    }

    fn series(unit: u16, axis: Axis) -> SeriesConfig {
        SeriesConfig {
            unit,
            label: format!("unit {unit}"),
            unit_label: "bit/s".to_string(),
            color: Color(0x00ff00),
            filled: false,
            bytes: false,
            kind: ValueKind::Max,
            axis,
        }
    }

    #[test]
    fn test_plot_area_layout() {
        let plot = PlotArea::for_canvas(800, 200).unwrap();
        assert_eq!(plot, PlotArea { x0: 67, y0: 13, w0: 800 - 133, h0: 200 - 65 });
        assert!(PlotArea::for_canvas(133, 200).is_none());
        assert!(PlotArea::for_canvas(800, 65).is_none());
    }

    #[test]
    fn test_scale_unit() {
        assert_eq!(scale_unit(999.0, false), (999.0, ' '));
        assert_eq!(scale_unit(1500.0, false), (1.5, 'k'));
        assert_eq!(scale_unit(2.5e9, false), (2.5, 'g'));
        // 128 bytes is 1024 bits.
        assert_eq!(scale_unit(128.0, true), (1.0, 'k'));
        // Threshold stays 1000 even with binary steps.
        let (m, k) = scale_unit(125.0, true);
        assert_eq!((m, k), (1000.0 / 1024.0, 'k'));
        assert_eq!(scale_unit(1e18, false).1, 't');
    }

    #[test]
    fn test_time_axis_escalates_units() {
        let plot = PlotArea::for_canvas(133 + 600, 200).unwrap();
        // One hour over 600px: 10px per minute is too tight, 600px per hour fits.
        let axis = time_axis(plot, 3600);
        assert_eq!(axis.unit, TimeUnit::Hours);
        assert_eq!(axis.ticks.len(), 2);
        assert_eq!(axis.ticks[0], Tick { at: plot.x0 + 600, label: "now".to_string() });
        assert_eq!(axis.ticks[1], Tick { at: plot.x0, label: "-1".to_string() });

        // A year over 600px: days are under 2px, weeks about 11.5px, months about 49px.
        assert_eq!(time_axis(plot, 365 * 86_400).unit, TimeUnit::Months);

        // Ten minutes over 600px: 60px per minute.
        let axis = time_axis(plot, 600);
        assert_eq!(axis.unit, TimeUnit::Minutes);
        assert_eq!(axis.ticks.len(), 11);
    }

    #[test]
    fn test_color_serde() {
        let color: Color = serde_json::from_str("\"#1a2B3c\"").unwrap();
        assert_eq!(color, Color(0x1a2b3c));
        assert_eq!(serde_json::to_string(&color).unwrap(), "\"#1a2b3c\"");
        assert!(serde_json::from_str::<Color>("\"red\"").is_err());
    }

    #[test]
    fn test_frame_normalizes_per_axis() {
        let mut store = MemStore::new();
        for ts in 0..100u32 {
            put_value(&mut store, 0, 1000 + ts, 1, 2.0, false).unwrap();
            put_value(&mut store, 0, 1000 + ts, 2, 4.0, false).unwrap();
            put_value(&mut store, 0, 1000 + ts, 3, 50.0, false).unwrap();
        }
        let chart = chart(vec![
            series(1, Axis::Left),
            series(2, Axis::Left),
            series(3, Axis::Right),
        ]);
        let frame = build_frame(&store, &chart, 1100).unwrap();

        assert_eq!(frame.beg, 1000);
        assert_eq!(frame.plot.w0, 10);
        assert_eq!(frame.left.as_ref().unwrap().max, 4.0);
        assert_eq!(frame.right.as_ref().unwrap().max, 50.0);
        assert_eq!(frame.series[0].peak, 2.0);
        assert!(frame.series[0].values.iter().all(|v| *v == 0.5));
        assert!(frame.series[1].values.iter().all(|v| *v == 1.0));
        assert!(frame.series[2].values.iter().all(|v| *v == 1.0));

        let left = frame.left.unwrap();
        assert_eq!(left.ticks.len(), 8);
        assert_eq!(left.ticks[0].label, "  4.0  ");
        assert_eq!(left.ticks[7].label, "  0.0  ");
        assert_eq!(left.ticks[7].at, frame.plot.y0 + frame.plot.h0);
    }

    #[test]
    fn test_frame_without_right_series() {
        let store = MemStore::new();
        let frame = build_frame(&store, &chart(vec![series(1, Axis::Left)]), 500).unwrap();
        assert!(frame.right.is_none());
        assert_eq!(frame.left.unwrap().max, 0.0);
        assert!(frame.series[0].values.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_frame_serializes() {
        let store = MemStore::new();
        let frame = build_frame(&store, &chart(vec![series(1, Axis::Right)]), 500).unwrap();
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["series"][0]["color"], "#00ff00");
        assert_eq!(json["series"][0]["axis"], "right");
        assert_eq!(json["time"]["unit"], "hours");
        assert!(json["left"].is_null());
    }
}
