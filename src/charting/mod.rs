//! Candlestick chart rasteriser
//!
//! Renders the most recent candles into a small grayscale image that the
//! vision classifier consumes. Each candle owns an equal-width column slot:
//! - the wick is a one-pixel vertical line at the slot centre
//! - the body is a filled rectangle, brighter for bullish candles
//!
//! The price axis spans the lowest low to the highest high of the rendered window.

use crate::models::Candle;
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::Path;

pub const DEFAULT_CHART_WIDTH: usize = 64;
pub const DEFAULT_CHART_HEIGHT: usize = 64;
/// Number of newest candles fed to the vision model
pub const DEFAULT_LAST_N: usize = 40;

const WICK_INTENSITY: f64 = 0.5;
const BULL_BODY_INTENSITY: f64 = 1.0;
const BEAR_BODY_INTENSITY: f64 = 0.75;

/// Row-major grayscale raster, values in [0, 1], row 0 at the top
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartImage {
    width: usize,
    height: usize,
    pixels: Vec<f64>,
}

impl ChartImage {
    pub fn blank(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![0.0; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[f64] {
        &self.pixels
    }

    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.pixels[y * self.width + x]
    }

    /// Write `{width, height, pixels}` as JSON, creating parent directories
    pub fn save_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_vec(self)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Brighten a pixel; overlapping strokes keep the brightest value
    fn paint(&mut self, x: usize, y: usize, value: f64) {
        let idx = y * self.width + x;
        if value > self.pixels[idx] {
            self.pixels[idx] = value;
        }
    }

    fn fill_column(&mut self, x: usize, y_top: usize, y_bottom: usize, value: f64) {
        for y in y_top..=y_bottom {
            self.paint(x, y, value);
        }
    }
}

/// Maps prices onto pixel rows
struct PriceScale {
    low: f64,
    high: f64,
    rows: usize,
}

impl PriceScale {
    fn row(&self, price: f64) -> usize {
        let span = self.high - self.low;
        if span <= 0.0 {
            // Flat window: everything on one mid-height line
            return self.rows / 2;
        }
        let normalized = ((self.high - price) / span).clamp(0.0, 1.0);
        (normalized * (self.rows - 1) as f64).round() as usize
    }
}

/// Render up to `last_n` of the newest candles at the default size
pub fn render_candles(candles: &[Candle], last_n: usize) -> Result<ChartImage> {
    render_candles_sized(candles, last_n, DEFAULT_CHART_WIDTH, DEFAULT_CHART_HEIGHT)
}

/// Render up to `last_n` of the newest candles into a `width x height` image
pub fn render_candles_sized(
    candles: &[Candle],
    last_n: usize,
    width: usize,
    height: usize,
) -> Result<ChartImage> {
    if candles.is_empty() {
        bail!("Cannot render empty candle list");
    }
    if width == 0 || height == 0 || last_n == 0 {
        bail!("Invalid chart geometry: {}x{} for {} candles", width, height, last_n);
    }

    let start = candles.len().saturating_sub(last_n);
    let recent = &candles[start..];

    if let Some(bad) = recent
        .iter()
        .find(|c| ![c.open, c.high, c.low, c.close].iter().all(|v| v.is_finite()))
    {
        bail!("Non-finite price in candle opened at {}", bad.open_time);
    }

    let scale = PriceScale {
        low: recent.iter().map(|c| c.low).fold(f64::INFINITY, f64::min),
        high: recent.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max),
        rows: height,
    };

    let mut image = ChartImage::blank(width, height);
    let n = recent.len();

    for (i, candle) in recent.iter().enumerate() {
        let x0 = i * width / n;
        let x1 = ((i + 1) * width / n).saturating_sub(1).max(x0).min(width - 1);
        let centre = (x0 + x1) / 2;

        // Rows grow downwards, so the high maps to the smaller row
        let wick_top = scale.row(candle.high);
        let wick_bottom = scale.row(candle.low).max(wick_top);
        image.fill_column(centre, wick_top, wick_bottom, WICK_INTENSITY);

        let body_top = scale.row(candle.body_top());
        let body_bottom = scale.row(candle.body_bottom()).max(body_top);
        let intensity = if candle.is_bullish() {
            BULL_BODY_INTENSITY
        } else {
            BEAR_BODY_INTENSITY
        };

        // Leave a one-pixel gap between neighbouring bodies when there is room
        let (body_x0, body_x1) = if x1 - x0 >= 2 { (x0 + 1, x1 - 1) } else { (x0, x1) };
        for x in body_x0..=body_x1 {
            image.fill_column(x, body_top, body_bottom, intensity);
        }
    }

    Ok(image)
}
