use std::path::PathBuf;

use super::classifier::HammerClassifier;
use super::SignalEngine;
use crate::charting::{render_candles_sized, DEFAULT_LAST_N};
use crate::models::{Candle, SignalDecision};

pub const PATTERN_TAG: &str = "bullish_hammer_cv";
pub const DEFAULT_THRESHOLD: f64 = 0.7;
/// File name of the last classified chart inside the dump directory
pub const CHART_DUMP_FILE: &str = "current_chart.json";

/// Model-based hammer detector
///
/// Renders the newest candles into a chart image and asks an image classifier
/// for the hammer probability. Render or inference failures degrade to "no
/// signal"; they are logged and never propagated to the trading loop.
pub struct ModelBasedHammerDetector {
    classifier: Box<dyn HammerClassifier>,
    threshold: f64,
    last_n: usize,
    chart_dump_dir: Option<PathBuf>,
}

impl ModelBasedHammerDetector {
    pub fn new(classifier: Box<dyn HammerClassifier>, threshold: f64) -> Self {
        Self {
            classifier,
            threshold,
            last_n: DEFAULT_LAST_N,
            chart_dump_dir: None,
        }
    }

    /// Override how many of the newest candles are rendered
    pub fn with_last_n(mut self, last_n: usize) -> Self {
        self.last_n = last_n.max(1);
        self
    }

    /// Overwrite `dir/current_chart.json` with every chart sent to the classifier
    pub fn with_chart_dump(mut self, dir: PathBuf) -> Self {
        self.chart_dump_dir = Some(dir);
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn hammer_probability(&self, candles: &[Candle]) -> anyhow::Result<f64> {
        let (width, height) = self.classifier.input_size();
        let chart = render_candles_sized(candles, self.last_n, width, height)?;

        if let Some(dir) = &self.chart_dump_dir {
            let path = dir.join(CHART_DUMP_FILE);
            if let Err(e) = chart.save_json(&path) {
                tracing::warn!("Could not save chart image: {:#}", e);
            }
        }

        let p = self.classifier.hammer_probability(&chart)?;

        if !p.is_finite() {
            anyhow::bail!("Classifier returned non-finite probability {}", p);
        }
        Ok(p.clamp(0.0, 1.0))
    }
}

impl SignalEngine for ModelBasedHammerDetector {
    fn generate_signal(&self, candles: &[Candle]) -> SignalDecision {
        if candles.is_empty() {
            return SignalDecision::none();
        }

        match self.hammer_probability(candles) {
            Ok(p) => {
                let is_buy = p >= self.threshold;
                tracing::info!(
                    "CV signal: hammer_prob={:.3}, threshold={}, is_buy={}",
                    p,
                    self.threshold,
                    is_buy
                );

                SignalDecision {
                    is_buy,
                    pattern: is_buy.then(|| PATTERN_TAG.to_string()),
                    score: p,
                }
            }
            Err(e) => {
                tracing::error!("Error generating CV signal: {:#}", e);
                SignalDecision::none()
            }
        }
    }

    fn name(&self) -> &str {
        "ModelBasedHammerDetector"
    }

    fn min_candles_required(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charting::ChartImage;
    use chrono::{Duration, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Returns a fixed probability and records the chart it saw
    struct FixedClassifier {
        p: f64,
        calls: Arc<AtomicUsize>,
        last_chart: Arc<Mutex<Option<ChartImage>>>,
    }

    impl HammerClassifier for FixedClassifier {
        fn hammer_probability(&self, chart: &ChartImage) -> anyhow::Result<f64> {
            assert_eq!((chart.width(), chart.height()), (16, 16));
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_chart.lock().unwrap() = Some(chart.clone());
            Ok(self.p)
        }

        fn input_size(&self) -> (usize, usize) {
            (16, 16)
        }
    }

    struct FailingClassifier;

    impl HammerClassifier for FailingClassifier {
        fn hammer_probability(&self, _chart: &ChartImage) -> anyhow::Result<f64> {
            anyhow::bail!("inference backend unavailable")
        }

        fn input_size(&self) -> (usize, usize) {
            (16, 16)
        }
    }

    fn recording_detector(
        p: f64,
    ) -> (ModelBasedHammerDetector, Arc<AtomicUsize>, Arc<Mutex<Option<ChartImage>>>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let last_chart = Arc::new(Mutex::new(None));
        let classifier = FixedClassifier {
            p,
            calls: calls.clone(),
            last_chart: last_chart.clone(),
        };
        (
            ModelBasedHammerDetector::new(Box::new(classifier), DEFAULT_THRESHOLD),
            calls,
            last_chart,
        )
    }

    fn detector(p: f64) -> (ModelBasedHammerDetector, Arc<AtomicUsize>) {
        let (engine, calls, _) = recording_detector(p);
        (engine, calls)
    }

    fn create_test_candles(n: usize) -> Vec<Candle> {
        let start = Utc::now() - Duration::minutes(5 * n as i64);
        (0..n)
            .map(|i| {
                let base = 100.0 - i as f64 * 0.5;
                Candle {
                    open_time: start + Duration::minutes(5 * i as i64),
                    open: base,
                    high: base + 1.0,
                    low: base - 2.0,
                    close: base - 0.25,
                    volume: 500.0,
                    close_time: start + Duration::minutes(5 * (i as i64 + 1)),
                }
            })
            .collect()
    }

    #[test]
    fn test_buy_at_or_above_threshold() {
        let (engine, calls) = detector(0.7);
        let decision = engine.generate_signal(&create_test_candles(50));

        assert!(decision.is_buy);
        assert_eq!(decision.pattern.as_deref(), Some(PATTERN_TAG));
        assert_eq!(decision.score, 0.7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_only_newest_candles_are_rendered() {
        let (engine, _, last_chart) = recording_detector(0.1);
        let candles = create_test_candles(50);

        engine.generate_signal(&candles);

        let seen = last_chart.lock().unwrap().clone().expect("classifier was called");
        let expected = render_candles_sized(&candles[10..], DEFAULT_LAST_N, 16, 16).unwrap();
        let all = render_candles_sized(&candles, 50, 16, 16).unwrap();
        assert_eq!(seen, expected);
        assert_ne!(seen, all);
    }

    #[test]
    fn test_chart_dump_writes_classified_chart() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _, last_chart) = recording_detector(0.9);
        let engine = engine.with_chart_dump(dir.path().join("charts"));

        engine.generate_signal(&create_test_candles(20));

        let raw = std::fs::read_to_string(dir.path().join("charts").join(CHART_DUMP_FILE)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let seen = last_chart.lock().unwrap().clone().unwrap();
        assert_eq!(json["width"], 16);
        assert_eq!(json["height"], 16);
        assert_eq!(json["pixels"].as_array().unwrap().len(), seen.pixels().len());
    }

    #[test]
    fn test_unwritable_chart_dump_does_not_block_signal() {
        let file = tempfile::NamedTempFile::new().unwrap();
        // A regular file cannot be used as a directory
        let (engine, _, _) = recording_detector(0.9);
        let engine = engine.with_chart_dump(file.path().to_path_buf());

        let decision = engine.generate_signal(&create_test_candles(20));
        assert!(decision.is_buy);
    }

    #[test]
    fn test_below_threshold_keeps_probability_as_score() {
        let (engine, _) = detector(0.42);
        let decision = engine.generate_signal(&create_test_candles(10));

        assert!(!decision.is_buy);
        assert_eq!(decision.pattern, None);
        assert_eq!(decision.score, 0.42);
    }

    #[test]
    fn test_empty_candles_skip_inference() {
        let (engine, calls) = detector(0.99);
        assert_eq!(engine.generate_signal(&[]), SignalDecision::none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_inference_failure_becomes_no_signal() {
        let engine = ModelBasedHammerDetector::new(Box::new(FailingClassifier), 0.5);
        assert_eq!(
            engine.generate_signal(&create_test_candles(5)),
            SignalDecision::none()
        );
    }

    #[test]
    fn test_render_failure_becomes_no_signal() {
        let (engine, calls) = detector(0.99);
        let mut candles = create_test_candles(3);
        candles[2].low = f64::NAN;

        assert_eq!(engine.generate_signal(&candles), SignalDecision::none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_non_finite_probability_becomes_no_signal() {
        let (engine, _) = detector(f64::NAN);
        assert_eq!(
            engine.generate_signal(&create_test_candles(5)),
            SignalDecision::none()
        );
    }
}
