use crate::charting::ChartImage;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Image classifier producing the hammer-class probability of a chart
pub trait HammerClassifier: Send + Sync {
    fn hammer_probability(&self, chart: &ChartImage) -> Result<f64>;

    /// (width, height) of the images this classifier expects
    fn input_size(&self) -> (usize, usize);
}

/// Logistic model over rendered pixels
///
/// Weights artifact is JSON: `{"width": 64, "height": 64, "weights": [...], "bias": -1.2}`
/// with `weights` in row-major pixel order.
#[derive(Debug, Clone, Deserialize)]
pub struct LinearClassifier {
    width: usize,
    height: usize,
    weights: Vec<f64>,
    bias: f64,
}

impl LinearClassifier {
    pub fn new(width: usize, height: usize, weights: Vec<f64>, bias: f64) -> Result<Self> {
        let classifier = Self {
            width,
            height,
            weights,
            bias,
        };
        classifier.validate()?;
        Ok(classifier)
    }

    /// Load and validate a weights artifact
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model weights {}", path.display()))?;
        let classifier: LinearClassifier = serde_json::from_str(&raw)
            .with_context(|| format!("Malformed model weights {}", path.display()))?;
        classifier.validate()?;

        tracing::info!(
            "Loaded hammer classifier from {} ({}x{})",
            path.display(),
            classifier.width,
            classifier.height
        );
        Ok(classifier)
    }

    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            bail!("Classifier input size must be non-zero");
        }
        if self.weights.len() != self.width * self.height {
            bail!(
                "Expected {} weights for a {}x{} input, found {}",
                self.width * self.height,
                self.width,
                self.height,
                self.weights.len()
            );
        }
        if !self.bias.is_finite() || self.weights.iter().any(|w| !w.is_finite()) {
            bail!("Classifier weights contain non-finite values");
        }
        Ok(())
    }
}

impl HammerClassifier for LinearClassifier {
    fn hammer_probability(&self, chart: &ChartImage) -> Result<f64> {
        if (chart.width(), chart.height()) != (self.width, self.height) {
            bail!(
                "Chart is {}x{}, classifier expects {}x{}",
                chart.width(),
                chart.height(),
                self.width,
                self.height
            );
        }

        let logit = self.bias
            + self
                .weights
                .iter()
                .zip(chart.pixels())
                .map(|(w, p)| w * p)
                .sum::<f64>();

        Ok(sigmoid(logit))
    }

    fn input_size(&self) -> (usize, usize) {
        (self.width, self.height)
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
