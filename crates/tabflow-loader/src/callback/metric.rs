//! Evaluation metrics.

/// A metric accumulated over the batches of an epoch.
pub trait Metric: Send {
    /// Name used in epoch logs, e.g. `binary_accuracy`.
    fn name(&self) -> &str;

    /// Clears accumulated state.
    fn reset(&mut self);

    /// Accumulates one batch of predictions against labels.
    fn update(&mut self, predictions: &[f32], labels: &[f32]);

    /// Returns the metric over everything accumulated since the last reset,
    /// or NaN when nothing was accumulated.
    fn result(&self) -> f64;
}

/// Fraction of predictions on the same side of a threshold as their label.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinaryAccuracy {
    threshold: f32,
    correct: u64,
    total: u64,
}

impl BinaryAccuracy {
    /// Creates the metric with a threshold of 0.5.
    pub fn new() -> Self {
        Self::with_threshold(0.5)
    }

    /// Creates the metric with a custom threshold.
    pub fn with_threshold(threshold: f32) -> Self {
        Self {
            threshold,
            correct: 0,
            total: 0,
        }
    }
}

impl Default for BinaryAccuracy {
    fn default() -> Self {
        Self::new()
    }
}

impl Metric for BinaryAccuracy {
    fn name(&self) -> &str {
        "binary_accuracy"
    }

    fn reset(&mut self) {
        self.correct = 0;
        self.total = 0;
    }

    fn update(&mut self, predictions: &[f32], labels: &[f32]) {
        for (p, y) in predictions.iter().zip(labels) {
            let predicted = *p > self.threshold;
            let actual = *y > 0.5;
            self.correct += u64::from(predicted == actual);
            self.total += 1;
        }
    }

    fn result(&self) -> f64 {
        if self.total == 0 {
            return f64::NAN;
        }
        self.correct as f64 / self.total as f64
    }
}

/// Mean log loss of probabilities against binary labels.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BinaryCrossEntropy {
    sum: f64,
    count: u64,
}

impl BinaryCrossEntropy {
    const EPSILON: f64 = 1e-7;

    /// Creates the metric.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Metric for BinaryCrossEntropy {
    fn name(&self) -> &str {
        "binary_crossentropy"
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn update(&mut self, predictions: &[f32], labels: &[f32]) {
        for (p, y) in predictions.iter().zip(labels) {
            let p = f64::from(*p).clamp(Self::EPSILON, 1.0 - Self::EPSILON);
            let y = f64::from(*y);
            self.sum -= y * p.ln() + (1.0 - y) * (1.0 - p).ln();
            self.count += 1;
        }
    }

    fn result(&self) -> f64 {
        if self.count == 0 {
            return f64::NAN;
        }
        self.sum / self.count as f64
    }
}

/// Mean squared difference between predictions and labels.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeanSquaredError {
    sum: f64,
    count: u64,
}

impl MeanSquaredError {
    /// Creates the metric.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Metric for MeanSquaredError {
    fn name(&self) -> &str {
        "mean_squared_error"
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn update(&mut self, predictions: &[f32], labels: &[f32]) {
        for (p, y) in predictions.iter().zip(labels) {
            self.sum += (f64::from(*p) - f64::from(*y)).powi(2);
            self.count += 1;
        }
    }

    fn result(&self) -> f64 {
        if self.count == 0 {
            return f64::NAN;
        }
        self.sum / self.count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_accuracy() {
        let mut metric = BinaryAccuracy::new();
        assert!(metric.result().is_nan());
        metric.update(&[0.9, 0.2, 0.7], &[1.0, 0.0, 0.0]);
        metric.update(&[0.1], &[1.0]);
        assert_eq!(metric.result(), 0.5);
        metric.reset();
        assert!(metric.result().is_nan());
    }

    #[test]
    fn test_binary_cross_entropy() {
        let mut metric = BinaryCrossEntropy::new();
        metric.update(&[0.5, 0.5], &[1.0, 0.0]);
        assert!((metric.result() - std::f64::consts::LN_2).abs() < 1e-6);

        metric.reset();
        metric.update(&[1.0], &[0.0]);
        assert!(metric.result().is_finite());
    }

    #[test]
    fn test_mean_squared_error() {
        let mut metric = MeanSquaredError::new();
        metric.update(&[1.0, 3.0], &[0.0, 1.0]);
        assert_eq!(metric.result(), 2.5);
    }
}
