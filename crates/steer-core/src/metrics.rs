//! Loss/accuracy aggregates and the per-epoch training history.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Aggregate of one pass over a dataset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct PassMetrics {
    /// Sample-weighted mean loss
    pub loss: f64,
    /// Fraction of correctly classified samples
    pub accuracy: f64,
    pub num_samples: usize,
}

/// Running sums for a pass; batch losses are weighted by batch size.
#[derive(Debug, Clone, Default)]
pub struct PassAccumulator {
    loss_sum: f64,
    correct: usize,
    seen: usize,
}

impl PassAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a batch whose mean loss is `batch_loss`.
    pub fn add_batch(&mut self, batch_loss: f64, correct: usize, batch_size: usize) {
        self.loss_sum += batch_loss * batch_size as f64;
        self.correct += correct;
        self.seen += batch_size;
    }

    pub fn finish(&self) -> PassMetrics {
        if self.seen == 0 {
            return PassMetrics::default();
        }
        PassMetrics {
            loss: self.loss_sum / self.seen as f64,
            accuracy: self.correct as f64 / self.seen as f64,
            num_samples: self.seen,
        }
    }
}

/// Confusion matrix (actual x predicted)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfusionMatrix {
    counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            counts: vec![vec![0; num_classes]; num_classes],
        }
    }

    pub fn num_classes(&self) -> usize {
        self.counts.len()
    }

    /// Record one prediction; out-of-range labels are ignored.
    pub fn record(&mut self, actual: usize, predicted: usize) {
        let n = self.counts.len();
        if actual < n && predicted < n {
            self.counts[actual][predicted] += 1;
        }
    }

    pub fn counts(&self) -> &[Vec<usize>] {
        &self.counts
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let correct: usize = (0..self.counts.len()).map(|i| self.counts[i][i]).sum();
        correct as f64 / total as f64
    }

    /// Recall of one class, `None` when the class never occurs.
    pub fn recall(&self, class: usize) -> Option<f64> {
        let row = self.counts.get(class)?;
        let support: usize = row.iter().sum();
        (support > 0).then(|| row[class] as f64 / support as f64)
    }

    /// Precision of one class, `None` when the class is never predicted.
    pub fn precision(&self, class: usize) -> Option<f64> {
        if class >= self.counts.len() {
            return None;
        }
        let predicted: usize = self.counts.iter().map(|row| row[class]).sum();
        (predicted > 0).then(|| self.counts[class][class] as f64 / predicted as f64)
    }
}

/// One line of the training history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub learning_rate: f64,
}

/// Training metrics tracked during training
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochRecord>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: EpochRecord) {
        self.epochs.push(record);
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    /// Epoch with the lowest validation loss (first one on ties).
    pub fn best_epoch(&self) -> Option<&EpochRecord> {
        self.epochs.iter().fold(None, |best: Option<&EpochRecord>, r| match best {
            Some(b) if b.val_loss <= r.val_loss => Some(b),
            _ => Some(r),
        })
    }

    /// Write the history as pretty JSON for external plotting.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(epoch: usize, val_loss: f64) -> EpochRecord {
        EpochRecord {
            epoch,
            train_loss: 1.0,
            train_accuracy: 0.5,
            val_loss,
            val_accuracy: 0.5,
            learning_rate: 1e-3,
        }
    }

    #[test]
    fn test_accumulator_weights_by_batch_size() {
        let mut acc = PassAccumulator::new();
        acc.add_batch(1.0, 4, 4);
        acc.add_batch(4.0, 0, 1);
        let metrics = acc.finish();
        assert!((metrics.loss - 1.6).abs() < 1e-12);
        assert!((metrics.accuracy - 0.8).abs() < 1e-12);
        assert_eq!(metrics.num_samples, 5);
    }

    #[test]
    fn test_empty_accumulator() {
        assert_eq!(PassAccumulator::new().finish(), PassMetrics::default());
    }

    #[test]
    fn test_confusion_matrix() {
        let mut cm = ConfusionMatrix::new(3);
        cm.record(0, 0);
        cm.record(0, 1);
        cm.record(1, 1);
        cm.record(2, 1);
        cm.record(5, 0);

        assert_eq!(cm.total(), 4);
        assert!((cm.accuracy() - 0.5).abs() < 1e-12);
        assert_eq!(cm.recall(0), Some(0.5));
        assert_eq!(cm.precision(1), Some(1.0 / 3.0));
        assert_eq!(cm.precision(2), None);
    }

    #[test]
    fn test_history_best_epoch_and_roundtrip() {
        let mut history = TrainingHistory::new();
        history.push(record(1, 1.0));
        history.push(record(2, 0.7));
        history.push(record(3, 0.7));
        assert_eq!(history.best_epoch().map(|r| r.epoch), Some(2));

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        history.save_json(&path).unwrap();
        let loaded = TrainingHistory::load_json(&path).unwrap();
        assert_eq!(loaded.epochs, history.epochs);
    }
}
