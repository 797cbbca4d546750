//! Seeded train/validation split and its on-disk form.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use steer_core::{DataSplit, Error, Result};
use tracing::{info, warn};

/// Partition of sample indices into train and validation sets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasetSplit {
    pub seed: u64,
    pub num_samples: usize,
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
    /// Drawn on request with a fresh seed; kept until the next reshuffle
    #[serde(default)]
    pub reshuffled: bool,
}

/// Validation set size: the fraction of `num_samples`, rounded up.
pub fn validation_count(num_samples: usize, validation_fraction: f64) -> usize {
    (num_samples as f64 * validation_fraction).ceil() as usize
}

impl DatasetSplit {
    /// Shuffle `0..num_samples` with `seed` and hold out the first
    /// `ceil(num_samples * validation_fraction)` indices for validation.
    pub fn new(num_samples: usize, validation_fraction: f64, seed: u64) -> Result<Self> {
        let n_val = validation_count(num_samples, validation_fraction);
        if n_val == 0 || n_val >= num_samples {
            return Err(Error::Dataset(format!(
                "cannot split {num_samples} samples with validation fraction {validation_fraction}"
            )));
        }

        let mut indices: Vec<usize> = (0..num_samples).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        indices.shuffle(&mut rng);

        let mut validation = indices[..n_val].to_vec();
        let mut train = indices[n_val..].to_vec();
        validation.sort_unstable();
        train.sort_unstable();

        Ok(Self {
            seed,
            num_samples,
            train,
            validation,
            reshuffled: false,
        })
    }

    pub fn indices(&self, split: DataSplit) -> &[usize] {
        match split {
            DataSplit::Train => &self.train,
            DataSplit::Validation => &self.validation,
        }
    }

    /// Every index in `0..num_samples` appears in exactly one partition.
    pub fn check(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.num_samples);
        for &i in self.train.iter().chain(&self.validation) {
            if i >= self.num_samples || !seen.insert(i) {
                return Err(Error::Dataset(format!(
                    "split index {i} is out of range or assigned twice"
                )));
            }
        }
        if seen.len() != self.num_samples {
            return Err(Error::Dataset(format!(
                "split covers {} of {} samples",
                seen.len(),
                self.num_samples
            )));
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let split: DatasetSplit = serde_json::from_str(&fs::read_to_string(path)?)?;
        split.check()?;
        Ok(split)
    }
}

/// Reuse the split persisted at `path` when it matches this dataset, or
/// draw and persist a new one. With `reshuffle` a fresh seed is drawn and
/// the split is marked so later runs keep it regardless of `seed`.
pub fn resolve_split(
    path: &Path,
    num_samples: usize,
    validation_fraction: f64,
    seed: u64,
    reshuffle: bool,
) -> Result<DatasetSplit> {
    if !reshuffle && path.exists() {
        let existing = DatasetSplit::load(path)?;
        let matches = (existing.seed == seed || existing.reshuffled)
            && existing.num_samples == num_samples
            && existing.validation.len() == validation_count(num_samples, validation_fraction);
        if matches {
            info!("Reusing persisted split from {}", path.display());
            return Ok(existing);
        }
        warn!(
            persisted_seed = existing.seed,
            persisted_samples = existing.num_samples,
            "Persisted split does not match the dataset, drawing a new one"
        );
    }

    let split = if reshuffle {
        let fresh = rand::random::<u64>();
        info!(seed = fresh, "Reshuffling split with a fresh seed");
        DatasetSplit {
            reshuffled: true,
            ..DatasetSplit::new(num_samples, validation_fraction, fresh)?
        }
    } else {
        DatasetSplit::new(num_samples, validation_fraction, seed)?
    };
    split.save(path)?;
    info!(
        train = split.train.len(),
        validation = split.validation.len(),
        "Split written to {}",
        path.display()
    );
    Ok(split)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_eight_samples_hold_out_two() {
        let first = DatasetSplit::new(8, 0.2, 42).unwrap();
        let second = DatasetSplit::new(8, 0.2, 42).unwrap();

        assert_eq!(first.validation.len(), 2);
        assert_eq!(first.train.len(), 6);
        assert_eq!(first.validation, second.validation);
        assert_eq!(first, second);
        first.check().unwrap();
    }

    #[test]
    fn test_partitions_are_disjoint_and_cover() {
        let split = DatasetSplit::new(101, 0.2, 7).unwrap();
        assert_eq!(split.validation.len(), 21);
        split.check().unwrap();
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = DatasetSplit::new(200, 0.2, 1).unwrap();
        let b = DatasetSplit::new(200, 0.2, 2).unwrap();
        assert_ne!(a.validation, b.validation);
    }

    #[test]
    fn test_too_few_samples() {
        assert!(DatasetSplit::new(1, 0.2, 0).is_err());
        assert!(DatasetSplit::new(0, 0.2, 0).is_err());
    }

    #[test]
    fn test_check_rejects_overlap() {
        let split = DatasetSplit {
            seed: 0,
            num_samples: 3,
            train: vec![0, 1],
            validation: vec![1],
            reshuffled: false,
        };
        assert!(split.check().is_err());
    }

    #[test]
    fn test_resolve_reuses_persisted_split() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("split.json");

        let created = resolve_split(&path, 20, 0.2, 42, false).unwrap();
        assert!(path.exists());

        // A tampered file with the same seed is reused verbatim.
        let mut edited = created.clone();
        edited.train.swap(0, 1);
        edited.save(&path).unwrap();
        let reused = resolve_split(&path, 20, 0.2, 42, false).unwrap();
        assert_eq!(reused, edited);

        // A different sample count invalidates it.
        let redrawn = resolve_split(&path, 25, 0.2, 42, false).unwrap();
        assert_eq!(redrawn.num_samples, 25);
        assert_eq!(DatasetSplit::load(&path).unwrap(), redrawn);
    }

    #[test]
    fn test_reshuffled_split_survives_next_run() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("split.json");

        let first = resolve_split(&path, 50, 0.2, 42, false).unwrap();
        assert!(!first.reshuffled);

        let reshuffled = resolve_split(&path, 50, 0.2, 42, true).unwrap();
        assert!(reshuffled.reshuffled);
        assert_ne!(reshuffled.validation, first.validation);

        let next_run = resolve_split(&path, 50, 0.2, 42, false).unwrap();
        assert_eq!(next_run, reshuffled);
        assert_eq!(DatasetSplit::load(&path).unwrap(), reshuffled);
    }

    #[test]
    fn test_reshuffled_split_redrawn_when_dataset_grows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("split.json");

        resolve_split(&path, 50, 0.2, 42, true).unwrap();
        let redrawn = resolve_split(&path, 60, 0.2, 42, false).unwrap();
        assert_eq!(redrawn, DatasetSplit::new(60, 0.2, 42).unwrap());
    }
}
