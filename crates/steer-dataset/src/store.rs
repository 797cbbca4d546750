//! Labelled sample collection built from the class directories.

use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use steer_core::{DataSplit, Direction, Error, FrameStrictness, Result, Sample};
use tracing::{info, warn};

use crate::loader::ImageLoader;
use crate::preprocess::Preprocessor;
use crate::split::DatasetSplit;

/// All preprocessed samples of a run, in a stable order.
#[derive(Debug, Clone)]
pub struct SampleStore {
    samples: Vec<Sample>,
    sources: Vec<PathBuf>,
    skipped: usize,
}

impl SampleStore {
    /// Wrap samples that were built elsewhere, e.g. straight from a camera.
    pub fn from_samples(samples: Vec<Sample>) -> Self {
        Self {
            samples,
            sources: Vec::new(),
            skipped: 0,
        }
    }

    /// Load and preprocess every image below `root/{go,left,right}`.
    ///
    /// Files are visited in class order, then by name, so the same tree
    /// always yields the same sample order. Frames that fail to decode or
    /// preprocess are skipped with a warning or abort the load depending on
    /// `strictness`. A missing class directory, or one that ends up with no
    /// samples, is an [`Error::EmptyClass`].
    pub fn from_directory(
        root: &Path,
        preprocessor: &Preprocessor,
        strictness: FrameStrictness,
        num_workers: usize,
    ) -> Result<Self> {
        let loader = ImageLoader::new(root);

        let mut files = Vec::new();
        for class in Direction::ALL {
            let dir = root.join(class.dir_name());
            if !dir.is_dir() {
                return Err(Error::EmptyClass { class, dir });
            }
            files.extend(loader.scan_directory(&dir)?.into_iter().map(|p| (p, class)));
        }
        info!("Found {} frames under {}", files.len(), root.display());

        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
                .map_err(|e| Error::Dataset(e.to_string()))?
                .progress_chars("#>-"),
        );

        let load = || -> Vec<Result<Sample>> {
            files
                .par_iter()
                .map(|(path, class)| {
                    let result = loader
                        .load_frame(path)
                        .and_then(|frame| preprocessor.preprocess(&frame, *class));
                    pb.inc(1);
                    result
                })
                .collect()
        };

        let results = if num_workers > 0 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(num_workers)
                .build()
                .map_err(|e| Error::Dataset(format!("Failed to build loader pool: {e}")))?
                .install(load)
        } else {
            load()
        };
        pb.finish_and_clear();

        let mut samples = Vec::with_capacity(results.len());
        let mut sources = Vec::with_capacity(results.len());
        let mut skipped = 0;
        for ((path, _), result) in files.into_iter().zip(results) {
            match result {
                Ok(sample) => {
                    samples.push(sample);
                    sources.push(path);
                }
                Err(e) => match strictness {
                    FrameStrictness::Skip => {
                        warn!("Excluding {}: {e}", path.display());
                        skipped += 1;
                    }
                    FrameStrictness::Abort => return Err(frame_error(&path, e)),
                },
            }
        }

        let store = Self {
            samples,
            sources,
            skipped,
        };
        for (class, count) in Direction::ALL.into_iter().zip(store.class_counts()) {
            if count == 0 {
                return Err(Error::EmptyClass {
                    class,
                    dir: root.join(class.dir_name()),
                });
            }
        }

        let [go, left, right] = store.class_counts();
        info!(go, left, right, skipped, "Sample store ready");
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Source file of each sample; empty for in-memory stores.
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Frames excluded while loading.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Samples per class in label order.
    pub fn class_counts(&self) -> [usize; Direction::COUNT] {
        let mut counts = [0; Direction::COUNT];
        for sample in &self.samples {
            counts[sample.label().label()] += 1;
        }
        counts
    }

    /// Seeded 80/20-style split over this store.
    pub fn split(&self, validation_fraction: f64, seed: u64) -> Result<DatasetSplit> {
        DatasetSplit::new(self.len(), validation_fraction, seed)
    }

    /// Copies of the samples in one partition, in index order.
    pub fn partition(&self, split: &DatasetSplit, which: DataSplit) -> Result<Vec<Sample>> {
        if split.num_samples != self.len() {
            return Err(Error::Dataset(format!(
                "split was drawn for {} samples, store holds {}",
                split.num_samples,
                self.len()
            )));
        }
        split
            .indices(which)
            .iter()
            .map(|&i| {
                self.samples
                    .get(i)
                    .cloned()
                    .ok_or_else(|| Error::Dataset(format!("split index {i} out of range")))
            })
            .collect()
    }
}

/// Attach the file to a load failure; malformed or undecodable frames stay
/// [`Error::InvalidFrame`].
fn frame_error(path: &Path, e: Error) -> Error {
    match e {
        Error::InvalidFrame(msg) | Error::Image(msg) => {
            Error::InvalidFrame(format!("{}: {msg}", path.display()))
        }
        other => Error::Dataset(format!("{}: {other}", path.display())),
    }
}
