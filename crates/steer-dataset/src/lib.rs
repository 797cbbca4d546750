//! Steering dataset: frame preprocessing, sample store, augmentation and
//! batching.
//!
//! Raw frames become immutable [`steer_core::Sample`]s once, up front. The
//! training partition is augmented again on every fetch; the validation
//! partition is only normalized.

pub mod adapter;
pub mod augmentation;
pub mod frame;
pub mod loader;
pub mod preprocess;
pub mod split;
pub mod store;

pub use adapter::{DatasetAdapter, SteeringBatch, SteeringBatcher, SteeringItem};
pub use augmentation::{AugmentationPipeline, Normalizer, Transform};
pub use frame::RawFrame;
pub use loader::ImageLoader;
pub use preprocess::Preprocessor;
pub use split::{resolve_split, DatasetSplit};
pub use store::SampleStore;

pub mod prelude {
    pub use crate::adapter::*;
    pub use crate::augmentation::*;
    pub use crate::frame::*;
    pub use crate::loader::*;
    pub use crate::preprocess::*;
    pub use crate::split::*;
    pub use crate::store::*;
}
