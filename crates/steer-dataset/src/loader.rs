//! Image loading from disk.

use std::path::{Path, PathBuf};

use image::DynamicImage;
use steer_core::{Error, Result};
use walkdir::WalkDir;

use crate::frame::RawFrame;

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Image loader rooted at the dataset directory
#[derive(Debug, Clone)]
pub struct ImageLoader {
    root_dir: PathBuf,
}

impl ImageLoader {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Gets the full path for an image
    pub fn full_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root_dir.join(path)
        }
    }

    /// Loads an image from a path
    pub fn load_image(&self, path: &Path) -> Result<DynamicImage> {
        let full_path = self.full_path(path);
        if !full_path.exists() {
            return Err(Error::NotFound(format!(
                "Image file not found: {}",
                full_path.display()
            )));
        }

        image::open(&full_path)
            .map_err(|e| Error::Image(format!("Failed to load image {}: {}", full_path.display(), e)))
    }

    /// Decode a file into a raw frame.
    pub fn load_frame(&self, path: &Path) -> Result<RawFrame> {
        self.load_image(path).map(|img| RawFrame::from_image(&img))
    }

    /// Image files directly inside `dir`, sorted by file name.
    pub fn scan_directory(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let full_dir = self.full_path(dir);
        if !full_dir.is_dir() {
            return Err(Error::NotFound(format!(
                "Directory not found: {}",
                full_dir.display()
            )));
        }

        let mut images = Vec::new();
        for entry in WalkDir::new(&full_dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| Error::Dataset(e.to_string()))?;
            if entry.file_type().is_file() && is_image(entry.path()) {
                images.push(entry.into_path());
            }
        }
        images.sort();

        Ok(images)
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}
