use anyhow::{bail, Result};
use image::{DynamicImage, GrayImage, ImageFormat};

/// A captured view of the tracked region, reduced to single-channel intensity.
/// Comparable only against snapshots of the same region.
#[derive(Debug, Clone)]
pub struct Snapshot {
    gray: GrayImage,
}

impl Snapshot {
    pub fn from_png(bytes: &[u8]) -> Result<Self> {
        let img = image::load_from_memory_with_format(bytes, ImageFormat::Png)?;
        Ok(Self::from_dynamic(&img))
    }

    pub fn from_dynamic(img: &DynamicImage) -> Self {
        Self {
            gray: img.to_luma8(),
        }
    }

    pub fn from_luma(gray: GrayImage) -> Self {
        Self { gray }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.gray.dimensions()
    }
}

/// Percentage of pixels whose absolute intensity difference is non-zero,
/// in [0, 100]. The region is fixed for a run, so mismatched dimensions mean
/// something upstream went badly wrong and are a hard error.
pub fn diff_percent(a: &Snapshot, b: &Snapshot) -> Result<f64> {
    if a.dimensions() != b.dimensions() {
        bail!(
            "snapshot dimensions diverged: {:?} vs {:?}",
            a.dimensions(),
            b.dimensions()
        );
    }

    let total = a.gray.as_raw().len();
    if total == 0 {
        return Ok(0.0);
    }
    let differing = a
        .gray
        .as_raw()
        .iter()
        .zip(b.gray.as_raw().iter())
        .filter(|(x, y)| x != y)
        .count();

    Ok(differing as f64 / total as f64 * 100.0)
}
