use anyhow::{bail, Context, Result};
use std::process::Command;

use super::diff::Snapshot;
use super::window::Region;

/// Observes the tracked region. The region is bound at construction so every
/// snapshot in a run comes from the same rectangle.
pub trait ScreenCapture {
    fn capture(&mut self) -> Result<Snapshot>;
}

/// Grabs the region with ImageMagick `import` and decodes the PNG it writes
/// to stdout. Capture is quick relative to the poll interval, so the blocking
/// wait is fine in this strictly sequential tool.
pub struct ImportCapture {
    region: Region,
}

impl ImportCapture {
    pub fn new(region: Region) -> Self {
        Self { region }
    }
}

impl ScreenCapture for ImportCapture {
    fn capture(&mut self) -> Result<Snapshot> {
        let crop = format!(
            "{}x{}+{}+{}",
            self.region.width, self.region.height, self.region.x, self.region.y
        );
        let output = Command::new("import")
            .args(["-silent", "-window", "root", "-crop", &crop, "png:-"])
            .output()
            .context("failed to run import for screen capture")?;
        if !output.status.success() {
            bail!("screen capture failed for region {crop}");
        }
        Snapshot::from_png(&output.stdout).context("failed to decode captured PNG")
    }
}
