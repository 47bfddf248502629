//! Window lookup: resolve a window title to an absolute screen rectangle by
//! shelling out to `xdotool` and `xwininfo`.

use anyhow::{anyhow, bail, Context, Result};
use log::info;
use tokio::process::Command;

/// Absolute screen rectangle of the tracked window, fixed for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

pub async fn locate_window(window_name: &str) -> Result<Region> {
    info!("looking for window: {window_name}");

    let search = Command::new("xdotool")
        .args(["search", "--name", window_name])
        .output()
        .await
        .context("failed to run xdotool")?;
    if !search.status.success() {
        bail!("window '{window_name}' not found");
    }
    let stdout = String::from_utf8_lossy(&search.stdout);
    let window_id = stdout
        .lines()
        .next()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| anyhow!("window '{window_name}' not found"))?
        .to_string();

    let info = Command::new("xwininfo")
        .args(["-id", &window_id])
        .output()
        .await
        .context("failed to run xwininfo")?;
    if !info.status.success() {
        bail!("xwininfo failed for window id {window_id}");
    }

    let region = parse_geometry(&String::from_utf8_lossy(&info.stdout))?;
    info!(
        "tracking region {}x{} at ({}, {})",
        region.width, region.height, region.x, region.y
    );
    Ok(region)
}

/// Pulls the absolute position and size out of `xwininfo` output.
pub fn parse_geometry(info: &str) -> Result<Region> {
    let x = field(info, "Absolute upper-left X")?;
    let y = field(info, "Absolute upper-left Y")?;
    let width = field(info, "Width")?;
    let height = field(info, "Height")?;

    Ok(Region {
        x: x as i32,
        y: y as i32,
        width: width as u32,
        height: height as u32,
    })
}

fn field(info: &str, key: &str) -> Result<i64> {
    let line = info
        .lines()
        .find(|line| line.contains(key))
        .ok_or_else(|| anyhow!("xwininfo output missing '{key}'"))?;
    line.split(':')
        .nth(1)
        .map(str::trim)
        .ok_or_else(|| anyhow!("malformed xwininfo line: {line:?}"))?
        .parse()
        .with_context(|| format!("non-numeric value for '{key}'"))
}
