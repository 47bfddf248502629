use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

/// Tunables for a bisection run. Loaded from a JSON file when one is given,
/// otherwise defaulted; individual fields can be overridden from the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BisectConfig {
    /// Title of the window whose region is tracked for visual changes.
    pub window_name: String,

    /// Percentage of differing pixels above which a snapshot counts as changed.
    pub diff_threshold: f64,

    /// Sleep between snapshot comparisons while a replay is running.
    pub poll_interval_ms: u64,

    /// A replay producing no stdout for this long is considered stalled.
    pub idle_timeout_secs: u64,

    /// Stop splitting once the candidate batch is this small or smaller.
    pub min_batch_len: usize,

    /// How many times the prober re-sends a single frame before moving on.
    pub probe_repeats: u32,

    /// Inter-frame gap handed to the batch player (`canplayer -g`).
    pub playback_gap_ms: u32,

    /// Bus interface the single-frame sender writes to.
    pub send_interface: String,

    /// External batch player binary.
    pub player_bin: String,

    /// External single-frame sender binary.
    pub send_bin: String,

    /// Directory that receives the per-level half files.
    pub work_dir: PathBuf,

    /// Pause after writing half files (and before probing) so the bus settles.
    pub settle_secs: u64,
}

impl Default for BisectConfig {
    fn default() -> Self {
        Self {
            window_name: "IC Simulator".into(),
            diff_threshold: 0.40,
            poll_interval_ms: 2,
            idle_timeout_secs: 5,
            min_batch_len: 1000,
            probe_repeats: 50,
            playback_gap_ms: 25,
            send_interface: "vcan0".into(),
            player_bin: "canplayer".into(),
            send_bin: "cansend".into(),
            work_dir: PathBuf::from("."),
            settle_secs: 1,
        }
    }
}

impl BisectConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }
}
