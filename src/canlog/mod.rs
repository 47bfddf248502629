//! Frame source: parsing, splitting and persisting candump-format logs.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use log::warn;
use std::fs;
use std::path::Path;

/// One line of a candump log. `raw` keeps the line verbatim so persisted
/// batches stay byte-for-byte replayable; `payload` is the token handed to the
/// single-frame sender.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    pub raw: String,
    pub timestamp: DateTime<Utc>,
    pub channel: String,
    pub payload: String,
}

impl FrameRecord {
    /// Parses a `(epoch.micros) channel id#data` line. Returns `None` for
    /// lines that don't carry the three expected tokens or whose timestamp
    /// isn't a number.
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let stamp = tokens.next()?;
        let channel = tokens.next()?;
        let payload = tokens.next()?;

        let secs: f64 = stamp
            .trim_start_matches('(')
            .trim_end_matches(')')
            .parse()
            .ok()?;
        let timestamp =
            DateTime::from_timestamp(secs.trunc() as i64, (secs.fract() * 1e9) as u32)?;

        Some(Self {
            raw: line.to_string(),
            timestamp,
            channel: channel.to_string(),
            payload: payload.to_string(),
        })
    }
}

/// A contiguous ordered run of frames treated as one replay unit.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBatch {
    frames: Vec<FrameRecord>,
}

impl FrameBatch {
    pub fn new(frames: Vec<FrameRecord>) -> Self {
        Self { frames }
    }

    /// Reads a log file, skipping unparseable lines with a warning. A file
    /// that yields zero frames is a load error.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read log file {}", path.display()))?;

        let mut frames = Vec::new();
        let mut skipped = 0usize;
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match FrameRecord::parse(line) {
                Some(frame) => frames.push(frame),
                None => {
                    skipped += 1;
                    warn!("skipping malformed log line: {line:?}");
                }
            }
        }

        if skipped > 0 {
            warn!("skipped {skipped} malformed lines in {}", path.display());
        }
        if frames.is_empty() {
            bail!("no parseable frames in {}", path.display());
        }
        Ok(Self { frames })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[FrameRecord] {
        &self.frames
    }

    /// Splits into two contiguous halves: the first holds `len / 2` frames,
    /// the second the remainder. Concatenating them reproduces the batch.
    pub fn split(self) -> (FrameBatch, FrameBatch) {
        let mut first = self.frames;
        let second = first.split_off(first.len() / 2);
        (FrameBatch::new(first), FrameBatch::new(second))
    }

    /// Writes the batch's raw lines to a working file the batch player can
    /// consume, replacing whatever was there.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let mut out = String::with_capacity(self.frames.len() * 40);
        for frame in &self.frames {
            out.push_str(&frame.raw);
            out.push('\n');
        }
        fs::write(path, out)
            .with_context(|| format!("failed to write batch to {}", path.display()))
    }
}
