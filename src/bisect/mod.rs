//! Bisector: repeatedly halves the candidate batch, replays each half against
//! a baseline snapshot, and keeps whichever half moves pixels on the tracked
//! region.

pub mod probe;

use anyhow::{bail, Result};
use log::{info, warn};
use std::path::Path;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::canlog::FrameBatch;
use crate::config::BisectConfig;
use crate::replay::{ReplaySession, Replayer};
use crate::vision::{diff_percent, ScreenCapture, Snapshot};

/// Classification of one replayed half.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BranchOutcome {
    /// The diff against the baseline crossed the threshold, possibly before
    /// the replay finished.
    Changed { score: f64 },
    /// The replay ran to completion without moving the needle.
    Unchanged,
    /// The replay stopped producing output and was given up on. Counts as
    /// unchanged for the search.
    Stalled,
}

pub struct Bisector<'a> {
    config: &'a BisectConfig,
    replayer: &'a dyn Replayer,
    screen: &'a mut dyn ScreenCapture,
    cancel: CancellationToken,
}

impl<'a> Bisector<'a> {
    pub fn new(
        config: &'a BisectConfig,
        replayer: &'a dyn Replayer,
        screen: &'a mut dyn ScreenCapture,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            replayer,
            screen,
            cancel,
        }
    }

    /// Narrows `batch` down to a minimal candidate of at most `min_batch_len`
    /// frames. `Ok(None)` means neither half reproduced the change at some
    /// level: the search is inconclusive, not crashed.
    pub async fn run(&mut self, batch: FrameBatch) -> Result<Option<FrameBatch>> {
        let mut candidate = batch;
        let mut level = 0usize;

        loop {
            if candidate.len() <= self.config.min_batch_len {
                info!(
                    "converged to {} frames after {} levels",
                    candidate.len(),
                    level
                );
                return Ok(Some(candidate));
            }
            level += 1;
            info!("level {level}: {} candidate frames", candidate.len());

            let baseline = self.screen.capture()?;
            let (first, second) = candidate.split();
            let first_path = self.config.work_dir.join(format!("half-{level}-first.log"));
            let second_path = self
                .config
                .work_dir
                .join(format!("half-{level}-second.log"));
            first.persist(&first_path)?;
            second.persist(&second_path)?;
            self.pause(Duration::from_secs(self.config.settle_secs))
                .await?;

            if let BranchOutcome::Changed { score } =
                self.test_half("first", &first_path, &baseline).await?
            {
                info!("first half activated something ({score:.2}%), narrowing");
                candidate = first;
                continue;
            }

            if let BranchOutcome::Changed { score } =
                self.test_half("second", &second_path, &baseline).await?
            {
                info!("second half activated something ({score:.2}%), narrowing");
                candidate = second;
                continue;
            }

            warn!("no activation detected in either half at level {level}");
            return Ok(None);
        }
    }

    async fn test_half(
        &mut self,
        label: &str,
        path: &Path,
        baseline: &Snapshot,
    ) -> Result<BranchOutcome> {
        info!("replaying {label} half from {}", path.display());
        let session = self.replayer.play_batch(path)?;
        self.watch_session(session, baseline).await
    }

    /// Polls a running replay against the baseline. Early-exits the moment the
    /// diff crosses the threshold, and gives up on replays that go quiet for
    /// longer than the idle timeout. The session is aborted on both paths.
    async fn watch_session(
        &mut self,
        mut session: Box<dyn ReplaySession>,
        baseline: &Snapshot,
    ) -> Result<BranchOutcome> {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let idle_limit = Duration::from_secs(self.config.idle_timeout_secs);
        let mut last_output = Instant::now();

        loop {
            if let Some(success) = session.try_finish()? {
                if !success {
                    warn!("replay process exited with a failure status");
                }
                let snapshot = self.screen.capture()?;
                let score = diff_percent(baseline, &snapshot)?;
                info!("replay finished, difference {score:.2}%");
                return Ok(if score > self.config.diff_threshold {
                    BranchOutcome::Changed { score }
                } else {
                    BranchOutcome::Unchanged
                });
            }

            if session.saw_output() {
                last_output = Instant::now();
            } else if last_output.elapsed() >= idle_limit {
                warn!(
                    "no replay output for {}s, treating branch as stalled",
                    self.config.idle_timeout_secs
                );
                session.abort();
                return Ok(BranchOutcome::Stalled);
            }

            self.pause(poll_interval).await?;

            let snapshot = self.screen.capture()?;
            let score = diff_percent(baseline, &snapshot)?;
            if score > self.config.diff_threshold {
                info!(
                    "difference {score:.2}% exceeded threshold {:.2}% mid-replay",
                    self.config.diff_threshold
                );
                session.abort();
                return Ok(BranchOutcome::Changed { score });
            }
        }
    }

    async fn pause(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancel.cancelled() => bail!("interrupted"),
        }
    }
}
