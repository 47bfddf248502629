//! Single-frame prober: replays each frame of the minimal batch in isolation
//! until one reproduces the visual change.

use anyhow::{bail, Result};
use log::{info, warn};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::canlog::{FrameBatch, FrameRecord};
use crate::config::BisectConfig;
use crate::replay::Replayer;
use crate::vision::{diff_percent, ScreenCapture};

/// Probes frames in original order, with a fresh baseline per frame since
/// earlier probes may have left the display in a new state. Short-circuits on
/// the first attempt that crosses the threshold; `Ok(None)` means no frame in
/// the batch reproduced the change on its own.
pub async fn probe_frames(
    config: &BisectConfig,
    replayer: &dyn Replayer,
    screen: &mut dyn ScreenCapture,
    cancel: &CancellationToken,
    batch: &FrameBatch,
) -> Result<Option<FrameRecord>> {
    pause(cancel, Duration::from_secs(config.settle_secs)).await?;

    for frame in batch.frames() {
        info!(
            "probing frame [{}] {} up to {} times",
            frame.timestamp, frame.payload, config.probe_repeats
        );
        let baseline = screen.capture()?;

        for _ in 0..config.probe_repeats {
            let mut session = replayer.send_frame(frame)?;

            // A single send should exit almost immediately; bound the wait so
            // a wedged sender can't hang the probe.
            let deadline = Instant::now() + Duration::from_secs(config.idle_timeout_secs);
            loop {
                match session.try_finish()? {
                    Some(true) => break,
                    Some(false) => {
                        warn!("single-frame send exited with a failure status");
                        break;
                    }
                    None if Instant::now() >= deadline => {
                        warn!("single-frame send did not finish in time, aborting it");
                        session.abort();
                        break;
                    }
                    None => {
                        pause(cancel, Duration::from_millis(config.poll_interval_ms)).await?
                    }
                }
            }

            let snapshot = screen.capture()?;
            let score = diff_percent(&baseline, &snapshot)?;
            if score > config.diff_threshold {
                info!("change of {score:.2}% reproduced by frame: {}", frame.raw);
                return Ok(Some(frame.clone()));
            }
        }
    }

    Ok(None)
}

async fn pause(cancel: &CancellationToken, duration: Duration) -> Result<()> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => bail!("interrupted"),
    }
}
