//! Replayer: spawns the external batch player and single-frame sender, and
//! exposes each launched process as a pollable session handle.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;

use crate::canlog::FrameRecord;
use crate::config::BisectConfig;

/// A running replay. `try_finish` never blocks; `saw_output` reports whether
/// the process has written stdout since the last call. Sessions must not
/// outlive their process: implementations reap the child on drop.
pub trait ReplaySession {
    /// `Some(exited_cleanly)` once the process has terminated.
    fn try_finish(&mut self) -> Result<Option<bool>>;

    /// Drains stdout notifications accumulated since the last call.
    fn saw_output(&mut self) -> bool;

    /// Best-effort kill, used on early-exit and stall paths.
    fn abort(&mut self);
}

/// Launches replays. The bisector only ever runs one session at a time; the
/// bus and the display are a single shared stateful resource.
pub trait Replayer {
    fn play_batch(&self, batch_file: &Path) -> Result<Box<dyn ReplaySession>>;
    fn send_frame(&self, frame: &FrameRecord) -> Result<Box<dyn ReplaySession>>;
}

pub struct CanReplayer {
    player_bin: String,
    send_bin: String,
    send_interface: String,
    playback_gap_ms: u32,
}

impl CanReplayer {
    pub fn new(config: &BisectConfig) -> Self {
        Self {
            player_bin: config.player_bin.clone(),
            send_bin: config.send_bin.clone(),
            send_interface: config.send_interface.clone(),
            playback_gap_ms: config.playback_gap_ms,
        }
    }
}

impl Replayer for CanReplayer {
    fn play_batch(&self, batch_file: &Path) -> Result<Box<dyn ReplaySession>> {
        let mut command = Command::new(&self.player_bin);
        command
            .arg("-I")
            .arg(batch_file)
            .arg("-g")
            .arg(self.playback_gap_ms.to_string())
            .arg("-v");
        let session = CanSession::spawn(command)
            .with_context(|| format!("failed to launch {} for batch replay", self.player_bin))?;
        Ok(Box::new(session))
    }

    fn send_frame(&self, frame: &FrameRecord) -> Result<Box<dyn ReplaySession>> {
        let mut command = Command::new(&self.send_bin);
        command.arg(&self.send_interface).arg(&frame.payload);
        let session = CanSession::spawn(command)
            .with_context(|| format!("failed to launch {} for single frame", self.send_bin))?;
        Ok(Box::new(session))
    }
}

/// A spawned replay process. `kill_on_drop` guarantees the child is reaped on
/// every exit path, including early-exit and idle-timeout branches.
pub struct CanSession {
    child: Child,
    output_rx: mpsc::UnboundedReceiver<()>,
}

impl CanSession {
    fn spawn(mut command: Command) -> Result<Self> {
        let mut child = command
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .context("replay process stdout was not captured")?;
        let (tx, output_rx) = mpsc::unbounded_channel();
        tokio::spawn(drain_stdout(stdout, tx));

        Ok(Self { child, output_rx })
    }
}

impl ReplaySession for CanSession {
    fn try_finish(&mut self) -> Result<Option<bool>> {
        let status = self
            .child
            .try_wait()
            .context("failed to poll replay process")?;
        Ok(status.map(|s| s.success()))
    }

    fn saw_output(&mut self) -> bool {
        let mut seen = false;
        while self.output_rx.try_recv().is_ok() {
            seen = true;
        }
        seen
    }

    fn abort(&mut self) {
        let _ = self.child.start_kill();
    }
}

/// Reads stdout in chunks purely as a liveness signal; the player's verbose
/// echo is not interpreted.
async fn drain_stdout(mut stdout: ChildStdout, tx: mpsc::UnboundedSender<()>) {
    let mut buf = [0u8; 1024];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if tx.send(()).is_err() {
                    break;
                }
            }
        }
    }
}
