//! End-to-end bisection and probe scenarios over scripted replay/screen
//! doubles. The fake screen renders a solid frame whose intensity tracks a
//! shared version counter; a fake replay bumps the counter iff the trigger
//! frame is inside whatever it was asked to play.

use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;

use anyhow::Result;
use image::{GrayImage, Luma};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;

use canbisect::bisect::{probe::probe_frames, Bisector};
use canbisect::canlog::{FrameBatch, FrameRecord};
use canbisect::config::BisectConfig;
use canbisect::replay::{ReplaySession, Replayer};
use canbisect::vision::{ScreenCapture, Snapshot};

const TRIGGER_PAYLOAD: &str = "244#DEADBEEFDEADBEEF";

fn test_config(work_dir: &Path) -> BisectConfig {
    BisectConfig {
        min_batch_len: 10,
        probe_repeats: 3,
        poll_interval_ms: 1,
        idle_timeout_secs: 5,
        settle_secs: 0,
        work_dir: work_dir.to_path_buf(),
        ..BisectConfig::default()
    }
}

fn synth_batch(seed: u64, total: usize, trigger_at: usize) -> FrameBatch {
    let mut rng = StdRng::seed_from_u64(seed);
    let frames = (0..total)
        .map(|i| {
            let payload = if i == trigger_at {
                TRIGGER_PAYLOAD.to_string()
            } else {
                format!("{:03X}#{:016X}", rng.gen_range(0x100..0x7FF), rng.gen::<u64>())
            };
            let line = format!("(1696101301.{i:06}) vcan0 {payload}");
            FrameRecord::parse(&line).unwrap()
        })
        .collect();
    FrameBatch::new(frames)
}

struct FakeScreen {
    version: Rc<Cell<u32>>,
}

impl ScreenCapture for FakeScreen {
    fn capture(&mut self) -> Result<Snapshot> {
        let shade = (self.version.get() % 200) as u8;
        Ok(Snapshot::from_luma(GrayImage::from_pixel(
            8,
            8,
            Luma([shade]),
        )))
    }
}

/// How scripted batch sessions behave.
#[derive(Clone, Copy, PartialEq)]
enum BatchMode {
    /// Exit on the first poll; the display updates at exit.
    FinishThenChange,
    /// The display updates while the replay is still running, so the watcher
    /// must early-exit; sessions without the trigger exit immediately.
    ChangeMidReplay,
    /// Never exit and never produce output.
    Stall,
}

struct FakeReplayer {
    version: Rc<Cell<u32>>,
    mode: BatchMode,
    batches_played: Cell<usize>,
    sends: RefCell<Vec<String>>,
}

impl FakeReplayer {
    fn new(version: Rc<Cell<u32>>, mode: BatchMode) -> Self {
        Self {
            version,
            mode,
            batches_played: Cell::new(0),
            sends: RefCell::new(Vec::new()),
        }
    }
}

impl Replayer for FakeReplayer {
    fn play_batch(&self, batch_file: &Path) -> Result<Box<dyn ReplaySession>> {
        self.batches_played.set(self.batches_played.get() + 1);
        let has_trigger = std::fs::read_to_string(batch_file)?.contains(TRIGGER_PAYLOAD);

        let session = match self.mode {
            BatchMode::FinishThenChange => FakeSession {
                polls_until_exit: Some(0),
                emits_output: true,
                bump_on_exit: has_trigger.then(|| Rc::clone(&self.version)),
            },
            BatchMode::ChangeMidReplay => {
                if has_trigger {
                    self.version.set(self.version.get() + 1);
                    FakeSession {
                        polls_until_exit: None,
                        emits_output: true,
                        bump_on_exit: None,
                    }
                } else {
                    FakeSession {
                        polls_until_exit: Some(0),
                        emits_output: true,
                        bump_on_exit: None,
                    }
                }
            }
            BatchMode::Stall => FakeSession {
                polls_until_exit: None,
                emits_output: false,
                bump_on_exit: None,
            },
        };
        Ok(Box::new(session))
    }

    fn send_frame(&self, frame: &FrameRecord) -> Result<Box<dyn ReplaySession>> {
        self.sends.borrow_mut().push(frame.payload.clone());
        let is_trigger = frame.payload == TRIGGER_PAYLOAD;
        Ok(Box::new(FakeSession {
            polls_until_exit: Some(0),
            emits_output: true,
            bump_on_exit: is_trigger.then(|| Rc::clone(&self.version)),
        }))
    }
}

struct FakeSession {
    polls_until_exit: Option<u32>,
    emits_output: bool,
    bump_on_exit: Option<Rc<Cell<u32>>>,
}

impl ReplaySession for FakeSession {
    fn try_finish(&mut self) -> Result<Option<bool>> {
        match self.polls_until_exit {
            None => Ok(None),
            Some(0) => {
                if let Some(version) = self.bump_on_exit.take() {
                    version.set(version.get() + 1);
                }
                Ok(Some(true))
            }
            Some(n) => {
                self.polls_until_exit = Some(n - 1);
                Ok(None)
            }
        }
    }

    fn saw_output(&mut self) -> bool {
        self.emits_output
    }

    fn abort(&mut self) {
        // Aborted sessions are simply dropped by the watcher.
    }
}

async fn run_pipeline(seed: u64, mode: BatchMode) -> Result<Option<FrameRecord>> {
    let work_dir = tempfile::tempdir()?;
    let config = test_config(work_dir.path());
    let version = Rc::new(Cell::new(0u32));
    let replayer = FakeReplayer::new(Rc::clone(&version), mode);
    let mut screen = FakeScreen { version };
    let cancel = CancellationToken::new();

    let batch = synth_batch(seed, 1000, 617);
    let mut bisector = Bisector::new(&config, &replayer, &mut screen, cancel.clone());
    let Some(minimal) = bisector.run(batch).await? else {
        return Ok(None);
    };
    assert!(minimal.len() <= config.min_batch_len);
    assert!(minimal
        .frames()
        .iter()
        .any(|f| f.payload == TRIGGER_PAYLOAD));

    probe_frames(&config, &replayer, &mut screen, &cancel, &minimal).await
}

#[tokio::test]
async fn converges_to_the_trigger_frame() {
    let found = run_pipeline(7, BatchMode::FinishThenChange).await.unwrap();
    assert_eq!(found.unwrap().payload, TRIGGER_PAYLOAD);
}

#[tokio::test]
async fn early_exit_path_also_converges() {
    let found = run_pipeline(7, BatchMode::ChangeMidReplay).await.unwrap();
    assert_eq!(found.unwrap().payload, TRIGGER_PAYLOAD);
}

#[tokio::test]
async fn repeated_runs_agree_on_the_same_seed() {
    let first = run_pipeline(42, BatchMode::FinishThenChange).await.unwrap();
    let second = run_pipeline(42, BatchMode::FinishThenChange).await.unwrap();
    assert_eq!(first.unwrap().raw, second.unwrap().raw);
}

#[tokio::test]
async fn bisection_level_count_is_logarithmic() {
    let work_dir = tempfile::tempdir().unwrap();
    let config = test_config(work_dir.path());
    let version = Rc::new(Cell::new(0u32));
    let replayer = FakeReplayer::new(Rc::clone(&version), BatchMode::FinishThenChange);
    let mut screen = FakeScreen { version };

    let batch = synth_batch(3, 1000, 617);
    let levels = (1000f64 / config.min_batch_len as f64).log2().ceil() as usize;
    let mut bisector = Bisector::new(&config, &replayer, &mut screen, CancellationToken::new());
    bisector.run(batch).await.unwrap().unwrap();

    // At most two replays per level: first half, then second half.
    assert!(replayer.batches_played.get() <= 2 * levels);
}

#[tokio::test]
async fn no_trigger_means_inconclusive_not_a_crash() {
    let work_dir = tempfile::tempdir().unwrap();
    let config = test_config(work_dir.path());
    let version = Rc::new(Cell::new(0u32));
    let replayer = FakeReplayer::new(Rc::clone(&version), BatchMode::FinishThenChange);
    let mut screen = FakeScreen { version };

    // Trigger index outside the batch: nothing ever changes the display.
    let batch = synth_batch(9, 200, usize::MAX);
    let mut bisector = Bisector::new(&config, &replayer, &mut screen, CancellationToken::new());
    assert!(bisector.run(batch).await.unwrap().is_none());
}

#[tokio::test]
async fn stalled_replays_classify_as_unchanged() {
    let work_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(work_dir.path());
    config.idle_timeout_secs = 0;
    let version = Rc::new(Cell::new(0u32));
    let replayer = FakeReplayer::new(Rc::clone(&version), BatchMode::Stall);
    let mut screen = FakeScreen { version };

    let batch = synth_batch(11, 100, 50);
    let mut bisector = Bisector::new(&config, &replayer, &mut screen, CancellationToken::new());
    // Both halves stall, so the search ends inconclusive instead of hanging.
    assert!(bisector.run(batch).await.unwrap().is_none());
}

#[tokio::test]
async fn probe_short_circuits_after_the_first_hit() {
    let work_dir = tempfile::tempdir().unwrap();
    let config = test_config(work_dir.path());
    let version = Rc::new(Cell::new(0u32));
    let replayer = FakeReplayer::new(Rc::clone(&version), BatchMode::FinishThenChange);
    let mut screen = FakeScreen { version };
    let cancel = CancellationToken::new();

    let batch = synth_batch(5, 3, 1);
    let found = probe_frames(&config, &replayer, &mut screen, &cancel, &batch)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.payload, TRIGGER_PAYLOAD);

    // Frame 0 used its full repeat budget, the trigger fired on its first
    // attempt, and frame 2 was never touched.
    let sends = replayer.sends.borrow();
    assert_eq!(sends.len(), config.probe_repeats as usize + 1);
    assert_eq!(sends.last().unwrap(), TRIGGER_PAYLOAD);
}

#[tokio::test]
async fn probe_reports_nothing_when_no_frame_triggers() {
    let work_dir = tempfile::tempdir().unwrap();
    let config = test_config(work_dir.path());
    let version = Rc::new(Cell::new(0u32));
    let replayer = FakeReplayer::new(Rc::clone(&version), BatchMode::FinishThenChange);
    let mut screen = FakeScreen { version };

    let batch = synth_batch(13, 3, usize::MAX);
    let found = probe_frames(
        &config,
        &replayer,
        &mut screen,
        &CancellationToken::new(),
        &batch,
    )
    .await
    .unwrap();
    assert!(found.is_none());
    assert_eq!(replayer.sends.borrow().len(), 3 * config.probe_repeats as usize);
}
