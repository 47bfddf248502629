use anyhow::{Context, Result};
use clap::Parser;
use env_logger::{Env, Target};
use log::{info, warn};
use std::fs;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use canbisect::bisect::{probe::probe_frames, Bisector};
use canbisect::canlog::FrameBatch;
use canbisect::config::BisectConfig;
use canbisect::replay::CanReplayer;
use canbisect::vision::{locate_window, ImportCapture};

/// Finds which CAN frame in a candump log triggers a visual change on a
/// tracked window, by bisecting the log against a screen-diff oracle.
#[derive(Parser)]
#[command(name = "canbisect")]
#[command(version)]
struct Cli {
    /// candump-format log to bisect
    log_file: PathBuf,

    /// JSON config file; defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the tracked window title
    #[arg(long)]
    window: Option<String>,

    /// Override the pixel-difference threshold (percent)
    #[arg(long)]
    threshold: Option<f64>,

    /// Override the minimal batch size bisection stops at
    #[arg(long)]
    keep: Option<usize>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(Target::Stdout)
        .init();

    let cli = Cli::parse();
    let mut config = BisectConfig::load(cli.config.as_deref())?;
    if let Some(window) = cli.window {
        config.window_name = window;
    }
    if let Some(threshold) = cli.threshold {
        config.diff_threshold = threshold;
    }
    if let Some(keep) = cli.keep {
        config.min_batch_len = keep;
    }
    fs::create_dir_all(&config.work_dir)
        .with_context(|| format!("failed to create work dir {}", config.work_dir.display()))?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let region = locate_window(&config.window_name).await?;
    let mut screen = ImportCapture::new(region);
    let replayer = CanReplayer::new(&config);

    let batch = FrameBatch::load(&cli.log_file)?;
    info!("loaded {} frames from {}", batch.len(), cli.log_file.display());

    let mut bisector = Bisector::new(&config, &replayer, &mut screen, cancel.clone());
    let Some(minimal) = bisector.run(batch).await? else {
        warn!("bisection was inconclusive: no half reproduced the change");
        println!("search failed: no activation found");
        std::process::exit(1);
    };
    info!("probing minimal batch of {} frames", minimal.len());

    match probe_frames(&config, &replayer, &mut screen, &cancel, &minimal).await? {
        Some(frame) => {
            println!("{}", frame.raw);
            Ok(())
        }
        None => {
            warn!("no frame in the minimal batch reproduced the change on its own");
            println!("no trigger found");
            std::process::exit(1);
        }
    }
}
