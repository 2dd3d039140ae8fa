//! The scheduling core for `align`.
//!
//! Every tilt series flows through a work channel drained by `--jobs`
//! worker tasks. A worker takes the next series, acquires a device from
//! the pool, runs AreTomo2 to a terminal state, releases the device, and
//! reports over the event channel. The scheduler loop is the only place
//! that touches the run summary; it rewrites the checkpoint on disk
//! after every completion.
//!
//! Ctrl-c stops dispatch immediately. Series still queued are abandoned
//! without side effects; series already running are left to finish, and
//! their results are recorded. This choice is deliberate: killing
//! AreTomo2 mid-write would leave half-written volumes that a later
//! `--skip-existing` rerun could mistake for finished work.

use std::collections::HashMap;
use std::sync::Arc;

use colored::ColoredString;
use colourado::{ColorPalette, PaletteType};
use futures::future::join_all;
use tokio::sync::Mutex;

use crate::config::{self, AlignConfig};
use crate::device::{Device, DevicePool};
use crate::discover::{self, TiltSeries};
use crate::error::BatchError;
use crate::runner;
use crate::summary::{JobResult, RunSummary, SUMMARY_FILE};

/// Progress events emitted by worker tasks. The scheduler loop is the
/// only subscriber; workers do not depend on how progress is rendered.
#[derive(Debug)]
pub enum Event {
    Started { name: String, device: Device },
    Finished { device: Device, result: JobResult },
}

pub struct Scheduler {
    cfg: Arc<AlignConfig>,
    pool: Arc<DevicePool>,
    queue: Vec<TiltSeries>,
}

impl Scheduler {
    pub fn new(cfg: AlignConfig, gpus: &[u32], queue: Vec<TiltSeries>) -> Self {
        Self {
            cfg: Arc::new(cfg),
            pool: Arc::new(DevicePool::new(gpus)),
            queue,
        }
    }

    /// Runs every queued series to a terminal state and returns the
    /// summary. Per-series failures never abort the run; only a dead
    /// device pool or an unwritable final summary do.
    pub async fn run(self) -> Result<RunSummary, BatchError> {
        let Scheduler { cfg, pool, queue } = self;

        let total = queue.len();
        let mut summary = RunSummary::new(total);
        let summary_path = cfg.out_dir.join(SUMMARY_FILE);

        // One palette color per device, used to prefix progress lines.
        let colors = ColorPalette::new(pool.devices().len() as u32, PaletteType::Pastel, false)
            .colors;
        let device_colors: Arc<HashMap<Device, ColoredString>> = Arc::new(
            pool.devices()
                .iter()
                .zip(colors)
                .map(|(device, color)| (*device, device.prettify(color)))
                .collect(),
        );

        // Work channel: preloaded with every series, then closed, so the
        // workers drain it and exit on their own.
        let (work_tx, work_rx) = flume::unbounded::<(usize, TiltSeries)>();
        for indexed in queue.into_iter().enumerate() {
            work_tx.send(indexed).expect("unbounded work channel");
        }
        drop(work_tx);

        // Ctrl-c stops dispatch; running series are left to finish.
        let cancelled = Arc::new(Mutex::new(false));
        {
            let cancelled = Arc::clone(&cancelled);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("[aretomo-batch] Ctrl-c detected. Not dispatching further series.");
                    *cancelled.lock().await = true;
                }
            });
        }

        let pool_closed = Arc::new(Mutex::new(false));
        let (event_tx, event_rx) = flume::unbounded::<Event>();
        let mut workers = vec![];
        for _ in 0..cfg.jobs.max(1) {
            let cfg = Arc::clone(&cfg);
            let pool = Arc::clone(&pool);
            let cancelled = Arc::clone(&cancelled);
            let pool_closed = Arc::clone(&pool_closed);
            let device_colors = Arc::clone(&device_colors);
            let work_rx = work_rx.clone();
            let event_tx = event_tx.clone();
            workers.push(tokio::spawn(async move {
                while let Ok((index, series)) = work_rx.recv_async().await {
                    if *cancelled.lock().await {
                        break;
                    }
                    let device = match pool.acquire().await {
                        Ok(device) => device,
                        Err(e) => {
                            eprintln!("[aretomo-batch] {}", e);
                            *pool_closed.lock().await = true;
                            break;
                        }
                    };
                    let started = Event::Started {
                        name: series.name.clone(),
                        device,
                    };
                    if event_tx.send_async(started).await.is_err() {
                        pool.release(device);
                        break;
                    }
                    let echo = (cfg.show_output && index == 0)
                        .then(|| device_colors[&device].clone());
                    let result = runner::run_one(&series, device, &cfg, echo).await;
                    // Release before fetching more work so the next
                    // waiter can dispatch immediately.
                    pool.release(device);
                    if event_tx.send_async(Event::Finished { device, result }).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(event_tx);

        let mut done = 0usize;
        while let Ok(event) = event_rx.recv_async().await {
            match event {
                Event::Started { name, device } => {
                    eprintln!("{} === aligning {} ===", device_colors[&device], name);
                }
                Event::Finished { device, result } => {
                    done += 1;
                    eprintln!(
                        "{} === {} {} ({}/{}) ===",
                        device_colors[&device], result.name, result.outcome, done, total
                    );
                    summary.push(result);
                    // Mid-run checkpoint failures are reported but must
                    // not take the run down with them.
                    if let Err(e) = summary.write(&summary_path) {
                        eprintln!("[aretomo-batch] Failed to checkpoint summary: {}", e);
                    }
                }
            }
        }

        join_all(workers).await;

        if *pool_closed.lock().await {
            summary.finalize();
            let _ = summary.write(&summary_path);
            return Err(BatchError::DevicePoolClosed);
        }

        summary.finalize();
        summary.write(&summary_path)?;
        Ok(summary)
    }
}

/// Entry point for the `align` subcommand: validates the configuration,
/// discovers tilt series, and drives the scheduler to completion.
pub async fn run_align(mut cfg: AlignConfig) -> Result<RunSummary, BatchError> {
    if !runner::find_executable(&cfg.aretomo) {
        return Err(BatchError::AretomoNotFound(cfg.aretomo.clone()));
    }
    let gpus = config::parse_gpus(&cfg.gpus).map_err(BatchError::BadGpuList)?;

    if !cfg.imod_dir.is_dir() {
        return Err(BatchError::MissingRoot(cfg.imod_dir.clone()));
    }
    std::fs::create_dir_all(&cfg.out_dir)?;
    cfg.imod_dir = cfg.imod_dir.canonicalize()?;
    cfg.out_dir = cfg.out_dir.canonicalize()?;

    let (series, unpaired) = discover::find_tilt_series(&cfg.imod_dir, &cfg.out_dir)?;
    for stack in &unpaired {
        eprintln!(
            "[aretomo-batch] Warning: {} has no companion .rawtlt, skipping.",
            stack.display()
        );
    }
    eprintln!(
        "[aretomo-batch] {} tilt series queued, {} at a time.",
        series.len(),
        cfg.jobs.max(1)
    );

    Scheduler::new(cfg, &gpus, series).run().await
}
