//! One AreTomo2 invocation for one tilt series.
//!
//! The external binary is a black box: it can exit non-zero, hang, or
//! exit zero without writing its outputs. Whatever happens is folded
//! into a `JobResult` classification; nothing here escalates to the
//! scheduler as an error.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use colored::ColoredString;
use futures::future::join;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::config::AlignConfig;
use crate::device::Device;
use crate::discover::TiltSeries;
use crate::summary::{JobResult, Outcome};

/// `which`-style lookup: an explicit path must exist as a file; a bare
/// name must resolve under some `$PATH` entry.
pub fn find_executable(name: &str) -> bool {
    let path = Path::new(name);
    if path.components().count() > 1 {
        return path.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(name).is_file()))
        .unwrap_or(false)
}

/// Builds the AreTomo2 argument list for one series on one device.
/// Input paths are absolute; the output volume is relative because the
/// process runs inside the series' working directory.
pub fn build_args(series: &TiltSeries, device: Device, cfg: &AlignConfig) -> Vec<String> {
    let opts = &cfg.aretomo_opts;
    let mut args = vec![
        "-InMrc".to_string(),
        series.stack.display().to_string(),
        "-OutMrc".to_string(),
        format!("{}.mrc", series.name),
        "-AngFile".to_string(),
        series.tilt_file.display().to_string(),
        "-VolZ".to_string(),
        opts.vol_z.to_string(),
        "-Align".to_string(),
        "1".to_string(),
        "-TiltCor".to_string(),
        "0".to_string(),
        "-DarkTol".to_string(),
        opts.dark_tol.to_string(),
        "-OutImod".to_string(),
        "2".to_string(),
    ];
    if let Device::Gpu(id) = device {
        args.push("-Gpu".to_string());
        args.push(id.to_string());
    }
    args.push("-AlignZ".to_string());
    args.push(opts.align_z.to_string());
    if let Some(tilt_axis) = &opts.tilt_axis {
        args.push("-TiltAxis".to_string());
        args.extend(tilt_axis.iter().map(|v| v.to_string()));
    }
    args
}

/// Runs AreTomo2 for one tilt series on the given device and classifies
/// the outcome. With `--dry-run` the invocation is only announced; with
/// `--skip-existing` an already-aligned series short-circuits without
/// touching the process or the filesystem.
pub async fn run_one(
    series: &TiltSeries,
    device: Device,
    cfg: &AlignConfig,
    echo_prefix: Option<ColoredString>,
) -> JobResult {
    let started_at = Utc::now();
    let log_path = series.log_path();
    let finish = |outcome: Outcome| JobResult {
        name: series.name.clone(),
        device: device.to_string(),
        started_at,
        finished_at: Utc::now(),
        outcome,
        log: log_path.clone(),
    };

    if cfg.skip_existing && series.is_aligned() {
        return finish(Outcome::Skipped);
    }

    let args = build_args(series, device, cfg);
    if cfg.dry_run {
        eprintln!(
            "[aretomo-batch] (dry-run) [{}] {} {}",
            device,
            cfg.aretomo,
            args.join(" ")
        );
        return finish(Outcome::Skipped);
    }

    // The logs directory sits inside the working directory, so this
    // creates both.
    let logs_dir = log_path.parent().expect("log path has a parent");
    if let Err(e) = tokio::fs::create_dir_all(logs_dir).await {
        eprintln!(
            "[aretomo-batch] {}: failed to create {}: {}",
            series.name,
            logs_dir.display(),
            e
        );
        return finish(Outcome::Failed);
    }

    let mut logfile = match File::create(&log_path).await {
        Ok(file) => file,
        Err(e) => {
            eprintln!(
                "[aretomo-batch] {}: failed to create {}: {}",
                series.name,
                log_path.display(),
                e
            );
            return finish(Outcome::Failed);
        }
    };
    // First log line is the full command, for manual reruns.
    let header = format!("{} {}\n", cfg.aretomo, args.join(" "));
    let _ = logfile.write_all(header.as_bytes()).await;
    let logfile = Arc::new(Mutex::new(logfile));

    let mut child = match Command::new(&cfg.aretomo)
        .args(&args)
        .current_dir(&series.workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            let mut log = logfile.lock().await;
            let _ = log
                .write_all(format!("Failed to spawn {}: {}\n", cfg.aretomo, e).as_bytes())
                .await;
            return finish(Outcome::Failed);
        }
    };

    let stdout = child.stdout.take().expect("stdout is piped");
    let stderr = child.stderr.take().expect("stderr is piped");
    let streams = join(
        stream(stdout, Arc::clone(&logfile), echo_prefix.clone()),
        stream(stderr, Arc::clone(&logfile), echo_prefix),
    );
    let wait = async {
        streams.await;
        child.wait().await
    };

    let status = match cfg.timeout {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), wait).await,
        None => Ok(wait.await),
    };

    let outcome = match status {
        Ok(status) => classify(series, status),
        Err(_) => {
            let _ = child.kill().await;
            let mut log = logfile.lock().await;
            let _ = log
                .write_all(
                    format!("Killed after exceeding --timeout {}s.\n", cfg.timeout.unwrap_or(0))
                        .as_bytes(),
                )
                .await;
            Outcome::TimedOut
        }
    };
    finish(outcome)
}

/// Exit status 0 alone is not success: AreTomo2 sometimes exits cleanly
/// without emitting the IMOD metadata directory.
fn classify(series: &TiltSeries, status: std::io::Result<ExitStatus>) -> Outcome {
    match status {
        Ok(status) if status.success() && series.imod_dir().is_dir() => Outcome::Succeeded,
        _ => Outcome::Failed,
    }
}

/// Streams one pipe of the child into the log file line by line,
/// optionally echoing to the terminal. Lines end at either `\r` or `\n`
/// since AreTomo2 repaints its progress output with carriage returns.
async fn stream<B: AsyncRead + Unpin>(
    stream: B,
    logfile: Arc<Mutex<File>>,
    echo_prefix: Option<ColoredString>,
) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        if read_until2(&mut reader, b'\r', b'\n', &mut buf).await.is_err() {
            break;
        }
        // An empty buffer means that EOF was reached.
        if buf.is_empty() {
            break;
        }
        {
            let mut log = logfile.lock().await;
            let _ = log.write_all(&buf).await;
        }
        if let Some(prefix) = &echo_prefix {
            let line = String::from_utf8_lossy(&buf);
            println!("{} {}", prefix, line.trim_end_matches(&['\r', '\n'][..]));
        }
        buf.clear();
    }
}

async fn read_until2<B: AsyncRead + Unpin>(
    reader: &mut BufReader<B>,
    delimiter1: u8,
    delimiter2: u8,
    buf: &mut Vec<u8>,
) -> std::io::Result<()> {
    loop {
        let (done, used) = {
            let available = reader.fill_buf().await?;
            if let Some(i) = memchr::memchr2(delimiter1, delimiter2, available) {
                buf.extend_from_slice(&available[..=i]);
                (true, i + 1)
            } else {
                buf.extend_from_slice(available);
                (false, available.len())
            }
        };
        reader.consume(used);
        if done || used == 0 {
            return Ok(());
        }
    }
}
