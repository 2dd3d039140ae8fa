use clap::Parser;

use aretomo_batch::config::{Config, Mode};
use aretomo_batch::summary::Outcome;
use aretomo_batch::{export, scheduler};

#[tokio::main]
async fn main() {
    let cli = Config::parse();

    let code = match cli.mode {
        Mode::Align(cfg) => match scheduler::run_align(cfg).await {
            Ok(summary) => {
                eprintln!(
                    "[aretomo-batch] Done: {} succeeded | {} failed | {} timed out | {} skipped",
                    summary.succeeded, summary.failed, summary.timed_out, summary.skipped
                );
                let troubled: Vec<_> = summary
                    .results
                    .iter()
                    .filter(|r| matches!(r.outcome, Outcome::Failed | Outcome::TimedOut))
                    .collect();
                if !troubled.is_empty() {
                    eprintln!("[aretomo-batch] Check the logs of:");
                    for result in troubled {
                        eprintln!("  {}  -> {}", result.name, result.log.display());
                    }
                }
                // Failed series are reported, not fatal, unless nothing
                // at all succeeded.
                if summary.all_failed() {
                    1
                } else {
                    0
                }
            }
            Err(e) => {
                eprintln!("[aretomo-batch] {}", e);
                1
            }
        },
        Mode::Export(cfg) => match export::run_export(&cfg.out_dir) {
            Ok(summary) => {
                let incomplete = summary.items.iter().filter(|r| !r.complete).count();
                eprintln!(
                    "[aretomo-batch] Export finished: {} series ({} incomplete), {} stray files regrouped.",
                    summary.items.len(),
                    incomplete,
                    summary.stray_moves.len()
                );
                0
            }
            Err(e) => {
                eprintln!("[aretomo-batch] {}", e);
                1
            }
        },
    };
    std::process::exit(code);
}
