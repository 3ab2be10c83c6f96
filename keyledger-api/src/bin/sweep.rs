//! Keyledger expiry sweeper
//!
//! Usage:
//!   keyledger-sweep            sweep every KEYLEDGER_SWEEP_INTERVAL_SECS until stopped
//!   keyledger-sweep --once     run one sweep and exit (for cron)
//!
//! Shares KEYLEDGER_DATABASE with the API server. Two processes may sweep
//! the same database; each key is still expired at most once.

use keyledger_api::{build_state, init_tracing, Config};
use keyledger_store::SweepOutcome;
use std::process::ExitCode;

fn usage() {
    eprintln!(
        "keyledger-sweep: expire keys whose cryptoperiod has elapsed\n\
         \n\
         USAGE:\n    keyledger-sweep [--once]\n\
         \n\
         OPTIONS:\n    --once       Run a single sweep and exit\n    -h, --help   Show this message\n    -V, --version"
    );
}

#[tokio::main]
async fn main() -> ExitCode {
    let mut once = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--once" => once = true,
            "--help" | "-h" => {
                usage();
                return ExitCode::SUCCESS;
            }
            "--version" | "-V" => {
                println!("keyledger-sweep {}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            other => {
                eprintln!("error: unknown argument '{}'", other);
                usage();
                return ExitCode::from(2);
            }
        }
    }

    match run(once).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(once: bool) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.log_format);
    let state = build_state(&config)?;

    if !once {
        state.sweeper.clone().run().await;
        return Ok(());
    }

    let sweeper = state.sweeper.clone();
    match tokio::task::spawn_blocking(move || sweeper.sweep()).await?? {
        SweepOutcome::Completed(report) if !report.failed.is_empty() => {
            anyhow::bail!("{} keys could not be expired", report.failed.len())
        }
        SweepOutcome::Completed(report) => {
            println!(
                "expired {} keys, skipped {}, {} expiring soon",
                report.expired.len(),
                report.skipped,
                report.upcoming.len()
            );
            Ok(())
        }
        SweepOutcome::Skipped => Ok(()),
    }
}
