mod cli;
mod load;
mod report;

use std::io::Write;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use cougaar_core::{config::load_dotenv, ThreadConfig};
use cougaar_thread::ThreadRuntime;
use tracing::info;

use crate::cli::CliArgs;
use crate::load::SyntheticLoad;
use crate::report::Report;

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();
    load_dotenv();

    // Load config
    let mut config = match &args.config {
        Some(path) => ThreadConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ThreadConfig::from_env().context("failed to load configuration")?,
    };
    if let Some(service_type) = args.service_type {
        config.service_type = service_type;
    }

    let runtime = ThreadRuntime::start(config).context("failed to start thread service")?;
    let load = SyntheticLoad::spawn(&runtime, &args)?;

    let interval = Duration::from_millis(args.interval_ms.max(1));
    let deadline = Instant::now() + Duration::from_secs(args.duration_secs);
    let stdout = std::io::stdout();
    while Instant::now() < deadline {
        std::thread::sleep(interval.min(deadline.saturating_duration_since(Instant::now())));
        let report = Report::collect(&runtime, &load);
        let mut out = stdout.lock();
        if args.json {
            report.write_json(&mut out)?;
        } else {
            report.write_table(&mut out)?;
        }
        out.flush()?;
    }

    load.stop();
    runtime.shutdown();
    info!("thread-top finished");
    Ok(())
}
