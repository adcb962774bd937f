use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use clap::Parser;
use slowlink::{Aggregator, AggregatorConfig, DEFAULT_ROTATE_THRESHOLD, Repeater};
use tracing::{info, warn};

/// Broker for a slowlink fabric: collects publisher telemetry, keeps the
/// live directory, and appends every data frame to a durable log.
#[derive(Parser)]
#[command(name = "aggregator")]
struct Args {
    /// Address to listen on. Loopback blocks remote publishers.
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    #[arg(long, default_value_t = 3141)]
    port: u16,

    /// Directory for incremental.log and rotated side-files.
    #[arg(long, default_value = "agg")]
    logdir: PathBuf,

    /// Rotate the log once it exceeds this many bytes.
    #[arg(long, default_value_t = DEFAULT_ROTATE_THRESHOLD)]
    rotate_bytes: u64,

    /// Reactor tick timeout.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "1s")]
    tick: Duration,

    /// How often to append the buffer to disk and summarize the directory.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5s")]
    log_every: Duration,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))?;

    let config = AggregatorConfig::new(args.bind, args.port, args.logdir)
        .with_rotate_threshold(args.rotate_bytes);
    let mut aggregator = Aggregator::new(config)?;
    info!(addr = %aggregator.listen_location(), "aggregator up");

    let mut log_timer = Repeater::every(args.log_every);
    while running.load(Ordering::SeqCst) {
        aggregator.serve(args.tick);
        if log_timer.fired() {
            if let Err(err) = aggregator.log() {
                warn!(%err, "log append failed, buffer kept");
            }
            info!(publishers = aggregator.snapshot().len(), "directory");
            for entry in aggregator.snapshot().entries() {
                let location = format!("{}:{}", entry.addr, entry.port);
                info!(name = %entry.name, location = %location, status = %entry.status, "live");
            }
        }
    }

    // Flush whatever the last ticks buffered before going down.
    aggregator.log()?;
    Ok(())
}
