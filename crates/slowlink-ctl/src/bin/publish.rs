use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use clap::Parser;
use serde_json::{Value, json};
use slowlink::{Publisher, PublisherConfig};
use tracing::{debug, info};

/// Demo producer: publishes a counter once a second, the shape of a real
/// slow-DAQ script.
#[derive(Parser)]
#[command(name = "publish")]
struct Args {
    /// Unique publisher name within the fabric.
    #[arg(long, default_value = "daq0")]
    name: String,

    #[arg(long, default_value = "127.0.0.1")]
    aggregator: String,

    #[arg(long, default_value_t = 3141)]
    port: u16,

    #[arg(long, value_parser = humantime::parse_duration, default_value = "15s")]
    heartbeat: Duration,

    /// Pacing between data frames (also the reactor tick timeout).
    #[arg(long, value_parser = humantime::parse_duration, default_value = "1s")]
    rate: Duration,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))?;

    let config = PublisherConfig::new(args.name, args.aggregator, args.port)
        .with_heartbeat_interval(args.heartbeat);
    let mut publisher = Publisher::new(config)?;
    info!(name = publisher.name(), listening = %publisher.listen_location(), "publisher up");

    let mut i: u64 = 0;
    while running.load(Ordering::SeqCst) {
        // Nothing is sent or received until the reactor turns over.
        publisher.serve(args.rate);

        let Value::Object(fields) = json!({ "i": i }) else { unreachable!() };
        let payload = publisher.pack(fields)?;
        publisher.queue(&payload);

        for message in publisher.take_inbox() {
            debug!(message = %String::from_utf8_lossy(&message), "inbox");
        }
        i += 1;
    }
    Ok(())
}
