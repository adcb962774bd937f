use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use clap::Parser;
use slowlink::{Subscriber, SubscriberConfig};
use tracing::info;

/// Subscriber console: follows the aggregator's directory, attaches to
/// every live publisher, and prints what they send.
#[derive(Parser)]
#[command(name = "watch")]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    aggregator: String,

    #[arg(long, default_value_t = 3141)]
    port: u16,

    #[arg(long, value_parser = humantime::parse_duration, default_value = "1s")]
    tick: Duration,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))?;

    let mut subscriber = Subscriber::new(SubscriberConfig::new(args.aggregator, args.port))?;
    info!("following the directory");

    while running.load(Ordering::SeqCst) {
        subscriber.serve(args.tick);

        let diff = subscriber.take_diff();
        for entry in &diff.add {
            let location = format!("{}:{}", entry.addr, entry.port);
            info!(name = %entry.name, location = %location, "+");
        }
        for entry in &diff.remove {
            info!(name = %entry.name, "-");
        }

        for frame in subscriber.take_data() {
            info!(frame = %String::from_utf8_lossy(&frame), "data");
        }
    }
    Ok(())
}
