use clap::Parser;
use courier::cli::{error_report, TlsArgs};
use courier::{Address, Collector, Messenger, Result};
use log::{error, info};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::Duration;

/// Stores every message arriving at an AMQP address as a file.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Address to subscribe to, e.g. amqp://localhost/test-queue.abc
    address: String,

    /// Directory for the message files. A new temporary directory if omitted.
    storage_dir: Option<PathBuf>,

    #[command(flatten)]
    tls: TlsArgs,

    /// Seconds to wait before resubscribing after a failure.
    #[arg(long, default_value_t = 5)]
    retry_delay: u64,

    /// Stop after this many messages.
    #[arg(long)]
    limit: Option<u64>,

    /// Declare the queue if it does not exist yet.
    #[arg(long)]
    declare: bool,
}

fn collect(messenger: &Messenger, args: &Args, collector: &mut Collector) -> Result<()> {
    let subscription = messenger.subscribe(&args.address)?;
    subscription.listen(|message| {
        info!("received: {}", message);
        if let Err(err) = collector.store(&message) {
            error!("{}", error_report(&err));
        }
        match args.limit {
            Some(limit) if collector.count() >= limit => Ok(ControlFlow::Break(())),
            _ => Ok(ControlFlow::Continue(())),
        }
    })?;
    subscription.close()
}

fn run(args: Args) -> Result<()> {
    // retrying cannot fix a malformed address
    Address::parse(&args.address)?;

    let mut collector = match &args.storage_dir {
        Some(dir) => Collector::new(dir)?,
        None => Collector::in_temp_dir()?,
    };

    let mut messenger = args.tls.messenger(None).declare_queues(args.declare);
    messenger.start()?;

    let retry_delay = Duration::from_secs(args.retry_delay);
    loop {
        match collect(&messenger, &args, &mut collector) {
            Ok(()) => break,
            Err(err) => {
                error!("{}", error_report(&err));
                info!("resubscribing in {:?}", retry_delay);
                thread::sleep(retry_delay);
            }
        }
    }

    info!(
        "collected {} messages in {}",
        collector.count(),
        collector.dir().display()
    );
    messenger.stop()
}

fn main() {
    env_logger::init();

    if let Err(err) = run(Args::parse()) {
        eprintln!("{}", error_report(&err));
        process::exit(1);
    }
}
