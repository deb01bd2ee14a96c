use clap::Parser;
use courier::cli::{error_report, TlsArgs};
use courier::{Message, Result};
use log::debug;
use std::process;
use std::time::Duration;

/// Sends one message to an AMQP broker.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[command(flatten)]
    tls: TlsArgs,

    /// Seconds to wait for connecting and for the broker to confirm the message.
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Where to send the message.
    #[arg(long, default_value = "amqp://localhost/test-queue.abc")]
    address: String,

    /// Message body.
    #[arg(long, default_value = "pyhahaha")]
    body: String,

    /// Accepted for compatibility; the message always goes to --address.
    #[arg(value_name = "ADDR")]
    addresses: Vec<String>,
}

fn run(args: Args) -> Result<()> {
    if !args.addresses.is_empty() {
        debug!("ignoring positional addresses {:?}", args.addresses);
    }

    let mut messenger = args
        .tls
        .messenger(Some(Duration::from_secs(args.timeout)));
    messenger.start()?;
    messenger.put(Message::new(args.body).with_address(args.address))?;
    let ids = messenger.send()?;
    debug!("sent {:?}", ids);
    println!("send message");
    messenger.stop()
}

fn main() {
    env_logger::init();

    if let Err(err) = run(Args::parse()) {
        eprintln!("{}", error_report(&err));
        process::exit(1);
    }
}
