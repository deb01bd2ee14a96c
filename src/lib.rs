//! courier sends messages to, and collects messages from, AMQP 0-9-1 brokers such as RabbitMQ,
//! over plain TCP or TLS with an optional client certificate.
//!
//! The protocol work is done by [`amiquip`](https://docs.rs/amiquip); courier adds address
//! handling, client identity loading, publisher confirms, and file collection on top of it.
//!
//! # Addresses
//!
//! Addresses look like `scheme://[user:password@]host[:port]/<node>[?query]`:
//!
//! * `scheme` is `amqp`, `amqps` (TLS), or `tcp` (same as `amqp`).
//! * `node` is either a queue name, reached through the default exchange, or
//!   `exchange/routing-key`.
//! * `query` may set `vhost`, `heartbeat`, `channel_max`, `connection_timeout` (milliseconds), and
//!   `auth_mechanism=external`.
//!
//! # Example
//!
//! ```rust,no_run
//! use courier::{ContentType, Message, Messenger};
//!
//! # fn main() -> courier::Result<()> {
//! let mut messenger = Messenger::new();
//! messenger.start()?;
//! messenger.put(
//!     Message::new("<status>ok</status>")
//!         .with_address("amqp://localhost/test-queue.abc")
//!         .with_content_type(ContentType::APPLICATION_XML),
//! )?;
//! let ids = messenger.send()?;
//! println!("sent {:?}", ids);
//! messenger.stop()
//! # }
//! ```

mod address;
#[cfg(feature = "cli")]
pub mod cli;
mod collector;
mod connection;
mod errors;
mod message;
mod messenger;
mod publisher;
mod subscription;
mod tls;

#[cfg(test)]
mod integration_tests;

pub use address::{Address, BrokerKey, Credentials, Node, Scheme};
pub use collector::{render, Collector};
pub use connection::ConnectionBuilder;
pub use errors::{Error, Result};
pub use message::{ContentType, Message, SUBJECT_HEADER};
pub use messenger::Messenger;
pub use publisher::Publisher;
pub use subscription::Subscription;
pub use tls::TlsSettings;

pub use amiquip::ConnectionTuning;

#[allow(dead_code)]
mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}
