use crate::address::{Address, BrokerKey, Node};
use crate::errors::*;
use crate::{ConnectionBuilder, Message, Publisher, Subscription, TlsSettings};
use amiquip::{Connection, ConnectionTuning};
use indexmap::map::Entry;
use indexmap::IndexMap;
use log::{debug, info, warn};
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

/// Sends messages to, and subscribes to, AMQP addresses.
///
/// A `Messenger` is configured with the builder pattern, [started](#method.start), fed messages
/// with [`put`](#method.put), and flushed with [`send`](#method.send). One connection is kept per
/// broker (scheme, host, port, virtual host, and user) until [`stop`](#method.stop) is called or
/// the messenger is dropped.
///
/// ```rust,no_run
/// use courier::{Message, Messenger};
///
/// # fn main() -> courier::Result<()> {
/// let mut messenger = Messenger::new()
///     .certificate(Some("client.p12"))
///     .password(Some("bunnies"));
/// messenger.start()?;
/// messenger.put(Message::new("hello").with_address("amqps://broker.example/test-queue.abc"))?;
/// messenger.send()?;
/// messenger.stop()
/// # }
/// ```
pub struct Messenger {
    tls: TlsSettings,
    tuning: ConnectionTuning,
    timeout: Option<Duration>,
    declare_queues: bool,
    started: bool,
    #[cfg(feature = "native-tls")]
    connector: Option<native_tls::TlsConnector>,
    outgoing: VecDeque<Message>,
    links: IndexMap<BrokerKey, Link>,
}

// field order matters: the publisher's channel must drop before its connection
struct Link {
    publisher: Publisher,
    connection: Connection,
}

impl Link {
    fn open(builder: &ConnectionBuilder) -> Result<Link> {
        let mut connection = builder.open()?;
        let channel = connection.open_channel(None).context(AmqpSnafu)?;
        let publisher = Publisher::new(channel)?;
        Ok(Link {
            publisher,
            connection,
        })
    }

    fn close(self) -> Result<()> {
        let Link {
            publisher,
            connection,
        } = self;
        publisher.close()?;
        connection.close().context(AmqpSnafu)
    }
}

impl Default for Messenger {
    fn default() -> Self {
        Messenger::new()
    }
}

impl Drop for Messenger {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

impl Messenger {
    pub fn new() -> Messenger {
        Messenger {
            tls: TlsSettings::default(),
            tuning: ConnectionTuning::default(),
            timeout: None,
            declare_queues: false,
            started: false,
            #[cfg(feature = "native-tls")]
            connector: None,
            outgoing: VecDeque::new(),
            links: IndexMap::new(),
        }
    }

    /// Sets the client certificate presented on `amqps` connections.
    pub fn certificate<P: Into<PathBuf>>(mut self, certificate: Option<P>) -> Self {
        self.tls = self.tls.clone().certificate(certificate);
        self
    }

    /// Sets the private key belonging to a PEM certificate.
    pub fn private_key<P: Into<PathBuf>>(mut self, private_key: Option<P>) -> Self {
        self.tls = self.tls.clone().private_key(private_key);
        self
    }

    /// Sets the password of a PKCS#12 certificate archive.
    pub fn password<S: Into<String>>(mut self, password: Option<S>) -> Self {
        self.tls = self.tls.clone().password(password);
        self
    }

    /// Sets an extra CA certificate (PEM) to trust.
    pub fn trusted_certificates<P: Into<PathBuf>>(mut self, trusted: Option<P>) -> Self {
        self.tls = self.tls.clone().trusted_certificates(trusted);
        self
    }

    /// Bounds connecting and waiting for each publisher confirm. `None` (the default) waits
    /// forever.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn tuning(mut self, tuning: ConnectionTuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// If true, subscribing to a queue address declares the queue instead of requiring that it
    /// already exists. The default is false.
    pub fn declare_queues(mut self, declare_queues: bool) -> Self {
        self.declare_queues = declare_queues;
        self
    }

    /// Loads the TLS settings. Must be called before [`send`](#method.send) or
    /// [`subscribe`](#method.subscribe).
    pub fn start(&mut self) -> Result<()> {
        #[cfg(feature = "native-tls")]
        {
            self.connector = Some(self.tls.connector()?);
        }
        #[cfg(not(feature = "native-tls"))]
        {
            self.tls.read_identity()?;
        }
        self.started = true;
        debug!("messenger started");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Queues `message` for the next [`send`](#method.send). The message must have an address.
    pub fn put(&mut self, message: Message) -> Result<()> {
        ensure!(message.address().is_some(), MissingAddressSnafu);
        self.outgoing.push_back(message);
        Ok(())
    }

    /// The number of messages waiting to be sent.
    pub fn outgoing(&self) -> usize {
        self.outgoing.len()
    }

    /// Sends all queued messages in order, waiting for each to be confirmed, and returns their
    /// message ids.
    ///
    /// On failure the failed message and all messages after it stay queued. A connection that
    /// failed is discarded so the next `send` reconnects.
    pub fn send(&mut self) -> Result<Vec<String>> {
        ensure!(self.started, NotStartedSnafu);

        let mut sent = Vec::with_capacity(self.outgoing.len());
        while let Some(message) = self.outgoing.pop_front() {
            match self.deliver(&message) {
                Ok(message_id) => sent.push(message_id),
                Err(err) => {
                    self.outgoing.push_front(message);
                    return Err(err);
                }
            }
        }
        Ok(sent)
    }

    fn deliver(&mut self, message: &Message) -> Result<String> {
        let address = Address::parse(message.address().context(MissingAddressSnafu)?)?;
        ensure!(
            address.node() != &Node::None,
            MissingNodeSnafu {
                address: address.to_string()
            }
        );

        let key = address.broker_key();
        let builder = self.connection_builder(&address);
        let link = match self.links.entry(key.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(Link::open(&builder)?),
        };

        match link.publisher.publish(&address, message, self.timeout) {
            Ok(message_id) => Ok(message_id),
            Err(err) => {
                match err {
                    Error::Rejected { .. } | Error::Unroutable { .. } => (),
                    _ => {
                        warn!("dropping connection to {} after error: {}", address, err);
                        self.links.shift_remove(&key);
                    }
                }
                Err(err)
            }
        }
    }

    /// Opens a dedicated connection consuming from `address`.
    pub fn subscribe(&self, address: &str) -> Result<Subscription> {
        ensure!(self.started, NotStartedSnafu);
        let address = Address::parse(address)?;
        let builder = self.connection_builder(&address);
        Subscription::open(&builder, address, self.declare_queues)
    }

    /// Closes every open connection. Returns the first error encountered, after attempting to
    /// close all of them.
    pub fn stop(&mut self) -> Result<()> {
        let mut result = Ok(());
        for (key, link) in self.links.drain(..) {
            debug!("closing connection to {}:{}", key.host, key.port);
            if let Err(err) = link.close() {
                warn!("error closing connection to {}:{}: {}", key.host, key.port, err);
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        if self.started {
            info!("messenger stopped");
        }
        self.started = false;
        result
    }

    fn connection_builder(&self, address: &Address) -> ConnectionBuilder {
        let builder = ConnectionBuilder::from_address(address.clone())
            .tls(self.tls.clone())
            .tuning(self.tuning.clone())
            .timeout(self.timeout);
        #[cfg(feature = "native-tls")]
        let builder = builder.connector(self.connector.clone());
        builder
    }
}
