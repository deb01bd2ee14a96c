use snafu::Snafu;
use std::path::PathBuf;
use std::time::Duration;
use std::{io, result};

/// A type alias for handling errors throughout courier.
pub type Result<T, E = Error> = result::Result<T, E>;

/// Specific error cases returned by courier.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// The address could not be parsed as a URL.
    #[snafu(display("could not parse address {}", url))]
    ParseUrl { url: String, source: url::ParseError },

    /// The address uses a scheme other than `amqp`, `amqps`, or `tcp`.
    #[snafu(display("{} is not a valid amqp address (unsupported scheme {})", url, scheme))]
    UnsupportedScheme { url: String, scheme: String },

    /// The address is a valid URL but not a valid AMQP address.
    #[snafu(display("invalid amqp address {}: {}", url, reason))]
    InvalidAddress { url: String, reason: String },

    /// The user info of the address is not of the form `user:password`.
    #[snafu(display("unsupported user credentials provided in {}", url))]
    InvalidCredentials { url: String },

    /// A user was given without a password.
    #[snafu(display("user {} was provided without a password", user))]
    MissingPassword { user: String },

    /// A message has no address to send it to.
    #[snafu(display("message has no address"))]
    MissingAddress,

    /// The address does not name a queue or exchange to send to.
    #[snafu(display("address {} does not name a queue or exchange", address))]
    MissingNode { address: String },

    /// Could not read a certificate or key file.
    #[snafu(display("could not read {}", path.display()))]
    ReadFile { path: PathBuf, source: io::Error },

    /// A PEM certificate was given without its private key.
    #[snafu(display("certificate {} requires a private key", certificate.display()))]
    MissingPrivateKey { certificate: PathBuf },

    /// A private key was given without a certificate.
    #[snafu(display("private key {} was provided without a certificate", private_key.display()))]
    MissingCertificate { private_key: PathBuf },

    /// A password was given for a PEM private key.
    #[snafu(display(
        "password-protected PEM keys are not supported ({}); use a PKCS#12 archive instead",
        private_key.display()
    ))]
    EncryptedPemKey { private_key: PathBuf },

    /// Failed to build the TLS identity or connector.
    #[cfg(feature = "native-tls")]
    #[snafu(display("TLS configuration error"))]
    Tls { source: native_tls::Error },

    /// An `amqps` address was used without TLS support compiled in.
    #[snafu(display("amqps address {} requires the native-tls feature", url))]
    TlsFeatureNotEnabled { url: String },

    /// The broker host could not be resolved.
    #[snafu(display("could not resolve {}:{}", host, port))]
    Resolve {
        host: String,
        port: u16,
        source: io::Error,
    },

    /// The broker host resolved to no socket addresses.
    #[snafu(display("{}:{} resolved to no addresses", host, port))]
    NoSocketAddrs { host: String, port: u16 },

    /// The TCP connection to the broker failed.
    #[snafu(display("could not connect to {}", addr))]
    Connect {
        addr: std::net::SocketAddr,
        source: io::Error,
    },

    /// An error from the underlying AMQP client.
    #[snafu(display("AMQP error"))]
    Amqp { source: amiquip::Error },

    /// `send` or `subscribe` was called before `start`.
    #[snafu(display("messenger has not been started"))]
    NotStarted,

    /// The broker rejected (nacked) a published message.
    #[snafu(display("broker rejected message {} sent to {}", message_id, address))]
    Rejected { address: String, message_id: String },

    /// The broker could not route a published message.
    #[snafu(display(
        "message {} sent to {} was unroutable (code={} message={})",
        message_id,
        address,
        reply_code,
        reply_text
    ))]
    Unroutable {
        address: String,
        message_id: String,
        reply_code: u16,
        reply_text: String,
    },

    /// No publisher confirm arrived in time.
    #[snafu(display("timed out after {:?} waiting for confirm of message sent to {}", timeout, address))]
    ConfirmTimeout { address: String, timeout: Duration },

    /// The channel stopped delivering confirms before the message was confirmed.
    #[snafu(display("channel closed while waiting for confirm of message sent to {}", address))]
    ConfirmChannelClosed { address: String },

    /// The consumer of a subscription stopped unexpectedly.
    #[snafu(display("consumer on queue {} ended: {}", queue, reason))]
    ConsumerEnded { queue: String, reason: String },

    /// Could not create the collector's storage directory.
    #[snafu(display("could not create storage directory {}", path.display()))]
    CreateDir { path: PathBuf, source: io::Error },

    /// Could not store a collected message.
    #[snafu(display("could not store message to {}", path.display()))]
    Store { path: PathBuf, source: io::Error },
}
