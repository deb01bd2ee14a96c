use crate::errors::*;
use amiquip::{Auth, ConnectionOptions};
use percent_encoding::percent_decode_str;
use snafu::{ensure, OptionExt, ResultExt};
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;
use url::Url;

const AMQP_PORT: u16 = 5672;
const AMQPS_PORT: u16 = 5671;

/// The transport an address asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plain TCP. Also used for `tcp://` addresses.
    Amqp,

    /// TLS.
    Amqps,
}

impl Scheme {
    fn default_port(self) -> u16 {
        match self {
            Scheme::Amqp => AMQP_PORT,
            Scheme::Amqps => AMQPS_PORT,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Amqp => "amqp",
            Scheme::Amqps => "amqps",
        }
    }
}

/// Username and password used for PLAIN authentication.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where on the broker a message goes (or a subscription reads from).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// A queue, reached through the default exchange.
    Queue(String),

    /// A named exchange and the routing key to publish with.
    Routed {
        exchange: String,
        routing_key: String,
    },

    /// The address only names a broker.
    None,
}

impl Node {
    /// The exchange and routing key used when publishing to this node.
    pub fn publish_target(&self) -> Option<(&str, &str)> {
        match self {
            Node::Queue(queue) => Some(("", queue)),
            Node::Routed {
                exchange,
                routing_key,
            } => Some((exchange, routing_key)),
            Node::None => None,
        }
    }
}

/// Identifies a broker connection. Addresses with equal keys share a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrokerKey {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub virtual_host: String,
    pub username: Option<String>,
}

/// A parsed AMQP address of the form
/// `scheme://[user:password@]host[:port]/<node>[?query]`.
///
/// The node is either a single path segment naming a queue, or
/// `exchange/routing-key`. Supported query parameters are `vhost`, `heartbeat`, `channel_max`,
/// `connection_timeout` (milliseconds), and `auth_mechanism=external`.
#[derive(Debug, Clone, PartialEq)]
pub struct Address {
    pub(crate) scheme: Scheme,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) credentials: Option<Credentials>,
    pub(crate) virtual_host: String,
    pub(crate) node: Node,
    pub(crate) heartbeat: Option<u16>,
    pub(crate) channel_max: Option<u16>,
    pub(crate) connection_timeout: Option<Duration>,
    pub(crate) external_auth: bool,
}

impl Address {
    pub fn parse(address: &str) -> Result<Address> {
        let url = match Url::parse(address) {
            Err(url::ParseError::EmptyHost) => Url::parse(&with_default_host(address)),
            parsed => parsed,
        }
        .context(ParseUrlSnafu {
            url: redacted_str(address),
        })?;
        decode(&url)
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn virtual_host(&self) -> &str {
        &self.virtual_host
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn broker_key(&self) -> BrokerKey {
        BrokerKey {
            scheme: self.scheme,
            host: self.host.clone(),
            port: self.port,
            virtual_host: self.virtual_host.clone(),
            username: self.credentials.as_ref().map(|c| c.username.clone()),
        }
    }

    /// Connection options for `amiquip`, excluding client identification.
    pub fn connection_options(&self) -> ConnectionOptions<Auth> {
        let mut options = ConnectionOptions::default().virtual_host(self.virtual_host.clone());
        if self.external_auth {
            options = options.auth(Auth::External);
        } else if let Some(Credentials { username, password }) = &self.credentials {
            options = options.auth(Auth::Plain {
                username: username.clone(),
                password: password.clone(),
            });
        }
        if let Some(heartbeat) = self.heartbeat {
            options = options.heartbeat(heartbeat);
        }
        if let Some(channel_max) = self.channel_max {
            options = options.channel_max(channel_max);
        }
        if self.connection_timeout.is_some() {
            options = options.connection_timeout(self.connection_timeout);
        }
        options
    }
}

/// Displays the address without its credentials.
impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)?;
        match &self.node {
            Node::Queue(queue) => write!(f, "/{}", queue),
            Node::Routed {
                exchange,
                routing_key,
            } => write!(f, "/{}/{}", exchange, routing_key),
            Node::None => Ok(()),
        }
    }
}

fn percent_decode(s: &str) -> Cow<str> {
    percent_decode_str(s).decode_utf8_lossy()
}

fn decode(url: &Url) -> Result<Address> {
    let invalid = |reason: &'static str| InvalidAddressSnafu {
        url: redacted(url),
        reason,
    };

    let scheme = match url.scheme() {
        "amqp" | "tcp" => Scheme::Amqp,
        "amqps" => Scheme::Amqps,
        other => {
            return UnsupportedSchemeSnafu {
                url: redacted(url),
                scheme: other,
            }
            .fail()
        }
    };

    let host = match url.host_str() {
        None | Some("") => "localhost".to_string(),
        Some(host) => host.to_string(),
    };
    let port = url.port().unwrap_or_else(|| scheme.default_port());

    let credentials = match (url.username(), url.password()) {
        ("", None) => None,
        (username, Some(password)) if !username.is_empty() => Some(Credentials {
            username: percent_decode(username).to_string(),
            password: percent_decode(password).to_string(),
        }),
        _ => {
            return InvalidCredentialsSnafu {
                url: redacted(url),
            }
            .fail()
        }
    };

    let node = decode_node(url)?;

    let mut address = Address {
        scheme,
        host,
        port,
        credentials,
        virtual_host: "/".to_string(),
        node,
        heartbeat: None,
        channel_max: None,
        connection_timeout: None,
        external_auth: false,
    };

    for (k, v) in url.query_pairs() {
        match k.as_ref() {
            "vhost" => {
                address.virtual_host = v.to_string();
            }
            "heartbeat" => {
                let v = v.parse::<u16>().ok().context(invalid("bad heartbeat"))?;
                address.heartbeat = Some(v);
            }
            "channel_max" => {
                let v = v.parse::<u16>().ok().context(invalid("bad channel_max"))?;
                address.channel_max = Some(v);
            }
            "connection_timeout" => {
                let v = v
                    .parse::<u64>()
                    .ok()
                    .context(invalid("bad connection_timeout"))?;
                address.connection_timeout = Some(Duration::from_millis(v));
            }
            "auth_mechanism" => {
                ensure!(v == "external", invalid("unsupported auth_mechanism"));
                address.external_auth = true;
            }
            _ => return invalid("unknown query parameter").fail(),
        }
    }

    Ok(address)
}

fn decode_node(url: &Url) -> Result<Node> {
    let mut segments: Vec<&str> = match url.path_segments() {
        Some(segments) => segments.collect(),
        None => Vec::new(),
    };
    if segments.last() == Some(&"") {
        segments.pop();
    }

    match segments.as_slice() {
        [] => Ok(Node::None),
        [queue] => Ok(Node::Queue(percent_decode(queue).to_string())),
        ["", routing_key] => Ok(Node::Queue(percent_decode(routing_key).to_string())),
        [exchange, routing_key] => Ok(Node::Routed {
            exchange: percent_decode(exchange).to_string(),
            routing_key: percent_decode(routing_key).to_string(),
        }),
        _ => InvalidAddressSnafu {
            url: redacted(url),
            reason: "too many path segments",
        }
        .fail(),
    }
}

/// Splits `address` into the text before its authority, the authority, and the rest.
fn split_authority(address: &str) -> Option<(&str, &str, &str)> {
    let start = address.find("://")? + 3;
    let len = address[start..]
        .find(|c: char| c == '/' || c == '?' || c == '#')
        .unwrap_or(address.len() - start);
    let end = start + len;
    Some((&address[..start], &address[start..end], &address[end..]))
}

// url rejects an empty host when userinfo or a port is present
fn with_default_host(address: &str) -> String {
    match split_authority(address) {
        Some((head, authority, tail)) => {
            let host_at = authority.rfind('@').map_or(0, |at| at + 1);
            format!(
                "{}{}localhost{}{}",
                head,
                &authority[..host_at],
                &authority[host_at..],
                tail
            )
        }
        None => address.to_string(),
    }
}

// for addresses that did not parse, so `redacted` cannot be used
fn redacted_str(address: &str) -> String {
    match split_authority(address) {
        Some((head, authority, tail)) => match authority.rfind('@') {
            Some(at) => format!("{}***{}{}", head, &authority[at..], tail),
            None => address.to_string(),
        },
        None => address.to_string(),
    }
}

fn redacted(url: &Url) -> String {
    let mut url = url.clone();
    if url.password().is_some() {
        let _ = url.set_password(Some("***"));
    }
    url.to_string()
}
