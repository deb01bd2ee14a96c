use crate::address::{Address, Credentials, Scheme};
use crate::errors::*;
use crate::TlsSettings;
use amiquip::{Auth, Connection, ConnectionOptions, ConnectionTuning};
use log::{debug, info, warn};
use snafu::{ensure, ResultExt};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// Builds and opens connections to an AMQP broker.
///
/// Credentials given with [`user`](#method.user) and [`password`](#method.password) are used
/// only when the address itself carries none; a user without a password is an error.
///
/// ```rust,no_run
/// use courier::ConnectionBuilder;
///
/// # fn main() -> courier::Result<()> {
/// let mut connection = ConnectionBuilder::new("amqp://localhost/orders")?
///     .user("guest")
///     .password("guest")
///     .open()?;
/// let _channel = connection.open_channel(None);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionBuilder {
    address: Address,
    user: Option<String>,
    password: Option<String>,
    tls: TlsSettings,
    #[cfg(feature = "native-tls")]
    connector: Option<native_tls::TlsConnector>,
    tuning: ConnectionTuning,
    timeout: Option<Duration>,
}

impl ConnectionBuilder {
    /// Parses `address`. Fails if it is malformed or does not use the `amqp`, `amqps`, or `tcp`
    /// scheme.
    pub fn new(address: &str) -> Result<ConnectionBuilder> {
        Ok(ConnectionBuilder::from_address(Address::parse(address)?))
    }

    pub fn from_address(address: Address) -> ConnectionBuilder {
        ConnectionBuilder {
            address,
            user: None,
            password: None,
            tls: TlsSettings::default(),
            #[cfg(feature = "native-tls")]
            connector: None,
            tuning: ConnectionTuning::default(),
            timeout: None,
        }
    }

    pub fn user<S: Into<String>>(self, user: S) -> Self {
        ConnectionBuilder {
            user: Some(user.into()),
            ..self
        }
    }

    pub fn password<S: Into<String>>(self, password: S) -> Self {
        ConnectionBuilder {
            password: Some(password.into()),
            ..self
        }
    }

    /// Sets the TLS settings used for `amqps` addresses.
    pub fn tls(self, tls: TlsSettings) -> Self {
        ConnectionBuilder { tls, ..self }
    }

    pub fn tuning(self, tuning: ConnectionTuning) -> Self {
        ConnectionBuilder { tuning, ..self }
    }

    /// Sets the TCP connect timeout. Overrides the address's `connection_timeout` parameter.
    pub fn timeout(self, timeout: Option<Duration>) -> Self {
        ConnectionBuilder { timeout, ..self }
    }

    /// Uses an already built connector instead of building one from the TLS settings.
    #[cfg(feature = "native-tls")]
    pub(crate) fn connector(self, connector: Option<native_tls::TlsConnector>) -> Self {
        ConnectionBuilder { connector, ..self }
    }

    /// The final address, with credentials resolved.
    pub fn build(&self) -> Result<Address> {
        if let Some(user) = &self.user {
            ensure!(self.password.is_some(), MissingPasswordSnafu { user });
        }

        let mut address = self.address.clone();
        if address.credentials.is_none() {
            if let (Some(user), Some(password)) = (&self.user, &self.password) {
                address.credentials = Some(Credentials {
                    username: user.trim().to_string(),
                    password: password.trim().to_string(),
                });
            }
        }
        Ok(address)
    }

    pub fn open(&self) -> Result<Connection> {
        let address = self.build()?;
        let options = address
            .connection_options()
            .information(Some(client_information()));
        let timeout = self.timeout.or(address.connection_timeout);

        match address.scheme() {
            Scheme::Amqp => {
                self.ignores_identity(&address);
                let tuning = &self.tuning;
                open_each(&address, timeout, |stream| {
                    Connection::insecure_open_stream(stream, options.clone(), tuning.clone())
                })
            }
            Scheme::Amqps => self.open_amqps(&address, timeout, options),
        }
    }

    /// Warns and returns true if a client identity is configured for a plain `amqp` address.
    fn ignores_identity(&self, address: &Address) -> bool {
        let ignored = address.scheme() == Scheme::Amqp && self.tls.has_identity();
        if ignored {
            warn!("ignoring client certificate for non-TLS address {}", address);
        }
        ignored
    }

    #[cfg(feature = "native-tls")]
    fn open_amqps(
        &self,
        address: &Address,
        timeout: Option<Duration>,
        options: ConnectionOptions<Auth>,
    ) -> Result<Connection> {
        let connector = match &self.connector {
            Some(connector) => connector.clone(),
            None => self.tls.connector()?,
        };
        let tuning = &self.tuning;
        open_each(address, timeout, |stream| {
            Connection::open_tls_stream(
                connector.clone(),
                address.host(),
                stream,
                options.clone(),
                tuning.clone(),
            )
        })
    }

    #[cfg(not(feature = "native-tls"))]
    fn open_amqps(
        &self,
        address: &Address,
        _: Option<Duration>,
        _: ConnectionOptions<Auth>,
    ) -> Result<Connection> {
        TlsFeatureNotEnabledSnafu {
            url: address.to_string(),
        }
        .fail()
    }
}

fn client_information() -> String {
    format!(
        "{} {} ({})",
        crate::built_info::PKG_NAME,
        crate::built_info::PKG_VERSION,
        crate::built_info::CFG_OS
    )
}

/// Tries each resolved socket address in turn, returning the first connection that opens or the
/// last error.
fn open_each<F>(address: &Address, timeout: Option<Duration>, open: F) -> Result<Connection>
where
    F: Fn(mio::net::TcpStream) -> amiquip::Result<Connection>,
{
    let host = address.host();
    let port = address.port();
    let mut last_err = NoSocketAddrsSnafu { host, port }.build();
    let addrs = (host, port)
        .to_socket_addrs()
        .context(ResolveSnafu { host, port })?;

    for addr in addrs {
        debug!("connecting to {} ({})", address, addr);
        let result =
            connect_stream(addr, timeout).and_then(|stream| open(stream).context(AmqpSnafu));
        match result {
            Ok(connection) => {
                info!("connected to {} ({})", address, addr);
                return Ok(connection);
            }
            Err(err) => {
                debug!("could not connect to {}: {}", addr, err);
                last_err = err;
            }
        }
    }
    Err(last_err)
}

fn connect_stream(addr: SocketAddr, timeout: Option<Duration>) -> Result<mio::net::TcpStream> {
    let stream = match timeout {
        Some(timeout) => std::net::TcpStream::connect_timeout(&addr, timeout),
        None => std::net::TcpStream::connect(addr),
    }
    .context(ConnectSnafu { addr })?;
    mio::net::TcpStream::from_stream(stream).context(ConnectSnafu { addr })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation() {
        let address = ConnectionBuilder::new("amqp://localhost").unwrap().build().unwrap();
        assert_eq!(address.host(), "localhost");
        assert_eq!(address.credentials(), None);
    }

    #[test]
    fn user_without_password() {
        let builder = ConnectionBuilder::new("amqp://localhost").unwrap().user("test");
        match builder.build() {
            Err(Error::MissingPassword { user }) => assert_eq!(user, "test"),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(builder.open().is_err());
    }

    #[test]
    fn identity_ignored_on_plain_address() {
        let tls = TlsSettings::default()
            .certificate(Some("/nonexistent/client.pem"))
            .private_key(Some("/nonexistent/client.key"));

        let plain = ConnectionBuilder::new("amqp://127.0.0.1:1/q")
            .unwrap()
            .tls(tls.clone())
            .timeout(Some(Duration::from_secs(1)));
        assert!(plain.ignores_identity(&plain.build().unwrap()));

        // the certificate files are never read, so the failure is the refused connect
        match plain.open() {
            Err(Error::Connect { addr, .. }) => assert_eq!(addr.port(), 1),
            Err(err) => panic!("unexpected error {}", err),
            Ok(_) => panic!("connected to port 1"),
        }

        let secure = ConnectionBuilder::new("amqps://127.0.0.1:1/q").unwrap().tls(tls);
        assert!(!secure.ignores_identity(&secure.build().unwrap()));

        let bare = ConnectionBuilder::new("amqp://127.0.0.1:1/q").unwrap();
        assert!(!bare.ignores_identity(&bare.build().unwrap()));
    }

    #[test]
    fn wrong_scheme() {
        assert!(ConnectionBuilder::new("http://localhost").is_err());
    }

    #[test]
    fn explicit_credentials_are_trimmed() {
        let address = ConnectionBuilder::new("amqp://localhost/q")
            .unwrap()
            .user(" alice ")
            .password("s3cret\n")
            .build()
            .unwrap();
        assert_eq!(
            address.credentials(),
            Some(&Credentials {
                username: "alice".to_string(),
                password: "s3cret".to_string(),
            })
        );
    }

    #[test]
    fn address_credentials_win() {
        let address = ConnectionBuilder::new("amqp://bob:pw@localhost/q")
            .unwrap()
            .user("alice")
            .password("other")
            .build()
            .unwrap();
        assert_eq!(address.credentials().map(|c| c.username.as_str()), Some("bob"));
    }

    #[test]
    fn malformed_user_info() {
        match ConnectionBuilder::new("amqp://bob@localhost/q") {
            Err(Error::InvalidCredentials { .. }) => (),
            Err(err) => panic!("unexpected error {}", err),
            Ok(_) => panic!("malformed user info accepted"),
        }
    }

    #[test]
    fn information_names_crate() {
        assert!(client_information().starts_with("courier "));
    }
}
