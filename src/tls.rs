use crate::errors::*;
use log::{debug, warn};
use snafu::{ensure, OptionExt, ResultExt};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

const PEM_PREAMBLE: &[u8] = b"-----BEGIN";

/// TLS settings used for `amqps` connections: an optional client identity and an optional
/// extra trusted root certificate.
///
/// The client identity is either
///
/// * a PEM certificate together with an unencrypted PEM (PKCS#8) private key, or
/// * a PKCS#12 archive holding both, unlocked with [`password`](#method.password).
///
/// The format is picked from the certificate file's contents; anything that does not start with
/// a PEM header is treated as PKCS#12.
#[derive(Clone, Default, PartialEq)]
pub struct TlsSettings {
    certificate: Option<PathBuf>,
    private_key: Option<PathBuf>,
    password: Option<String>,
    trusted_certificates: Option<PathBuf>,
}

impl fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TlsSettings")
            .field("certificate", &self.certificate)
            .field("private_key", &self.private_key)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("trusted_certificates", &self.trusted_certificates)
            .finish()
    }
}

#[derive(Debug, PartialEq)]
pub(crate) enum ClientIdentity {
    Pem { certificate: Vec<u8>, key: Vec<u8> },
    Pkcs12 { archive: Vec<u8>, password: String },
}

impl TlsSettings {
    /// Sets the client certificate (PEM or PKCS#12).
    pub fn certificate<P: Into<PathBuf>>(self, certificate: Option<P>) -> Self {
        TlsSettings {
            certificate: certificate.map(Into::into),
            ..self
        }
    }

    /// Sets the PEM private key belonging to a PEM certificate.
    pub fn private_key<P: Into<PathBuf>>(self, private_key: Option<P>) -> Self {
        TlsSettings {
            private_key: private_key.map(Into::into),
            ..self
        }
    }

    /// Sets the password of a PKCS#12 certificate archive.
    pub fn password<S: Into<String>>(self, password: Option<S>) -> Self {
        TlsSettings {
            password: password.map(Into::into),
            ..self
        }
    }

    /// Sets a PEM CA certificate to trust in addition to the system roots.
    pub fn trusted_certificates<P: Into<PathBuf>>(self, trusted_certificates: Option<P>) -> Self {
        TlsSettings {
            trusted_certificates: trusted_certificates.map(Into::into),
            ..self
        }
    }

    pub fn has_identity(&self) -> bool {
        self.certificate.is_some() || self.private_key.is_some()
    }

    pub(crate) fn read_identity(&self) -> Result<Option<ClientIdentity>> {
        let certificate = match (&self.certificate, &self.private_key) {
            (None, None) => return Ok(None),
            (None, Some(private_key)) => {
                return MissingCertificateSnafu { private_key }.fail();
            }
            (Some(certificate), _) => certificate,
        };

        let contents = read(certificate)?;
        if is_pem(&contents) {
            let private_key = self
                .private_key
                .as_ref()
                .context(MissingPrivateKeySnafu { certificate })?;
            ensure!(
                self.password.is_none(),
                EncryptedPemKeySnafu { private_key }
            );
            debug!("using PEM client identity {}", certificate.display());
            Ok(Some(ClientIdentity::Pem {
                certificate: contents,
                key: read(private_key)?,
            }))
        } else {
            if let Some(private_key) = &self.private_key {
                warn!(
                    "ignoring private key {}; {} is read as a PKCS#12 archive",
                    private_key.display(),
                    certificate.display()
                );
            }
            debug!("using PKCS#12 client identity {}", certificate.display());
            Ok(Some(ClientIdentity::Pkcs12 {
                archive: contents,
                password: self.password.clone().unwrap_or_default(),
            }))
        }
    }

    /// Builds a `native_tls::TlsConnector` from these settings, reading every configured file.
    #[cfg(feature = "native-tls")]
    pub fn connector(&self) -> Result<native_tls::TlsConnector> {
        let mut builder = native_tls::TlsConnector::builder();
        if let Some(identity) = self.read_identity()? {
            let identity = match identity {
                ClientIdentity::Pem { certificate, key } => {
                    native_tls::Identity::from_pkcs8(&certificate, &key)
                }
                ClientIdentity::Pkcs12 { archive, password } => {
                    native_tls::Identity::from_pkcs12(&archive, &password)
                }
            }
            .context(TlsSnafu)?;
            builder.identity(identity);
        }
        if let Some(path) = &self.trusted_certificates {
            let pem = read(path)?;
            let root = native_tls::Certificate::from_pem(&pem).context(TlsSnafu)?;
            builder.add_root_certificate(root);
        }
        builder.build().context(TlsSnafu)
    }
}

fn is_pem(contents: &[u8]) -> bool {
    let start = contents
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(contents.len());
    contents[start..].starts_with(PEM_PREAMBLE)
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).context(ReadFileSnafu { path })
}
