//! Pieces shared by the `send` and `collect` binaries.

use crate::{Error, Messenger};
use snafu::ErrorCompat;
use std::path::PathBuf;
use std::time::Duration;

/// Client identity flags.
#[derive(clap::Args, Clone, Debug, Default)]
pub struct TlsArgs {
    /// Client certificate: a PEM file (needs --private-key) or a PKCS#12 archive.
    #[arg(short = 'c', long)]
    pub certificate: Option<PathBuf>,

    /// PEM private key belonging to --certificate.
    #[arg(short = 'k', long)]
    pub private_key: Option<PathBuf>,

    /// Password of a PKCS#12 --certificate.
    #[arg(short = 'p', long)]
    pub password: Option<String>,

    /// Additional CA certificate (PEM) to trust.
    #[arg(long)]
    pub trusted_certificates: Option<PathBuf>,
}

impl TlsArgs {
    /// A messenger carrying these TLS settings and `timeout`, not yet started.
    pub fn messenger(&self, timeout: Option<Duration>) -> Messenger {
        Messenger::new()
            .certificate(self.certificate.clone())
            .private_key(self.private_key.clone())
            .password(self.password.clone())
            .trusted_certificates(self.trusted_certificates.clone())
            .timeout(timeout)
    }
}

/// The error followed by one `caused by:` line per source.
pub fn error_report(err: &Error) -> String {
    let mut report = err.to_string();
    for cause in ErrorCompat::iter_chain(err).skip(1) {
        report.push_str("\n  caused by: ");
        report.push_str(&cause.to_string());
    }
    report
}
