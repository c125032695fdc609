//! TLS for both hops.
//!
//! This module provides:
//! - `TrustContext`: CA bundle, client identity and key passphrase for one hop
//! - `TlsUpgrade`: wraps an established stream in a rustls client session
//!
//! The proxy hop and the target hop each get their own `TrustContext`. A tunneled
//! https request performs two independent handshakes and never uses the proxy's
//! context for the target or the other way round.
//!
//! Uses `tokio-rustls` with the `ring` provider passed explicitly, so no
//! process-wide crypto provider has to be installed.

mod trust;

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use log::debug;
use rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;

use crate::error_handling::{Error, TransportError, TunnelError};
use crate::fetch::{BoxedIo, Hop};

use trust::client_config;

/// Trust inputs for one hop's TLS handshake.
///
/// All inputs are PEM. With no CA bundle the bundled webpki roots are used.
/// A client certificate and key must be supplied together; an encrypted
/// PKCS#8 key additionally needs `passphrase`.
#[derive(Clone, Default)]
pub struct TrustContext {
    /// PEM CA certificates used to validate the peer.
    pub ca_bundle: Option<Bytes>,
    /// PEM client certificate chain presented to the peer.
    pub client_cert: Option<Bytes>,
    /// PEM client private key (PKCS#1, SEC1, PKCS#8 or encrypted PKCS#8).
    pub client_key: Option<Bytes>,
    /// Passphrase for an encrypted client key.
    pub passphrase: Option<String>,
}

impl TrustContext {
    /// Creates an empty context that trusts the bundled web roots.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trusts only the certificates in `pem`.
    pub fn with_ca_bundle(mut self, pem: impl Into<Bytes>) -> Self {
        self.ca_bundle = Some(pem.into());
        self
    }

    /// Presents `cert` with `key` as the client identity.
    pub fn with_client_identity(mut self, cert: impl Into<Bytes>, key: impl Into<Bytes>) -> Self {
        self.client_cert = Some(cert.into());
        self.client_key = Some(key.into());
        self
    }

    /// Sets the passphrase for an encrypted client key.
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Loads the PEM inputs from files.
    ///
    /// # Errors
    ///
    /// Returns the I/O error of the first file that cannot be read.
    pub fn from_files(
        ca_bundle: Option<&Path>,
        client_cert: Option<&Path>,
        client_key: Option<&Path>,
    ) -> std::io::Result<Self> {
        let read = |path: Option<&Path>| -> std::io::Result<Option<Bytes>> {
            path.map(|p| std::fs::read(p).map(Bytes::from)).transpose()
        };
        Ok(Self {
            ca_bundle: read(ca_bundle)?,
            client_cert: read(client_cert)?,
            client_key: read(client_key)?,
            passphrase: None,
        })
    }

    /// True when a client certificate is configured.
    pub fn has_client_identity(&self) -> bool {
        self.client_cert.is_some()
    }
}

impl fmt::Debug for TrustContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustContext")
            .field("ca_bundle", &self.ca_bundle.as_ref().map(Bytes::len))
            .field("client_cert", &self.client_cert.is_some())
            .field("client_key", &self.client_key.as_ref().map(|_| "<redacted>"))
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// TLS client settings for one hop.
#[derive(Debug, Clone, Copy)]
pub struct TlsUpgrade<'a> {
    /// Trust inputs for this hop only.
    pub trust: &'a TrustContext,
    /// Hop the handshake belongs to, for error attribution.
    pub hop: Hop,
    /// Handshake deadline.
    pub timeout: Duration,
}

impl TlsUpgrade<'_> {
    /// Runs a TLS client handshake over `io` for `host`.
    ///
    /// # Errors
    ///
    /// - `TunnelError::Trust` when the trust context cannot be loaded
    /// - `TunnelError::Handshake` on certificate validation failure, key mismatch or alerts
    /// - `TransportError::Timeout` when the handshake exceeds the deadline
    pub async fn upgrade(&self, io: BoxedIo, host: &str) -> Result<BoxedIo, Error> {
        let config = client_config(self.trust, self.hop, host)?;

        let server_name = ServerName::try_from(host.to_string()).map_err(|e| {
            TunnelError::Handshake {
                hop: self.hop,
                host: host.to_string(),
                detail: format!("invalid server name: {e}"),
            }
        })?;

        let connector = TlsConnector::from(Arc::new(config));
        match tokio::time::timeout(self.timeout, connector.connect(server_name, io)).await {
            Ok(Ok(stream)) => {
                debug!(
                    "TLS established with {} {} ({:?})",
                    self.hop,
                    host,
                    stream.get_ref().1.protocol_version()
                );
                Ok(Box::new(stream))
            }
            Ok(Err(e)) => Err(TunnelError::Handshake {
                hop: self.hop,
                host: host.to_string(),
                detail: e.to_string(),
            }
            .into()),
            Err(_) => Err(TransportError::Timeout(self.timeout).into()),
        }
    }
}
