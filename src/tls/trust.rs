//! Trust context to rustls configuration.

use std::sync::Arc;

use pkcs8::{EncryptedPrivateKeyInfo, SecretDocument};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, InconsistentKeys, RootCertStore};

use super::TrustContext;
use crate::error_handling::TunnelError;
use crate::fetch::Hop;

const ENCRYPTED_KEY_LABEL: &str = "ENCRYPTED PRIVATE KEY";

/// Builds the rustls client configuration for one hop.
///
/// # Errors
///
/// Returns `TunnelError::Trust` for unreadable PEM input and
/// `TunnelError::Handshake` when the client key does not belong to the
/// client certificate.
pub(crate) fn client_config(
    trust: &TrustContext,
    hop: Hop,
    host: &str,
) -> Result<ClientConfig, TunnelError> {
    let trust_error = |detail: String| TunnelError::Trust { hop, detail };
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let roots = root_store(trust).map_err(trust_error)?;
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| trust_error(e.to_string()))?
        .with_root_certificates(roots);

    let mut config = match (&trust.client_cert, &trust.client_key) {
        (Some(cert_pem), Some(key_pem)) => {
            let chain = parse_certs(cert_pem).map_err(trust_error)?;
            if chain.is_empty() {
                return Err(trust_error(
                    "client certificate PEM contains no certificates".to_string(),
                ));
            }
            let key = parse_private_key(key_pem, trust.passphrase.as_deref())
                .map_err(trust_error)?;
            check_keys_match(&provider, &chain, &key).map_err(|detail| {
                TunnelError::Handshake {
                    hop,
                    host: host.to_string(),
                    detail,
                }
            })?;
            builder
                .with_client_auth_cert(chain, key)
                .map_err(|e| TunnelError::Handshake {
                    hop,
                    host: host.to_string(),
                    detail: e.to_string(),
                })?
        }
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(trust_error(
                "client certificate and client key must be supplied together".to_string(),
            ))
        }
    };

    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

fn root_store(trust: &TrustContext) -> Result<RootCertStore, String> {
    let mut roots = RootCertStore::empty();
    match &trust.ca_bundle {
        Some(pem) => {
            let certs = parse_certs(pem)?;
            if certs.is_empty() {
                return Err("CA bundle contains no certificates".to_string());
            }
            for cert in certs {
                roots
                    .add(cert)
                    .map_err(|e| format!("unusable CA certificate: {e}"))?;
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }
    Ok(roots)
}

fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, String> {
    rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid certificate PEM: {e}"))
}

/// Parses a PEM private key, decrypting encrypted PKCS#8 with `passphrase`.
///
/// The PEM label decides the path: `ENCRYPTED PRIVATE KEY` is decoded and
/// decrypted with pkcs8, anything else is left to rustls-pemfile.
fn parse_private_key(
    pem: &[u8],
    passphrase: Option<&str>,
) -> Result<PrivateKeyDer<'static>, String> {
    let text = std::str::from_utf8(pem).map_err(|_| "client key is not valid PEM".to_string())?;

    if let Ok((ENCRYPTED_KEY_LABEL, document)) = SecretDocument::from_pem(text.trim()) {
        let passphrase =
            passphrase.ok_or_else(|| "encrypted client key requires a passphrase".to_string())?;
        let encrypted = EncryptedPrivateKeyInfo::try_from(document.as_bytes())
            .map_err(|e| format!("invalid encrypted key: {e}"))?;
        let decrypted = encrypted
            .decrypt(passphrase)
            .map_err(|_| "failed to decrypt client key (bad passphrase?)".to_string())?;
        return Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            decrypted.as_bytes().to_vec(),
        )));
    }

    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| format!("invalid client key PEM: {e}"))?
        .ok_or_else(|| "client key PEM contains no private key".to_string())
}

fn check_keys_match(
    provider: &CryptoProvider,
    chain: &[CertificateDer<'static>],
    key: &PrivateKeyDer<'static>,
) -> Result<(), String> {
    let signing_key = provider
        .key_provider
        .load_private_key(key.clone_key())
        .map_err(|e| format!("unsupported client key: {e}"))?;
    match CertifiedKey::new(chain.to_vec(), signing_key).keys_match() {
        Ok(()) | Err(rustls::Error::InconsistentKeys(InconsistentKeys::Unknown)) => Ok(()),
        Err(e) => Err(format!("key values mismatch: {e}")),
    }
}
