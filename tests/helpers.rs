// Shared test helpers: throwaway PKI, target servers and a mock proxy.
//
// Every server binds 127.0.0.1:0 and is addressed as `localhost`, so the
// generated certificates only need a `localhost` SAN.

#![allow(dead_code)] // Each test file uses a different subset

use std::sync::{Arc, Mutex};

use axum::Router;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

/// A throwaway certificate authority.
pub struct TestCa {
    pub cert_pem: String,
    params: CertificateParams,
    key: KeyPair,
}

/// A leaf certificate with its key.
pub struct Issued {
    pub cert_pem: String,
    pub key_pem: String,
    pub key: KeyPair,
}

impl TestCa {
    pub fn new(name: &str) -> Self {
        let key = KeyPair::generate().expect("CA key");
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(name.to_string()));
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let cert = params.clone().self_signed(&key).expect("CA cert");
        Self {
            cert_pem: cert.pem(),
            params,
            key,
        }
    }

    fn issue(&self, name: &str, purpose: ExtendedKeyUsagePurpose) -> Issued {
        let key = KeyPair::generate().expect("leaf key");
        let mut params = CertificateParams::new(vec![name.to_string()]).expect("leaf params");
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(name.to_string()));
        params.distinguished_name = dn;
        params.extended_key_usages = vec![purpose];
        let issuer = Issuer::from_params(&self.params, &self.key);
        let cert = params.signed_by(&key, &issuer).expect("leaf cert");
        Issued {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
            key,
        }
    }

    /// Server certificate for `localhost`.
    pub fn server_cert(&self) -> Issued {
        self.issue("localhost", ExtendedKeyUsagePurpose::ServerAuth)
    }

    /// Client certificate.
    pub fn client_cert(&self, name: &str) -> Issued {
        self.issue(name, ExtendedKeyUsagePurpose::ClientAuth)
    }
}

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn certs(pem: &str) -> Vec<CertificateDer<'static>> {
    rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .expect("cert pem")
}

fn key(pem: &str) -> PrivateKeyDer<'static> {
    rustls_pemfile::private_key(&mut pem.as_bytes())
        .expect("key pem")
        .expect("a private key")
}

/// TLS acceptor presenting `identity`, optionally requiring client certs from `client_ca`.
pub fn acceptor(identity: &Issued, client_ca: Option<&TestCa>) -> TlsAcceptor {
    let builder = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .expect("protocol versions");
    let builder = match client_ca {
        Some(ca) => {
            let mut roots = RootCertStore::empty();
            for cert in certs(&ca.cert_pem) {
                roots.add(cert).expect("client CA");
            }
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider())
                .build()
                .expect("client verifier");
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };
    let config = builder
        .with_single_cert(certs(&identity.cert_pem), key(&identity.key_pem))
        .expect("server config");
    TlsAcceptor::from(Arc::new(config))
}

/// Serves `app` on a fresh port, over TLS when `tls` is given. Returns the port.
pub async fn serve(app: Router, tls: Option<TlsAcceptor>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind target");
    let port = listener.local_addr().expect("local addr").port();
    tokio::spawn(async move {
        loop {
            let Ok((tcp, _)) = listener.accept().await else {
                return;
            };
            let service = TowerToHyperService::new(app.clone());
            let tls = tls.clone();
            tokio::spawn(async move {
                let http = hyper::server::conn::http1::Builder::new();
                match tls {
                    Some(acceptor) => {
                        if let Ok(stream) = acceptor.accept(tcp).await {
                            let _ = http.serve_connection(TokioIo::new(stream), service).await;
                        }
                    }
                    None => {
                        let _ = http.serve_connection(TokioIo::new(tcp), service).await;
                    }
                }
            });
        }
    });
    port
}

/// How the mock proxy answers CONNECT.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectReply {
    /// 200 followed by a stray `OK` body, like some real proxies send.
    EstablishedWithNoise,
    /// 403 Forbidden.
    Forbidden,
    /// Reads and logs the request head, then closes without answering.
    HangUp,
}

/// What the mock proxy saw.
#[derive(Clone, Default)]
pub struct ProxyLog {
    inner: Arc<Mutex<ProxyLogInner>>,
}

#[derive(Default)]
struct ProxyLogInner {
    events: Vec<String>,
    authorizations: Vec<String>,
}

impl ProxyLog {
    pub fn events(&self) -> Vec<String> {
        self.inner.lock().unwrap().events.clone()
    }

    pub fn authorizations(&self) -> Vec<String> {
        self.inner.lock().unwrap().authorizations.clone()
    }

    fn record(&self, event: String, authorization: Option<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.events.push(event);
        if let Some(auth) = authorization {
            inner.authorizations.push(auth);
        }
    }
}

/// Starts a proxy that supports CONNECT and absolute-form forwarding.
///
/// Returns the port and the log of requests it handled.
pub async fn start_proxy(tls: Option<TlsAcceptor>, reply: ConnectReply) -> (u16, ProxyLog) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind proxy");
    let port = listener.local_addr().expect("local addr").port();
    let log = ProxyLog::default();
    let task_log = log.clone();
    tokio::spawn(async move {
        loop {
            let Ok((tcp, _)) = listener.accept().await else {
                return;
            };
            let log = task_log.clone();
            let tls = tls.clone();
            tokio::spawn(async move {
                match tls {
                    Some(acceptor) => {
                        if let Ok(stream) = acceptor.accept(tcp).await {
                            handle_proxy_connection(stream, reply, log).await;
                        }
                    }
                    None => handle_proxy_connection(tcp, reply, log).await,
                }
            });
        }
    });
    (port, log)
}

/// Reads a request head one byte at a time so nothing after it is consumed.
async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> Option<String> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await.ok()? == 0 {
            return None;
        }
        head.push(byte[0]);
    }
    String::from_utf8(head).ok()
}

fn header_value(head: &str, name: &str) -> Option<String> {
    head.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().to_string())
    })
}

async fn handle_proxy_connection<S>(mut client: S, reply: ConnectReply, log: ProxyLog)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Some(head) = read_head(&mut client).await else {
        return;
    };
    let request_line = head.lines().next().unwrap_or_default().to_string();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();
    let authorization = header_value(&head, "proxy-authorization");

    if reply == ConnectReply::HangUp {
        let event = if method == "CONNECT" { "connect" } else { "forward" };
        log.record(format!("{event} {target}"), authorization);
        let _ = client.shutdown().await;
        return;
    }

    if method == "CONNECT" {
        log.record(format!("connect {target}"), authorization);
        if reply == ConnectReply::Forbidden {
            let _ = client
                .write_all(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n")
                .await;
            let _ = client.flush().await;
            return;
        }
        let Ok(mut upstream) = TcpStream::connect(target.as_str()).await else {
            let _ = client.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await;
            let _ = client.flush().await;
            return;
        };
        // Nonconforming body on a CONNECT response, sent in the same write
        if client
            .write_all(b"HTTP/1.1 200 Connection established\r\nProxy-Agent: mock-proxy\r\n\r\nOK")
            .await
            .is_err()
            || client.flush().await.is_err()
        {
            return;
        }
        let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
        return;
    }

    // Forward proxying: absolute-form request line
    log.record(format!("forward {target}"), authorization);
    let Ok(url) = url::Url::parse(&target) else {
        return;
    };
    let host = url.host_str().unwrap_or_default().to_string();
    let port = url.port_or_known_default().unwrap_or(80);
    let Ok(mut upstream) = TcpStream::connect((host.as_str(), port)).await else {
        return;
    };
    let origin_form = &url[url::Position::BeforePath..url::Position::AfterQuery];
    let mut rewritten = head.replacen(&target, origin_form, 1);
    if let Some(auth) = header_value(&head, "proxy-authorization") {
        rewritten = rewritten.replace(&format!("proxy-authorization: {auth}\r\n"), "");
    }
    if upstream.write_all(rewritten.as_bytes()).await.is_err() {
        return;
    }
    let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
}

/// PEM `ENCRYPTED PRIVATE KEY` (PBES2, PBKDF2-SHA256, AES-256-CBC) for `key`.
pub fn encrypt_key_pem(key: &KeyPair, passphrase: &str) -> String {
    use pkcs8::pkcs5::pbes2;
    use pkcs8::{LineEnding, PrivateKeyInfo};

    let der = key.serialize_der();
    let info = PrivateKeyInfo::try_from(der.as_slice()).expect("pkcs8 key");
    let salt = [0x5a_u8; 16];
    let iv = [0xa5_u8; 16];
    let params = pbes2::Parameters::pbkdf2_sha256_aes256cbc(2048, &salt, &iv).expect("pbes2");
    info.encrypt_with_params(params, passphrase)
        .expect("encrypt key")
        .to_pem("ENCRYPTED PRIVATE KEY", LineEnding::LF)
        .expect("pem")
        .to_string()
}
