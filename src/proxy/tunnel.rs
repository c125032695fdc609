//! HTTP CONNECT tunnel establishment.
//!
//! The flow for one tunneled attempt is:
//!
//! 1. Send `CONNECT host:port HTTP/1.1` over the (possibly TLS) proxy connection
//! 2. Read exactly one response head (status line + headers)
//! 3. Discard the body the proxy sent after the head: exactly the declared
//!    `Content-Length`, or everything that arrived with the head when none is
//!    declared. Bytes past a declared body are handed back as tunnel data
//! 4. On 2xx, hand back the raw stream; otherwise fail with the status line
//! 5. If the target is https, run the target TLS handshake inside the tunnel
//!    using the target trust context
//!
//! The CONNECT exchange is written and read by hand rather than through
//! hyper so that nonconforming response bodies can be dropped on purpose
//! instead of being mistaken for the first bytes of the tunneled protocol.

use bytes::Bytes;
use http::HeaderValue;
use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::config::MAX_CONNECT_RESPONSE_BYTES;
use crate::error_handling::{Error, TransportError, TunnelError};
use crate::fetch::{BoxedIo, Hop, Rewind, Trace, TraceAction, TraceEvent};
use crate::proxy::policy::Endpoint;
use crate::tls::TlsUpgrade;

/// Parameters of one CONNECT request.
#[derive(Debug, Clone)]
pub struct ConnectRequest<'a> {
    /// The proxy being asked to open the tunnel.
    pub proxy: &'a Endpoint,
    /// The tunnel destination.
    pub target: &'a Endpoint,
    /// `Proxy-Authorization` value derived from the proxy URL credentials.
    pub proxy_authorization: Option<&'a HeaderValue>,
    /// User-Agent sent to the proxy.
    pub user_agent: &'a str,
}

impl ConnectRequest<'_> {
    /// Serializes the CONNECT request head.
    pub fn to_bytes(&self) -> Vec<u8> {
        let authority = self.target.authority();
        let mut head = format!(
            "CONNECT {authority} HTTP/1.1\r\n\
             Host: {authority}\r\n\
             User-Agent: {}\r\n",
            self.user_agent
        )
        .into_bytes();
        if let Some(auth) = self.proxy_authorization {
            head.extend_from_slice(b"Proxy-Authorization: ");
            head.extend_from_slice(auth.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        head.extend_from_slice(b"\r\n");
        head
    }
}

/// Parsed CONNECT response head.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ConnectHead {
    status: u16,
    status_line: String,
    content_length: Option<u64>,
}

/// Opens a tunnel through `conn` and, for https targets, secures it.
///
/// # Arguments
///
/// * `conn` - Established connection to the proxy (already TLS for https proxies)
/// * `request` - CONNECT parameters
/// * `target_tls` - Target-hop TLS settings; never the proxy's trust context
/// * `trace` - Receives a `connect` event once the proxy acknowledges the tunnel
///
/// # Errors
///
/// - `TunnelError::Rejected` for any non-2xx CONNECT status
/// - `TunnelError::MalformedResponse` when the proxy's answer is not HTTP
/// - `TunnelError::Handshake` when the target TLS handshake fails
/// - `TransportError::Io` when the proxy connection breaks mid-exchange
pub async fn establish(
    conn: BoxedIo,
    request: &ConnectRequest<'_>,
    target_tls: &TlsUpgrade<'_>,
    trace: &mut Trace,
) -> Result<BoxedIo, Error> {
    let conn = open_tunnel(conn, request).await?;

    trace.push(TraceEvent {
        hop: Hop::Proxy,
        host: request.target.authority(),
        action: TraceAction::Connect {
            proxy: request.proxy.authority(),
        },
    });

    if request.target.secure {
        target_tls.upgrade(conn, &request.target.host).await
    } else {
        Ok(conn)
    }
}

/// Performs the CONNECT exchange and returns the promoted raw stream.
async fn open_tunnel(mut conn: BoxedIo, request: &ConnectRequest<'_>) -> Result<BoxedIo, Error> {
    let proxy = request.proxy.authority();
    let target = request.target.authority();
    let io_error = |source| TransportError::Io {
        hop: Hop::Proxy,
        host: proxy.clone(),
        source,
    };

    debug!("CONNECT {} via proxy {}", target, proxy);
    conn.write_all(&request.to_bytes()).await.map_err(io_error)?;
    conn.flush().await.map_err(io_error)?;

    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    let head_len = loop {
        if let Some(end) = find_head_end(&buf) {
            break end;
        }
        if buf.len() > MAX_CONNECT_RESPONSE_BYTES {
            return Err(TunnelError::MalformedResponse {
                proxy,
                detail: format!(
                    "response head exceeds {} bytes",
                    MAX_CONNECT_RESPONSE_BYTES
                ),
            }
            .into());
        }
        let n = conn.read(&mut chunk).await.map_err(io_error)?;
        if n == 0 {
            return Err(TunnelError::MalformedResponse {
                proxy,
                detail: "connection closed before the CONNECT response was complete".to_string(),
            }
            .into());
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = parse_connect_head(&buf[..head_len]).map_err(|detail| {
        TunnelError::MalformedResponse {
            proxy: proxy.clone(),
            detail,
        }
    })?;

    if !(200..300).contains(&head.status) {
        return Err(TunnelError::Rejected {
            proxy,
            target,
            status_line: head.status_line,
        }
        .into());
    }

    // CONNECT responses have no body, but some proxies send one anyway. A
    // declared body is skipped exactly; bytes past it belong to the tunnel.
    // Without a declared length, whatever arrived with the head is noise.
    let after_head = Bytes::from(buf.split_off(head_len));
    let tunnel_bytes = match head.content_length {
        Some(declared) => {
            if declared > MAX_CONNECT_RESPONSE_BYTES as u64 {
                return Err(TunnelError::MalformedResponse {
                    proxy,
                    detail: format!(
                        "CONNECT response declares a {declared}-byte body (limit {MAX_CONNECT_RESPONSE_BYTES})"
                    ),
                }
                .into());
            }
            let buffered = after_head.len() as u64;
            if declared > 0 {
                warn!(
                    "Discarding {} byte CONNECT response body from proxy {}",
                    declared, proxy
                );
            }
            if declared > buffered {
                drain(&mut conn, declared - buffered)
                    .await
                    .map_err(io_error)?;
            }
            after_head.slice(declared.min(buffered) as usize..)
        }
        None => {
            if !after_head.is_empty() {
                warn!(
                    "Discarding {} undeclared bytes after CONNECT response from proxy {}",
                    after_head.len(),
                    proxy
                );
            }
            Bytes::new()
        }
    };

    debug!("Tunnel to {} established via {} ({})", target, proxy, head.status_line);
    if tunnel_bytes.is_empty() {
        Ok(conn)
    } else {
        Ok(Box::new(Rewind::new(conn, tunnel_bytes)))
    }
}

/// Reads and drops exactly `len` bytes.
async fn drain<R>(reader: &mut R, len: u64) -> std::io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let copied = tokio::io::copy(&mut reader.take(len), &mut tokio::io::sink()).await?;
    if copied < len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "proxy closed the connection while sending the CONNECT response body",
        ));
    }
    Ok(())
}

/// Returns the length of the response head including the blank line.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

fn parse_connect_head(head: &[u8]) -> Result<ConnectHead, String> {
    let text = std::str::from_utf8(head).map_err(|_| "response head is not valid UTF-8".to_string())?;
    let mut lines = text.split("\r\n");
    let status_line = lines.next().unwrap_or_default().trim().to_string();

    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(format!("unexpected status line '{}'", status_line));
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| (100..1000).contains(code))
        .ok_or_else(|| format!("invalid status code in '{}'", status_line))?;

    let mut content_length = None;
    for line in lines.filter(|line| !line.is_empty()) {
        let Some((name, value)) = line.split_once(':') else {
            return Err(format!("malformed header line '{}'", line));
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            content_length = Some(
                value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| format!("invalid Content-Length '{}'", value.trim()))?,
            );
        }
    }

    Ok(ConnectHead {
        status,
        status_line,
        content_length,
    })
}
