//! A single attempt: select proxy, connect, tunnel, send, read.

use log::debug;

use crate::config::proxy_for;
use crate::error_handling::{Error, TransportError};
use crate::fetch::body::{Body, PreparedBody};
use crate::fetch::connection::BoxedIo;
use crate::fetch::exchange::{self, RequestForm};
use crate::fetch::redirects::RequestAttempt;
use crate::fetch::response::Response;
use crate::fetch::trace::{Hop, Trace, TraceAction, TraceEvent};
use crate::fetch::Client;
use crate::proxy::{self, decide, ConnectRequest, Endpoint, ProxyMode};
use crate::tls::TlsUpgrade;

/// Runs one attempt and returns its fully read response.
///
/// The proxy and the proxy/tunnel plan are chosen from this attempt's URL only.
/// The body is prepared before any connection is opened, so a body that cannot
/// be produced never leaves partial bytes on the wire.
pub(crate) async fn send(
    client: &Client,
    attempt: &RequestAttempt,
    body: &Body,
    trace: &mut Trace,
) -> Result<Response, Error> {
    let config = client.config();
    let target = Endpoint::from_target(&attempt.url)?;
    let proxy_url = proxy_for(config, &attempt.url)?;
    let plan = decide(&attempt.url, proxy_url.as_ref(), config.tunnel)?;

    let prepared = if attempt.keep_body {
        PreparedBody::prepare(body).await?
    } else {
        PreparedBody::empty()
    };

    let target_tls = TlsUpgrade {
        trust: &config.target_trust,
        hop: Hop::Target,
        timeout: config.tls_handshake_timeout,
    };

    let (io, form, proxy_authorization, peer) = match (plan.mode, plan.proxy.as_ref()) {
        (ProxyMode::Forward, Some(proxy_url)) => {
            let proxy = Endpoint::from_proxy(proxy_url)?;
            let io = connect_proxy(client, &proxy).await?;
            trace.push(TraceEvent {
                hop: Hop::Proxy,
                host: target.authority(),
                action: TraceAction::Forward {
                    proxy: proxy.authority(),
                },
            });
            let peer = (Hop::Proxy, proxy.authority());
            (io, RequestForm::Absolute, proxy::proxy_authorization(proxy_url), peer)
        }
        (ProxyMode::Tunnel, Some(proxy_url)) => {
            let proxy = Endpoint::from_proxy(proxy_url)?;
            let authorization = proxy::proxy_authorization(proxy_url);
            let io = connect_proxy(client, &proxy).await?;
            let connect = ConnectRequest {
                proxy: &proxy,
                target: &target,
                proxy_authorization: authorization.as_ref(),
                user_agent: &config.user_agent,
            };
            let io = proxy::establish(io, &connect, &target_tls, trace).await?;
            (io, RequestForm::Origin, None, (Hop::Target, target.authority()))
        }
        _ => {
            let io = dial(client, &target, Hop::Target).await?;
            let io = if target.secure {
                target_tls.upgrade(io, &target.host).await?
            } else {
                io
            };
            trace.push(TraceEvent {
                hop: Hop::Target,
                host: target.authority(),
                action: TraceAction::Direct,
            });
            (io, RequestForm::Origin, None, (Hop::Target, target.authority()))
        }
    };

    let request = exchange::build_request(
        attempt,
        form,
        prepared,
        proxy_authorization.as_ref(),
        &config.user_agent,
    )?;
    let (peer_hop, peer_host) = peer;
    let (status, headers, bytes) = exchange::send(io, request, peer_hop, &peer_host).await?;

    trace.push(TraceEvent {
        hop: Hop::Target,
        host: target.authority(),
        action: TraceAction::Response {
            status: status.as_u16(),
        },
    });

    Ok(Response {
        url: attempt.url.clone(),
        status,
        headers,
        body: bytes,
        redirects: attempt.redirect_count,
    })
}

/// Opens a TCP connection for `hop`.
async fn dial(client: &Client, endpoint: &Endpoint, hop: Hop) -> Result<BoxedIo, Error> {
    client
        .connector()
        .connect(&endpoint.host, endpoint.port)
        .await
        .map_err(|source| {
            TransportError::Connect {
                hop,
                addr: endpoint.authority(),
                source,
            }
            .into()
        })
}

/// Connects to the proxy, with TLS when the proxy URL is https.
async fn connect_proxy(client: &Client, proxy: &Endpoint) -> Result<BoxedIo, Error> {
    let io = dial(client, proxy, Hop::Proxy).await?;
    if !proxy.secure {
        return Ok(io);
    }
    debug!("Securing connection to proxy {}", proxy.authority());
    let config = client.config();
    TlsUpgrade {
        trust: &config.proxy_trust,
        hop: Hop::Proxy,
        timeout: config.tls_handshake_timeout,
    }
    .upgrade(io, &proxy.host)
    .await
}
