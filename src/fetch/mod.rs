//! Request execution.
//!
//! This module provides:
//! - `Client`: runs logical requests against a shared, read-only configuration
//! - The redirect state machine and per-attempt connection logic
//! - Request, body, response and trace types
//!
//! Each logical request owns its connections for its whole lifetime; nothing is
//! pooled or shared between concurrent requests apart from the configuration.

mod attempt;
mod body;
mod connection;
mod exchange;
pub mod redirects;
mod request;
mod response;
mod trace;

use std::sync::Arc;

use crate::config::ClientConfig;
use crate::error_handling::TransportError;

pub use body::{Body, ByteStream, OneShotStream};
pub use connection::{BoxedIo, Connector, Io, TcpConnector};
pub(crate) use connection::Rewind;
pub use redirects::{decide_redirect, RedirectDecision, RequestAttempt};
pub use request::Request;
pub use response::{Exchange, Response};
pub use trace::{Hop, Trace, TraceAction, TraceEvent};

/// HTTP(S) client engine.
///
/// Cheap to clone; clones share configuration and connector.
///
/// # Examples
///
/// ```no_run
/// use tunnel_fetch::{Client, ClientConfig, Request};
///
/// # async fn run() {
/// let client = Client::new(ClientConfig {
///     proxy: Some("http://proxy.internal:3128".parse().unwrap()),
///     ..Default::default()
/// });
/// let exchange = client.execute(Request::get("https://example.com/")).await;
/// println!("{:?}", exchange.trace.summary());
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    connector: Arc<dyn Connector>,
}

impl Client {
    /// Creates a client that dials with `TcpConnector`.
    pub fn new(config: ClientConfig) -> Self {
        let connector = Arc::new(TcpConnector::new(config.connect_timeout));
        Self::with_connector(config, connector)
    }

    /// Creates a client with a custom connector.
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config: Arc::new(config),
            connector,
        }
    }

    /// The shared configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }

    /// Executes a logical request, following redirects per configuration.
    ///
    /// The deadline (request timeout, else `ClientConfig::timeout`) and the
    /// request's cancellation token cover every attempt. When either fires the
    /// in-flight attempt is dropped together with its connection.
    ///
    /// # Returns
    ///
    /// An `Exchange` holding the result and the ordered trace. The trace is
    /// populated even when the result is an error.
    pub async fn execute(&self, request: Request) -> Exchange {
        let deadline = request.timeout.unwrap_or(self.config.timeout);
        let cancel = request.cancel.clone().unwrap_or_default();
        let mut trace = Trace::default();

        let result = {
            let run = redirects::run(self, request, &mut trace);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TransportError::Cancelled.into()),
                outcome = tokio::time::timeout(deadline, run) => {
                    outcome.unwrap_or_else(|_| Err(TransportError::Timeout(deadline).into()))
                }
            }
        };

        if let Err(e) = &result {
            log::debug!("Request failed ({}): {}", e.category(), e);
        }
        Exchange { trace, result }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
