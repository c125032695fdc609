//! tunnel_fetch library: HTTP(S) client engine for proxies, tunnels and redirects
//!
//! This library sends HTTP/1.1 requests directly, through forward proxies or
//! through CONNECT tunnels (with TLS on either or both hops), follows redirect
//! chains that cross http/https boundaries, and rebuilds request bodies,
//! including `multipart/form-data`, for every attempt that must resend them.
//!
//! # Example
//!
//! ```no_run
//! use tunnel_fetch::{Client, ClientConfig, FormPart, MultipartSpec, Request};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::new(ClientConfig {
//!     proxy: Some("http://proxy.internal:3128".parse()?),
//!     follow_all_redirects: true,
//!     ..Default::default()
//! });
//!
//! let form = MultipartSpec::ordered()
//!     .part(FormPart::new("field", "value"))
//!     .part(FormPart::new("my_file", vec![0u8; 16]).filename("topsecret.jpg"));
//!
//! let exchange = client
//!     .execute(Request::post("https://api.example.com/upload").form(form))
//!     .await;
//! println!("trace: {:?}", exchange.trace.summary());
//! let response = exchange.result?;
//! println!("{} after {} redirect(s)", response.status(), response.redirects());
//! # Ok(())
//! # }
//! ```
//!
//! # Requirements
//!
//! This library requires a Tokio runtime. Use `#[tokio::main]` in your application
//! or ensure you're calling library functions within an async context.

#![warn(missing_docs)]

pub mod config;
mod error_handling;
pub mod fetch;
pub mod initialization;
pub mod multipart;
pub mod proxy;
pub mod tls;

pub use config::{ClientConfig, FollowPredicate, LogFormat, LogLevel};
pub use error_handling::{
    Error, ErrorCategory, InitializationError, MultipartError, PolicyError, TransportError,
    TunnelError,
};
pub use fetch::{
    Body, Client, Connector, Exchange, Hop, RedirectDecision, Request, RequestAttempt, Response,
    TcpConnector, Trace, TraceAction, TraceEvent,
};
pub use multipart::{FieldValue, FormPart, MultipartBody, MultipartSpec, PartOptions, PartSource};
pub use proxy::{decide, ProxyMode, ProxyPlan};
pub use tls::TrustContext;
