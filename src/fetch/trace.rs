//! Ordered diagnostic events for one logical request.
//!
//! Events are appended in attempt order and returned with the result, whether
//! the request succeeded or failed.

use std::fmt;

use serde::Serialize;

/// One segment of the path to the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Hop {
    /// Client to proxy.
    Proxy,
    /// Client (or tunnel) to origin.
    Target,
}

impl fmt::Display for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hop::Proxy => f.write_str("proxy"),
            Hop::Target => f.write_str("target"),
        }
    }
}

/// What happened at a hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum TraceAction {
    /// A CONNECT tunnel was opened through `proxy`.
    Connect {
        /// Proxy host:port.
        proxy: String,
    },
    /// An absolute-form request was sent to `proxy`.
    Forward {
        /// Proxy host:port.
        proxy: String,
    },
    /// Connected straight to the target.
    Direct,
    /// The target answered.
    Response {
        /// Response status code.
        status: u16,
    },
    /// A redirect was followed.
    Redirect {
        /// Redirect status code.
        status: u16,
        /// URL that answered with the redirect.
        from: String,
        /// Resolved next URL.
        to: String,
    },
}

/// A single trace entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEvent {
    /// Hop the event belongs to.
    pub hop: Hop,
    /// Target host:port the event concerns.
    pub host: String,
    /// The event itself.
    #[serde(flatten)]
    pub action: TraceAction,
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.action {
            TraceAction::Connect { .. } => write!(f, "connect {}", self.host),
            TraceAction::Forward { .. } => write!(f, "forward {}", self.host),
            TraceAction::Direct => write!(f, "direct {}", self.host),
            TraceAction::Response { status } => write!(f, "response {status}"),
            TraceAction::Redirect { status, to, .. } => write!(f, "redirect {status} {to}"),
        }
    }
}

/// Ordered event log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Trace {
    events: Vec<TraceEvent>,
}

impl Trace {
    /// Appends an event.
    pub fn push(&mut self, event: TraceEvent) {
        log::debug!("[{}] {}", event.hop, event);
        self.events.push(event);
    }

    /// Events in the order they happened.
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Iterates events in order.
    pub fn iter(&self) -> std::slice::Iter<'_, TraceEvent> {
        self.events.iter()
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// One short line per event, e.g. `["connect localhost:8080", "response 200"]`.
    pub fn summary(&self) -> Vec<String> {
        self.events.iter().map(ToString::to_string).collect()
    }

    /// Consumes the trace, returning its events.
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }
}

impl<'a> IntoIterator for &'a Trace {
    type Item = &'a TraceEvent;
    type IntoIter = std::slice::Iter<'a, TraceEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}
