//! SPDY server metrics.

use metriken::{metric, Counter, Gauge};

#[metric(
    name = "connections_accepted",
    description = "Total number of connections accepted"
)]
pub static CONNECTIONS_ACCEPTED: Counter = Counter::new();

#[metric(
    name = "connections_active",
    description = "Number of currently active connections"
)]
pub static CONNECTIONS_ACTIVE: Gauge = Gauge::new();

#[metric(
    name = "connection_errors",
    description = "Connections that ended with a protocol or I/O error"
)]
pub static CONNECTION_ERRORS: Counter = Counter::new();

#[metric(name = "requests_handled", description = "Request streams handled")]
pub static REQUESTS_HANDLED: Counter = Counter::new();

#[metric(
    name = "streams_accepted",
    description = "Peer-initiated streams admitted by the engine"
)]
pub static STREAMS_ACCEPTED: Counter = Counter::new();

#[metric(
    name = "streams_refused",
    description = "Peer-initiated streams refused with REFUSED_STREAM"
)]
pub static STREAMS_REFUSED: Counter = Counter::new();

#[metric(
    name = "streams_reset",
    description = "Live streams torn down by RST_STREAM, ours or the peer's"
)]
pub static STREAMS_RESET: Counter = Counter::new();
