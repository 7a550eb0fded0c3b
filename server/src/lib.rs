//! SPDY demo server.
//!
//! A small embedding of the `spdy` engine: a plaintext accept loop, a
//! demonstration request handler, TOML configuration, structured logging,
//! and process metrics. TLS termination and NPN/ALPN version selection
//! are expected to happen in front of this binary.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod priority;
pub mod run;

pub use config::Config;
