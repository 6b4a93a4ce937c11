//! HTTP server for the hello service.
//!
//! Plain HTTP only. TLS is terminated in front of the service by the cluster.
//! The server drains in-flight requests on SIGTERM/SIGINT, bounded by a
//! grace period.

mod server;
mod shutdown;

pub use server::{start_server, ServerError};
