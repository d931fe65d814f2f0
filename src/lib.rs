//! RFC 6455 WebSocket endpoint core for the Tokio stack.
//!
//! This library implements the per-connection half of the
//! [WebSocket Protocol RFC](https://datatracker.ietf.org/doc/html/rfc6455):
//! the frame reader and writer, masking, fragmentation bookkeeping,
//! ping/pong keep-alive, the close handshake and serialized writes over a
//! shared transport. It starts where the opening HTTP handshake ends: hand
//! [`connection::WebSocket`] an already-upgraded duplex stream (plain TCP or
//! TLS, see [`stream::EndpointStream`]) together with the negotiated role,
//! and drive it through `receive`, `send` and `close`.
//!
//! Accept loops, handshake parsing, TLS setup and connection registries are
//! deliberately left to the host application.

pub mod close;
pub mod config;
pub mod connection;
pub mod error;
pub mod extensions;
pub mod frame;
pub mod message;
mod ping;
pub mod pool;
mod queue;
mod read;
pub mod stream;
mod write;

#[cfg(test)]
mod tests;
