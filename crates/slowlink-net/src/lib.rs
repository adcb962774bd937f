//! Non-blocking TCP substrate for the slowlink fabric.
//!
//! [`Stream`] wraps one socket with framing, an inbound decoder, and
//! outbound queues; [`Server`] multiplexes a set of streams through one
//! `mio` poll, retries failed outbound connects on every tick, and
//! dispatches to a [`Handler`]. Roles compose a `Server` with a handler
//! value; the reactor never raises out of a callback, as every socket
//! operation makes progress, closes the stream, or is a no-op.

mod error;
mod server;
mod stream;

pub use error::NetError;
pub use server::{Handler, Server, StreamId, StreamSet};
pub use stream::{CONNECT_TIMEOUT, Role, Status, Stream};
