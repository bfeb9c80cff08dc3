//! A TCP connection core for embedded network stacks.
//!
//! ## Table of contents
//!
//! 1. [Design](#design-and-relevant-core-concepts)
//! 2. [The wire module](wire/index.html)
//!    1. [Sequence numbers and headers](wire/tcp/index.html)
//!    1. [Fragmented packets](wire/packet/index.html)
//! 3. [The tcp layer](layer/tcp/index.html)
//!    1. [Connections and their states](layer/tcp/struct.Connection.html)
//!    1. [The endpoint](layer/tcp/struct.Endpoint.html)
//!    1. [Collaborator interfaces](layer/tcp/io/index.html)
//!
//! ## Design and relevant core concepts
//!
//! The crate implements connection lifecycle, reliable delivery and flow control of TCP on top of
//! an IP layer that it does not own. Everything that is not the protocol itself, packet buffers,
//! the demultiplexer, the send path and a source of randomness, is consumed through small traits
//! in [`layer::tcp::io`].
//!
//! Nothing within `emtcp` allocates from a heap. Connection slots are passed in by the caller
//! during setup, each slot statically reserves its send buffer and its record of unacknowledged
//! segments. If there is no slot or no buffer space left then the operation that needed it fails
//! with [`layer::Error::Exhausted`] instead of growing a collection.
//!
//! All inbound segment processing and all timer callbacks are expected to run in one cooperative
//! worker context that calls [`Endpoint::input`] and [`Endpoint::poll`]. Application calls may
//! come from other threads. Each connection is a separate critical section, there is no ordering
//! between connections.
//!
//! [`layer::tcp::io`]: layer/tcp/io/index.html
//! [`layer::Error::Exhausted`]: layer/enum.Error.html#variant.Exhausted
//! [`Endpoint::input`]: layer/tcp/struct.Endpoint.html#method.input
//! [`Endpoint::poll`]: layer/tcp/struct.Endpoint.html#method.poll
#![warn(missing_docs)]
#![warn(unreachable_pub)]

// tests should be able to use `std`
#![cfg_attr(all(
    not(feature = "std"),
    not(test)),
no_std)]

#[macro_use] mod macros;
pub mod layer;
pub mod time;
pub mod wire;
