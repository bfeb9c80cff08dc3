//! The process logic of the transport layer.
//!
//! ## Layering
//!
//! The protocol is split into two parts; the packet logic contained in `wire` and the processing
//! part in this module. An endpoint represents the local state of the protocol, here a table of
//! connections. This state can be used to process packets of that layer. The state is open to
//! inspection as part of a user program while processing does not take place.
//!
//! ## Receiving
//!
//! The layer below routes segments to a connection by its registration with a demultiplexer. The
//! connection processes them and hands the payload to a callback, the layer above does not
//! see the packet encapsulation.
//!
//! ## Sending
//!
//! Outbound segments are built within packets handed out by an allocator of the layer below and
//! then passed to its send primitive. None of these are owned by this crate, see the `io` module of
//! the [`tcp`] layer.
//!
//! [`tcp`]: tcp/index.html
use core::fmt;

pub mod tcp;

/// The result type of layer operations.
pub type Result<T> = core::result::Result<T, Error>;

/// The error type of the transport layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// The action could not be completed because there were not enough resources.
    ///
    /// No free connection slot, no packet buffer from the allocator or no room in a send buffer.
    /// The main difference towards `Illegal` is that implies that it would have been legal with
    /// more resources.
    Exhausted,

    /// A segment could not be parsed.
    Malformed,

    /// A segment was outside the receive window.
    OutOfWindow,

    /// The peer sent something that contradicts the protocol.
    ///
    /// Unexpected flags, or an acknowledgment for data that was never sent.
    ProtocolViolation,

    /// The connection gave up after too many retransmissions.
    RetryExhausted,

    /// The connection was shut down locally.
    Shutdown,

    /// The peer reset the connection.
    Reset,

    /// Not enough space for the requested options or packet.
    BadSize,

    /// The operation was not permitted.
    ///
    /// Returned when the operation is invalid in the current state of the connection, or when the
    /// key refers to a connection that no longer exists.
    Illegal,

    /// The send primitive could not transmit the packet.
    Unreachable,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Exhausted         => write!(f, "resources exhausted"),
            Error::Malformed         => write!(f, "malformed segment"),
            Error::OutOfWindow       => write!(f, "segment out of window"),
            Error::ProtocolViolation => write!(f, "protocol violation"),
            Error::RetryExhausted    => write!(f, "connection timed out"),
            Error::Shutdown          => write!(f, "connection is shut down"),
            Error::Reset             => write!(f, "connection reset by peer"),
            Error::BadSize           => write!(f, "bad size"),
            Error::Illegal           => write!(f, "illegal operation"),
            Error::Unreachable       => write!(f, "destination unreachable"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Can convert from a wire error.
///
/// This indicates the layer tried to interpret a segment but failed.
impl From<crate::wire::Error> for Error {
    fn from(_: crate::wire::Error) -> Self {
        Error::Malformed
    }
}

/// Can convert from a payload error.
///
/// One common cause is a packet buffer that is too small for the segment.
impl From<crate::wire::PayloadError> for Error {
    fn from(err: crate::wire::PayloadError) -> Self {
        use crate::wire::PayloadError;
        match err {
            PayloadError::BadSize => Error::Exhausted,
        }
    }
}
