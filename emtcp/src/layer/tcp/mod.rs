//! The TCP layer abstraction.
//!
//! Offers connection setup, reliable delivery of a byte stream and orderly teardown on top of an
//! ip layer that is not part of this crate. Relevant material for reading:
//!
//! * Main TCP rfc: https://tools.ietf.org/html/rfc793
//! * Errata and host requirements: https://tools.ietf.org/html/rfc1122#section-4.2
//! * Retransmission timer: https://tools.ietf.org/html/rfc6298
//!
//! Many incoming events *require* soliciting an answer such as an ACK for received data, so the
//! layer needs to allocate and send packets on its own. It does this through the traits of the
//! [`io`] module, the ip layer provides them.
//!
//! Note that a few simplifications are made compared to a general purpose stack:
//! * There is no reassembly queue. Segments that do not start at the next expected sequence number
//!   are acknowledged and dropped, relying on the retransmission of the peer.
//! * The send buffer and the list of unacknowledged segments have a fixed size per connection.
//!   Queueing data returns how much was accepted.
//! * Neither congestion control nor fast retransmit are implemented, only the retransmission timer
//!   with exponential backoff.
//!
//! ## Structure
//!
//! The main functionality of the [`Endpoint`] is storing the connection states in caller provided
//! [`Slot`]s, unlike other layers which mostly store configuration options. A connection is
//! referred to by a [`SlotKey`] that is invalidated once the connection closes and its slot is
//! reused.
//!
//! It poses no problem for this library to allow inspection of internal state, see
//! [`Endpoint::with_connection`] and [`Endpoint::foreach`].
//!
//! ## Creating a connection
//!
//! Create a connection, bind it to a local endpoint and then call [`Endpoint::connect`]. The
//! returned [`ConnectWait`] resolves when the handshake completes or fails. Waiting on it must
//! happen on another thread than the one processing inbound segments.
//!
//! ## Accepting connections
//!
//! A SYN for a listening connection allocates a new slot which answers the handshake. The new
//! connection inherits the local endpoint and both callbacks of the listener, the accept callback
//! is invoked with its key once the handshake is complete. The listener itself stays registered
//! and keeps accepting until it is closed. Without a free slot the request is dropped and
//! [`Endpoint::input`] returns `Exhausted`.
//!
//! ## Concurrency
//!
//! Each connection is protected by its own lock. The lock of the collaborators and the lock of the
//! slot pool are only taken while holding a connection lock, never the other way around. The only
//! place holding two connection locks is an accepting listener, which locks the freshly claimed
//! slot after its own.
//! Callbacks are invoked with the connection locked and must not call back into the endpoint for
//! the same connection.
//!
//! [`io`]: io/index.html
//! [`Endpoint`]: struct.Endpoint.html
//! [`Slot`]: struct.Slot.html
//! [`SlotKey`]: struct.SlotKey.html
//! [`Endpoint::with_connection`]: struct.Endpoint.html#method.with_connection
//! [`Endpoint::foreach`]: struct.Endpoint.html#method.foreach
//! [`Endpoint::connect`]: struct.Endpoint.html#method.connect
//! [`Endpoint::input`]: struct.Endpoint.html#method.input
//! [`ConnectWait`]: struct.ConnectWait.html
pub mod completion;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod io;
pub mod retransmit;
pub mod segment;
pub mod timer;
pub mod window;

#[cfg(test)]
mod tests;

pub use self::completion::{Completion, ConnectWait};
pub use self::config::Config;
pub use self::connection::{Connection, ConnectionFlags, Operator, State};
pub use self::endpoint::{Endpoint, Slot, SlotKey, Stats};
pub use self::io::{
    AcceptCallback,
    Demux,
    DemuxHandle,
    Io,
    PacketAlloc,
    Payload,
    Random,
    Received,
    RecvCallback,
    SessionRef,
    StateObserver,
    Transmit,
};
pub use self::retransmit::{RetryPolicy, SendBuffer, SentEntry, SentList};
pub use self::timer::{TimerKind, TimerToken};
pub use self::window::SeqClass;
