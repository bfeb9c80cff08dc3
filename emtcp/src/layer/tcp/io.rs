//! Interfaces to the collaborators of the connection core.
//!
//! The core does not own packet buffers, the IP demultiplexer, the send path or the source of
//! randomness. Each is a small trait here and an endpoint is generic over their bundle, [`Io`].
//! Calls from the core into them happen with a connection locked, an implementation must not
//! call back into the endpoint.
//!
//! The application side is reached through plain function pointers and an opaque `usize` of user
//! data that is stored with the connection.
//!
//! [`Io`]: trait.Io.html
use crate::layer::{Error, Result};
use crate::wire::{IpEndpoint, Packet};

use super::connection::State;
use super::endpoint::SlotKey;

/// Hands out packet buffers for outbound segments.
pub trait PacketAlloc {
    /// A fresh packet.
    ///
    /// The packet may already contain headroom for the layers below, marked by its transport
    /// offset. Returns `None` if no buffer is available.
    fn alloc(&mut self) -> Option<Packet>;

    /// Return a packet that was not transmitted.
    fn release(&mut self, packet: Packet);
}

/// The send primitive of the IP layer.
pub trait Transmit {
    /// Send a finished segment.
    ///
    /// Success does not imply delivery.
    fn transmit(&mut self, packet: Packet) -> Result<()>;
}

/// Routes inbound segments to connections.
pub trait Demux {
    /// Route segments destined to `local` to the connection `key`.
    ///
    /// A missing `remote` registers a wildcard, as for a listening connection.
    fn register(&mut self, remote: Option<IpEndpoint>, local: IpEndpoint, key: SlotKey)
        -> Result<DemuxHandle>;

    /// Remove an earlier registration.
    fn unregister(&mut self, handle: DemuxHandle) -> Result<()>;
}

/// A source of random numbers.
pub trait Random {
    /// A random 32-bit value.
    fn rand_u32(&mut self) -> u32;
}

/// All collaborators of an endpoint.
pub trait Io: PacketAlloc + Transmit + Demux + Random { }

impl<T: PacketAlloc + Transmit + Demux + Random> Io for T { }

/// A registration with the demultiplexer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DemuxHandle(pub usize);

/// An opaque reference to the session that owns a connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SessionRef(pub usize);

/// Called once a passively opened connection is established.
pub type AcceptCallback = fn(SlotKey, usize);

/// Called for data and events of a connection.
pub type RecvCallback = fn(SlotKey, Received<'_>, usize);

/// Called on each state change with the old and the new state.
pub type StateObserver = fn(SlotKey, State, State);

/// An event handed to the receive callback.
#[derive(Clone, Copy, Debug)]
pub enum Received<'p> {
    /// In-order data.
    Data(Payload<'p>),
    /// The peer closed its side of the connection.
    Fin,
    /// The connection ended abnormally.
    Aborted(Error),
}

/// The data of a received segment.
///
/// Borrows the inbound packet, which continues to belong to the layer below.
#[derive(Clone, Copy, Debug)]
pub struct Payload<'p> {
    packet: &'p Packet,
    offset: usize,
    len: usize,
}

impl<'p> Payload<'p> {
    pub(crate) fn new(packet: &'p Packet, offset: usize, len: usize) -> Self {
        Payload { packet, offset, len }
    }

    /// The number of bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether there are no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy the start of the data into `buf`, returning the number of bytes copied.
    pub fn copy_to(&self, buf: &mut [u8]) -> usize {
        let count = self.len.min(buf.len());
        match self.packet.read(self.offset, &mut buf[..count]) {
            Ok(()) => count,
            Err(_) => 0,
        }
    }

    /// The packet that carries the data.
    pub fn packet(&self) -> &'p Packet {
        self.packet
    }

    /// The offset of the first data byte within the packet.
    pub fn offset(&self) -> usize {
        self.offset
    }
}
