/*! Low-level packet access and construction.

# An overview over packet representations

The `wire` module deals with the representation of TCP segments. It provides three levels of
functionality.

 * Field layout and byte order. The header fields live at fixed offsets, read and written through
   `byteorder::NetworkEndian`, see the [`tcp`] module.
 * A compact, high-level representation of the fixed header ([`TcpHeader`]) and of the options
   that a connection cares about ([`TcpOptions`]). These are parsed from and emitted into
   contiguous octets.
 * A packet buffer made of fixed-size fragments ([`Packet`]). A segment handed over by the IP layer
   is not necessarily contiguous, neither is one that we build, so every access that crosses a
   fragment boundary goes through copying accessors of the packet.

[`tcp`]: tcp/index.html
[`TcpHeader`]: struct.TcpHeader.html
[`TcpOptions`]: struct.TcpOptions.html
[`Packet`]: struct.Packet.html

The checksum primitives and the IPv4 addressing types needed for the pseudo header are in the
[`ip`] module.

[`ip`]: ip/index.html
*/
// Copyright (C) 2016 whitequark@whitequark.org
// Copyright (C) 2019 Andreas Molzer <andreas.molzer@tum.de>
//
// in large parts from `smoltcp` originally distributed under 0-clause BSD
//
// Applies to files in this folder unless otherwise noted. These are:
// * `error.rs`
// * `ip.rs`
// * `mod.rs` (this file)
// * `tcp.rs`

mod field {
    pub(crate) type Field = ::core::ops::Range<usize>;
}

mod error;
pub mod ip;
pub mod packet;
pub mod tcp;

pub use self::error::{
    Error,
    Result};

pub use self::ip::{
    Address as IpAddress,
    Endpoint as IpEndpoint,
    Ipv4Address,
    Protocol as IpProtocol};

pub use self::packet::{
    Error as PayloadError,
    Fragment,
    Packet};

pub use self::tcp::{
    Flags as TcpFlags,
    Header as TcpHeader,
    OptionKind as TcpOptionKind,
    Options as TcpOptions,
    SeqNumber as TcpSeqNumber,
    TcpOption};
