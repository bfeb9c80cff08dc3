//! Building and parsing segments within fragmented packets.
//!
//! The header of a segment starts at the transport offset of its packet and may cross a fragment
//! boundary. Reading goes through a copy of the few bytes that are needed. Writing goes through a
//! [`HeaderMut`] view that borrows the header bytes in place when they are contiguous and
//! otherwise edits a scratch copy that [`set_header`] commits back.
//!
//! [`HeaderMut`]: struct.HeaderMut.html
//! [`set_header`]: fn.set_header.html
use core::ops::Range;

use byteorder::{ByteOrder, NetworkEndian};

use crate::layer::{Error, Result};
use crate::wire::{self, IpEndpoint, IpProtocol, Packet, TcpFlags, TcpHeader, TcpOption, TcpOptions, TcpSeqNumber};
use crate::wire::ip::checksum::{self, Accumulator};
use crate::wire::tcp::{field, HEADER_LEN, MAX_HEADER_LEN};

use super::config::MAX_OPTIONS_LEN;
use super::connection::{Connection, State};
use super::io::PacketAlloc;

/// A mutable view of the fixed header of a packet.
pub struct HeaderMut<'p> {
    packet: &'p mut Packet,
    storage: Storage,
}

enum Storage {
    InPlace {
        index: usize,
        range: Range<usize>,
    },
    Scratch([u8; HEADER_LEN]),
}

/// An inbound segment that passed the codec checks.
#[derive(Clone, Copy, Debug)]
pub struct Inbound<'p> {
    /// The fixed header.
    pub header: TcpHeader,
    /// The recognized options.
    pub options: TcpOptions,
    /// The packet holding the segment.
    pub packet: &'p Packet,
    /// The offset of the first payload byte within the packet.
    pub payload_offset: usize,
    /// The number of payload bytes.
    pub payload_len: usize,
}

/// Everything that goes into one outbound segment.
struct Outbound<'d> {
    local: IpEndpoint,
    remote: IpEndpoint,
    seq: TcpSeqNumber,
    ack: TcpSeqNumber,
    flags: TcpFlags,
    window: u16,
    options: &'d [u8],
    payload: [&'d [u8]; 2],
}

impl HeaderMut<'_> {
    /// The raw header bytes.
    pub fn bytes(&mut self) -> &mut [u8] {
        match &mut self.storage {
            Storage::InPlace { index, range } =>
                self.packet.fragment_bytes_mut(*index, range.clone()),
            Storage::Scratch(bytes) => &mut bytes[..],
        }
    }

    /// Parse the current content of the view.
    pub fn header(&self) -> wire::Result<TcpHeader> {
        match &self.storage {
            Storage::InPlace { index, range } =>
                TcpHeader::parse(self.packet.fragment_bytes(*index, range.clone())),
            Storage::Scratch(bytes) => TcpHeader::parse(&bytes[..]),
        }
    }

    /// Overwrite the header.
    pub fn set(&mut self, header: &TcpHeader) {
        header.emit(self.bytes())
    }

    /// Whether the view is a copy of bytes from several fragments.
    pub fn is_scratch(&self) -> bool {
        match self.storage {
            Storage::InPlace { .. } => false,
            Storage::Scratch(_) => true,
        }
    }
}

/// Get a mutable view of the header at the transport offset.
pub fn get_header(packet: &mut Packet) -> Result<HeaderMut<'_>> {
    let offset = packet.transport_offset();
    let storage = match packet.contiguous(offset, HEADER_LEN) {
        Some((index, range)) => Storage::InPlace { index, range },
        None => {
            let mut bytes = [0; HEADER_LEN];
            packet.read(offset, &mut bytes)
                .map_err(|_| Error::Malformed)?;
            Storage::Scratch(bytes)
        },
    };
    Ok(HeaderMut { packet, storage })
}

/// Commit a header view to its packet.
pub fn set_header(view: HeaderMut<'_>) -> Result<()> {
    match view.storage {
        Storage::InPlace { .. } => Ok(()),
        Storage::Scratch(bytes) => {
            let offset = view.packet.transport_offset();
            view.packet.write(offset, &bytes)?;
            Ok(())
        },
    }
}

/// Read the fixed header at the transport offset of the packet.
pub fn read_header(packet: &Packet) -> wire::Result<TcpHeader> {
    let mut bytes = [0; HEADER_LEN];
    packet.read(packet.transport_offset(), &mut bytes)
        .map_err(|_| wire::Error::Truncated)?;
    TcpHeader::parse(&bytes)
}

/// Parse `total` bytes of options following the fixed header.
///
/// Options that are not present keep their value in `options`.
pub fn parse_options(packet: &Packet, total: usize, options: &mut TcpOptions) -> wire::Result<()> {
    if total == 0 {
        return Ok(());
    }
    if total > MAX_HEADER_LEN - HEADER_LEN {
        return Err(wire::Error::Malformed);
    }

    let mut bytes = [0; MAX_HEADER_LEN - HEADER_LEN];
    packet.read(packet.transport_offset() + HEADER_LEN, &mut bytes[..total])
        .map_err(|_| wire::Error::Truncated)?;
    options.parse_into(&bytes[..total])
}

/// Compute the checksum of the segment and write it into the header.
pub fn set_chksum(packet: &mut Packet) -> Result<()> {
    let field_at = packet.transport_offset() + field::CHECKSUM.start;
    packet.write(field_at, &[0; 2])?;
    let sum = segment_sum(packet).map_err(|_| Error::Illegal)?;
    let mut value = [0; 2];
    NetworkEndian::write_u16(&mut value, !sum);
    packet.write(field_at, &value)?;
    Ok(())
}

/// The complemented checksum over the segment, including its checksum field.
///
/// A segment with a correct checksum yields `0`.
pub fn get_chksum(packet: &Packet) -> Result<u16> {
    Ok(!segment_sum(packet)?)
}

fn segment_sum(packet: &Packet) -> wire::Result<u16> {
    let offset = packet.transport_offset();
    let length = packet.segment_len() as u32;
    let pseudo = checksum::pseudo_header(&packet.src_addr, &packet.dst_addr, IpProtocol::Tcp, length)?;
    let mut accum = Accumulator::new(pseudo);
    packet.for_each_from(offset, |piece| accum.feed(piece));
    Ok(accum.finish())
}

/// Check and parse a segment handed over by the demultiplexer.
pub fn parse_inbound(packet: &Packet) -> wire::Result<Inbound<'_>> {
    if packet.segment_len() < HEADER_LEN {
        return Err(wire::Error::Truncated);
    }

    if !segment_sum(packet)? != 0 {
        return Err(wire::Error::WrongChecksum);
    }

    let header = read_header(packet)?;
    let header_len = usize::from(header.header_len);
    if header_len > packet.segment_len() {
        return Err(wire::Error::Truncated);
    }

    let mut options = TcpOptions::default();
    parse_options(packet, header.options_len(), &mut options)?;

    Ok(Inbound {
        header,
        options,
        packet,
        payload_offset: packet.transport_offset() + header_len,
        payload_len: packet.segment_len() - header_len,
    })
}

/// The MSS option announcing `mss`.
pub fn mss_option(mss: u16) -> [u8; 4] {
    let mut bytes = [0; 4];
    TcpOption::MaxSegmentSize(mss).emit(&mut bytes);
    bytes
}

/// Build a segment of the connection without payload.
///
/// Uses the next sequence number of the connection and, when `flags` contain ACK, the next
/// expected sequence number. `local` defaults to the endpoint that the connection is bound to.
pub fn prepare_segment<A: PacketAlloc + ?Sized>(
    conn: &Connection,
    alloc: &mut A,
    flags: TcpFlags,
    options: &[u8],
    local: Option<IpEndpoint>,
    remote: &IpEndpoint,
) -> Result<Packet> {
    build_segment(conn, alloc, conn.send_seq, flags, options, [&[], &[]], local, remote)
}

/// Build a segment of the connection with an explicit sequence number and payload.
///
/// The payload is given in two parts as it usually comes from a ring buffer.
#[allow(clippy::too_many_arguments)]
pub fn build_segment<A: PacketAlloc + ?Sized>(
    conn: &Connection,
    alloc: &mut A,
    seq: TcpSeqNumber,
    flags: TcpFlags,
    options: &[u8],
    payload: [&[u8]; 2],
    local: Option<IpEndpoint>,
    remote: &IpEndpoint,
) -> Result<Packet> {
    if options.len() > MAX_OPTIONS_LEN {
        return Err(Error::BadSize);
    }

    let local = local.or(conn.local).ok_or(Error::Illegal)?;
    let ack = if flags.ack() { conn.send_ack } else { TcpSeqNumber::default() };

    emit(alloc, Outbound {
        local,
        remote: *remote,
        seq,
        ack,
        flags,
        window: conn.recv_wnd,
        options,
        payload,
    })
}

/// An acknowledgment of everything received so far.
pub fn prepare_ack<A: PacketAlloc + ?Sized>(conn: &Connection, alloc: &mut A) -> Result<Packet> {
    let remote = conn.remote.ok_or(Error::Illegal)?;
    prepare_segment(conn, alloc, TcpFlags::ACK, &[], None, &remote)
}

/// A reset of the connection.
///
/// There is nothing to reset before our SYN was answered, nor in `TIME_WAIT`, nor if the
/// connection is not bound to a four-tuple. In these cases returns `Ok(None)`.
pub fn prepare_reset<A: PacketAlloc + ?Sized>(conn: &Connection, alloc: &mut A)
    -> Result<Option<Packet>>
{
    match conn.state {
        State::SynSent | State::TimeWait => return Ok(None),
        _ => (),
    }

    let remote = match (conn.local, conn.remote) {
        (Some(_), Some(remote)) => remote,
        _ => return Ok(None),
    };

    prepare_segment(conn, alloc, TcpFlags::RST | TcpFlags::ACK, &[], None, &remote)
        .map(Some)
}

/// Answer an arbitrary segment with a reset.
///
/// If the segment carried an acknowledgment the reset takes its sequence number from it.
/// Otherwise the reset acknowledges the segment.
pub fn reply_reset<A: PacketAlloc + ?Sized>(alloc: &mut A, segment: &Inbound<'_>) -> Result<Packet> {
    let header = &segment.header;
    let local = IpEndpoint::new(segment.packet.dst_addr, header.dst_port);
    let remote = IpEndpoint::new(segment.packet.src_addr, header.src_port);

    let (seq, ack, flags) = if header.flags.ack() {
        (header.ack_number, TcpSeqNumber::default(), TcpFlags::RST)
    } else {
        let ack = header.seq_number + header.sequence_len(segment.payload_len);
        (TcpSeqNumber::default(), ack, TcpFlags::RST | TcpFlags::ACK)
    };

    emit(alloc, Outbound {
        local,
        remote,
        seq,
        ack,
        flags,
        window: 0,
        options: &[],
        payload: [&[], &[]],
    })
}

fn emit<A: PacketAlloc + ?Sized>(alloc: &mut A, segment: Outbound<'_>) -> Result<Packet> {
    let mut packet = match alloc.alloc() {
        Some(packet) => packet,
        None => {
            net_debug!("tcp: no packet buffer for segment to {}", segment.remote);
            return Err(Error::Exhausted);
        },
    };

    match fill(&mut packet, &segment) {
        Ok(()) => Ok(packet),
        Err(err) => {
            alloc.release(packet);
            Err(err)
        },
    }
}

fn fill(packet: &mut Packet, segment: &Outbound<'_>) -> Result<()> {
    // Options are padded with END to the next multiple of four.
    let options_len = (segment.options.len() + 3) & !3;
    let mut head = [0u8; HEADER_LEN + MAX_OPTIONS_LEN];
    head[HEADER_LEN..HEADER_LEN + segment.options.len()].copy_from_slice(segment.options);

    packet.set_transport_offset(packet.len())?;
    packet.append(&head[..HEADER_LEN + options_len])?;
    packet.append(segment.payload[0])?;
    packet.append(segment.payload[1])?;
    packet.src_addr = segment.local.addr;
    packet.dst_addr = segment.remote.addr;

    let header = TcpHeader {
        src_port: segment.local.port,
        dst_port: segment.remote.port,
        seq_number: segment.seq,
        ack_number: segment.ack,
        header_len: (HEADER_LEN + options_len) as u8,
        flags: segment.flags,
        window_len: segment.window,
        checksum: 0,
        urgent_at: 0,
    };

    let mut view = get_header(packet)?;
    view.set(&header);
    set_header(view)?;
    set_chksum(packet)
}
