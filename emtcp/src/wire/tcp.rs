//! Sequence numbers, the fixed header and options of a TCP segment.
//!
//! Everything in here operates on contiguous octets. The fragmented case is handled by the
//! segment codec of the tcp layer which copies the few bytes that it needs into scratch space
//! before calling into these functions.
use core::{ops, cmp, fmt};
use byteorder::{ByteOrder, NetworkEndian};

use super::{Error, Result};

/// A TCP sequence number.
///
/// A sequence number is a monotonically advancing integer modulo 2<sup>32</sup>.
/// Sequence numbers do not have a discontiguity when compared pairwise across a signed overflow.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash)]
pub struct SeqNumber(pub i32);

impl SeqNumber {
    /// Reinterpret the unsigned wire value.
    pub const fn from_u32(value: u32) -> Self {
        SeqNumber(value as i32)
    }

    /// The unsigned wire value.
    pub const fn as_u32(self) -> u32 {
        self.0 as u32
    }

    /// The distance from `base` going forward, modulo 2<sup>32</sup>.
    ///
    /// Unlike the subtraction operator this never panics, a number *before* `base` results in a
    /// very large distance.
    pub fn forward_from(self, base: SeqNumber) -> u32 {
        self.0.wrapping_sub(base.0) as u32
    }

    /// The later of two sequence numbers.
    pub fn max(self, other: SeqNumber) -> SeqNumber {
        if self < other { other } else { self }
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0 as u32)
    }
}

impl ops::Add<usize> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: usize) -> SeqNumber {
        if rhs > i32::MAX as usize {
            panic!("attempt to add to sequence number with unsigned overflow")
        }
        SeqNumber(self.0.wrapping_add(rhs as i32))
    }
}

impl ops::Sub<usize> for SeqNumber {
    type Output = SeqNumber;

    fn sub(self, rhs: usize) -> SeqNumber {
        if rhs > i32::MAX as usize {
            panic!("attempt to subtract to sequence number with unsigned overflow")
        }
        SeqNumber(self.0.wrapping_sub(rhs as i32))
    }
}

impl ops::AddAssign<usize> for SeqNumber {
    fn add_assign(&mut self, rhs: usize) {
        *self = *self + rhs;
    }
}

impl ops::Sub for SeqNumber {
    type Output = usize;

    fn sub(self, rhs: SeqNumber) -> usize {
        let result = self.0.wrapping_sub(rhs.0);
        if result < 0 {
            panic!("attempt to subtract sequence numbers with underflow")
        }
        result as usize
    }
}

impl cmp::PartialOrd for SeqNumber {
    fn partial_cmp(&self, other: &SeqNumber) -> Option<cmp::Ordering> {
        self.0.wrapping_sub(other.0).partial_cmp(&0)
    }
}

/// A set of tcp flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Flags(pub u16);

pub(crate) mod field {
    #![allow(non_snake_case)]

    use crate::wire::field::Field;

    pub(crate) const SRC_PORT: Field = 0..2;
    pub(crate) const DST_PORT: Field = 2..4;
    pub(crate) const SEQ_NUM:  Field = 4..8;
    pub(crate) const ACK_NUM:  Field = 8..12;
    pub(crate) const FLAGS:    Field = 12..14;
    pub(crate) const WIN_SIZE: Field = 14..16;
    pub(crate) const CHECKSUM: Field = 16..18;
    pub(crate) const URGENT:   Field = 18..20;

    pub(crate) fn OPTIONS(length: u8) -> Field {
        URGENT.end..(length as usize)
    }

    pub(crate) const FLG_FIN: u16 = 0x001;
    pub(crate) const FLG_SYN: u16 = 0x002;
    pub(crate) const FLG_RST: u16 = 0x004;
    pub(crate) const FLG_PSH: u16 = 0x008;
    pub(crate) const FLG_ACK: u16 = 0x010;
    pub(crate) const FLG_URG: u16 = 0x020;
}

/// Length of the fixed header, without options.
pub const HEADER_LEN: usize = field::URGENT.end;

/// The largest header, with 40 bytes of options.
pub const MAX_HEADER_LEN: usize = 60;

/// The maximum segment size to assume when the peer did not send the option (RFC 1122).
pub const DEFAULT_MSS: u16 = 536;

impl Flags {
    /// The final segment of a sender.
    pub const FIN: Flags = Flags(field::FLG_FIN);
    /// Synchronize sequence numbers.
    pub const SYN: Flags = Flags(field::FLG_SYN);
    /// Reset the connection.
    pub const RST: Flags = Flags(field::FLG_RST);
    /// Push data to the application.
    pub const PSH: Flags = Flags(field::FLG_PSH);
    /// The acknowledgment field is valid.
    pub const ACK: Flags = Flags(field::FLG_ACK);
    /// The urgent pointer is valid.
    pub const URG: Flags = Flags(field::FLG_URG);

    /// Return the FIN flag.
    #[inline]
    pub fn fin(&self) -> bool {
        self.0 & field::FLG_FIN != 0
    }

    /// Return the SYN flag.
    #[inline]
    pub fn syn(&self) -> bool {
        self.0 & field::FLG_SYN != 0
    }

    /// Return the RST flag.
    #[inline]
    pub fn rst(&self) -> bool {
        self.0 & field::FLG_RST != 0
    }

    /// Return the PSH flag.
    #[inline]
    pub fn psh(&self) -> bool {
        self.0 & field::FLG_PSH != 0
    }

    /// Return the ACK flag.
    #[inline]
    pub fn ack(&self) -> bool {
        self.0 & field::FLG_ACK != 0
    }

    /// Return the URG flag.
    #[inline]
    pub fn urg(&self) -> bool {
        self.0 & field::FLG_URG != 0
    }

    /// Set the FIN flag.
    #[inline]
    pub fn set_fin(&mut self, value: bool) {
        self.set(field::FLG_FIN, value)
    }

    /// Set the SYN flag.
    #[inline]
    pub fn set_syn(&mut self, value: bool) {
        self.set(field::FLG_SYN, value)
    }

    /// Set the ACK flag.
    #[inline]
    pub fn set_ack(&mut self, value: bool) {
        self.set(field::FLG_ACK, value)
    }

    /// Check if all flags of `other` are set in `self`.
    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Return the length of a control flag, in terms of sequence space.
    pub fn sequence_len(self) -> usize {
        (if self.syn() { 1 } else { 0 })
        + (if self.fin() { 1 }  else { 0 })
    }

    fn set(&mut self, flag: u16, value: bool) {
        let without = self.0 & !flag;
        self.0 = if value { without | flag } else { without };
    }
}

impl ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let names = [
            (field::FLG_SYN, "syn"),
            (field::FLG_FIN, "fin"),
            (field::FLG_RST, "rst"),
            (field::FLG_PSH, "psh"),
            (field::FLG_ACK, "ack"),
            (field::FLG_URG, "urg"),
        ];
        let mut first = true;
        for &(bit, name) in names.iter() {
            if self.0 & bit != 0 {
                if !first { write!(f, "|")? }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        if first { write!(f, "-")? }
        Ok(())
    }
}

enum_with_unknown! {
    /// The kind byte of a TCP option.
    pub enum OptionKind(u8) {
        /// End of the option list.
        End = 0x00,
        /// Padding.
        Nop = 0x01,
        /// Maximum segment size.
        Mss = 0x02,
        /// Window scale shift count.
        WindowScale = 0x03,
    }
}

/// A representation of a single TCP option.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TcpOption<'a> {
    /// Terminates the option list, the rest of the region is padding.
    EndOfList,
    /// A single byte of padding.
    NoOperation,
    /// The largest segment the sender of the option is willing to receive.
    MaxSegmentSize(u16),
    /// The window scale shift count of the sender.
    WindowScale(u8),
    /// An option that is skipped by its length.
    Unknown {
        /// The option kind.
        kind: u8,
        /// Its content, without kind and length bytes.
        data: &'a [u8],
    },
}

impl<'a> TcpOption<'a> {
    /// Parse the first option from an option region.
    ///
    /// The region length is known from the header so an option that runs past the end of
    /// `buffer`, or whose length field is impossible, is `Malformed`.
    pub fn parse(buffer: &'a [u8]) -> Result<(&'a [u8], TcpOption<'a>)> {
        let (length, option);
        let kind = *buffer.get(0).ok_or(Error::Truncated)?;
        match OptionKind::from(kind) {
            OptionKind::End => {
                length = 1;
                option = TcpOption::EndOfList;
            }
            OptionKind::Nop => {
                length = 1;
                option = TcpOption::NoOperation;
            }
            known => {
                length = *buffer.get(1).ok_or(Error::Malformed)? as usize;
                if length < 2 {
                    return Err(Error::Malformed)
                }
                let data = buffer.get(2..length).ok_or(Error::Malformed)?;
                match (known, length) {
                    (OptionKind::Mss, 4) =>
                        option = TcpOption::MaxSegmentSize(NetworkEndian::read_u16(data)),
                    (OptionKind::Mss, _) =>
                        return Err(Error::Malformed),
                    (OptionKind::WindowScale, 3) =>
                        option = TcpOption::WindowScale(data[0]),
                    (OptionKind::WindowScale, _) =>
                        return Err(Error::Malformed),
                    (_, _) =>
                        option = TcpOption::Unknown { kind, data }
                }
            }
        }
        Ok((&buffer[length..], option))
    }

    /// The number of bytes this option occupies.
    pub fn buffer_len(&self) -> usize {
        match self {
            TcpOption::EndOfList => 1,
            TcpOption::NoOperation => 1,
            TcpOption::MaxSegmentSize(_) => 4,
            TcpOption::WindowScale(_) => 3,
            TcpOption::Unknown { data, .. } => 2 + data.len()
        }
    }

    /// Write the option to the start of `buffer`, returning the rest.
    ///
    /// # Panics
    /// This function panics if `buffer` is shorter than `buffer_len()`.
    pub fn emit<'b>(&self, buffer: &'b mut [u8]) -> &'b mut [u8] {
        let length;
        match *self {
            TcpOption::EndOfList => {
                length    = 1;
                // There may be padding space which also should be initialized.
                for p in buffer.iter_mut() {
                    *p = OptionKind::End.into();
                }
            }
            TcpOption::NoOperation => {
                length    = 1;
                buffer[0] = OptionKind::Nop.into();
            }
            TcpOption::MaxSegmentSize(value) => {
                length    = 4;
                buffer[0] = OptionKind::Mss.into();
                buffer[1] = length as u8;
                NetworkEndian::write_u16(&mut buffer[2..4], value)
            }
            TcpOption::WindowScale(value) => {
                length    = 3;
                buffer[0] = OptionKind::WindowScale.into();
                buffer[1] = length as u8;
                buffer[2] = value;
            }
            TcpOption::Unknown { kind, data: provided } => {
                length    = self.buffer_len();
                buffer[0] = kind;
                buffer[1] = length as u8;
                buffer[2..length].copy_from_slice(provided)
            }
        }
        &mut buffer[length..]
    }
}

/// The options that a connection consumes.
///
/// Parsing fills in present options and keeps the previous values of absent ones, so starting
/// from the default yields the RFC 1122 assumption for a missing MSS.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Options {
    /// The peer's maximum segment size.
    pub mss: u16,
    /// The peer's window scale shift count, if it offered one.
    pub window_scale: Option<u8>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            mss: DEFAULT_MSS,
            window_scale: None,
        }
    }
}

impl Options {
    /// Walk an option region and record the recognized options.
    pub fn parse_into(&mut self, mut options: &[u8]) -> Result<()> {
        while !options.is_empty() {
            let (next_options, option) = TcpOption::parse(options)?;
            match option {
                TcpOption::EndOfList => break,
                TcpOption::NoOperation => (),
                TcpOption::MaxSegmentSize(value) =>
                    self.mss = value,
                TcpOption::WindowScale(value) => {
                    // RFC 1323: If a Window Scale option is received with a shift.cnt value
                    // exceeding 14, the TCP should log the error but use 14 instead.
                    self.window_scale = if value > 14 {
                        net_debug!("parsed window scaling factor {} >14, setting to 14", value);
                        Some(14)
                    } else {
                        Some(value)
                    };
                },
                TcpOption::Unknown { kind, .. } =>
                    net_trace!("skipping tcp option {}", kind),
            }
            options = next_options;
        }
        Ok(())
    }
}

/// The fixed part of a TCP header.
///
/// Fields are kept as they are on the wire, in particular the acknowledgment number is present
/// regardless of the ACK flag and `header_len` includes the options.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct Header {
    /// The source port.
    pub src_port: u16,
    /// The destination port.
    pub dst_port: u16,
    /// The sequence number of the first octet of the segment.
    pub seq_number: SeqNumber,
    /// The next expected sequence number, valid if the ACK flag is set.
    pub ack_number: SeqNumber,
    /// The data offset, in octets.
    pub header_len: u8,
    /// Reserved and control bits.
    pub flags: Flags,
    /// The advertised receive window.
    pub window_len: u16,
    /// The checksum field.
    pub checksum: u16,
    /// The urgent pointer.
    pub urgent_at: u16,
}

impl Header {
    /// Parse the fixed header from the first 20 octets of `data`.
    ///
    /// Returns `Err(Error::Malformed)` if the data offset is smaller than the fixed header.
    pub fn parse(data: &[u8]) -> Result<Header> {
        if data.len() < HEADER_LEN {
            return Err(Error::Truncated);
        }

        let raw_flags = NetworkEndian::read_u16(&data[field::FLAGS]);
        let header_len = ((raw_flags >> 12) * 4) as u8;
        if usize::from(header_len) < HEADER_LEN {
            return Err(Error::Malformed);
        }

        Ok(Header {
            src_port: NetworkEndian::read_u16(&data[field::SRC_PORT]),
            dst_port: NetworkEndian::read_u16(&data[field::DST_PORT]),
            seq_number: SeqNumber(NetworkEndian::read_i32(&data[field::SEQ_NUM])),
            ack_number: SeqNumber(NetworkEndian::read_i32(&data[field::ACK_NUM])),
            header_len,
            flags: Flags(raw_flags & 0x1ff),
            window_len: NetworkEndian::read_u16(&data[field::WIN_SIZE]),
            checksum: NetworkEndian::read_u16(&data[field::CHECKSUM]),
            urgent_at: NetworkEndian::read_u16(&data[field::URGENT]),
        })
    }

    /// Write the fixed header into the first 20 octets of `data`.
    ///
    /// # Panics
    /// This function panics if `data` is shorter than the fixed header.
    pub fn emit(&self, data: &mut [u8]) {
        NetworkEndian::write_u16(&mut data[field::SRC_PORT], self.src_port);
        NetworkEndian::write_u16(&mut data[field::DST_PORT], self.dst_port);
        NetworkEndian::write_i32(&mut data[field::SEQ_NUM], self.seq_number.0);
        NetworkEndian::write_i32(&mut data[field::ACK_NUM], self.ack_number.0);
        let raw_flags = (u16::from(self.header_len) / 4) << 12 | (self.flags.0 & 0x1ff);
        NetworkEndian::write_u16(&mut data[field::FLAGS], raw_flags);
        NetworkEndian::write_u16(&mut data[field::WIN_SIZE], self.window_len);
        NetworkEndian::write_u16(&mut data[field::CHECKSUM], self.checksum);
        NetworkEndian::write_u16(&mut data[field::URGENT], self.urgent_at);
    }

    /// The length of the option region.
    pub fn options_len(&self) -> usize {
        field::OPTIONS(self.header_len).len()
    }

    /// Return the length of the segment, in terms of sequence space.
    pub fn sequence_len(&self, payload_len: usize) -> usize {
        payload_len + self.flags.sequence_len()
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TCP src={} dst={} {} seq={}",
               self.src_port, self.dst_port, self.flags, self.seq_number)?;
        if self.flags.ack() {
            write!(f, " ack={}", self.ack_number)?;
        }
        write!(f, " win={}", self.window_len)
    }
}
