//! Addressing for the pseudo header and the internet checksum.
use core::fmt;

enum_with_unknown! {
    /// IP datagram encapsulated protocol.
    pub enum Protocol(u8) {
        /// Internet Control Message Protocol.
        Icmp = 0x01,
        /// Transmission Control Protocol.
        Tcp = 0x06,
        /// User Datagram Protocol.
        Udp = 0x11,
    }
}

/// A four-octet IPv4 address.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Ipv4Address(pub [u8; 4]);

impl Ipv4Address {
    /// An unspecified address.
    pub const UNSPECIFIED: Ipv4Address = Ipv4Address([0x00; 4]);

    /// Construct an IPv4 address from parts.
    pub const fn new(a0: u8, a1: u8, a2: u8, a3: u8) -> Ipv4Address {
        Ipv4Address([a0, a1, a2, a3])
    }

    /// Return an IPv4 address as a sequence of octets, in big-endian.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Query whether the address is the unspecified address.
    pub fn is_unspecified(&self) -> bool {
        self.0 == [0x00; 4]
    }
}

impl fmt::Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let bytes = self.0;
        write!(f, "{}.{}.{}.{}", bytes[0], bytes[1], bytes[2], bytes[3])
    }
}

/// An internetworking address.
///
/// Only IPv4 has a pseudo header rule here. The unspecified address stands in for wildcard
/// bindings, such as the remote of a listening connection.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Address {
    /// An unspecified address.
    /// May be used as a placeholder for storage where the address is not assigned yet.
    Unspecified,

    /// An IPv4 address.
    Ipv4(Ipv4Address),
}

impl Address {
    /// Create an address wrapping an IPv4 address with the given octets.
    pub const fn v4(a0: u8, a1: u8, a2: u8, a3: u8) -> Address {
        Address::Ipv4(Ipv4Address::new(a0, a1, a2, a3))
    }

    /// Query whether the address falls into the "unspecified" range.
    pub fn is_unspecified(&self) -> bool {
        match self {
            Address::Unspecified => true,
            Address::Ipv4(addr) => addr.is_unspecified(),
        }
    }
}

impl Default for Address {
    fn default() -> Address {
        Address::Unspecified
    }
}

impl From<Ipv4Address> for Address {
    fn from(addr: Ipv4Address) -> Self {
        Address::Ipv4(addr)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Address::Unspecified => write!(f, "*"),
            Address::Ipv4(addr) => write!(f, "{}", addr),
        }
    }
}

/// An internet endpoint address.
///
/// An endpoint can be constructed from a port, in which case the address is unspecified.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Endpoint {
    /// The address part.
    pub addr: Address,
    /// The port part, `0` is unspecified.
    pub port: u16,
}

impl Endpoint {
    /// An endpoint with unspecified address and port.
    pub const UNSPECIFIED: Endpoint = Endpoint { addr: Address::Unspecified, port: 0 };

    /// Create an endpoint address from given address and port.
    pub fn new(addr: Address, port: u16) -> Endpoint {
        Endpoint { addr, port }
    }

    /// Query whether the endpoint has a specified address and port.
    pub fn is_specified(&self) -> bool {
        !self.addr.is_unspecified() && self.port != 0
    }
}

impl From<u16> for Endpoint {
    fn from(port: u16) -> Endpoint {
        Endpoint { addr: Address::Unspecified, port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

pub(crate) mod checksum {
    use byteorder::{ByteOrder, NetworkEndian};

    use super::*;
    use crate::wire::{Error, Result};

    fn propagate_carries(word: u32) -> u16 {
        let sum = (word >> 16) + (word & 0xffff);
        ((sum >> 16) as u16) + (sum as u16)
    }

    /// Compute an RFC 1071 compliant checksum (without the final complement).
    pub(crate) fn data(mut data: &[u8]) -> u16 {
        let mut accum = 0;

        while data.len() >= 2 {
            accum += NetworkEndian::read_u16(data) as u32;
            data = &data[2..];
        }

        // Add the last remaining odd byte, if any.
        if let Some(&value) = data.first() {
            accum += (value as u32) << 8;
        }

        propagate_carries(accum)
    }

    /// Combine several RFC 1071 compliant checksums.
    pub(crate) fn combine(checksums: &[u16]) -> u16 {
        let mut accum: u32 = 0;
        for &word in checksums {
            accum += word as u32;
        }
        propagate_carries(accum)
    }

    /// Compute an IP pseudo header checksum.
    ///
    /// Fails with `Unrecognized` unless both addresses are IPv4.
    pub(crate) fn pseudo_header(src_addr: &Address, dst_addr: &Address,
                         protocol: Protocol, length: u32) -> Result<u16> {
        match (src_addr, dst_addr) {
            (Address::Ipv4(src_addr), Address::Ipv4(dst_addr)) => {
                let mut proto_len = [0u8; 4];
                proto_len[1] = protocol.into();
                NetworkEndian::write_u16(&mut proto_len[2..4], length as u16);

                Ok(combine(&[
                    data(src_addr.as_bytes()),
                    data(dst_addr.as_bytes()),
                    data(&proto_len[..])
                ]))
            },
            _ => Err(Error::Unrecognized),
        }
    }

    /// A running checksum over data that arrives in pieces.
    ///
    /// The 16-bit words of the checksum do not respect the piece boundaries, a piece of odd
    /// length leaves its last byte pending as the high half of the next word.
    #[derive(Clone, Copy, Debug, Default)]
    pub(crate) struct Accumulator {
        sum: u32,
        pending: Option<u8>,
    }

    impl Accumulator {
        pub(crate) fn new(initial: u16) -> Self {
            Accumulator { sum: initial.into(), pending: None }
        }

        pub(crate) fn feed(&mut self, mut bytes: &[u8]) {
            if let Some(high) = self.pending.take() {
                match bytes.split_first() {
                    Some((&low, rest)) => {
                        self.sum += u32::from(u16::from_be_bytes([high, low]));
                        bytes = rest;
                    },
                    None => {
                        self.pending = Some(high);
                        return;
                    },
                }
            }

            let even = bytes.len() & !1;
            self.sum += u32::from(data(&bytes[..even]));
            self.sum = propagate_carries(self.sum).into();
            self.pending = bytes.get(even).cloned();
        }

        /// The folded sum, without the final complement.
        pub(crate) fn finish(self) -> u16 {
            let tail = self.pending.map(|high| u32::from(high) << 8).unwrap_or(0);
            propagate_carries(self.sum + tail)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use super::checksum::{self, Accumulator};

    static DATA: [u8; 11] = [0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0xb8];

    #[test]
    fn accumulator_matches_contiguous() {
        let expected = checksum::data(&DATA);
        for split in 0..DATA.len() {
            for second in split..DATA.len() {
                let mut accum = Accumulator::default();
                accum.feed(&DATA[..split]);
                accum.feed(&DATA[split..second]);
                accum.feed(&DATA[second..]);
                assert_eq!(accum.finish(), expected, "split at {} and {}", split, second);
            }
        }
    }

    #[test]
    fn pseudo_header_requires_ipv4() {
        let v4 = Address::v4(192, 168, 1, 1);
        assert!(checksum::pseudo_header(&v4, &v4, Protocol::Tcp, 20).is_ok());
        assert_eq!(
            checksum::pseudo_header(&Address::Unspecified, &v4, Protocol::Tcp, 20),
            Err(crate::wire::Error::Unrecognized));
    }

    #[test]
    fn endpoint_specified() {
        assert!(!Endpoint::from(80).is_specified());
        assert!(Endpoint::new(Address::v4(10, 0, 0, 1), 80).is_specified());
        assert!(!Endpoint::new(Address::v4(0, 0, 0, 0), 80).is_specified());
    }
}
