//! A packet buffer made of fixed-size fragments.
//!
//! The IP layer below hands over segments in fragment chains and expects them back in the same
//! form. A [`Packet`] models such a chain without any allocation: a fixed array of fragments
//! where all but the last one are filled completely. The usable length of a fragment is chosen by
//! the allocator, so a pool of small fragments can place a header across a fragment boundary.
//!
//! Its two address fields carry the IP source and destination needed for the TCP pseudo header.
//! The first `transport_offset` bytes are reserved for the layers below.
//!
//! [`Packet`]: struct.Packet.html
use core::{fmt, ops};

use super::IpAddress;

/// The storage of one fragment.
pub const FRAGMENT_CAPACITY: usize = 128;

/// The maximum number of fragments in one packet.
pub const MAX_FRAGMENTS: usize = 16;

/// Error variants for resizing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// The request does not fit into the packet.
    BadSize,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::BadSize => write!(f, "packet size exceeded"),
        }
    }
}

/// A single fragment of a packet.
#[derive(Clone, Copy)]
pub struct Fragment {
    data: [u8; FRAGMENT_CAPACITY],
    len: usize,
}

/// A fragmented packet buffer.
#[derive(Clone, Debug)]
pub struct Packet {
    fragments: [Fragment; MAX_FRAGMENTS],
    count: usize,
    fragment_len: usize,
    transport: usize,

    /// The source address of the datagram.
    pub src_addr: IpAddress,

    /// The destination address of the datagram.
    pub dst_addr: IpAddress,
}

impl Fragment {
    const EMPTY: Fragment = Fragment { data: [0; FRAGMENT_CAPACITY], len: 0 };

    /// The filled bytes of the fragment.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The filled bytes of the fragment.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    /// The number of filled bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the fragment has no content.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Fragment")
            .field("len", &self.len)
            .field("data", &self.as_slice())
            .finish()
    }
}

impl Packet {
    /// An empty packet whose fragments hold `fragment_len` bytes each.
    ///
    /// The length is clamped to `1..=FRAGMENT_CAPACITY`.
    pub fn new(fragment_len: usize) -> Self {
        Packet {
            fragments: [Fragment::EMPTY; MAX_FRAGMENTS],
            count: 0,
            fragment_len: fragment_len.max(1).min(FRAGMENT_CAPACITY),
            transport: 0,
            src_addr: IpAddress::Unspecified,
            dst_addr: IpAddress::Unspecified,
        }
    }

    /// An empty packet with `headroom` bytes reserved for the layers below.
    pub fn with_headroom(fragment_len: usize, headroom: usize) -> Result<Self, Error> {
        let mut packet = Packet::new(fragment_len);
        packet.extend_zeroed(headroom)?;
        packet.transport = headroom;
        Ok(packet)
    }

    /// A packet whose transport segment is a copy of `segment`.
    pub fn from_segment(fragment_len: usize, segment: &[u8]) -> Result<Self, Error> {
        let mut packet = Packet::new(fragment_len);
        packet.append(segment)?;
        Ok(packet)
    }

    /// Total number of bytes in all fragments.
    pub fn len(&self) -> usize {
        self.fragments[..self.count].iter().map(Fragment::len).sum()
    }

    /// Whether the packet contains no bytes.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The maximum number of bytes the packet can hold.
    pub fn capacity(&self) -> usize {
        self.fragment_len * MAX_FRAGMENTS
    }

    /// The usable length of each fragment.
    pub fn fragment_len(&self) -> usize {
        self.fragment_len
    }

    /// The offset where the TCP segment begins.
    pub fn transport_offset(&self) -> usize {
        self.transport
    }

    /// Declare the first `offset` bytes as belonging to the layers below.
    pub fn set_transport_offset(&mut self, offset: usize) -> Result<(), Error> {
        if offset > self.len() {
            return Err(Error::BadSize);
        }
        self.transport = offset;
        Ok(())
    }

    /// The length of the TCP segment, header included.
    pub fn segment_len(&self) -> usize {
        self.len() - self.transport
    }

    /// The filled fragments.
    pub fn fragments(&self) -> impl Iterator<Item=&[u8]> + '_ {
        self.fragments[..self.count].iter().map(Fragment::as_slice)
    }

    /// Append bytes at the end, filling up the last fragment first.
    ///
    /// Fails without modifying the packet if the bytes do not fit.
    pub fn append(&mut self, mut bytes: &[u8]) -> Result<(), Error> {
        if self.len() + bytes.len() > self.capacity() {
            return Err(Error::BadSize);
        }

        while !bytes.is_empty() {
            let fragment = self.tail_with_space();
            let start = fragment.len;
            let take = bytes.len().min(self.fragment_len - start);
            let fragment = &mut self.fragments[self.count - 1];
            fragment.data[start..start + take].copy_from_slice(&bytes[..take]);
            fragment.len += take;
            bytes = &bytes[take..];
        }

        Ok(())
    }

    /// Copy `out.len()` bytes starting at `offset` into `out`.
    pub fn read(&self, offset: usize, out: &mut [u8]) -> Result<(), Error> {
        let range = self.checked_range(offset, out.len())?;
        let mut done = 0;
        for (index, within) in self.spans(range) {
            let piece = &self.fragments[index].data[within];
            out[done..done + piece.len()].copy_from_slice(piece);
            done += piece.len();
        }
        Ok(())
    }

    /// Overwrite bytes starting at `offset`.
    ///
    /// The bytes must already be part of the packet, this never extends it.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), Error> {
        let range = self.checked_range(offset, bytes.len())?;
        let mut done = 0;
        for (index, within) in self.spans(range) {
            let piece = &mut self.fragments[index].data[within];
            let len = piece.len();
            piece.copy_from_slice(&bytes[done..done + len]);
            done += len;
        }
        Ok(())
    }

    /// Call `f` with each contiguous piece of the bytes from `offset` to the end.
    pub fn for_each_from(&self, offset: usize, mut f: impl FnMut(&[u8])) {
        let len = self.len();
        if offset >= len {
            return;
        }
        for (index, within) in self.spans(offset..len) {
            f(&self.fragments[index].data[within]);
        }
    }

    /// The fragment and in-fragment range of `offset..offset+len` if it is contiguous.
    pub(crate) fn contiguous(&self, offset: usize, len: usize) -> Option<(usize, ops::Range<usize>)> {
        let range = self.checked_range(offset, len).ok()?;
        let mut spans = self.spans(range);
        let first = spans.next()?;
        match spans.next() {
            None => Some(first),
            Some(_) => None,
        }
    }

    pub(crate) fn fragment_bytes(&self, index: usize, within: ops::Range<usize>) -> &[u8] {
        &self.fragments[index].data[within]
    }

    pub(crate) fn fragment_bytes_mut(&mut self, index: usize, within: ops::Range<usize>) -> &mut [u8] {
        &mut self.fragments[index].data[within]
    }

    fn extend_zeroed(&mut self, len: usize) -> Result<(), Error> {
        let zeroes = [0u8; 32];
        let mut remaining = len;
        if self.len() + len > self.capacity() {
            return Err(Error::BadSize);
        }
        while remaining > 0 {
            let take = remaining.min(zeroes.len());
            self.append(&zeroes[..take])?;
            remaining -= take;
        }
        Ok(())
    }

    fn tail_with_space(&mut self) -> &Fragment {
        let full = match self.count {
            0 => true,
            n => self.fragments[n - 1].len == self.fragment_len,
        };
        if full {
            self.fragments[self.count] = Fragment::EMPTY;
            self.count += 1;
        }
        &self.fragments[self.count - 1]
    }

    fn checked_range(&self, offset: usize, len: usize) -> Result<ops::Range<usize>, Error> {
        let end = offset.checked_add(len).ok_or(Error::BadSize)?;
        if end > self.len() {
            return Err(Error::BadSize);
        }
        Ok(offset..end)
    }

    /// Split a valid byte range into per-fragment pieces.
    fn spans(&self, range: ops::Range<usize>) -> impl Iterator<Item=(usize, ops::Range<usize>)> {
        let step = self.fragment_len;
        let mut at = range.start;
        let end = range.end;
        core::iter::from_fn(move || {
            if at >= end {
                return None;
            }
            let index = at / step;
            let start = at % step;
            let stop = (start + (end - at)).min(step);
            at += stop - start;
            Some((index, start..stop))
        })
    }
}
