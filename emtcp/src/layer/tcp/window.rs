//! Acceptance of inbound sequence numbers.
//!
//! A segment is acceptable if its sequence number lies in the receive window, the half-open range
//! from the next expected sequence number spanning the window that we advertise. The comparison is
//! done on `TcpSeqNumber`, which orders by the signed distance and so works across the wrap of the
//! 32-bit sequence space.
use crate::wire::{Packet, TcpSeqNumber};

use super::connection::Connection;
use super::segment;

/// Where a sequence number lies relative to the receive window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SeqClass {
    /// Within the window.
    InWindow,
    /// Before the window, already received.
    OldDuplicate,
    /// Beyond the window.
    Future,
}

/// Check the sequence number of the segment in `packet`.
///
/// A packet whose header can not be read is never acceptable.
pub fn validate_seq(conn: &Connection, packet: &Packet) -> bool {
    match segment::read_header(packet) {
        Ok(header) => validate_seq_number(conn, header.seq_number),
        Err(_) => false,
    }
}

/// Check a sequence number against the receive window.
pub fn validate_seq_number(conn: &Connection, seq: TcpSeqNumber) -> bool {
    let begin = conn.send_ack;
    let end = begin + usize::from(conn.recv_wnd);
    seq >= begin && seq < end
}

/// Classify a sequence number, for diagnostics of dropped segments.
pub fn classify(conn: &Connection, seq: TcpSeqNumber) -> SeqClass {
    if validate_seq_number(conn, seq) {
        SeqClass::InWindow
    } else if seq < conn.send_ack {
        SeqClass::OldDuplicate
    } else {
        SeqClass::Future
    }
}
