//! Reliable delivery of sent data.
//!
//! Each connection keeps the bytes it was asked to send in a [`SendBuffer`] until they are
//! acknowledged, and a [`SentList`] describing the segments that are in flight. A retransmission
//! rebuilds the oldest segment from these two, so no packet is ever kept after it was handed to
//! the send path.
//!
//! The retransmission timeout starts at the configured initial value and doubles with each
//! consecutive timeout, up to a ceiling. Any new acknowledgment resets it.
//!
//! [`SendBuffer`]: struct.SendBuffer.html
//! [`SentList`]: struct.SentList.html
use core::ops::Range;

use crate::layer::{Error, Result};
use crate::time::{Duration, Instant};
use crate::wire::{TcpFlags, TcpSeqNumber};

use super::config::{Config, SEND_BUFFER_LEN, SENT_LIST_LEN};
use super::connection::{ConnectionFlags, Operator};
use super::endpoint::count;
use super::io::Io;
use super::segment;

/// A record of a segment in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SentEntry {
    /// The sequence number of the segment.
    pub seq: TcpSeqNumber,
    /// The length in sequence space, data and SYN or FIN.
    pub len: u16,
    /// The flags of the segment.
    pub flags: TcpFlags,
    /// When the segment was last transmitted.
    pub sent_at: Instant,
}

/// The segments in flight, oldest first.
#[derive(Clone, Copy, Debug)]
pub struct SentList {
    entries: [SentEntry; SENT_LIST_LEN],
    head: usize,
    len: usize,
}

/// What an acknowledgment removed from the sent list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AckOutcome {
    /// The number of entries removed entirely.
    pub removed: usize,
    /// The number of data bytes acknowledged.
    pub data_acked: usize,
    /// Whether our SYN was acknowledged.
    pub syn_acked: bool,
    /// Whether our FIN was acknowledged.
    pub fin_acked: bool,
    /// Whether the oldest remaining entry was partially acknowledged.
    pub trimmed: bool,
}

/// The outbound bytes, unacknowledged ones first.
#[derive(Clone, Copy)]
pub struct SendBuffer {
    buf: [u8; SEND_BUFFER_LEN],
    start: usize,
    len: usize,
    sent: usize,
    base: TcpSeqNumber,
}

/// The exponential backoff of the retransmission timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RetryPolicy {
    /// The timeout of the first retransmission.
    pub initial: Duration,
    /// The timeout never grows beyond this.
    pub ceiling: Duration,
    /// Consecutive timeouts before the connection is given up.
    pub max_retries: u8,
}

impl SentEntry {
    const EMPTY: SentEntry = SentEntry {
        seq: TcpSeqNumber(0),
        len: 0,
        flags: TcpFlags(0),
        sent_at: Instant { millis: 0 },
    };

    /// The sequence number following the segment.
    pub fn end(&self) -> TcpSeqNumber {
        self.seq + usize::from(self.len)
    }

    /// The number of data bytes, without SYN and FIN.
    pub fn data_len(&self) -> usize {
        usize::from(self.len) - self.flags.sequence_len()
    }

    /// The sequence number of the first data byte.
    pub fn data_seq(&self) -> TcpSeqNumber {
        if self.flags.syn() { self.seq + 1 } else { self.seq }
    }
}

impl SentList {
    /// An empty list.
    pub const fn new() -> Self {
        SentList {
            entries: [SentEntry::EMPTY; SENT_LIST_LEN],
            head: 0,
            len: 0,
        }
    }

    /// The number of segments in flight.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether another segment can be recorded.
    pub fn is_full(&self) -> bool {
        self.len == SENT_LIST_LEN
    }

    /// Record a newly transmitted segment.
    pub fn push(&mut self, entry: SentEntry) -> Result<()> {
        if self.is_full() {
            return Err(Error::Exhausted);
        }
        let at = (self.head + self.len) % SENT_LIST_LEN;
        self.entries[at] = entry;
        self.len += 1;
        Ok(())
    }

    /// The oldest segment.
    pub fn front(&self) -> Option<&SentEntry> {
        if self.is_empty() {
            None
        } else {
            Some(&self.entries[self.head])
        }
    }

    /// The oldest segment.
    pub fn front_mut(&mut self) -> Option<&mut SentEntry> {
        if self.is_empty() {
            None
        } else {
            Some(&mut self.entries[self.head])
        }
    }

    /// Remove the oldest segment.
    pub fn pop(&mut self) -> Option<SentEntry> {
        let entry = *self.front()?;
        self.head = (self.head + 1) % SENT_LIST_LEN;
        self.len -= 1;
        Some(entry)
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item=&SentEntry> + '_ {
        (0..self.len).map(move |i| &self.entries[(self.head + i) % SENT_LIST_LEN])
    }

    /// Forget all segments.
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// Remove what is covered by the cumulative acknowledgment `ack`.
    ///
    /// A segment that is only acknowledged in part remains with its start moved forward.
    pub fn acknowledge(&mut self, ack: TcpSeqNumber) -> AckOutcome {
        let mut outcome = AckOutcome::default();
        while let Some(front) = self.front_mut() {
            if front.end() <= ack {
                outcome.data_acked += front.data_len();
                outcome.syn_acked |= front.flags.syn();
                outcome.fin_acked |= front.flags.fin();
                outcome.removed += 1;
                self.pop();
            } else if front.seq < ack {
                let mut covered = ack - front.seq;
                front.len -= covered as u16;
                if front.flags.syn() {
                    front.flags.set_syn(false);
                    outcome.syn_acked = true;
                    covered -= 1;
                }
                front.seq = ack;
                outcome.data_acked += covered;
                outcome.trimmed = true;
                break;
            } else {
                break;
            }
        }
        outcome
    }
}

impl Default for SentList {
    fn default() -> Self {
        SentList::new()
    }
}

impl SendBuffer {
    /// An empty buffer.
    pub const fn new() -> Self {
        SendBuffer {
            buf: [0; SEND_BUFFER_LEN],
            start: 0,
            len: 0,
            sent: 0,
            base: TcpSeqNumber(0),
        }
    }

    /// Empty the buffer, the next byte pushed will have sequence number `base`.
    pub fn reset(&mut self, base: TcpSeqNumber) {
        self.start = 0;
        self.len = 0;
        self.sent = 0;
        self.base = base;
    }

    /// The sequence number of the first byte in the buffer.
    pub fn base(&self) -> TcpSeqNumber {
        self.base
    }

    /// The number of buffered bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Free space, in bytes.
    pub fn free(&self) -> usize {
        SEND_BUFFER_LEN - self.len
    }

    /// The number of bytes already transmitted once.
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// The number of bytes never transmitted.
    pub fn unsent(&self) -> usize {
        self.len - self.sent
    }

    /// Append as many bytes as fit, returning their number.
    pub fn push(&mut self, data: &[u8]) -> usize {
        let count = data.len().min(self.free());
        let mut done = 0;
        while done < count {
            let at = (self.start + self.len) % SEND_BUFFER_LEN;
            let run = (count - done).min(SEND_BUFFER_LEN - at);
            self.buf[at..at + run].copy_from_slice(&data[done..done + run]);
            self.len += run;
            done += run;
        }
        count
    }

    /// Mark `count` more bytes as transmitted.
    pub fn mark_sent(&mut self, count: usize) {
        self.sent = (self.sent + count).min(self.len);
    }

    /// Drop `count` acknowledged bytes from the front.
    pub fn consume(&mut self, count: usize) {
        let count = count.min(self.len);
        self.start = (self.start + count) % SEND_BUFFER_LEN;
        self.len -= count;
        self.sent = self.sent.saturating_sub(count);
        self.base += count;
    }

    /// The bytes in `range`, relative to the front, as two slices.
    ///
    /// The range is clamped to the buffered bytes.
    pub fn slices(&self, range: Range<usize>) -> [&[u8]; 2] {
        let end = range.end.min(self.len);
        let begin = range.start.min(end);
        let first = (self.start + begin) % SEND_BUFFER_LEN;
        let count = end - begin;
        let run = count.min(SEND_BUFFER_LEN - first);
        [&self.buf[first..first + run], &self.buf[..count - run]]
    }
}

impl Default for SendBuffer {
    fn default() -> Self {
        SendBuffer::new()
    }
}

impl core::fmt::Debug for SendBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("SendBuffer")
            .field("base", &self.base)
            .field("len", &self.len)
            .field("sent", &self.sent)
            .finish()
    }
}

impl RetryPolicy {
    /// The policy of an endpoint configuration.
    pub fn from_config(config: &Config) -> Self {
        RetryPolicy {
            initial: config.initial_retry_timeout,
            ceiling: config.retry_timeout_ceiling,
            max_retries: config.max_retries,
        }
    }

    /// The timeout after `shift` consecutive timeouts.
    pub fn timeout(&self, shift: u8) -> Duration {
        let factor = 1u32 << u32::from(shift.min(31));
        match self.initial.checked_mul(factor) {
            Some(timeout) => timeout.min(self.ceiling),
            None => self.ceiling,
        }
    }

    /// The largest exponent whose timeout does not exceed the ceiling.
    pub fn max_shift(&self) -> u8 {
        let mut shift: u32 = 0;
        while shift < 31 {
            match self.initial.checked_mul(1u32 << (shift + 1)) {
                Some(next) if next <= self.ceiling => shift += 1,
                _ => break,
            }
        }
        shift as u8
    }
}

impl<I: Io> Operator<'_, I> {
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.shared.config)
    }

    /// Process a cumulative acknowledgment.
    ///
    /// Acknowledgments at or before the highest one received before change nothing.
    pub fn ack_received(&mut self, ack: TcpSeqNumber) -> Result<AckOutcome> {
        if ack > self.conn.send_seq {
            count(&self.shared.counters.protocol_violation);
            net_debug!("tcp {}: ack {} for unsent data, next is {}", self.key, ack, self.conn.send_seq);
            return Err(Error::ProtocolViolation);
        }

        if ack <= self.conn.recv_max_ack {
            return Ok(AckOutcome::default());
        }

        self.conn.recv_max_ack = ack;
        let outcome = self.conn.sent.acknowledge(ack);
        self.conn.send_buf.consume(outcome.data_acked);
        self.conn.retry_timeout_shift = 0;
        self.conn.retries = 0;
        self.conn.flags.remove(ConnectionFlags::RETRYING);

        if self.conn.sent.is_empty() {
            self.conn.timers.retry.cancel();
        } else {
            let timeout = self.retry_policy().timeout(0);
            self.conn.timers.retry.arm_after(self.now, timeout);
        }

        Ok(outcome)
    }

    /// Transmit buffered data and a queued FIN, as far as the peer's window allows.
    ///
    /// Returns the number of data bytes sent. One segment may always be sent when nothing is in
    /// flight, this tests whether a closed window opened again.
    pub fn transmit_pending(&mut self) -> Result<usize> {
        let mut total = 0;

        while self.conn.send_buf.unsent() > 0 && !self.conn.sent.is_full() {
            let in_flight = self.conn.send_seq - self.conn.recv_max_ack;
            let room = usize::from(self.conn.send_wnd).saturating_sub(in_flight);
            let unsent = self.conn.send_buf.unsent();
            let mss = usize::from(self.conn.send_mss).max(1);

            let chunk = match unsent.min(mss).min(room) {
                0 if in_flight == 0 => unsent.min(mss),
                0 => break,
                chunk => chunk,
            };

            let mut flags = TcpFlags::ACK | TcpFlags::PSH;
            if chunk == unsent && self.conn.flags.contains(ConnectionFlags::FIN_QUEUED) {
                flags.set_fin(true);
            }

            let offset = self.conn.send_buf.sent();
            let seq = self.conn.send_seq;
            self.transmit_segment(seq, flags, &[], offset..offset + chunk)?;
            self.conn.send_buf.mark_sent(chunk);
            self.track(seq, flags, chunk)?;
            total += chunk;
        }

        let fin_pending = self.conn.flags.contains(ConnectionFlags::FIN_QUEUED)
            && self.conn.send_buf.unsent() == 0
            && !self.conn.sent.is_full();
        if fin_pending {
            let seq = self.conn.send_seq;
            let flags = TcpFlags::FIN | TcpFlags::ACK;
            let offset = self.conn.send_buf.sent();
            self.transmit_segment(seq, flags, &[], offset..offset)?;
            self.track(seq, flags, 0)?;
        }

        Ok(total)
    }

    /// Record a transmitted segment and advance the next sequence number.
    pub(crate) fn track(&mut self, seq: TcpSeqNumber, flags: TcpFlags, data_len: usize) -> Result<()> {
        let len = data_len + flags.sequence_len();
        self.conn.sent.push(SentEntry {
            seq,
            len: len as u16,
            flags,
            sent_at: self.now,
        })?;
        self.conn.send_seq = seq + len;

        if flags.fin() {
            self.conn.flags.remove(ConnectionFlags::FIN_QUEUED);
            self.conn.flags.insert(ConnectionFlags::FINAL_SENT);
        }

        if !self.conn.timers.retry.is_armed() {
            let timeout = self.retry_policy().timeout(self.conn.retry_timeout_shift);
            self.conn.timers.retry.arm_after(self.now, timeout);
        }
        Ok(())
    }

    /// The retransmission timer expired.
    pub(crate) fn retry_expired(&mut self) {
        if self.conn.sent.is_empty() {
            return;
        }

        let policy = self.retry_policy();
        self.conn.retries = self.conn.retries.saturating_add(1);
        if self.conn.retries > policy.max_retries {
            net_warn!("tcp {}: giving up after {} retries", self.key, policy.max_retries);
            self.abort(Error::RetryExhausted);
            return;
        }

        self.conn.retry_timeout_shift = (self.conn.retry_timeout_shift + 1).min(policy.max_shift());
        self.conn.flags.insert(ConnectionFlags::RETRYING);
        let timeout = policy.timeout(self.conn.retry_timeout_shift);
        self.conn.timers.retry.arm_after(self.now, timeout);

        if let Err(err) = self.retransmit_oldest() {
            net_debug!("tcp {}: retransmission failed: {}", self.key, err);
        }
    }

    /// Rebuild and send the oldest segment in flight.
    fn retransmit_oldest(&mut self) -> Result<()> {
        let entry = match self.conn.sent.front() {
            Some(entry) => *entry,
            None => return Ok(()),
        };

        let offset = entry.data_seq().forward_from(self.conn.send_buf.base()) as usize;
        let mss;
        let options: &[u8] = if entry.flags.syn() {
            mss = segment::mss_option(self.shared.config.recv_mss());
            &mss
        } else {
            &[]
        };

        net_trace!("tcp {}: retransmit seq={} len={} {}", self.key, entry.seq, entry.len, entry.flags);
        self.transmit_segment(entry.seq, entry.flags, options, offset..offset + entry.data_len())?;
        if let Some(front) = self.conn.sent.front_mut() {
            front.sent_at = self.now;
        }
        count(&self.shared.counters.retransmitted);
        Ok(())
    }
}
