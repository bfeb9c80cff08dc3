use core::fmt;
use core::ops::Range;

use bitflags::bitflags;

use crate::layer::{Error, Result};
use crate::time::Instant;
use crate::wire::{IpEndpoint, TcpFlags, TcpSeqNumber};
use crate::wire::tcp::DEFAULT_MSS;

use super::completion::Completion;
use super::endpoint::{count, Shared, SlotKey};
use super::io::{AcceptCallback, DemuxHandle, Io, Payload, Received, RecvCallback, SessionRef};
use super::retransmit::{SendBuffer, SentList};
use super::segment::{self, Inbound};
use super::timer::{TimerKind, TimerToken, Timers};
use super::window::{self, SeqClass};

/// State enum of the statemachine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    /// Not connected, also the state of a fresh slot.
    Closed,

    /// A listening connection.
    ///
    /// Akin to an open server socket. Each SYN is answered by a new connection, the listening one
    /// stays in this state.
    Listen,

    /// An open connection request.
    SynSent,

    /// Connection request we intend to answer, waiting on ack.
    SynReceived,

    /// An open connection.
    Established,

    /// Closed our side of the connection.
    FinWait1,

    /// Closing connection nicely, initiated by us and acknowledged.
    FinWait2,

    /// Closed both sides but we don't know the other knows.
    Closing,

    /// Both sides recognized connection as closed.
    TimeWait,

    /// Other side closed its connection.
    CloseWait,

    /// Connection closed after other side closed its already.
    LastAck,
}

bitflags! {
    /// Bookkeeping bits of a connection.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ConnectionFlags: u8 {
        /// The slot is allocated.
        const IN_USE = 1 << 0;
        /// The application closed its side, no more data may be queued.
        const SHUTDOWN = 1 << 1;
        /// Our FIN was transmitted.
        const FINAL_SENT = 1 << 2;
        /// The peer's FIN was received.
        const FINAL_RECV = 1 << 3;
        /// The oldest segment in flight was retransmitted.
        const RETRYING = 1 << 4;
        /// The send MSS was negotiated.
        const RECV_MSS_SET = 1 << 5;
        /// A FIN waits behind unsent data.
        const FIN_QUEUED = 1 << 6;
    }
}

/// The state of a connection.
///
/// Includes the current state machine state, the sequence space bookkeeping of both directions,
/// the outbound data and the timers. Fields can be inspected through `Endpoint::with_connection`.
#[derive(Clone, Copy, Debug)]
pub struct Connection {
    pub(crate) generation: u32,
    pub(crate) state: State,
    pub(crate) flags: ConnectionFlags,
    pub(crate) local: Option<IpEndpoint>,
    pub(crate) remote: Option<IpEndpoint>,

    /// The next sequence number to transmit.
    ///
    /// In RFC793 this is referred to as `SND.NXT`.
    pub(crate) send_seq: TcpSeqNumber,

    /// The next sequence number we expect, what our acknowledgments carry.
    ///
    /// In RFC793 this is referred to as `RCV.NXT`.
    pub(crate) send_ack: TcpSeqNumber,

    /// The acknowledgment that was last transmitted.
    ///
    /// Differs from `send_ack` while a delayed acknowledgment is pending.
    pub(crate) sent_ack: TcpSeqNumber,

    /// The highest acknowledgment received.
    ///
    /// In RFC793 this is referred to as `SND.UNA`.
    pub(crate) recv_max_ack: TcpSeqNumber,

    /// The initial sequence number.
    pub(crate) iss: TcpSeqNumber,

    /// The receive window size indicated by us.
    pub(crate) recv_wnd: u16,

    /// The window advertised by the peer.
    pub(crate) send_wnd: u16,

    /// The largest segment we send.
    pub(crate) send_mss: u16,

    pub(crate) retry_timeout_shift: u8,
    pub(crate) retries: u8,
    pub(crate) sent: SentList,
    pub(crate) send_buf: SendBuffer,
    pub(crate) timers: Timers,
    pub(crate) accept_cb: Option<AcceptCallback>,
    pub(crate) accept_data: usize,
    pub(crate) recv_cb: Option<RecvCallback>,
    pub(crate) recv_data: usize,
    pub(crate) session: SessionRef,
    pub(crate) demux: Option<DemuxHandle>,
}

/// Output signals of the model.
///
/// Private representation since they also influence handling of the slot itself.
#[derive(Clone, Copy, Default, Debug)]
pub(crate) struct Signals {
    /// If the slot should be released.
    pub(crate) release: bool,
}

/// The interface to a single locked connection of an endpoint.
///
/// Carries everything an event needs besides the connection: the collaborators, the clock and the
/// completion of the slot.
pub struct Operator<'c, I> {
    pub(crate) conn: &'c mut Connection,
    pub(crate) key: SlotKey,
    pub(crate) shared: &'c Shared<I>,
    pub(crate) completion: &'c Completion,
    pub(crate) now: Instant,
    pub(crate) signals: Signals,
}

impl State {
    /// The RFC 793 name of the state.
    pub fn as_str(self) -> &'static str {
        match self {
            State::Closed => "CLOSED",
            State::Listen => "LISTEN",
            State::SynSent => "SYN_SENT",
            State::SynReceived => "SYN_RCVD",
            State::Established => "ESTABLISHED",
            State::FinWait1 => "FIN_WAIT_1",
            State::FinWait2 => "FIN_WAIT_2",
            State::Closing => "CLOSING",
            State::TimeWait => "TIME_WAIT",
            State::CloseWait => "CLOSE_WAIT",
            State::LastAck => "LAST_ACK",
        }
    }

    /// Whether both sides have seen the other's SYN acknowledged.
    pub fn is_synchronized(self) -> bool {
        match self {
            State::Closed | State::Listen | State::SynSent | State::SynReceived => false,
            _ => true,
        }
    }

    fn accepts_data(self) -> bool {
        match self {
            State::Established | State::FinWait1 | State::FinWait2 => true,
            _ => false,
        }
    }

    fn may_send(self) -> bool {
        match self {
            State::Established | State::CloseWait | State::FinWait1 | State::LastAck => true,
            _ => false,
        }
    }
}

impl Default for State {
    fn default() -> Self {
        State::Closed
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Connection {
    /// A closed connection of an unused slot.
    pub const fn new() -> Self {
        Connection {
            generation: 1,
            state: State::Closed,
            flags: ConnectionFlags::empty(),
            local: None,
            remote: None,
            send_seq: TcpSeqNumber(0),
            send_ack: TcpSeqNumber(0),
            sent_ack: TcpSeqNumber(0),
            recv_max_ack: TcpSeqNumber(0),
            iss: TcpSeqNumber(0),
            recv_wnd: 0,
            send_wnd: 0,
            send_mss: DEFAULT_MSS,
            retry_timeout_shift: 0,
            retries: 0,
            sent: SentList::new(),
            send_buf: SendBuffer::new(),
            timers: Timers::new(),
            accept_cb: None,
            accept_data: 0,
            recv_cb: None,
            recv_data: 0,
            session: SessionRef(0),
            demux: None,
        }
    }

    /// The current state of the state machine.
    pub fn state(&self) -> State {
        self.state
    }

    /// The bookkeeping bits.
    pub fn flags(&self) -> ConnectionFlags {
        self.flags
    }

    /// The bound local endpoint.
    pub fn local(&self) -> Option<IpEndpoint> {
        self.local
    }

    /// The remote endpoint, once known.
    pub fn remote(&self) -> Option<IpEndpoint> {
        self.remote
    }

    /// The next sequence number to transmit.
    pub fn send_seq(&self) -> TcpSeqNumber {
        self.send_seq
    }

    /// The next sequence number expected from the peer.
    pub fn send_ack(&self) -> TcpSeqNumber {
        self.send_ack
    }

    /// The highest acknowledgment received.
    pub fn recv_max_ack(&self) -> TcpSeqNumber {
        self.recv_max_ack
    }

    /// The initial sequence number.
    pub fn iss(&self) -> TcpSeqNumber {
        self.iss
    }

    /// The advertised receive window.
    pub fn recv_wnd(&self) -> u16 {
        self.recv_wnd
    }

    /// The peer's window.
    pub fn send_wnd(&self) -> u16 {
        self.send_wnd
    }

    /// The negotiated send MSS.
    pub fn send_mss(&self) -> u16 {
        self.send_mss
    }

    /// The current exponent of the retransmission backoff.
    pub fn retry_timeout_shift(&self) -> u8 {
        self.retry_timeout_shift
    }

    /// Consecutive retransmissions without progress.
    pub fn retries(&self) -> u8 {
        self.retries
    }

    /// The segments in flight.
    pub fn sent(&self) -> &SentList {
        &self.sent
    }

    /// The outbound data.
    pub fn send_buf(&self) -> &SendBuffer {
        &self.send_buf
    }

    /// The timers.
    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    /// The session owning the connection.
    pub fn session(&self) -> SessionRef {
        self.session
    }
}

impl Default for Connection {
    fn default() -> Self {
        Connection::new()
    }
}

impl<'c, I: Io> Operator<'c, I> {
    pub(crate) fn new(
        conn: &'c mut Connection,
        key: SlotKey,
        shared: &'c Shared<I>,
        completion: &'c Completion,
        now: Instant,
    ) -> Self {
        Operator {
            conn,
            key,
            shared,
            completion,
            now,
            signals: Signals::default(),
        }
    }

    /// The key of the operated connection.
    pub fn key(&self) -> SlotKey {
        self.key
    }

    /// Move to another state and apply the timer rules of the new state.
    pub fn change_state(&mut self, new: State) {
        let old = self.conn.state;
        if old == new {
            return;
        }

        net_debug!("tcp {}: {} -> {}", self.key, old, new);
        self.conn.state = new;

        if let State::FinWait2 | State::TimeWait = old {
            self.conn.timers.fin.cancel();
        }

        match new {
            State::FinWait2 => {
                self.conn.timers.fin.arm_after(self.now, self.shared.config.fin_timeout);
            },
            State::TimeWait => {
                self.conn.timers.retry.cancel();
                self.conn.timers.ack.cancel();
                self.conn.timers.fin.arm_after(self.now, self.shared.config.time_wait_delay);
            },
            State::Closed => self.teardown(),
            _ => (),
        }

        if let Some(observer) = self.shared.observer {
            observer(self.key, old, new);
        }
    }

    /// Process an inbound segment.
    pub fn arrives(&mut self, segment: &Inbound<'_>) {
        net_trace!("tcp {}: {} in {}", self.key, segment.header, self.conn.state);
        match self.conn.state {
            State::Closed => self.arrives_closed(segment),
            State::Listen => self.arrives_listen(segment),
            State::SynSent => self.arrives_syn_sent(segment),
            _ => self.arrives_synchronized(segment),
        }
    }

    /// Answers packets on closed connections with resets.
    ///
    /// Except when an RST flag is already set on the received packet.
    fn arrives_closed(&mut self, segment: &Inbound<'_>) {
        if segment.header.flags.rst() {
            return;
        }
        self.reply_reset(segment);
    }

    fn arrives_listen(&mut self, segment: &Inbound<'_>) {
        let header = &segment.header;
        if header.flags.rst() {
            return;
        }

        if header.flags.ack() {
            // What are you acking? A previous connection.
            self.reply_reset(segment);
            return;
        }

        if !header.flags.syn() {
            count(&self.shared.counters.dropped);
            return;
        }

        let remote = IpEndpoint::new(segment.packet.src_addr, header.src_port);
        let mut local = self.conn.local.unwrap_or_else(|| IpEndpoint::from(header.dst_port));
        if local.addr.is_unspecified() {
            local.addr = segment.packet.dst_addr;
        }

        if let Err(err) = self.reregister(Some(remote), local) {
            net_debug!("tcp {}: can not register {} for {}: {}", self.key, local, remote, err);
            count(&self.shared.counters.dropped);
            return;
        }

        self.conn.local = Some(local);
        self.conn.remote = Some(remote);
        self.conn.send_ack = header.seq_number + 1;
        self.learn_peer(segment);

        let iss = self.conn.iss;
        self.conn.send_buf.reset(iss + 1);
        let flags = TcpFlags::SYN | TcpFlags::ACK;
        let mss = segment::mss_option(self.shared.config.recv_mss());
        if let Err(err) = self.transmit_segment(iss, flags, &mss, 0..0) {
            // Recorded nevertheless, the retransmission timer will try again.
            net_debug!("tcp {}: sending SYN-ACK failed: {}", self.key, err);
        }
        if let Err(err) = self.track(iss, flags, 0) {
            net_debug!("tcp {}: {}", self.key, err);
        }
        self.change_state(State::SynReceived);
    }

    fn arrives_syn_sent(&mut self, segment: &Inbound<'_>) {
        let header = &segment.header;
        if header.flags.ack() {
            let ack = header.ack_number;
            if ack <= self.conn.iss || ack > self.conn.send_seq {
                if !header.flags.rst() {
                    self.reply_reset(segment);
                }
                return;
            }
        }

        if header.flags.rst() {
            if header.flags.ack() {
                self.reset_by_peer();
            }
            return;
        }

        if !header.flags.syn() || !header.flags.ack() {
            // A simultaneous open is not supported.
            count(&self.shared.counters.dropped);
            return;
        }

        self.conn.send_ack = header.seq_number + 1;
        self.learn_peer(segment);
        if self.ack_received(header.ack_number).is_err() {
            return;
        }

        self.change_state(State::Established);
        self.send_ack_now();
        self.completion.resolve(self.conn.generation, Ok(()));
    }

    fn arrives_synchronized(&mut self, segment: &Inbound<'_>) {
        let header = segment.header;
        let seq = header.seq_number;

        // Bytes at the start of the payload that were received before.
        let mut skip = 0;
        match window::classify(self.conn, seq) {
            SeqClass::InWindow => (),
            SeqClass::OldDuplicate
                if !header.flags.rst()
                && seq + header.sequence_len(segment.payload_len) > self.conn.send_ack =>
            {
                skip = (self.conn.send_ack - seq).min(segment.payload_len);
            },
            class => {
                count(&self.shared.counters.out_of_window);
                net_debug!("tcp {}: dropped {:?} segment seq={} expected={}",
                    self.key, class, seq, self.conn.send_ack);
                if class == SeqClass::OldDuplicate && !header.flags.rst() {
                    // Also re-acknowledges a retransmitted FIN in TIME_WAIT.
                    self.send_ack_now();
                }
                return;
            },
        }

        if header.flags.rst() {
            self.reset_by_peer();
            return;
        }

        if header.flags.syn() {
            count(&self.shared.counters.protocol_violation);
            net_debug!("tcp {}: SYN in {}", self.key, self.conn.state);
            self.abort(Error::ProtocolViolation);
            return;
        }

        if !header.flags.ack() {
            count(&self.shared.counters.dropped);
            return;
        }

        let ack = header.ack_number;
        if self.conn.state == State::SynReceived
            && (ack <= self.conn.recv_max_ack || ack > self.conn.send_seq)
        {
            self.reply_reset(segment);
            return;
        }

        if self.ack_received(ack).is_err() {
            return;
        }
        self.conn.send_wnd = header.window_len;

        if self.conn.state == State::SynReceived {
            self.change_state(State::Established);
            if let Some(accept) = self.conn.accept_cb.take() {
                accept(self.key, self.conn.accept_data);
            }
        }

        self.check_fin_acked();
        if self.conn.state == State::Closed {
            return;
        }

        let in_order = seq + skip == self.conn.send_ack;
        // Data beyond the advertised window is not acknowledged, neither is a FIN behind it.
        let payload_len = (segment.payload_len - skip).min(usize::from(self.conn.recv_wnd));
        if !in_order && (payload_len > 0 || header.flags.fin()) {
            // Without a reassembly queue the peer has to send it again.
            count(&self.shared.counters.dropped);
            self.send_ack_now();
            return;
        }

        if payload_len > 0 && self.conn.state.accepts_data() {
            let data = Payload::new(segment.packet, segment.payload_offset + skip, payload_len);
            self.conn.send_ack += payload_len;
            self.notify(Received::Data(data));
            if !self.conn.timers.ack.is_armed() {
                self.conn.timers.ack.arm_after(self.now, self.shared.config.ack_delay);
            }
        }

        if header.flags.fin() && !self.conn.flags.contains(ConnectionFlags::FINAL_RECV)
            && seq + segment.payload_len == self.conn.send_ack
        {
            self.fin_received();
        }

        if self.conn.state.may_send()
            && (self.conn.send_buf.unsent() > 0 || self.conn.flags.contains(ConnectionFlags::FIN_QUEUED))
        {
            if let Err(err) = self.transmit_pending() {
                net_debug!("tcp {}: sending queued data failed: {}", self.key, err);
            }
        }
    }

    fn fin_received(&mut self) {
        self.conn.send_ack += 1;
        self.conn.flags.insert(ConnectionFlags::FINAL_RECV);
        self.notify(Received::Fin);
        self.send_ack_now();

        match self.conn.state {
            State::Established => self.change_state(State::CloseWait),
            // Our FIN is not acknowledged, otherwise this would be FIN_WAIT_2.
            State::FinWait1 => self.change_state(State::Closing),
            State::FinWait2 => self.change_state(State::TimeWait),
            _ => (),
        }
    }

    fn check_fin_acked(&mut self) {
        let fin_acked = self.conn.flags.contains(ConnectionFlags::FINAL_SENT)
            && self.conn.recv_max_ack == self.conn.send_seq;
        if !fin_acked {
            return;
        }

        match self.conn.state {
            State::FinWait1 => self.change_state(State::FinWait2),
            State::Closing => self.change_state(State::TimeWait),
            State::LastAck => self.change_state(State::Closed),
            _ => (),
        }
    }

    fn learn_peer(&mut self, segment: &Inbound<'_>) {
        self.conn.send_wnd = segment.header.window_len;
        if !self.conn.flags.contains(ConnectionFlags::RECV_MSS_SET) {
            // An MSS of zero would never let data out.
            let mss = match segment.options.mss {
                0 => DEFAULT_MSS,
                mss => mss,
            };
            self.conn.send_mss = mss.min(self.shared.config.recv_mss());
            self.conn.flags.insert(ConnectionFlags::RECV_MSS_SET);
        }
    }

    /// Start listening on `local`.
    pub fn listen(&mut self, local: IpEndpoint, accept: AcceptCallback, user_data: usize) -> Result<()> {
        if self.conn.state != State::Closed {
            return Err(Error::Illegal);
        }

        self.reregister(None, local)?;
        self.conn.local = Some(local);
        self.conn.accept_cb = Some(accept);
        self.conn.accept_data = user_data;
        self.change_state(State::Listen);
        Ok(())
    }

    /// Send a SYN to `remote`.
    ///
    /// The connection must be bound to a local endpoint.
    pub fn connect(&mut self, remote: IpEndpoint) -> Result<()> {
        if self.conn.state != State::Closed {
            return Err(Error::Illegal);
        }
        let local = self.conn.local.ok_or(Error::Illegal)?;
        if !remote.is_specified() {
            return Err(Error::Illegal);
        }

        let handle = self.shared.io.lock().register(Some(remote), local, self.key)?;
        self.conn.remote = Some(remote);

        let iss = self.conn.iss;
        self.conn.send_buf.reset(iss + 1);
        let mss = segment::mss_option(self.shared.config.recv_mss());
        if let Err(err) = self.transmit_segment(iss, TcpFlags::SYN, &mss, 0..0) {
            self.conn.remote = None;
            if let Err(err) = self.shared.io.lock().unregister(handle) {
                net_debug!("tcp {}: unregister failed: {}", self.key, err);
            }
            return Err(err);
        }

        self.conn.demux = Some(handle);
        self.track(iss, TcpFlags::SYN, 0)?;
        self.completion.arm(self.conn.generation);
        self.change_state(State::SynSent);
        Ok(())
    }

    /// Close our side of the connection.
    ///
    /// The FIN is sent after all data that is already queued.
    pub fn close(&mut self) -> Result<()> {
        if self.conn.flags.contains(ConnectionFlags::SHUTDOWN) {
            return Err(Error::Shutdown);
        }

        let next = match self.conn.state {
            State::Closed => return Err(Error::Illegal),
            State::Listen => {
                self.change_state(State::Closed);
                return Ok(());
            },
            State::SynSent => {
                self.completion.resolve(self.conn.generation, Err(Error::Shutdown));
                self.change_state(State::Closed);
                return Ok(());
            },
            State::SynReceived | State::Established => State::FinWait1,
            State::CloseWait => State::LastAck,
            _ => return Err(Error::Shutdown),
        };

        self.conn.flags.insert(ConnectionFlags::SHUTDOWN | ConnectionFlags::FIN_QUEUED);
        self.change_state(next);
        self.transmit_pending().map(|_| ())
    }

    /// Copy data into the send buffer.
    pub fn queue(&mut self, data: &[u8]) -> Result<usize> {
        if self.conn.flags.contains(ConnectionFlags::SHUTDOWN) {
            return Err(Error::Shutdown);
        }
        match self.conn.state {
            State::Established | State::CloseWait => (),
            _ => return Err(Error::Illegal),
        }

        let count = self.conn.send_buf.push(data);
        if count == 0 && !data.is_empty() {
            return Err(Error::Exhausted);
        }
        Ok(count)
    }

    /// Transmit queued data.
    pub fn send(&mut self) -> Result<usize> {
        if !self.conn.state.may_send() {
            return Err(Error::Illegal);
        }
        self.transmit_pending()
    }

    /// Tear the connection down on behalf of the application.
    pub fn destroy(&mut self) {
        if self.conn.state == State::Closed {
            self.teardown();
            return;
        }
        self.send_reset();
        self.completion.resolve(self.conn.generation, Err(Error::Shutdown));
        self.change_state(State::Closed);
    }

    /// Close the connection after a fatal error, resetting the peer.
    pub fn abort(&mut self, err: Error) {
        self.send_reset();
        self.fail(err);
    }

    /// Handle the expiry of a timer.
    ///
    /// Returns `false` if the token does not identify the current arming of the timer.
    pub fn fire(&mut self, token: TimerToken) -> bool {
        if !self.conn.timers.get_mut(token.kind).fire(token) {
            return false;
        }

        match token.kind {
            TimerKind::Ack => {
                if self.conn.sent_ack != self.conn.send_ack {
                    self.send_ack_now();
                }
            },
            TimerKind::Retry => self.retry_expired(),
            TimerKind::Fin => match self.conn.state {
                State::FinWait2 | State::TimeWait => self.change_state(State::Closed),
                _ => (),
            },
        }
        true
    }

    fn reset_by_peer(&mut self) {
        net_debug!("tcp {}: reset by peer in {}", self.key, self.conn.state);
        self.fail(Error::Reset);
    }

    fn fail(&mut self, err: Error) {
        if self.completion.is_pending(self.conn.generation) {
            net_debug!("tcp {}: connect failed: {}", self.key, err);
            self.completion.resolve(self.conn.generation, Err(err));
        }
        self.notify(Received::Aborted(err));
        if self.conn.state == State::Closed {
            self.teardown();
        } else {
            self.change_state(State::Closed);
        }
    }

    fn teardown(&mut self) {
        self.conn.timers.cancel_all();
        self.conn.sent.clear();
        let next = self.conn.send_seq;
        self.conn.send_buf.reset(next);
        if let Some(handle) = self.conn.demux.take() {
            if let Err(err) = self.shared.io.lock().unregister(handle) {
                net_debug!("tcp {}: unregister failed: {}", self.key, err);
            }
        }
        self.signals.release = true;
    }

    fn notify(&mut self, event: Received<'_>) {
        if let Some(recv) = self.conn.recv_cb {
            recv(self.key, event, self.conn.recv_data);
        }
    }

    /// Replace the demultiplexer registration.
    fn reregister(&mut self, remote: Option<IpEndpoint>, local: IpEndpoint) -> Result<()> {
        let mut io = self.shared.io.lock();
        let handle = io.register(remote, local, self.key)?;
        if let Some(old) = self.conn.demux.replace(handle) {
            if let Err(err) = io.unregister(old) {
                net_debug!("tcp {}: unregister failed: {}", self.key, err);
            }
        }
        Ok(())
    }

    fn send_ack_now(&mut self) {
        let seq = self.conn.send_seq;
        if let Err(err) = self.transmit_segment(seq, TcpFlags::ACK, &[], 0..0) {
            net_debug!("tcp {}: sending ACK failed: {}", self.key, err);
        }
    }

    fn send_reset(&mut self) {
        let result = {
            let mut io = self.shared.io.lock();
            match segment::prepare_reset(self.conn, &mut *io) {
                Ok(Some(packet)) => io.transmit(packet).map(|()| true),
                Ok(None) => Ok(false),
                Err(err) => Err(err),
            }
        };

        match result {
            Ok(true) => count(&self.shared.counters.resets_sent),
            Ok(false) => (),
            Err(err) => net_debug!("tcp {}: sending RST failed: {}", self.key, err),
        }
    }

    fn reply_reset(&mut self, segment: &Inbound<'_>) {
        let result = {
            let mut io = self.shared.io.lock();
            segment::reply_reset(&mut *io, segment)
                .and_then(|packet| io.transmit(packet))
        };

        match result {
            Ok(()) => count(&self.shared.counters.resets_sent),
            Err(err) => net_debug!("tcp {}: sending RST failed: {}", self.key, err),
        }
    }

    /// Build and send one segment, with data taken from the send buffer.
    pub(crate) fn transmit_segment(
        &mut self,
        seq: TcpSeqNumber,
        flags: TcpFlags,
        options: &[u8],
        data: Range<usize>,
    ) -> Result<()> {
        let remote = self.conn.remote.ok_or(Error::Illegal)?;
        {
            let conn: &Connection = &*self.conn;
            let payload = conn.send_buf.slices(data);
            let mut io = self.shared.io.lock();
            let packet = segment::build_segment(conn, &mut *io, seq, flags, options, payload, None, &remote)?;
            io.transmit(packet)?;
        }

        if flags.ack() {
            self.conn.sent_ack = self.conn.send_ack;
            if self.conn.timers.ack.is_armed() {
                self.conn.timers.ack.cancel();
            }
        }
        Ok(())
    }
}
