//! The table of connections and the entry points of the layer.
//!
//! Relevant material for reading:
//! Main TCP rfc (skip if confident): https://tools.ietf.org/html/rfc793
//! Errata and comments: https://tools.ietf.org/html/rfc1122#section-4.2
//!     Notably still assuming some good-faith on hosts
//! RST handling specifically: https://www.snellman.net/blog/archive/2016-02-01-tcp-rst/
//!     OS comparison in particular
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use spin::{Mutex, MutexGuard};

use crate::layer::{Error, Result};
use crate::time::{Expiration, Instant};
use crate::wire::{IpEndpoint, Packet, TcpSeqNumber};

use super::completion::{Completion, ConnectWait};
use super::config::Config;
use super::connection::{Connection, ConnectionFlags, Operator, State};
use super::io::{AcceptCallback, Io, RecvCallback, SessionRef, StateObserver};
use super::segment::{self, Inbound};
use super::timer::TimerToken;

/// Handles TCP connection states.
///
/// The endpoint does not own its connections, they live in slots provided by the caller. All
/// methods take `&self`: each slot is locked on its own, allocation and release of slots are
/// serialized by one more lock. Calls into the collaborators happen with a connection locked.
pub struct Endpoint<'a, I> {
    slots: &'a [Slot],
    pool: Mutex<()>,
    clock: Mutex<Instant>,
    shared: Shared<I>,
}

/// A connection slot.
///
/// Can be used to open or accept a new connection. Usage of this acts similar to a slotmap where a
/// dedicated `SlotKey` allows referring to a connection outside of its lifetime without
/// introducing lifetime-tracked references and dependencies.
pub struct Slot {
    used: AtomicBool,
    conn: Mutex<Connection>,
    completion: Completion,
}

/// The index of a connection.
///
/// Useful for storing in other structs to reference the connection at another point in time. Note
/// that the key will be invalidated when the connection itself is closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub(crate) index: usize,
    pub(crate) generation: u32,
}

/// Counters of inbound problems and of recovery actions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Stats {
    /// Segments that failed to parse or had a wrong checksum.
    pub malformed: u32,
    /// Segments outside of the receive window.
    pub out_of_window: u32,
    /// Segments that contradicted the protocol.
    pub protocol_violation: u32,
    /// Segments sent again after a timeout.
    pub retransmitted: u32,
    /// Resets sent.
    pub resets_sent: u32,
    /// Segments ignored for another reason.
    pub dropped: u32,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) malformed: AtomicU32,
    pub(crate) out_of_window: AtomicU32,
    pub(crate) protocol_violation: AtomicU32,
    pub(crate) retransmitted: AtomicU32,
    pub(crate) resets_sent: AtomicU32,
    pub(crate) dropped: AtomicU32,
}

/// The state shared by all connections of an endpoint.
pub(crate) struct Shared<I> {
    pub(crate) io: Mutex<I>,
    pub(crate) config: Config,
    pub(crate) counters: Counters,
    pub(crate) observer: Option<StateObserver>,
}

pub(crate) fn count(counter: &AtomicU32) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Slot {
    /// An unused slot.
    pub const fn new() -> Self {
        Slot {
            used: AtomicBool::new(false),
            conn: Mutex::new(Connection::new()),
            completion: Completion::new(),
        }
    }

    /// Whether the slot holds a connection.
    pub fn is_used(&self) -> bool {
        self.used.load(Ordering::Acquire)
    }
}

impl Default for Slot {
    fn default() -> Self {
        Slot::new()
    }
}

impl SlotKey {
    /// The position of the slot.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The generation of the slot that the key refers to.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

impl Counters {
    fn snapshot(&self) -> Stats {
        let load = |counter: &AtomicU32| counter.load(Ordering::Relaxed);
        Stats {
            malformed: load(&self.malformed),
            out_of_window: load(&self.out_of_window),
            protocol_violation: load(&self.protocol_violation),
            retransmitted: load(&self.retransmitted),
            resets_sent: load(&self.resets_sent),
            dropped: load(&self.dropped),
        }
    }
}

impl<'a, I: Io> Endpoint<'a, I> {
    /// Create an endpoint over caller provided slots.
    pub fn new(slots: &'a [Slot], io: I, config: Config) -> Self {
        Endpoint {
            slots,
            pool: Mutex::new(()),
            clock: Mutex::new(Instant::from_millis(0)),
            shared: Shared {
                io: Mutex::new(io),
                config,
                counters: Counters::default(),
                observer: None,
            },
        }
    }

    /// Call `observer` on every state change of a connection.
    pub fn with_observer(mut self, observer: StateObserver) -> Self {
        self.shared.observer = Some(observer);
        self
    }

    /// The configuration shared by all connections.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// The number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Lock the collaborators.
    ///
    /// The guard must be dropped before calling into the endpoint again.
    pub fn io(&self) -> MutexGuard<'_, I> {
        self.shared.io.lock()
    }

    /// A snapshot of the counters.
    pub fn stats(&self) -> Stats {
        self.shared.counters.snapshot()
    }

    /// Allocate a closed connection.
    ///
    /// The connection gets its initial sequence number from the random source.
    pub fn create(&self, session: SessionRef) -> Result<SlotKey> {
        let (_, _conn, key) = self.allocate(session)?;
        Ok(key)
    }

    /// Close the connection immediately and release its slot.
    ///
    /// A synchronized connection sends a reset first.
    pub fn destroy(&self, key: SlotKey) -> Result<()> {
        let now = self.now();
        self.operate(key, now, |op| op.destroy())
    }

    /// Bind a closed connection to a local endpoint.
    pub fn bind(&self, key: SlotKey, local: IpEndpoint) -> Result<()> {
        let (_, mut conn) = self.lock(key)?;
        if conn.state != State::Closed || conn.local.is_some() {
            return Err(Error::Illegal);
        }
        conn.local = Some(local);
        Ok(())
    }

    /// Wait for connection requests on `local`.
    ///
    /// Every SYN gets a connection in a new slot, `accept` is called with the key of that
    /// connection and `user_data` once its handshake is completed. The listening connection keeps
    /// listening until it is closed.
    pub fn listen(&self, key: SlotKey, local: IpEndpoint, accept: AcceptCallback, user_data: usize)
        -> Result<()>
    {
        let now = self.now();
        self.operate(key, now, |op| op.listen(local, accept, user_data))?
    }

    /// Actively open a connection to `remote`.
    ///
    /// The connection must be bound. The returned object waits for the end of the handshake.
    pub fn connect(&self, key: SlotKey, remote: IpEndpoint, now: Instant) -> Result<ConnectWait<'_>> {
        self.advance_clock(now);
        let generation = self.operate(key, now, |op| -> Result<u32> {
            op.connect(remote)?;
            Ok(op.conn.generation)
        })??;
        Ok(ConnectWait::new(&self.slots[key.index].completion, generation))
    }

    /// Close our side of the connection.
    pub fn close(&self, key: SlotKey, now: Instant) -> Result<()> {
        self.advance_clock(now);
        self.operate(key, now, |op| op.close())?
    }

    /// Copy data into the send buffer of the connection.
    ///
    /// Returns the number of bytes accepted, which may be fewer than offered.
    pub fn queue_data(&self, key: SlotKey, data: &[u8]) -> Result<usize> {
        let now = self.now();
        self.operate(key, now, |op| op.queue(data))?
    }

    /// Transmit queued data, as far as the peer's window allows.
    pub fn send_data(&self, key: SlotKey, now: Instant) -> Result<usize> {
        self.advance_clock(now);
        self.operate(key, now, |op| op.send())?
    }

    /// Process an acknowledgment for the connection.
    pub fn ack_received(&self, key: SlotKey, ack: TcpSeqNumber, now: Instant) -> Result<()> {
        self.advance_clock(now);
        self.operate(key, now, |op| op.ack_received(ack).map(|_| ()))?
    }

    /// Set the callback for received data and connection events.
    pub fn set_recv_callback(&self, key: SlotKey, recv: RecvCallback, user_data: usize) -> Result<()> {
        let (_, mut conn) = self.lock(key)?;
        conn.recv_cb = Some(recv);
        conn.recv_data = user_data;
        Ok(())
    }

    /// The state of the connection.
    pub fn state(&self, key: SlotKey) -> Result<State> {
        self.with_connection(key, |conn| conn.state)
    }

    /// The receive window advertised by the connection.
    pub fn recv_window(&self, key: SlotKey) -> Result<u16> {
        self.with_connection(key, |conn| conn.recv_wnd)
    }

    /// The MSS announced by the connection.
    pub fn recv_mss(&self, key: SlotKey) -> Result<u16> {
        let mss = self.shared.config.recv_mss();
        self.with_connection(key, |_| mss)
    }

    /// The MSS used for sending.
    pub fn send_mss(&self, key: SlotKey) -> Result<u16> {
        self.with_connection(key, |conn| conn.send_mss)
    }

    /// Inspect a connection.
    pub fn with_connection<R>(&self, key: SlotKey, f: impl FnOnce(&Connection) -> R) -> Result<R> {
        let (_, conn) = self.lock(key)?;
        Ok(f(&conn))
    }

    /// Call `f` for all live connections.
    pub fn foreach(&self, mut f: impl FnMut(SlotKey, &Connection)) {
        for (index, slot) in self.slots.iter().enumerate() {
            if !slot.is_used() {
                continue;
            }
            let conn = slot.conn.lock();
            if conn.flags.contains(ConnectionFlags::IN_USE) {
                f(SlotKey { index, generation: conn.generation }, &conn);
            }
        }
    }

    /// Handle a segment that the demultiplexer routed to `key`.
    ///
    /// Problems with the segment itself are counted and never returned. Errors are a key that does
    /// not refer to a live connection, and `Exhausted` for a connection request to a listening
    /// connection when no slot is free.
    pub fn input(&self, key: SlotKey, packet: &Packet, now: Instant) -> Result<()> {
        self.advance_clock(now);
        let (slot, mut conn) = self.lock(key)?;
        let segment = match segment::parse_inbound(packet) {
            Ok(segment) => segment,
            Err(err) => {
                count(&self.shared.counters.malformed);
                net_debug!("tcp {}: dropped segment: {}", key, err);
                return Ok(());
            },
        };

        let flags = segment.header.flags;
        if conn.state == State::Listen && flags.syn() && !flags.ack() && !flags.rst() {
            return self.spawn(key, &conn, &segment, now).map(|_| ());
        }

        let mut op = Operator::new(&mut conn, key, &self.shared, &slot.completion, now);
        op.arrives(&segment);
        if op.signals.release {
            self.recycle(slot, &mut conn);
        }
        Ok(())
    }

    /// Fire all timers that are due at `now`.
    pub fn poll(&self, now: Instant) {
        self.advance_clock(now);
        for (index, slot) in self.slots.iter().enumerate() {
            if !slot.is_used() {
                continue;
            }

            let mut conn = slot.conn.lock();
            if !conn.flags.contains(ConnectionFlags::IN_USE) {
                continue;
            }
            let due = conn.timers.due(now);
            if due.iter().all(Option::is_none) {
                continue;
            }

            let key = SlotKey { index, generation: conn.generation };
            let mut op = Operator::new(&mut conn, key, &self.shared, &slot.completion, now);
            for token in due.iter().flatten() {
                op.fire(*token);
            }
            if op.signals.release {
                self.recycle(slot, &mut conn);
            }
        }
    }

    /// Fire one timer of a connection.
    ///
    /// Returns `Ok(false)` if the token is stale.
    pub fn fire(&self, key: SlotKey, token: TimerToken, now: Instant) -> Result<bool> {
        self.advance_clock(now);
        self.operate(key, now, |op| op.fire(token))
    }

    /// The earliest timer deadline of all connections.
    pub fn next_expiration(&self) -> Expiration {
        let mut next = Expiration::Never;
        self.foreach(|_, conn| next = next.min(conn.timers.next_expiration()));
        next
    }

    /// Claim a free slot and initialize a closed connection in it.
    fn allocate(&self, session: SessionRef) -> Result<(&'a Slot, MutexGuard<'a, Connection>, SlotKey)> {
        let index = {
            let _pool = self.pool.lock();
            match self.slots.iter().position(|slot| !slot.is_used()) {
                Some(index) => {
                    self.slots[index].used.store(true, Ordering::Release);
                    index
                },
                None => {
                    net_debug!("tcp: all {} connection slots in use", self.slots.len());
                    return Err(Error::Exhausted);
                },
            }
        };

        let slot = &self.slots[index];
        let mut conn = slot.conn.lock();
        let iss = TcpSeqNumber::from_u32(self.shared.io.lock().rand_u32());
        let generation = conn.generation;
        *conn = Connection { generation, ..Connection::new() };
        conn.flags.insert(ConnectionFlags::IN_USE);
        conn.session = session;
        conn.iss = iss;
        conn.send_seq = iss;
        conn.recv_max_ack = iss;
        conn.recv_wnd = self.shared.config.recv_window;
        conn.send_buf.reset(iss + 1);

        let key = SlotKey { index, generation };
        net_trace!("tcp {}: created, iss={}", key, iss);
        Ok((slot, conn, key))
    }

    /// Answer a connection request to `listener` with a connection in a new slot.
    ///
    /// The listener stays locked while the pool and then the new connection are locked. No other
    /// path holds two connections at once.
    fn spawn(&self, parent: SlotKey, listener: &Connection, segment: &Inbound<'_>, now: Instant)
        -> Result<SlotKey>
    {
        let (slot, mut conn, key) = match self.allocate(listener.session) {
            Ok(allocated) => allocated,
            Err(err) => {
                count(&self.shared.counters.dropped);
                net_debug!("tcp {}: no slot for connection request: {}", parent, err);
                return Err(err);
            },
        };

        conn.state = State::Listen;
        conn.local = listener.local;
        conn.accept_cb = listener.accept_cb;
        conn.accept_data = listener.accept_data;
        conn.recv_cb = listener.recv_cb;
        conn.recv_data = listener.recv_data;

        net_trace!("tcp {}: connection request for {}", parent, key);
        let mut op = Operator::new(&mut conn, key, &self.shared, &slot.completion, now);
        op.arrives(segment);
        // Still listening if the request could not be registered.
        if op.signals.release || op.conn.state == State::Listen {
            self.recycle(slot, &mut conn);
        }
        Ok(key)
    }

    /// Run `f` on the locked connection and release its slot if it closed.
    fn operate<R>(&self, key: SlotKey, now: Instant, f: impl FnOnce(&mut Operator<'_, I>) -> R)
        -> Result<R>
    {
        let (slot, mut conn) = self.lock(key)?;
        let mut op = Operator::new(&mut conn, key, &self.shared, &slot.completion, now);
        let result = f(&mut op);
        if op.signals.release {
            self.recycle(slot, &mut conn);
        }
        Ok(result)
    }

    fn lock(&self, key: SlotKey) -> Result<(&'a Slot, MutexGuard<'a, Connection>)> {
        let slot = self.slots.get(key.index).ok_or(Error::Illegal)?;
        let conn = slot.conn.lock();
        let live = slot.is_used()
            && conn.generation == key.generation
            && conn.flags.contains(ConnectionFlags::IN_USE);
        if !live {
            return Err(Error::Illegal);
        }
        Ok((slot, conn))
    }

    /// Return a slot to the pool.
    ///
    /// # Panics
    /// This function panics if the slot is not in use.
    pub(crate) fn recycle(&self, slot: &Slot, conn: &mut Connection) {
        let _pool = self.pool.lock();
        assert!(slot.is_used() && conn.flags.contains(ConnectionFlags::IN_USE),
            "tcp: releasing a connection slot that is not in use");

        let generation = match conn.generation.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        net_trace!("tcp #{}: released", conn.generation);
        *conn = Connection { generation, ..Connection::new() };
        slot.used.store(false, Ordering::Release);
    }

    fn now(&self) -> Instant {
        *self.clock.lock()
    }

    fn advance_clock(&self, now: Instant) {
        let mut clock = self.clock.lock();
        if now > *clock {
            *clock = now;
        }
    }
}
