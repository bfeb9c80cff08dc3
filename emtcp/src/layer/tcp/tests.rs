use std::cell::RefCell;
use std::mem;
use std::thread;

use crate::layer::Error;
use crate::time::{Expiration, Instant};
use crate::wire::{IpAddress, IpEndpoint, Packet, TcpFlags, TcpHeader, TcpSeqNumber};
use crate::wire::tcp::DEFAULT_MSS;

use super::*;

const LOCAL: IpEndpoint = IpEndpoint { addr: IpAddress::v4(10, 0, 0, 1), port: 80 };
const REMOTE: IpEndpoint = IpEndpoint { addr: IpAddress::v4(10, 0, 0, 2), port: 4000 };
const ISS: u32 = 1000;

/// All collaborators in one, recording what the connections send.
struct TestIo {
    sent: Vec<Packet>,
    available: usize,
    routes: Vec<(DemuxHandle, Option<IpEndpoint>, IpEndpoint, SlotKey)>,
    next_handle: usize,
}

impl PacketAlloc for TestIo {
    fn alloc(&mut self) -> Option<Packet> {
        if self.available == 0 {
            return None;
        }
        self.available -= 1;
        Packet::with_headroom(64, 20).ok()
    }

    fn release(&mut self, _: Packet) {
        self.available += 1;
    }
}

impl Transmit for TestIo {
    fn transmit(&mut self, packet: Packet) -> crate::layer::Result<()> {
        self.sent.push(packet);
        Ok(())
    }
}

impl Demux for TestIo {
    fn register(&mut self, remote: Option<IpEndpoint>, local: IpEndpoint, key: SlotKey)
        -> crate::layer::Result<DemuxHandle>
    {
        let handle = DemuxHandle(self.next_handle);
        self.next_handle += 1;
        self.routes.push((handle, remote, local, key));
        Ok(handle)
    }

    fn unregister(&mut self, handle: DemuxHandle) -> crate::layer::Result<()> {
        let index = self.routes.iter()
            .position(|route| route.0 == handle)
            .ok_or(Error::Illegal)?;
        self.routes.remove(index);
        Ok(())
    }
}

impl Random for TestIo {
    fn rand_u32(&mut self) -> u32 {
        ISS
    }
}

/// Allocates the packets that the remote side sends to us.
struct Remote;

impl PacketAlloc for Remote {
    fn alloc(&mut self) -> Option<Packet> {
        Some(Packet::new(32))
    }

    fn release(&mut self, _: Packet) { }
}

/// A segment as the connection sent it.
#[derive(Debug)]
struct Out {
    header: TcpHeader,
    mss: u16,
    payload: Vec<u8>,
}

#[derive(Debug, PartialEq, Eq)]
enum Event {
    Accepted(SlotKey, usize),
    Data(Vec<u8>),
    Fin,
    Aborted(Error),
    Changed(State, State),
}

thread_local! {
    static EVENTS: RefCell<Vec<Event>> = RefCell::new(Vec::new());
}

fn record(event: Event) {
    EVENTS.with(|events| events.borrow_mut().push(event));
}

fn events() -> Vec<Event> {
    EVENTS.with(|events| mem::take(&mut *events.borrow_mut()))
}

fn on_accept(key: SlotKey, user_data: usize) {
    record(Event::Accepted(key, user_data));
}

fn on_recv(_: SlotKey, event: Received<'_>, _: usize) {
    record(match event {
        Received::Data(payload) => {
            let mut data = vec![0; payload.len()];
            assert_eq!(payload.copy_to(&mut data), payload.len());
            Event::Data(data)
        },
        Received::Fin => Event::Fin,
        Received::Aborted(err) => Event::Aborted(err),
    });
}

fn on_change(_: SlotKey, old: State, new: State) {
    record(Event::Changed(old, new));
}

fn at(millis: i64) -> Instant {
    Instant::from_millis(millis)
}

fn endpoint(slots: &[Slot]) -> Endpoint<'_, TestIo> {
    endpoint_with(slots, Config::default())
}

fn endpoint_with(slots: &[Slot], config: Config) -> Endpoint<'_, TestIo> {
    let io = TestIo {
        sent: Vec::new(),
        available: 64,
        routes: Vec::new(),
        next_handle: 0,
    };
    Endpoint::new(slots, io, config)
}

/// A segment from `remote` to the local endpoint.
fn segment_from(
    remote: IpEndpoint,
    seq: u32,
    ack: Option<u32>,
    flags: TcpFlags,
    window: u16,
    options: &[u8],
    payload: &[u8],
) -> Packet {
    let mut peer = Connection::new();
    peer.local = Some(remote);
    peer.recv_wnd = window;
    let mut flags = flags;
    if let Some(ack) = ack {
        peer.send_ack = TcpSeqNumber::from_u32(ack);
        flags.set_ack(true);
    }
    segment::build_segment(&peer, &mut Remote, TcpSeqNumber::from_u32(seq), flags, options,
        [payload, &[]], None, &LOCAL).unwrap()
}

fn segment_with(seq: u32, ack: Option<u32>, flags: TcpFlags, window: u16, options: &[u8], payload: &[u8])
    -> Packet
{
    segment_from(REMOTE, seq, ack, flags, window, options, payload)
}

fn segment(seq: u32, ack: Option<u32>, flags: TcpFlags, payload: &[u8]) -> Packet {
    segment_with(seq, ack, flags, 8192, &[], payload)
}

fn ack(seq: u32, ack: u32) -> Packet {
    segment(seq, Some(ack), TcpFlags::default(), &[])
}

fn drain(ep: &Endpoint<'_, TestIo>) -> Vec<Out> {
    let packets = mem::take(&mut ep.io().sent);
    packets.iter().map(|packet| {
        let segment = segment::parse_inbound(packet).unwrap();
        let mut payload = vec![0; segment.payload_len];
        packet.read(segment.payload_offset, &mut payload).unwrap();
        Out { header: segment.header, mss: segment.options.mss, payload }
    }).collect()
}

/// The connection registered for the four tuple with `remote`.
fn connection_to(ep: &Endpoint<'_, TestIo>, remote: IpEndpoint) -> SlotKey {
    ep.io().routes.iter()
        .find(|route| route.1 == Some(remote))
        .map(|route| route.3)
        .unwrap()
}

/// Accept a connection from the remote whose initial sequence number is 100.
///
/// The listener stays in the first slot, the accepted connection is returned.
fn accept_one(ep: &Endpoint<'_, TestIo>) -> SlotKey {
    let listener = ep.create(SessionRef(7)).unwrap();
    ep.set_recv_callback(listener, on_recv, 0).unwrap();
    ep.listen(listener, LOCAL, on_accept, 42).unwrap();
    ep.input(listener, &segment(100, None, TcpFlags::SYN, &[]), at(0)).unwrap();
    let key = connection_to(ep, REMOTE);
    ep.input(key, &ack(101, ISS + 1), at(0)).unwrap();
    assert_eq!(ep.state(key), Ok(State::Established));
    assert_eq!(ep.state(listener), Ok(State::Listen));
    drain(ep);
    events();
    key
}

#[test]
fn passive_handshake() {
    let slots: [Slot; 2] = Default::default();
    let ep = endpoint(&slots);
    let listener = ep.create(SessionRef(7)).unwrap();
    ep.listen(listener, LOCAL, on_accept, 42).unwrap();
    assert_eq!(ep.io().routes[0].1, None);

    let syn = segment_with(100, None, TcpFlags::SYN, 8192, &segment::mss_option(1200), &[]);
    ep.input(listener, &syn, at(0)).unwrap();
    assert_eq!(ep.state(listener), Ok(State::Listen));
    let key = connection_to(&ep, REMOTE);
    assert_ne!(key, listener);
    assert_eq!(ep.state(key), Ok(State::SynReceived));

    let out = drain(&ep);
    assert_eq!(out.len(), 1);
    let syn_ack = &out[0].header;
    assert_eq!(syn_ack.flags, TcpFlags::SYN | TcpFlags::ACK);
    assert_eq!(syn_ack.seq_number, TcpSeqNumber::from_u32(ISS));
    assert_eq!(syn_ack.ack_number, TcpSeqNumber::from_u32(101));
    assert_eq!(syn_ack.window_len, 4096);
    assert_eq!((syn_ack.src_port, syn_ack.dst_port), (80, 4000));
    assert_eq!(out[0].mss, 1460);

    // The connection adds its four tuple, the listener keeps the wildcard.
    {
        let io = ep.io();
        assert_eq!(io.routes.len(), 2);
        assert_eq!((io.routes[0].1, io.routes[0].3), (None, listener));
        assert_eq!((io.routes[1].1, io.routes[1].3), (Some(REMOTE), key));
    }

    ep.input(key, &ack(101, ISS + 1), at(10)).unwrap();
    assert_eq!(ep.state(key), Ok(State::Established));
    assert_eq!(events(), vec![Event::Accepted(key, 42)]);
    assert!(drain(&ep).is_empty());
    assert_eq!(ep.send_mss(key), Ok(1200));

    ep.with_connection(key, |conn| {
        assert_eq!(conn.send_ack(), TcpSeqNumber::from_u32(101));
        assert_eq!(conn.recv_max_ack(), TcpSeqNumber::from_u32(ISS + 1));
        assert_eq!(conn.send_wnd(), 8192);
        assert_eq!(conn.session(), SessionRef(7));
        assert!(conn.sent().is_empty());
        assert!(!conn.timers().retry.is_armed());
    }).unwrap();

    // A duplicate of the final ACK does not accept the connection again.
    ep.input(key, &ack(101, ISS + 1), at(20)).unwrap();
    assert!(events().is_empty());
}

#[test]
fn listen_on_any_address() {
    let slots: [Slot; 2] = Default::default();
    let ep = endpoint(&slots);
    let listener = ep.create(SessionRef::default()).unwrap();
    ep.listen(listener, IpEndpoint::from(80), on_accept, 0).unwrap();
    ep.input(listener, &segment(100, None, TcpFlags::SYN, &[]), at(0)).unwrap();

    let key = connection_to(&ep, REMOTE);
    let local = ep.with_connection(key, Connection::local).unwrap();
    assert_eq!(local, Some(LOCAL));
    let local = ep.with_connection(listener, Connection::local).unwrap();
    assert_eq!(local, Some(IpEndpoint::from(80)));
    let sent = mem::take(&mut ep.io().sent);
    assert_eq!(sent[0].src_addr, LOCAL.addr);
    assert_eq!(sent[0].dst_addr, REMOTE.addr);
}

#[test]
fn syn_ack_backoff() {
    let slots: [Slot; 2] = Default::default();
    let ep = endpoint(&slots);
    let listener = ep.create(SessionRef::default()).unwrap();
    ep.listen(listener, LOCAL, on_accept, 0).unwrap();
    ep.input(listener, &segment(100, None, TcpFlags::SYN, &[]), at(0)).unwrap();
    let key = connection_to(&ep, REMOTE);
    assert_eq!(drain(&ep).len(), 1);
    assert_eq!(ep.next_expiration(), Expiration::When(at(200)));

    ep.poll(at(199));
    assert!(drain(&ep).is_empty());

    ep.poll(at(200));
    let out = drain(&ep);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].header.flags, TcpFlags::SYN | TcpFlags::ACK);
    assert_eq!(out[0].header.seq_number, TcpSeqNumber::from_u32(ISS));
    assert_eq!(out[0].mss, 1460);
    assert_eq!(ep.next_expiration(), Expiration::When(at(600)));

    ep.poll(at(600));
    assert_eq!(drain(&ep).len(), 1);
    assert_eq!(ep.next_expiration(), Expiration::When(at(1400)));
    ep.with_connection(key, |conn| {
        assert_eq!(conn.retry_timeout_shift(), 2);
        assert!(conn.flags().contains(ConnectionFlags::RETRYING));
    }).unwrap();

    ep.input(key, &ack(101, ISS + 1), at(700)).unwrap();
    assert_eq!(ep.state(key), Ok(State::Established));
    ep.with_connection(key, |conn| {
        assert!(conn.sent().is_empty());
        assert!(!conn.timers().retry.is_armed());
        assert_eq!(conn.retry_timeout_shift(), 0);
        assert_eq!(conn.retries(), 0);
        assert!(!conn.flags().contains(ConnectionFlags::RETRYING));
    }).unwrap();
    assert_eq!(ep.stats().retransmitted, 2);
    assert_eq!(ep.next_expiration(), Expiration::Never);
}

#[test]
fn active_open() {
    let slots: [Slot; 1] = Default::default();
    let ep = endpoint(&slots);
    let key = ep.create(SessionRef::default()).unwrap();
    assert_eq!(ep.connect(key, REMOTE, at(0)).unwrap_err(), Error::Illegal);

    ep.bind(key, LOCAL).unwrap();
    assert_eq!(ep.bind(key, LOCAL), Err(Error::Illegal));
    let wait = ep.connect(key, REMOTE, at(0)).unwrap();
    assert_eq!(ep.state(key), Ok(State::SynSent));
    assert_eq!(wait.try_result(), None);

    let out = drain(&ep);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].header.flags, TcpFlags::SYN);
    assert_eq!(out[0].header.seq_number, TcpSeqNumber::from_u32(ISS));
    assert_eq!(out[0].mss, 1460);

    let syn_ack = segment_with(300, Some(ISS + 1), TcpFlags::SYN, 8192, &segment::mss_option(1000), &[]);
    ep.input(key, &syn_ack, at(5)).unwrap();
    assert_eq!(ep.state(key), Ok(State::Established));
    assert_eq!(wait.try_result(), Some(Ok(())));
    assert_eq!(wait.wait(), Ok(()));
    assert_eq!(ep.send_mss(key), Ok(1000));
    assert_eq!(ep.recv_mss(key), Ok(1460));

    let out = drain(&ep);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].header.flags, TcpFlags::ACK);
    assert_eq!(out[0].header.seq_number, TcpSeqNumber::from_u32(ISS + 1));
    assert_eq!(out[0].header.ack_number, TcpSeqNumber::from_u32(301));
}

#[test]
fn connect_blocks_until_established() {
    let slots: [Slot; 2] = Default::default();
    let ep = endpoint(&slots);
    let key = ep.create(SessionRef::default()).unwrap();
    ep.bind(key, LOCAL).unwrap();
    let wait = ep.connect(key, REMOTE, at(0)).unwrap();

    thread::scope(|scope| {
        scope.spawn(|| {
            let syn_ack = segment(300, Some(ISS + 1), TcpFlags::SYN, &[]);
            ep.input(key, &syn_ack, at(5)).unwrap();
        });
        assert_eq!(wait.wait(), Ok(()));
    });
    assert_eq!(ep.state(key), Ok(State::Established));
}

#[test]
fn bad_ack_in_syn_sent() {
    let slots: [Slot; 1] = Default::default();
    let ep = endpoint(&slots);
    let key = ep.create(SessionRef::default()).unwrap();
    ep.bind(key, LOCAL).unwrap();
    let _wait = ep.connect(key, REMOTE, at(0)).unwrap();
    drain(&ep);

    ep.input(key, &segment(300, Some(ISS + 7), TcpFlags::SYN, &[]), at(1)).unwrap();
    assert_eq!(ep.state(key), Ok(State::SynSent));
    let out = drain(&ep);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].header.flags, TcpFlags::RST);
    assert_eq!(out[0].header.seq_number, TcpSeqNumber::from_u32(ISS + 7));

    // Simultaneous open.
    ep.input(key, &segment(300, None, TcpFlags::SYN, &[]), at(2)).unwrap();
    assert_eq!(ep.state(key), Ok(State::SynSent));
    assert_eq!(ep.stats().dropped, 1);
    assert!(drain(&ep).is_empty());
}

#[test]
fn retries_exhausted() {
    let slots: [Slot; 1] = Default::default();
    let ep = endpoint(&slots);
    let key = ep.create(SessionRef::default()).unwrap();
    ep.bind(key, LOCAL).unwrap();
    let wait = ep.connect(key, REMOTE, at(0)).unwrap();

    for _ in 0..20 {
        match ep.next_expiration() {
            Expiration::When(deadline) => ep.poll(deadline),
            Expiration::Never => break,
        }
    }

    assert_eq!(wait.try_result(), Some(Err(Error::RetryExhausted)));
    assert_eq!(ep.state(key), Err(Error::Illegal));
    assert_eq!(ep.stats().retransmitted, 9);
    assert_eq!(ep.stats().resets_sent, 0);
    // The initial SYN and its retransmissions, no reset.
    let out = drain(&ep);
    assert_eq!(out.len(), 10);
    assert!(out.iter().all(|out| out.header.flags == TcpFlags::SYN));
    assert!(ep.io().routes.is_empty());
    assert!(!slots[0].is_used());
}

#[test]
fn active_close() {
    let slots: [Slot; 2] = Default::default();
    let ep = endpoint(&slots).with_observer(on_change);
    let key = accept_one(&ep);

    ep.close(key, at(1000)).unwrap();
    assert_eq!(ep.state(key), Ok(State::FinWait1));
    let out = drain(&ep);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].header.flags, TcpFlags::FIN | TcpFlags::ACK);
    assert_eq!(out[0].header.seq_number, TcpSeqNumber::from_u32(ISS + 1));
    assert_eq!(ep.queue_data(key, b"late"), Err(Error::Shutdown));
    assert_eq!(ep.close(key, at(1000)), Err(Error::Shutdown));

    ep.input(key, &ack(101, ISS + 2), at(1010)).unwrap();
    assert_eq!(ep.state(key), Ok(State::FinWait2));

    ep.input(key, &segment(101, Some(ISS + 2), TcpFlags::FIN, &[]), at(1020)).unwrap();
    assert_eq!(ep.state(key), Ok(State::TimeWait));
    let out = drain(&ep);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].header.flags, TcpFlags::ACK);
    assert_eq!(out[0].header.ack_number, TcpSeqNumber::from_u32(102));
    assert_eq!(ep.next_expiration(), Expiration::When(at(1270)));

    // A retransmitted FIN is answered again.
    ep.input(key, &segment(101, Some(ISS + 2), TcpFlags::FIN, &[]), at(1030)).unwrap();
    let out = drain(&ep);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].header.ack_number, TcpSeqNumber::from_u32(102));
    assert_eq!(ep.stats().out_of_window, 1);

    ep.poll(at(1270));
    assert_eq!(ep.state(key), Err(Error::Illegal));
    assert!(!slots[1].is_used());
    assert_eq!(events(), vec![
        Event::Changed(State::Established, State::FinWait1),
        Event::Changed(State::FinWait1, State::FinWait2),
        Event::Fin,
        Event::Changed(State::FinWait2, State::TimeWait),
        Event::Changed(State::TimeWait, State::Closed),
    ]);
}

#[test]
fn passive_close() {
    let slots: [Slot; 2] = Default::default();
    let ep = endpoint(&slots);
    let key = accept_one(&ep);

    ep.input(key, &segment(101, Some(ISS + 1), TcpFlags::FIN, &[]), at(10)).unwrap();
    assert_eq!(ep.state(key), Ok(State::CloseWait));
    assert_eq!(events(), vec![Event::Fin]);
    assert_eq!(drain(&ep)[0].header.ack_number, TcpSeqNumber::from_u32(102));

    assert_eq!(ep.queue_data(key, b"bye"), Ok(3));
    assert_eq!(ep.send_data(key, at(20)), Ok(3));
    let out = drain(&ep);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].header.flags, TcpFlags::ACK | TcpFlags::PSH);
    assert_eq!(out[0].payload, b"bye");

    ep.close(key, at(30)).unwrap();
    assert_eq!(ep.state(key), Ok(State::LastAck));
    let out = drain(&ep);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].header.flags, TcpFlags::FIN | TcpFlags::ACK);
    assert_eq!(out[0].header.seq_number, TcpSeqNumber::from_u32(ISS + 4));

    ep.input(key, &ack(102, ISS + 5), at(40)).unwrap();
    assert_eq!(ep.state(key), Err(Error::Illegal));
    assert!(!slots[1].is_used());
}

#[test]
fn simultaneous_close() {
    let slots: [Slot; 2] = Default::default();
    let ep = endpoint(&slots);
    let key = accept_one(&ep);

    ep.close(key, at(10)).unwrap();
    ep.input(key, &segment(101, Some(ISS + 1), TcpFlags::FIN, &[]), at(20)).unwrap();
    assert_eq!(ep.state(key), Ok(State::Closing));

    ep.input(key, &ack(102, ISS + 2), at(30)).unwrap();
    assert_eq!(ep.state(key), Ok(State::TimeWait));
    assert_eq!(ep.next_expiration(), Expiration::When(at(280)));
}

#[test]
fn fin_follows_queued_data() {
    let slots: [Slot; 2] = Default::default();
    let ep = endpoint(&slots);
    let key = accept_one(&ep);

    assert_eq!(ep.queue_data(key, b"hello"), Ok(5));
    ep.close(key, at(10)).unwrap();
    let out = drain(&ep);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].header.flags, TcpFlags::ACK | TcpFlags::PSH | TcpFlags::FIN);
    assert_eq!(out[0].payload, b"hello");
    ep.with_connection(key, |conn| {
        assert_eq!(conn.send_seq(), TcpSeqNumber::from_u32(ISS + 7));
        assert!(conn.flags().contains(ConnectionFlags::FINAL_SENT));
        assert!(!conn.flags().contains(ConnectionFlags::FIN_QUEUED));
    }).unwrap();
}

#[test]
fn close_before_established() {
    let slots: [Slot; 2] = Default::default();
    let ep = endpoint(&slots);

    let fresh = ep.create(SessionRef::default()).unwrap();
    assert_eq!(ep.close(fresh, at(0)), Err(Error::Illegal));

    let listening = ep.create(SessionRef::default()).unwrap();
    ep.listen(listening, LOCAL, on_accept, 0).unwrap();
    ep.close(listening, at(0)).unwrap();
    assert_eq!(ep.state(listening), Err(Error::Illegal));
    assert_eq!(ep.io().routes.len(), 0);

    ep.bind(fresh, LOCAL).unwrap();
    let wait = ep.connect(fresh, REMOTE, at(0)).unwrap();
    ep.close(fresh, at(1)).unwrap();
    assert_eq!(wait.wait(), Err(Error::Shutdown));
    assert_eq!(ep.stats().resets_sent, 0);
}

#[test]
fn reset_by_peer() {
    let slots: [Slot; 2] = Default::default();
    let ep = endpoint(&slots);
    let key = accept_one(&ep);

    ep.input(key, &segment(101, None, TcpFlags::RST, &[]), at(10)).unwrap();
    assert_eq!(events(), vec![Event::Aborted(Error::Reset)]);
    assert_eq!(ep.state(key), Err(Error::Illegal));
    assert!(drain(&ep).is_empty());
    // Only the listener is left.
    let remotes: Vec<_> = ep.io().routes.iter().map(|route| route.1).collect();
    assert_eq!(remotes, [None]);
}

#[test]
fn reset_in_syn_sent() {
    let slots: [Slot; 1] = Default::default();
    let ep = endpoint(&slots);
    let key = ep.create(SessionRef::default()).unwrap();
    ep.bind(key, LOCAL).unwrap();
    let wait = ep.connect(key, REMOTE, at(0)).unwrap();

    // Without an acceptable ACK the reset is ignored.
    ep.input(key, &segment(0, None, TcpFlags::RST, &[]), at(1)).unwrap();
    assert_eq!(wait.try_result(), None);

    ep.input(key, &segment(0, Some(ISS + 1), TcpFlags::RST, &[]), at(2)).unwrap();
    assert_eq!(wait.wait(), Err(Error::Reset));
    assert_eq!(ep.state(key), Err(Error::Illegal));
}

#[test]
fn reset_reply_without_connection() {
    let slots: [Slot; 2] = Default::default();
    let ep = endpoint(&slots);

    let closed = ep.create(SessionRef::default()).unwrap();
    ep.input(closed, &ack(55, 777), at(0)).unwrap();
    let out = drain(&ep);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].header.flags, TcpFlags::RST);
    assert_eq!(out[0].header.seq_number, TcpSeqNumber::from_u32(777));

    // Nothing answers a reset.
    ep.input(closed, &segment(55, None, TcpFlags::RST, &[]), at(0)).unwrap();
    assert!(drain(&ep).is_empty());

    let listening = ep.create(SessionRef::default()).unwrap();
    ep.listen(listening, LOCAL, on_accept, 0).unwrap();
    ep.input(listening, &ack(55, 777), at(0)).unwrap();
    assert_eq!(drain(&ep)[0].header.flags, TcpFlags::RST);
    assert_eq!(ep.state(listening), Ok(State::Listen));

    ep.input(listening, &segment(55, None, TcpFlags::FIN, &[]), at(0)).unwrap();
    assert!(drain(&ep).is_empty());
    assert_eq!(ep.stats().dropped, 1);
    assert_eq!(ep.stats().resets_sent, 2);
}

#[test]
fn syn_while_established() {
    let slots: [Slot; 2] = Default::default();
    let ep = endpoint(&slots);
    let key = accept_one(&ep);

    ep.input(key, &segment(101, None, TcpFlags::SYN, &[]), at(10)).unwrap();
    assert_eq!(events(), vec![Event::Aborted(Error::ProtocolViolation)]);
    assert_eq!(ep.state(key), Err(Error::Illegal));

    let out = drain(&ep);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].header.flags, TcpFlags::RST | TcpFlags::ACK);
    assert_eq!(out[0].header.seq_number, TcpSeqNumber::from_u32(ISS + 1));
    let stats = ep.stats();
    assert_eq!((stats.protocol_violation, stats.resets_sent), (1, 1));
}

#[test]
fn ack_for_unsent_data() {
    let slots: [Slot; 2] = Default::default();
    let ep = endpoint(&slots);
    let key = accept_one(&ep);

    ep.input(key, &ack(101, ISS + 50), at(10)).unwrap();
    assert_eq!(ep.state(key), Ok(State::Established));
    assert_eq!(ep.stats().protocol_violation, 1);
    assert_eq!(ep.ack_received(key, TcpSeqNumber::from_u32(ISS + 50), at(10)),
        Err(Error::ProtocolViolation));
}

#[test]
fn in_order_delivery_and_delayed_ack() {
    let slots: [Slot; 2] = Default::default();
    let ep = endpoint(&slots);
    let key = accept_one(&ep);

    ep.input(key, &segment(101, Some(ISS + 1), TcpFlags::PSH, b"hello"), at(1000)).unwrap();
    assert_eq!(events(), vec![Event::Data(b"hello".to_vec())]);
    assert!(drain(&ep).is_empty());
    assert_eq!(ep.next_expiration(), Expiration::When(at(1100)));

    ep.poll(at(1099));
    assert!(drain(&ep).is_empty());
    ep.poll(at(1100));
    let out = drain(&ep);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].header.flags, TcpFlags::ACK);
    assert_eq!(out[0].header.ack_number, TcpSeqNumber::from_u32(106));

    // A gap is not buffered, the acknowledgment asks for the missing data.
    ep.input(key, &segment(200, Some(ISS + 1), TcpFlags::PSH, b"x"), at(1200)).unwrap();
    assert!(events().is_empty());
    let out = drain(&ep);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].header.ack_number, TcpSeqNumber::from_u32(106));
    assert_eq!(ep.stats().dropped, 1);
}

#[test]
fn data_carries_pending_ack() {
    let slots: [Slot; 2] = Default::default();
    let ep = endpoint(&slots);
    let key = accept_one(&ep);

    ep.input(key, &segment(101, Some(ISS + 1), TcpFlags::PSH, b"ping"), at(10)).unwrap();
    assert_eq!(ep.queue_data(key, b"pong"), Ok(4));
    assert_eq!(ep.send_data(key, at(20)), Ok(4));

    let out = drain(&ep);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].header.ack_number, TcpSeqNumber::from_u32(105));
    assert_eq!(out[0].payload, b"pong");
    ep.with_connection(key, |conn| {
        assert!(!conn.timers().ack.is_armed());
        assert!(conn.timers().retry.is_armed());
        assert_eq!(conn.sent().len(), 1);
    }).unwrap();

    ep.input(key, &ack(105, ISS + 5), at(30)).unwrap();
    ep.with_connection(key, |conn| {
        assert!(conn.sent().is_empty());
        assert!(conn.send_buf().is_empty());
        assert!(!conn.timers().retry.is_armed());
    }).unwrap();
}

#[test]
fn overlapping_and_stale_segments() {
    let slots: [Slot; 2] = Default::default();
    let ep = endpoint(&slots);
    let key = accept_one(&ep);

    ep.input(key, &segment(101, Some(ISS + 1), TcpFlags::PSH, b"hello"), at(10)).unwrap();
    ep.input(key, &segment(103, Some(ISS + 1), TcpFlags::PSH, b"llo world"), at(20)).unwrap();
    assert_eq!(events(), vec![Event::Data(b"hello".to_vec()), Event::Data(b" world".to_vec())]);
    assert_eq!(ep.with_connection(key, Connection::send_ack), Ok(TcpSeqNumber::from_u32(112)));
    drain(&ep);

    // Entirely old data is acknowledged again.
    ep.input(key, &segment(101, Some(ISS + 1), TcpFlags::PSH, b"hel"), at(30)).unwrap();
    let out = drain(&ep);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].header.ack_number, TcpSeqNumber::from_u32(112));

    // Beyond the window is dropped silently.
    ep.input(key, &segment(112 + 4096, Some(ISS + 1), TcpFlags::PSH, b"far"), at(40)).unwrap();
    assert!(drain(&ep).is_empty());
    assert!(events().is_empty());
    assert_eq!(ep.stats().out_of_window, 2);
}

#[test]
fn zero_window_persist() {
    let slots: [Slot; 2] = Default::default();
    let ep = endpoint(&slots);
    let key = accept_one(&ep);

    ep.input(key, &segment_with(101, Some(ISS + 1), TcpFlags::default(), 0, &[], &[]), at(10)).unwrap();
    assert_eq!(ep.with_connection(key, Connection::send_wnd), Ok(0));

    assert_eq!(ep.queue_data(key, b"0123456789"), Ok(10));
    assert_eq!(ep.send_data(key, at(20)), Ok(10));
    assert_eq!(drain(&ep).len(), 1);

    assert_eq!(ep.queue_data(key, b"more"), Ok(4));
    assert_eq!(ep.send_data(key, at(30)), Ok(0));
    assert!(drain(&ep).is_empty());

    // The window opens with the acknowledgment of the lone segment.
    ep.input(key, &segment_with(101, Some(ISS + 11), TcpFlags::default(), 100, &[], &[]), at(40)).unwrap();
    let out = drain(&ep);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].payload, b"more");
}

#[test]
fn send_buffer_limits() {
    let slots: [Slot; 2] = Default::default();
    let ep = endpoint(&slots);
    let key = accept_one(&ep);

    let data = [0x5a; 2000];
    assert_eq!(ep.queue_data(key, &data), Ok(config::SEND_BUFFER_LEN));
    assert_eq!(ep.queue_data(key, &data), Err(Error::Exhausted));

    // Segments are cut at the send MSS.
    assert_eq!(ep.send_data(key, at(10)), Ok(config::SEND_BUFFER_LEN));
    let lens: Vec<usize> = drain(&ep).iter().map(|out| out.payload.len()).collect();
    assert_eq!(lens, [536, 536, 208]);
}

#[test]
fn malformed_segments_are_counted() {
    let slots: [Slot; 2] = Default::default();
    let ep = endpoint(&slots);
    let key = accept_one(&ep);

    let mut packet = segment(101, Some(ISS + 1), TcpFlags::PSH, b"data");
    let mut byte = [0];
    packet.read(22, &mut byte).unwrap();
    packet.write(22, &[!byte[0]]).unwrap();
    assert_eq!(ep.input(key, &packet, at(10)), Ok(()));

    let short = Packet::from_segment(32, &[0; 10]).unwrap();
    assert_eq!(ep.input(key, &short, at(10)), Ok(()));

    assert_eq!(ep.stats().malformed, 2);
    assert!(events().is_empty());
    assert_eq!(ep.state(key), Ok(State::Established));
}

#[test]
fn stale_keys_and_tokens() {
    let slots: [Slot; 2] = Default::default();
    let ep = endpoint(&slots);
    let key = accept_one(&ep);

    ep.queue_data(key, b"abc").unwrap();
    ep.send_data(key, at(10)).unwrap();
    let token = ep.with_connection(key, |conn| conn.timers().retry.token()).unwrap();
    ep.input(key, &ack(101, ISS + 4), at(20)).unwrap();
    assert_eq!(ep.fire(key, token, at(500)), Ok(false));
    assert_eq!(ep.stats().retransmitted, 0);

    ep.destroy(key).unwrap();
    let out = drain(&ep);
    assert_eq!(out.len(), 2);
    assert_eq!(out[1].header.flags, TcpFlags::RST | TcpFlags::ACK);
    assert_eq!(ep.stats().resets_sent, 1);

    assert_eq!(ep.destroy(key), Err(Error::Illegal));
    assert_eq!(ep.queue_data(key, b"x"), Err(Error::Illegal));
    assert_eq!(ep.input(key, &ack(101, ISS + 4), at(30)), Err(Error::Illegal));
    assert_eq!(ep.fire(key, token, at(30)), Err(Error::Illegal));

    let next = ep.create(SessionRef::default()).unwrap();
    assert_eq!(next.index(), key.index());
    assert_eq!(next.generation(), key.generation() + 1);
    assert_eq!(ep.state(key), Err(Error::Illegal));
    assert_eq!(ep.state(next), Ok(State::Closed));
}

#[test]
fn slots_run_out() {
    let slots: [Slot; 1] = Default::default();
    let ep = endpoint(&slots);
    let key = ep.create(SessionRef::default()).unwrap();
    assert_eq!(ep.create(SessionRef::default()), Err(Error::Exhausted));
    assert_eq!(ep.capacity(), 1);

    let mut seen = Vec::new();
    ep.foreach(|key, conn| seen.push((key, conn.state())));
    assert_eq!(seen, [(key, State::Closed)]);

    ep.destroy(key).unwrap();
    assert!(ep.create(SessionRef::default()).is_ok());
}

#[test]
fn packets_run_out() {
    let slots: [Slot; 1] = Default::default();
    let ep = endpoint(&slots);
    let key = ep.create(SessionRef::default()).unwrap();
    ep.bind(key, LOCAL).unwrap();

    ep.io().available = 0;
    assert_eq!(ep.connect(key, REMOTE, at(0)).unwrap_err(), Error::Exhausted);
    assert_eq!(ep.state(key), Ok(State::Closed));
    assert!(ep.io().routes.is_empty());
    assert_eq!(ep.with_connection(key, Connection::remote), Ok(None));

    ep.io().available = 1;
    assert!(ep.connect(key, REMOTE, at(0)).is_ok());
    assert_eq!(ep.state(key), Ok(State::SynSent));
}

#[test]
#[should_panic]
fn release_of_free_slot() {
    let slots: [Slot; 1] = Default::default();
    let ep = endpoint(&slots);
    let mut conn = Connection::new();
    ep.recycle(&slots[0], &mut conn);
}

#[test]
fn fin_acking_our_fin() {
    let slots: [Slot; 2] = Default::default();
    let ep = endpoint(&slots).with_observer(on_change);
    let key = accept_one(&ep);

    ep.close(key, at(10)).unwrap();
    ep.input(key, &segment(101, Some(ISS + 2), TcpFlags::FIN, &[]), at(20)).unwrap();
    assert_eq!(ep.state(key), Ok(State::TimeWait));
    assert_eq!(events(), vec![
        Event::Changed(State::Established, State::FinWait1),
        Event::Changed(State::FinWait1, State::FinWait2),
        Event::Fin,
        Event::Changed(State::FinWait2, State::TimeWait),
    ]);
    assert_eq!(ep.next_expiration(), Expiration::When(at(270)));
}

#[test]
fn listener_accepts_many() {
    let slots: [Slot; 3] = Default::default();
    let ep = endpoint(&slots);
    let listener = ep.create(SessionRef(7)).unwrap();
    ep.listen(listener, LOCAL, on_accept, 42).unwrap();

    let other = IpEndpoint { port: 4001, ..REMOTE };
    ep.input(listener, &segment(100, None, TcpFlags::SYN, &[]), at(0)).unwrap();
    ep.input(listener, &segment_from(other, 500, None, TcpFlags::SYN, 8192, &[], &[]), at(1)).unwrap();
    let first = connection_to(&ep, REMOTE);
    let second = connection_to(&ep, other);
    assert_ne!(first, second);
    assert_ne!(first, listener);
    assert_eq!(ep.state(listener), Ok(State::Listen));
    assert_eq!(ep.state(first), Ok(State::SynReceived));
    assert_eq!(ep.state(second), Ok(State::SynReceived));

    let out = drain(&ep);
    assert_eq!(out.len(), 2);
    assert_eq!((out[0].header.dst_port, out[0].header.ack_number), (4000, TcpSeqNumber::from_u32(101)));
    assert_eq!((out[1].header.dst_port, out[1].header.ack_number), (4001, TcpSeqNumber::from_u32(501)));

    let second_ack = segment_from(other, 501, Some(ISS + 1), TcpFlags::default(), 8192, &[], &[]);
    ep.input(second, &second_ack, at(2)).unwrap();
    ep.input(first, &ack(101, ISS + 1), at(3)).unwrap();
    assert_eq!(events(), vec![Event::Accepted(second, 42), Event::Accepted(first, 42)]);
    assert_eq!(ep.state(first), Ok(State::Established));
    assert_eq!(ep.state(second), Ok(State::Established));
    assert_eq!(ep.with_connection(second, Connection::session), Ok(SessionRef(7)));
    assert_eq!(ep.with_connection(second, Connection::remote), Ok(Some(other)));

    {
        let io = ep.io();
        assert_eq!(io.routes.len(), 3);
        assert!(io.routes.iter().any(|route| route.1.is_none() && route.3 == listener));
    }

    // All slots are taken, the request is dropped.
    let late = IpEndpoint { port: 4002, ..REMOTE };
    let syn = segment_from(late, 900, None, TcpFlags::SYN, 8192, &[], &[]);
    assert_eq!(ep.input(listener, &syn, at(4)), Err(Error::Exhausted));
    assert_eq!(ep.stats().dropped, 1);
    assert!(drain(&ep).is_empty());
    assert_eq!(ep.state(listener), Ok(State::Listen));

    // Closing the listener leaves the accepted connections alone.
    ep.close(listener, at(5)).unwrap();
    assert_eq!(ep.state(listener), Err(Error::Illegal));
    assert_eq!(ep.state(first), Ok(State::Established));
    assert_eq!(ep.io().routes.len(), 2);
}

#[test]
fn zero_mss_from_peer() {
    let slots: [Slot; 2] = Default::default();
    let ep = endpoint(&slots);
    let listener = ep.create(SessionRef::default()).unwrap();
    ep.listen(listener, LOCAL, on_accept, 0).unwrap();

    let syn = segment_with(100, None, TcpFlags::SYN, 8192, &segment::mss_option(0), &[]);
    ep.input(listener, &syn, at(0)).unwrap();
    let key = connection_to(&ep, REMOTE);
    ep.input(key, &ack(101, ISS + 1), at(0)).unwrap();
    assert_eq!(ep.send_mss(key), Ok(DEFAULT_MSS));
    drain(&ep);

    assert_eq!(ep.queue_data(key, b"hello"), Ok(5));
    assert_eq!(ep.send_data(key, at(10)), Ok(5));
    let out = drain(&ep);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].payload, b"hello");
    ep.with_connection(key, |conn| {
        assert_eq!(conn.sent().len(), 1);
        assert_eq!(conn.send_buf().unsent(), 0);
        assert_eq!(conn.send_seq(), TcpSeqNumber::from_u32(ISS + 6));
    }).unwrap();
}

#[test]
fn data_retransmission_backoff() {
    let slots: [Slot; 2] = Default::default();
    let ep = endpoint(&slots);
    let key = accept_one(&ep);

    assert_eq!(ep.queue_data(key, b"abcdef"), Ok(6));
    assert_eq!(ep.send_data(key, at(1000)), Ok(6));
    assert_eq!(drain(&ep)[0].payload, b"abcdef");
    assert_eq!(ep.next_expiration(), Expiration::When(at(1200)));

    // Progress restarts the timer, the rest of the segment stays in flight.
    ep.input(key, &ack(101, ISS + 3), at(1010)).unwrap();
    assert_eq!(ep.next_expiration(), Expiration::When(at(1210)));

    ep.poll(at(1210));
    let out = drain(&ep);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].header.flags, TcpFlags::ACK | TcpFlags::PSH);
    assert_eq!(out[0].header.seq_number, TcpSeqNumber::from_u32(ISS + 3));
    assert_eq!(out[0].payload, b"cdef");
    assert_eq!(ep.next_expiration(), Expiration::When(at(1610)));

    ep.poll(at(1610));
    let out = drain(&ep);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].header.seq_number, TcpSeqNumber::from_u32(ISS + 3));
    assert_eq!(out[0].payload, b"cdef");
    assert_eq!(ep.next_expiration(), Expiration::When(at(2410)));
    ep.with_connection(key, |conn| {
        assert_eq!(conn.retry_timeout_shift(), 2);
        assert_eq!(conn.retries(), 2);
        assert!(conn.flags().contains(ConnectionFlags::RETRYING));
    }).unwrap();

    ep.input(key, &ack(101, ISS + 7), at(1700)).unwrap();
    ep.with_connection(key, |conn| {
        assert!(conn.sent().is_empty());
        assert!(conn.send_buf().is_empty());
        assert!(!conn.timers().retry.is_armed());
        assert_eq!(conn.retry_timeout_shift(), 0);
        assert_eq!(conn.retries(), 0);
        assert!(!conn.flags().contains(ConnectionFlags::RETRYING));
    }).unwrap();
    assert_eq!(ep.stats().retransmitted, 2);
    assert_eq!(ep.next_expiration(), Expiration::Never);
}

#[test]
fn data_beyond_window_is_cut() {
    let slots: [Slot; 2] = Default::default();
    let ep = endpoint_with(&slots, Config::default().with_recv_window(8));
    let key = accept_one(&ep);

    ep.input(key, &segment(101, Some(ISS + 1), TcpFlags::FIN, b"0123456789ab"), at(10)).unwrap();
    assert_eq!(events(), vec![Event::Data(b"01234567".to_vec())]);
    assert_eq!(ep.state(key), Ok(State::Established));
    assert_eq!(ep.with_connection(key, Connection::send_ack), Ok(TcpSeqNumber::from_u32(109)));

    ep.poll(at(110));
    let out = drain(&ep);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].header.ack_number, TcpSeqNumber::from_u32(109));
    assert_eq!(out[0].header.window_len, 8);

    // The remainder fits and the FIN behind it is taken now.
    ep.input(key, &segment(109, Some(ISS + 1), TcpFlags::FIN, b"89ab"), at(120)).unwrap();
    assert_eq!(events(), vec![Event::Data(b"89ab".to_vec()), Event::Fin]);
    assert_eq!(ep.state(key), Ok(State::CloseWait));
    assert_eq!(drain(&ep)[0].header.ack_number, TcpSeqNumber::from_u32(114));
}

#[derive(Clone, Copy, Debug)]
enum Stimulus {
    Syn,
    SynAck,
    Ack,
    Fin,
    Rst,
    Data,
    Close,
    Send,
    Timer,
}

/// Bring a connection into `state`, everything happening at time 0.
fn drive_to(ep: &Endpoint<'_, TestIo>, state: State) -> SlotKey {
    let key = match state {
        State::Closed => ep.create(SessionRef::default()).unwrap(),
        State::Listen => {
            let key = ep.create(SessionRef::default()).unwrap();
            ep.listen(key, LOCAL, on_accept, 0).unwrap();
            key
        },
        State::SynSent => {
            let key = ep.create(SessionRef::default()).unwrap();
            ep.bind(key, LOCAL).unwrap();
            ep.connect(key, REMOTE, at(0)).unwrap();
            key
        },
        State::SynReceived => {
            let listener = drive_to(ep, State::Listen);
            ep.input(listener, &segment(100, None, TcpFlags::SYN, &[]), at(0)).unwrap();
            connection_to(ep, REMOTE)
        },
        State::Established => accept_one(ep),
        State::FinWait1 | State::Closing => {
            let key = accept_one(ep);
            ep.close(key, at(0)).unwrap();
            if state == State::Closing {
                ep.input(key, &segment(101, Some(ISS + 1), TcpFlags::FIN, &[]), at(0)).unwrap();
            }
            key
        },
        State::FinWait2 | State::TimeWait => {
            let key = drive_to(ep, State::FinWait1);
            ep.input(key, &ack(101, ISS + 2), at(0)).unwrap();
            if state == State::TimeWait {
                ep.input(key, &segment(101, Some(ISS + 2), TcpFlags::FIN, &[]), at(0)).unwrap();
            }
            key
        },
        State::CloseWait | State::LastAck => {
            let key = accept_one(ep);
            ep.input(key, &segment(101, Some(ISS + 1), TcpFlags::FIN, &[]), at(0)).unwrap();
            if state == State::LastAck {
                ep.close(key, at(0)).unwrap();
            }
            key
        },
    };
    assert_eq!(ep.state(key), Ok(state));
    drain(ep);
    events();
    key
}

/// Inbound segments are in window and acknowledge everything sent.
fn stimulate(ep: &Endpoint<'_, TestIo>, key: SlotKey, stimulus: Stimulus) {
    let (rcv, snd) = ep.with_connection(key, |conn| (conn.send_ack().as_u32(), conn.send_seq().as_u32()))
        .unwrap();
    let packet = match stimulus {
        Stimulus::Syn => segment(rcv, None, TcpFlags::SYN, &[]),
        Stimulus::SynAck => segment(rcv, Some(snd), TcpFlags::SYN, &[]),
        Stimulus::Ack => ack(rcv, snd),
        Stimulus::Fin => segment(rcv, Some(snd), TcpFlags::FIN, &[]),
        Stimulus::Rst => segment(rcv, None, TcpFlags::RST, &[]),
        Stimulus::Data => segment(rcv, Some(snd), TcpFlags::PSH, b"data"),
        Stimulus::Close => {
            let _ = ep.close(key, at(0));
            return;
        },
        Stimulus::Send => {
            let _ = ep.queue_data(key, b"xy");
            let _ = ep.send_data(key, at(0));
            return;
        },
        Stimulus::Timer => {
            if let Expiration::When(deadline) = ep.next_expiration() {
                ep.poll(deadline);
            }
            return;
        },
    };
    ep.input(key, &packet, at(0)).unwrap();
}

#[test]
fn state_event_table() {
    use self::State::*;
    use self::Stimulus::*;

    let syn = TcpFlags::SYN;
    let syn_ack = TcpFlags::SYN | TcpFlags::ACK;
    let bare_ack = TcpFlags::ACK;
    let rst = TcpFlags::RST;
    let rst_ack = TcpFlags::RST | TcpFlags::ACK;
    let fin_ack = TcpFlags::FIN | TcpFlags::ACK;
    let psh_ack = TcpFlags::PSH | TcpFlags::ACK;
    let gone: Option<State> = None;

    // The state before, the event, the state after or `None` if released, the flags sent.
    let table: &[(State, Stimulus, Option<State>, &[TcpFlags])] = &[
        (Closed, Syn, Some(Closed), &[rst_ack]),
        (Closed, SynAck, Some(Closed), &[rst]),
        (Closed, Ack, Some(Closed), &[rst]),
        (Closed, Fin, Some(Closed), &[rst]),
        (Closed, Rst, Some(Closed), &[]),
        (Closed, Data, Some(Closed), &[rst]),
        (Closed, Close, Some(Closed), &[]),
        (Closed, Send, Some(Closed), &[]),
        (Closed, Timer, Some(Closed), &[]),

        (Listen, Syn, Some(Listen), &[syn_ack]),
        (Listen, SynAck, Some(Listen), &[rst]),
        (Listen, Ack, Some(Listen), &[rst]),
        (Listen, Fin, Some(Listen), &[rst]),
        (Listen, Rst, Some(Listen), &[]),
        (Listen, Data, Some(Listen), &[rst]),
        (Listen, Close, gone, &[]),
        (Listen, Send, Some(Listen), &[]),
        (Listen, Timer, Some(Listen), &[]),

        (SynSent, Syn, Some(SynSent), &[]),
        (SynSent, SynAck, Some(Established), &[bare_ack]),
        (SynSent, Ack, Some(SynSent), &[]),
        (SynSent, Fin, Some(SynSent), &[]),
        (SynSent, Rst, Some(SynSent), &[]),
        (SynSent, Data, Some(SynSent), &[]),
        (SynSent, Close, gone, &[]),
        (SynSent, Send, Some(SynSent), &[]),
        (SynSent, Timer, Some(SynSent), &[syn]),

        (SynReceived, Syn, gone, &[rst_ack]),
        (SynReceived, SynAck, gone, &[rst_ack]),
        (SynReceived, Ack, Some(Established), &[]),
        (SynReceived, Fin, Some(CloseWait), &[bare_ack]),
        (SynReceived, Rst, gone, &[]),
        (SynReceived, Data, Some(Established), &[]),
        (SynReceived, Close, Some(FinWait1), &[fin_ack]),
        (SynReceived, Send, Some(SynReceived), &[]),
        (SynReceived, Timer, Some(SynReceived), &[syn_ack]),

        (Established, Syn, gone, &[rst_ack]),
        (Established, SynAck, gone, &[rst_ack]),
        (Established, Ack, Some(Established), &[]),
        (Established, Fin, Some(CloseWait), &[bare_ack]),
        (Established, Rst, gone, &[]),
        (Established, Data, Some(Established), &[]),
        (Established, Close, Some(FinWait1), &[fin_ack]),
        (Established, Send, Some(Established), &[psh_ack]),
        (Established, Timer, Some(Established), &[]),

        (FinWait1, Syn, gone, &[rst_ack]),
        (FinWait1, SynAck, gone, &[rst_ack]),
        (FinWait1, Ack, Some(FinWait2), &[]),
        (FinWait1, Fin, Some(TimeWait), &[bare_ack]),
        (FinWait1, Rst, gone, &[]),
        (FinWait1, Data, Some(FinWait2), &[]),
        (FinWait1, Close, Some(FinWait1), &[]),
        (FinWait1, Send, Some(FinWait1), &[]),
        (FinWait1, Timer, Some(FinWait1), &[fin_ack]),

        (FinWait2, Syn, gone, &[rst_ack]),
        (FinWait2, SynAck, gone, &[rst_ack]),
        (FinWait2, Ack, Some(FinWait2), &[]),
        (FinWait2, Fin, Some(TimeWait), &[bare_ack]),
        (FinWait2, Rst, gone, &[]),
        (FinWait2, Data, Some(FinWait2), &[]),
        (FinWait2, Close, Some(FinWait2), &[]),
        (FinWait2, Send, Some(FinWait2), &[]),
        (FinWait2, Timer, gone, &[]),

        (Closing, Syn, gone, &[rst_ack]),
        (Closing, SynAck, gone, &[rst_ack]),
        (Closing, Ack, Some(TimeWait), &[]),
        (Closing, Fin, Some(TimeWait), &[]),
        (Closing, Rst, gone, &[]),
        (Closing, Data, Some(TimeWait), &[]),
        (Closing, Close, Some(Closing), &[]),
        (Closing, Send, Some(Closing), &[]),
        (Closing, Timer, Some(Closing), &[fin_ack]),

        (TimeWait, Syn, gone, &[]),
        (TimeWait, SynAck, gone, &[]),
        (TimeWait, Ack, Some(TimeWait), &[]),
        (TimeWait, Fin, Some(TimeWait), &[]),
        (TimeWait, Rst, gone, &[]),
        (TimeWait, Data, Some(TimeWait), &[]),
        (TimeWait, Close, Some(TimeWait), &[]),
        (TimeWait, Send, Some(TimeWait), &[]),
        (TimeWait, Timer, gone, &[]),

        (CloseWait, Syn, gone, &[rst_ack]),
        (CloseWait, SynAck, gone, &[rst_ack]),
        (CloseWait, Ack, Some(CloseWait), &[]),
        (CloseWait, Fin, Some(CloseWait), &[]),
        (CloseWait, Rst, gone, &[]),
        (CloseWait, Data, Some(CloseWait), &[]),
        (CloseWait, Close, Some(LastAck), &[fin_ack]),
        (CloseWait, Send, Some(CloseWait), &[psh_ack]),
        (CloseWait, Timer, Some(CloseWait), &[]),

        (LastAck, Syn, gone, &[rst_ack]),
        (LastAck, SynAck, gone, &[rst_ack]),
        (LastAck, Ack, gone, &[]),
        (LastAck, Fin, gone, &[]),
        (LastAck, Rst, gone, &[]),
        (LastAck, Data, gone, &[]),
        (LastAck, Close, Some(LastAck), &[]),
        (LastAck, Send, Some(LastAck), &[]),
        (LastAck, Timer, Some(LastAck), &[fin_ack]),
    ];
    assert_eq!(table.len(), 11 * 9);

    for &(before, stimulus, after, flags) in table {
        let slots: [Slot; 2] = Default::default();
        let ep = endpoint(&slots);
        let key = drive_to(&ep, before);
        stimulate(&ep, key, stimulus);

        let sent: Vec<TcpFlags> = drain(&ep).iter().map(|out| out.header.flags).collect();
        let state = ep.state(key).ok();
        assert_eq!((state, &sent[..]), (after, flags), "{:?} in {}", stimulus, before);
        events();
    }
}
