use crate::time::{Duration, Expiration, Instant};
use crate::wire::{Checksum, IpAddress, Ipv4Address};
use crate::wire::tcp::{Flags, Packet, Repr, SeqNumber};

use super::{CloseReason, Config, Endpoint, FourTuple, Host, IsnGenerator, SlotKey, State, Token};

const LOCAL: Ipv4Address = Ipv4Address([10, 0, 0, 1]);
const REMOTE: Ipv4Address = Ipv4Address([10, 0, 0, 2]);
const LOCAL_PORT: u16 = 4400;
const REMOTE_PORT: u16 = 80;
const PEER_ISN: u32 = 9000;

#[derive(Debug, PartialEq, Eq)]
enum Notification {
    Established(SlotKey),
    EndOfData(SlotKey),
    Closed(SlotKey, CloseReason),
}

/// Records everything the engine pushes over the collaborator boundary.
struct TestHost {
    sent: Vec<Vec<u8>>,
    delivered: Vec<(SlotKey, Vec<u8>, Token)>,
    notifications: Vec<Notification>,
    alloc_budget: Option<usize>,
}

impl TestHost {
    fn new() -> Self {
        TestHost {
            sent: Vec::new(),
            delivered: Vec::new(),
            notifications: Vec::new(),
            alloc_budget: None,
        }
    }

    fn sent_repr(&self, idx: usize) -> Repr {
        Repr::parse(&self.sent[idx].as_slice(), Checksum::Manual {
            src_addr: LOCAL.into(),
            dst_addr: REMOTE.into(),
        }).expect("segments the engine emits parse back")
    }
}

impl Host<Vec<u8>> for TestHost {
    fn alloc(&mut self, len: usize) -> Option<Vec<u8>> {
        if let Some(budget) = self.alloc_budget.as_mut() {
            if *budget == 0 {
                return None;
            }
            *budget -= 1;
        }
        Some(vec![0; len])
    }

    fn transmit(&mut self, segment: &mut Vec<u8>) {
        self.sent.push(segment.clone());
    }

    fn deliver(&mut self, key: SlotKey, data: &[u8], token: Token) {
        self.delivered.push((key, data.to_vec(), token));
    }

    fn end_of_data(&mut self, key: SlotKey, _: Token) {
        self.notifications.push(Notification::EndOfData(key));
    }

    fn established(&mut self, key: SlotKey) {
        self.notifications.push(Notification::Established(key));
    }

    fn closed(&mut self, key: SlotKey, reason: CloseReason) {
        self.notifications.push(Notification::Closed(key, reason));
    }
}

fn endpoint(capacity: usize) -> Endpoint<'static, Vec<u8>> {
    Endpoint::with_capacity(
        capacity,
        IsnGenerator::from_secret_key_bytes([7; 16]),
        Config::default())
}

fn tuple() -> FourTuple {
    FourTuple {
        local: LOCAL.into(),
        remote: REMOTE.into(),
        local_port: LOCAL_PORT,
        remote_port: REMOTE_PORT,
    }
}

fn flags(syn: bool, ack: bool, fin: bool, rst: bool) -> Flags {
    let mut flags = Flags::default();
    flags.set_syn(syn);
    flags.set_ack(ack);
    flags.set_fin(fin);
    flags.set_rst(rst);
    flags
}

/// Frame a segment as the peer would send it.
fn peer_segment(flags: Flags, seq: u32, ack: Option<u32>, payload: &[u8]) -> Vec<u8> {
    peer_segment_with_mss(flags, seq, ack, payload, None)
}

fn peer_segment_with_mss(
    flags: Flags,
    seq: u32,
    ack: Option<u32>,
    payload: &[u8],
    mss: Option<u16>,
) -> Vec<u8> {
    let repr = Repr {
        src_port: REMOTE_PORT,
        dst_port: LOCAL_PORT,
        flags,
        seq_number: SeqNumber(seq),
        ack_number: ack.map(SeqNumber),
        window_len: 4096,
        max_seg_size: mss,
        window_scale: None,
        payload_len: payload.len() as u16,
    };
    let mut bytes = vec![0; repr.buffer_len()];
    let mut packet = Packet::new_unchecked(&mut bytes[..], repr);
    repr.emit(&mut packet);
    packet.payload_mut_slice().copy_from_slice(payload);
    packet.fill_checksum(REMOTE.into(), LOCAL.into());
    bytes
}

fn feed(
    endpoint: &mut Endpoint<Vec<u8>>,
    host: &mut TestHost,
    now: Instant,
    segment: &[u8],
) -> crate::layer::Result<()> {
    endpoint.inbound(segment, REMOTE.into(), LOCAL.into(), now, host)
}

/// Run the three-way handshake of an active open.
///
/// Returns the connection key and our initial sequence number; the peer
/// starts at `PEER_ISN`.
fn establish(
    endpoint: &mut Endpoint<Vec<u8>>,
    host: &mut TestHost,
    now: Instant,
) -> (SlotKey, SeqNumber) {
    let key = endpoint.open(tuple(), Token(7), now, host).unwrap();
    let syn = host.sent_repr(host.sent.len() - 1);
    assert!(syn.flags.syn() && !syn.flags.ack());

    let syn_ack = peer_segment(
        flags(true, true, false, false),
        PEER_ISN, Some(syn.seq_number.0.wrapping_add(1)), &[]);
    feed(endpoint, host, now, &syn_ack).unwrap();
    assert_eq!(endpoint.get_state(key), Some(State::Established));

    (key, syn.seq_number)
}

#[test]
fn active_open_walks_the_book() {
    let mut endpoint = endpoint(4);
    let mut host = TestHost::new();
    let mut now = Instant::from_millis(0);

    let key = endpoint.open(tuple(), Token(7), now, &mut host).unwrap();
    assert_eq!(endpoint.get_state(key), Some(State::SynSent));
    assert_eq!(endpoint.connect_outcome(key), None);

    // The initial segment announces our receive MSS.
    let syn = host.sent_repr(0);
    assert!(syn.flags.syn());
    assert_eq!(syn.ack_number, None);
    assert_eq!(syn.max_seg_size, Some(Config::default().recv_mss));
    let isn = syn.seq_number;

    // SYN+ACK completes our side of the handshake with an immediate ACK.
    now = now + Duration::from_millis(1);
    let syn_ack = peer_segment_with_mss(
        flags(true, true, false, false),
        PEER_ISN, Some(isn.0.wrapping_add(1)), &[], Some(1400));
    feed(&mut endpoint, &mut host, now, &syn_ack).unwrap();

    assert_eq!(endpoint.get_state(key), Some(State::Established));
    assert_eq!(endpoint.connect_outcome(key), Some(Ok(())));
    assert_eq!(endpoint.send_mss(key), Some(1400));
    assert_eq!(host.notifications, vec![Notification::Established(key)]);

    let ack = host.sent_repr(1);
    assert!(ack.flags.ack() && !ack.flags.syn());
    assert_eq!(ack.ack_number, Some(SeqNumber(PEER_ISN + 1)));

    // Local close sends FIN and enters the first wait state.
    now = now + Duration::from_millis(1);
    endpoint.close(key, now, &mut host).unwrap();
    assert_eq!(endpoint.get_state(key), Some(State::FinWait1));
    let fin = host.sent_repr(2);
    assert!(fin.flags.fin() && fin.flags.ack());
    assert_eq!(fin.seq_number, isn + 1);

    // The peer acknowledges our FIN.
    now = now + Duration::from_millis(1);
    let fin_ack = peer_segment(
        flags(false, true, false, false),
        PEER_ISN + 1, Some(isn.0.wrapping_add(2)), &[]);
    feed(&mut endpoint, &mut host, now, &fin_ack).unwrap();
    assert_eq!(endpoint.get_state(key), Some(State::FinWait2));

    // The peer closes its direction in turn.
    now = now + Duration::from_millis(1);
    let fin = peer_segment(
        flags(false, true, true, false),
        PEER_ISN + 1, Some(isn.0.wrapping_add(2)), &[]);
    feed(&mut endpoint, &mut host, now, &fin).unwrap();
    assert_eq!(endpoint.get_state(key), Some(State::TimeWait));

    let last_ack = host.sent_repr(host.sent.len() - 1);
    assert!(last_ack.flags.ack());
    assert_eq!(last_ack.ack_number, Some(SeqNumber(PEER_ISN + 2)));
    assert!(host.notifications.contains(&Notification::EndOfData(key)));

    // The hold expires and the record is gone.
    endpoint.poll(now + Duration::from_secs(61), &mut host);
    assert_eq!(endpoint.get_state(key), None);
    assert!(host.notifications.contains(&Notification::Closed(key, CloseReason::Normal)));
    assert_eq!(endpoint.in_use(), 0);
}

#[test]
fn passive_open_accepts_one_connection() {
    let mut endpoint = endpoint(4);
    let mut host = TestHost::new();
    let now = Instant::from_millis(0);

    let key = endpoint.listen(LOCAL.into(), LOCAL_PORT, Token(9)).unwrap();
    assert_eq!(endpoint.get_state(key), Some(State::Listen));

    // The peer connects, announcing a small MSS.
    let syn = peer_segment_with_mss(
        flags(true, false, false, false), PEER_ISN, None, &[], Some(1200));
    feed(&mut endpoint, &mut host, now, &syn).unwrap();
    assert_eq!(endpoint.get_state(key), Some(State::SynRcvd));
    assert_eq!(endpoint.send_mss(key), Some(1200));

    let syn_ack = host.sent_repr(0);
    assert!(syn_ack.flags.syn() && syn_ack.flags.ack());
    assert_eq!(syn_ack.ack_number, Some(SeqNumber(PEER_ISN + 1)));
    assert_eq!(syn_ack.max_seg_size, Some(Config::default().recv_mss));
    let isn = syn_ack.seq_number;

    let hs_ack = peer_segment(
        flags(false, true, false, false),
        PEER_ISN + 1, Some(isn.0.wrapping_add(1)), &[]);
    feed(&mut endpoint, &mut host, now, &hs_ack).unwrap();
    assert_eq!(endpoint.get_state(key), Some(State::Established));
    assert!(host.notifications.contains(&Notification::Established(key)));

    // Passive close initiated by the peer.
    let fin = peer_segment(
        flags(false, true, true, false),
        PEER_ISN + 1, Some(isn.0.wrapping_add(1)), &[]);
    feed(&mut endpoint, &mut host, now, &fin).unwrap();
    assert_eq!(endpoint.get_state(key), Some(State::CloseWait));
    assert!(host.notifications.contains(&Notification::EndOfData(key)));

    endpoint.close(key, now, &mut host).unwrap();
    assert_eq!(endpoint.get_state(key), Some(State::LastAck));

    let our_fin = host.sent_repr(host.sent.len() - 1);
    assert!(our_fin.flags.fin());

    let final_ack = peer_segment(
        flags(false, true, false, false),
        PEER_ISN + 2, Some(our_fin.seq_number.0.wrapping_add(1)), &[]);
    feed(&mut endpoint, &mut host, now, &final_ack).unwrap();
    assert_eq!(endpoint.get_state(key), None);
    assert!(host.notifications.contains(&Notification::Closed(key, CloseReason::Normal)));
}

#[test]
fn open_on_a_full_pool_is_exhausted() {
    let mut endpoint = endpoint(1);
    let mut host = TestHost::new();
    let now = Instant::from_millis(0);

    let listener = endpoint.listen(LOCAL.into(), LOCAL_PORT, Token(0)).unwrap();
    assert_eq!(endpoint.in_use(), 1);

    let attempt = endpoint.open(tuple(), Token(1), now, &mut host);
    assert_eq!(attempt.unwrap_err(), crate::layer::Error::Exhausted);

    // Nothing was sent and nothing was touched.
    assert!(host.sent.is_empty());
    assert_eq!(endpoint.in_use(), 1);
    assert_eq!(endpoint.get_state(listener), Some(State::Listen));
}

#[test]
fn data_is_delivered_and_acked_lazily() {
    let mut endpoint = endpoint(4);
    let mut host = TestHost::new();
    let now = Instant::from_millis(0);

    let (key, isn) = establish(&mut endpoint, &mut host, now);
    let frames_after_handshake = host.sent.len();

    let data = peer_segment(
        flags(false, true, false, false),
        PEER_ISN + 1, Some(isn.0.wrapping_add(1)), b"abcd");
    feed(&mut endpoint, &mut host, now, &data).unwrap();

    assert_eq!(host.delivered.len(), 1);
    assert_eq!(host.delivered[0].1, b"abcd".to_vec());
    assert_eq!(host.delivered[0].2, Token(7));

    // No synchronous acknowledgment; the delayed-ack deadline carries it.
    assert_eq!(host.sent.len(), frames_after_handshake);
    assert_eq!(endpoint.poll_at(), Expiration::When(now + Config::default().ack_delay));

    endpoint.poll(now + Config::default().ack_delay, &mut host);
    let ack = host.sent_repr(host.sent.len() - 1);
    assert!(ack.flags.ack());
    assert_eq!(ack.ack_number, Some(SeqNumber(PEER_ISN + 5)));

    // Once flushed, the deadline is gone.
    let frames = host.sent.len();
    endpoint.poll(now + Duration::from_secs(5), &mut host);
    assert_eq!(host.sent.len(), frames);

    // A duplicate of the same segment is answered right away.
    let dup = peer_segment(
        flags(false, true, false, false),
        PEER_ISN + 1, Some(isn.0.wrapping_add(1)), b"abcd");
    feed(&mut endpoint, &mut host, now, &dup).unwrap_err();
    let corrective = host.sent_repr(host.sent.len() - 1);
    assert_eq!(corrective.ack_number, Some(SeqNumber(PEER_ISN + 5)));
    assert_eq!(host.delivered.len(), 1);
}

#[test]
fn retransmission_is_verbatim_up_to_the_ceiling() {
    let mut endpoint = endpoint(4);
    let mut host = TestHost::new();
    let config = Config::default();
    let now = Instant::from_millis(0);

    let (key, _) = establish(&mut endpoint, &mut host, now);

    let queued = endpoint.send(key, b"hello", now, &mut host).unwrap();
    assert_eq!(queued, 5);
    let original = host.sent[host.sent.len() - 1].clone();

    // The first expiry happens one base timeout out; every retransmission
    // backs the deadline off exponentially.
    assert_eq!(endpoint.poll_at(), Expiration::When(now + config.retry_timeout));

    let mut at = now;
    for round in 1..=u32::from(config.max_retransmits) {
        at = at + Duration::from_secs(1 << round);
        endpoint.poll(at, &mut host);
        assert_eq!(endpoint.get_state(key), Some(State::Established));
        assert_eq!(host.sent[host.sent.len() - 1], original);
    }

    // One more unanswered expiry and the connection is presumed dead.
    at = at + Duration::from_secs(1 << 12);
    endpoint.poll(at, &mut host);
    assert_eq!(endpoint.get_state(key), None);
    assert!(host.notifications.contains(
        &Notification::Closed(key, CloseReason::RetransmitExhausted)));
}

#[test]
fn acknowledged_data_stops_the_retry_timer() {
    let mut endpoint = endpoint(4);
    let mut host = TestHost::new();
    let now = Instant::from_millis(0);

    let (key, isn) = establish(&mut endpoint, &mut host, now);
    endpoint.send(key, b"hello", now, &mut host).unwrap();

    let ack = peer_segment(
        flags(false, true, false, false),
        PEER_ISN + 1, Some(isn.0.wrapping_add(6)), &[]);
    feed(&mut endpoint, &mut host, now, &ack).unwrap();

    assert_eq!(endpoint.poll_at(), Expiration::Never);

    // No ghost retransmission afterwards.
    let frames = host.sent.len();
    endpoint.poll(now + Duration::from_secs(3600), &mut host);
    assert_eq!(host.sent.len(), frames);
    assert_eq!(endpoint.get_state(key), Some(State::Established));
}

#[test]
fn out_of_window_rst_does_not_kill_the_connection() {
    let mut endpoint = endpoint(4);
    let mut host = TestHost::new();
    let now = Instant::from_millis(0);

    let (key, _) = establish(&mut endpoint, &mut host, now);

    // An off-path reset with a wild sequence number is dropped.
    let wild = peer_segment(
        flags(false, false, false, true),
        PEER_ISN.wrapping_add(0x8000_0000), None, &[]);
    let result = feed(&mut endpoint, &mut host, now, &wild);
    assert_eq!(result.unwrap_err(), crate::layer::Error::SequenceOutOfWindow);
    assert_eq!(endpoint.get_state(key), Some(State::Established));

    // A reset at the expected sequence number is fatal.
    let genuine = peer_segment(
        flags(false, false, false, true),
        PEER_ISN + 1, None, &[]);
    feed(&mut endpoint, &mut host, now, &genuine).unwrap();
    assert_eq!(endpoint.get_state(key), None);
    assert!(host.notifications.contains(&Notification::Closed(key, CloseReason::Reset)));
}

#[test]
fn window_acceptance_wraps_the_sequence_space() {
    let mut endpoint = endpoint(4);
    let mut host = TestHost::new();
    let now = Instant::from_millis(0);

    // Arrange the peer's sequence numbers so our receive position sits just
    // below the wrap.
    let key = endpoint.open(tuple(), Token(7), now, &mut host).unwrap();
    let syn = host.sent_repr(0);
    let peer_isn: u32 = 0xffff_ffef;
    let syn_ack = peer_segment(
        flags(true, true, false, false),
        peer_isn, Some(syn.seq_number.0.wrapping_add(1)), &[]);
    feed(&mut endpoint, &mut host, now, &syn_ack).unwrap();
    assert_eq!(endpoint.get_state(key), Some(State::Established));

    // In-window but out of order: dropped with a corrective ack, no state
    // change and no delivery.
    let inside = peer_segment(
        flags(false, true, false, false),
        0x0000_0010, Some(syn.seq_number.0.wrapping_add(1)), b"xx");
    feed(&mut endpoint, &mut host, now, &inside).unwrap();
    assert!(host.delivered.is_empty());

    // Entirely outside the window: rejected as such.
    let outside = peer_segment(
        flags(false, true, false, false),
        0x8000_0000, Some(syn.seq_number.0.wrapping_add(1)), b"xx");
    let result = feed(&mut endpoint, &mut host, now, &outside);
    assert_eq!(result.unwrap_err(), crate::layer::Error::SequenceOutOfWindow);

    // The in-order segment at the wrap is accepted and delivered.
    let in_order = peer_segment(
        flags(false, true, false, false),
        0xffff_fff0, Some(syn.seq_number.0.wrapping_add(1)), b"abcdefgh");
    feed(&mut endpoint, &mut host, now, &in_order).unwrap();
    assert_eq!(host.delivered.len(), 1);
    assert_eq!(host.delivered[0].1, b"abcdefgh".to_vec());
}

#[test]
fn stray_segments_answer_with_reset() {
    let mut endpoint = endpoint(1);
    let mut host = TestHost::new();
    let now = Instant::from_millis(0);

    // A connection attempt against nothing is reset, covering the SYN.
    let syn = peer_segment(flags(true, false, false, false), 4242, None, &[]);
    feed(&mut endpoint, &mut host, now, &syn).unwrap();
    let rst = host.sent_repr(0);
    assert!(rst.flags.rst());
    assert_eq!(rst.ack_number, Some(SeqNumber(4243)));

    // An acknowledgment is reset at the acknowledged number.
    let ack = peer_segment(flags(false, true, false, false), 4242, Some(777), &[]);
    feed(&mut endpoint, &mut host, now, &ack).unwrap();
    let rst = host.sent_repr(1);
    assert!(rst.flags.rst());
    assert_eq!(rst.seq_number, SeqNumber(777));
    assert_eq!(rst.ack_number, None);

    // Incoming resets are never answered in kind.
    let stray_rst = peer_segment(flags(false, false, false, true), 4242, None, &[]);
    feed(&mut endpoint, &mut host, now, &stray_rst).unwrap();
    assert_eq!(host.sent.len(), 2);
}

#[test]
fn send_respects_mss_and_queue_capacity() {
    let mut endpoint = endpoint(4);
    let mut host = TestHost::new();
    let now = Instant::from_millis(0);

    let key = endpoint.open(tuple(), Token(7), now, &mut host).unwrap();
    let syn = host.sent_repr(0);
    // The peer allows only tiny segments.
    let syn_ack = peer_segment_with_mss(
        flags(true, true, false, false),
        PEER_ISN, Some(syn.seq_number.0.wrapping_add(1)), &[], Some(4));
    feed(&mut endpoint, &mut host, now, &syn_ack).unwrap();

    let frames_before = host.sent.len();
    let queued = endpoint.send(key, b"0123456789", now, &mut host).unwrap();
    assert_eq!(queued, 10);
    assert_eq!(host.sent.len(), frames_before + 3);

    let first = host.sent_repr(frames_before);
    assert_eq!(first.payload_len, 4);
    assert!(first.flags.psh() && first.flags.ack());

    // Sequence numbers tile the stream without gaps.
    let second = host.sent_repr(frames_before + 1);
    assert_eq!(second.seq_number, first.seq_number + 4);

    // Eight segments of backlog exist at most; the rest is cut short.
    let long = vec![0x55; 100];
    let queued = endpoint.send(key, &long, now, &mut host).unwrap();
    assert_eq!(queued, 5 * 4);
}

#[test]
fn shutdown_rejects_further_sends() {
    let mut endpoint = endpoint(4);
    let mut host = TestHost::new();
    let now = Instant::from_millis(0);

    let (key, _) = establish(&mut endpoint, &mut host, now);
    endpoint.close(key, now, &mut host).unwrap();

    let result = endpoint.send(key, b"late", now, &mut host);
    assert_eq!(result.unwrap_err(), crate::layer::Error::Illegal);
}

#[test]
fn abort_resets_and_releases() {
    let mut endpoint = endpoint(4);
    let mut host = TestHost::new();
    let now = Instant::from_millis(0);

    let (key, isn) = establish(&mut endpoint, &mut host, now);
    endpoint.abort(key, &mut host).unwrap();

    let rst = host.sent_repr(host.sent.len() - 1);
    assert!(rst.flags.rst());
    assert_eq!(rst.seq_number, isn + 1);
    assert_eq!(endpoint.get_state(key), None);
    assert!(host.notifications.contains(&Notification::Closed(key, CloseReason::Aborted)));
}

#[test]
fn lost_fin_is_bounded_by_the_recovery_timer() {
    let mut endpoint = endpoint(4);
    let mut host = TestHost::new();
    let config = Config::default();
    let now = Instant::from_millis(0);

    let (key, _) = establish(&mut endpoint, &mut host, now);
    endpoint.close(key, now, &mut host).unwrap();
    assert_eq!(endpoint.get_state(key), Some(State::FinWait1));

    // The peer never answers. Retransmissions still run, but the recovery
    // deadline caps how long the half-closed record lingers.
    endpoint.poll(now + config.fin_timeout, &mut host);
    assert_eq!(endpoint.get_state(key), None);
    assert!(host.notifications.contains(
        &Notification::Closed(key, CloseReason::FinTimeout)));
}

#[test]
fn diagnostics_iterate_live_records() {
    let mut endpoint = endpoint(4);
    let mut host = TestHost::new();
    let now = Instant::from_millis(0);

    let (key, _) = establish(&mut endpoint, &mut host, now);
    let listener = endpoint.listen(IpAddress::Unspecified, 8080, Token(1)).unwrap();

    let mut seen = Vec::new();
    endpoint.for_each(|key, tcb| seen.push((key, tcb.state())));
    seen.sort_by_key(|&(_, state)| state.name());

    assert_eq!(seen.len(), 2);
    assert!(seen.contains(&(key, State::Established)));
    assert!(seen.contains(&(listener, State::Listen)));

    assert_eq!(endpoint.recv_window(key), Some(super::MAX_WINDOW));
    assert_eq!(endpoint.recv_mss(key), Some(Config::default().recv_mss));
}

#[test]
fn buffer_exhaustion_surfaces_from_send() {
    let mut endpoint = endpoint(4);
    let mut host = TestHost::new();
    let now = Instant::from_millis(0);

    let (key, _) = establish(&mut endpoint, &mut host, now);

    host.alloc_budget = Some(0);
    let result = endpoint.send(key, b"data", now, &mut host);
    assert_eq!(result.unwrap_err(), crate::layer::Error::Exhausted);
    assert_eq!(endpoint.get_state(key), Some(State::Established));
}
