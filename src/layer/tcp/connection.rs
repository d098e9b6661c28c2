use crate::time::{Expiration, Instant};
use crate::wire::tcp::{Repr, SeqNumber};

use super::{CloseReason, Config, Token, DEFAULT_MSS, MAX_WINDOW, RETRY_SHIFT_MAX, SENT_QUEUE_LEN};
use super::endpoint::FourTuple;
use super::state::{Event, State};

/// The record of one connection.
///
/// Holds the state machine state, the configuration that stays constant for
/// the lifetime of the connection, the sequence bookkeeping of both
/// directions, the queue of unacknowledged segments and the three protocol
/// timers. Records live in the endpoint's fixed pool and are driven
/// exclusively through it.
pub struct Tcb<P> {
    /// The local and remote end point, the demultiplexing key.
    pub(super) tuple: FourTuple,

    /// The current state of the state machine.
    ///
    /// Only ever changed by applying the transition function.
    pub(super) state: State,

    /// Next sequence number this side will send.
    pub(super) send_seq: SeqNumber,

    /// Next sequence number expected from the peer, the value placed in the
    /// ACK field of the next outbound segment.
    pub(super) send_ack: SeqNumber,

    /// The last ACK value actually transmitted.
    ///
    /// Differs from `send_ack` while an acknowledgment is still pending
    /// under the delayed-ack timer.
    pub(super) sent_ack: SeqNumber,

    /// Highest sequence number acknowledged by the peer so far.
    pub(super) recv_max_ack: SeqNumber,

    /// The receive window advertised to the peer, capped at [`MAX_WINDOW`].
    ///
    /// [`MAX_WINDOW`]: ../constant.MAX_WINDOW.html
    pub(super) recv_wnd: u16,

    /// Maximum segment size for data sent to the peer.
    ///
    /// Starts at the protocol default and is overridden at most once, by an
    /// MSS option on the peer's SYN.
    pub(super) send_mss: u16,

    /// Exponential backoff exponent of the retransmit timer.
    ///
    /// Saturates at [`RETRY_SHIFT_MAX`]; the backoff is capped, not
    /// unbounded.
    ///
    /// [`RETRY_SHIFT_MAX`]: ../constant.RETRY_SHIFT_MAX.html
    pub(super) retry_shift: u8,

    /// Consecutive retransmit expirations without an acknowledgment.
    pub(super) retry_count: u8,

    /// A retransmitted segment is in flight and not yet acknowledged.
    pub(super) retrying: bool,

    /// The MSS option has been applied and stays fixed for the connection.
    pub(super) mss_fixed: bool,

    /// The connection was shut down locally; no further sends are accepted.
    pub(super) shutdown: bool,

    /// Our FIN has been transmitted.
    ///
    /// Tracked independently of the state because a FIN can be re-sent or
    /// lost during timer-driven recovery.
    pub(super) fin_sent: bool,

    /// The peer's FIN has been observed.
    pub(super) fin_rcvd: bool,

    /// This record was created by a passive open.
    pub(super) accept: bool,

    /// One-shot completion signal of an active open.
    pub(super) connect: ConnectWait,

    /// Opaque token forwarded to the data-delivery callback.
    pub(super) user: Token,

    /// Ordered queue of not-yet-acknowledged outbound segments.
    pub(super) sent: SentQueue<P>,

    /// Deadline of the delayed acknowledgment.
    pub(super) ack_timer: Expiration,

    /// Deadline of the lost-FIN recovery, doubling as the TIME_WAIT hold.
    pub(super) fin_timer: Expiration,

    /// Deadline of the retransmission timer.
    pub(super) retry_timer: Expiration,
}

/// The completion signal of a synchronous active open.
///
/// Signaled exactly once, by either successful establishment or a terminal
/// failure. The opening context consumes the outcome instead of blocking on
/// the worker that drives the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum ConnectWait {
    /// Not an active open.
    Idle,

    /// The handshake is in progress.
    Pending,

    /// The open concluded.
    Done(core::result::Result<(), CloseReason>),
}

/// One entry of the unacknowledged-segment queue.
pub(super) struct Sent<P> {
    /// One past the last sequence number the segment occupies.
    ///
    /// The entry may only leave the queue once an acknowledgment covers this
    /// number.
    pub end: SeqNumber,

    /// The framed segment, kept verbatim for retransmission.
    pub buf: P,
}

/// The ordered queue of unacknowledged outbound segments.
///
/// Insertion order is transmission order. The capacity is fixed; a full
/// queue is a resource limit the sender observes as back pressure.
pub(super) struct SentQueue<P> {
    entries: [Option<Sent<P>>; SENT_QUEUE_LEN],
    head: usize,
    len: usize,
}

impl<P> Tcb<P> {
    pub(super) fn new(tuple: FourTuple, user: Token) -> Self {
        Tcb {
            tuple,
            state: State::default(),
            send_seq: SeqNumber::default(),
            send_ack: SeqNumber::default(),
            sent_ack: SeqNumber::default(),
            recv_max_ack: SeqNumber::default(),
            recv_wnd: MAX_WINDOW,
            send_mss: DEFAULT_MSS,
            retry_shift: 0,
            retry_count: 0,
            retrying: false,
            mss_fixed: false,
            shutdown: false,
            fin_sent: false,
            fin_rcvd: false,
            accept: false,
            connect: ConnectWait::Idle,
            user,
            sent: SentQueue::new(),
            ack_timer: Expiration::Never,
            fin_timer: Expiration::Never,
            retry_timer: Expiration::Never,
        }
    }

    /// Seed the send sequence with an initial sequence number.
    pub(super) fn seed_isn(&mut self, isn: SeqNumber) {
        self.send_seq = isn;
        self.recv_max_ack = isn;
    }

    /// The current state of the connection.
    pub fn state(&self) -> State {
        self.state
    }

    /// The connection four tuple.
    pub fn tuple(&self) -> FourTuple {
        self.tuple
    }

    /// The receive window currently advertised to the peer.
    pub fn recv_window(&self) -> u16 {
        self.recv_wnd
    }

    /// The maximum segment size for data sent to the peer.
    pub fn send_mss(&self) -> u16 {
        self.send_mss
    }

    /// The opaque token registered for data delivery.
    pub fn user_token(&self) -> Token {
        self.user
    }

    /// Whether our FIN has been transmitted.
    pub fn fin_transmitted(&self) -> bool {
        self.fin_sent
    }

    /// Whether the peer's FIN has been observed.
    pub fn fin_received(&self) -> bool {
        self.fin_rcvd
    }

    /// Whether the connection was shut down locally.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Whether a retransmitted segment is waiting for its acknowledgment.
    pub fn is_retrying(&self) -> bool {
        self.retrying
    }

    /// Whether this record was created by a passive open.
    pub fn is_passive(&self) -> bool {
        self.accept
    }

    /// The outcome of an active open, once it concluded.
    pub fn connect_outcome(&self) -> Option<core::result::Result<(), CloseReason>> {
        match self.connect {
            ConnectWait::Done(result) => Some(result),
            _ => None,
        }
    }

    /// Resolve the one-shot connect signal.
    ///
    /// Only the first resolution takes effect.
    pub(super) fn finish_connect(&mut self, result: core::result::Result<(), CloseReason>) {
        if let ConnectWait::Pending = self.connect {
            self.connect = ConnectWait::Done(result);
        }
    }

    /// Classify a received segment into a state machine event.
    ///
    /// The distinction between a plain acknowledgment and one covering our
    /// FIN requires the send sequence, which is why this lives on the record
    /// and not in the pure transition function.
    pub(super) fn classify(&self, segment: &Repr) -> Option<Event> {
        let flags = segment.flags;
        if flags.rst() {
            return Some(Event::Rst);
        }
        if flags.syn() {
            return Some(if flags.ack() { Event::SynAck } else { Event::Syn });
        }

        // Our FIN occupies the sequence number just below `send_seq` once
        // sent; any acknowledgment at or past `send_seq` covers it.
        let acks_fin = self.fin_sent && match segment.ack_number {
            Some(ack) => ack >= self.send_seq,
            None => false,
        };

        if flags.fin() {
            Some(if acks_fin { Event::FinAck } else { Event::Fin })
        } else if flags.ack() {
            Some(if acks_fin { Event::AckOfFin } else { Event::Ack })
        } else {
            None
        }
    }

    /// Check that a segment's sequence number falls into the receive window.
    ///
    /// The window is `[send_ack, send_ack + recv_wnd)` modulo 2^32. Segments
    /// outside of it must not be applied to any state.
    pub(super) fn validate_sequence(&self, segment: &Repr) -> bool {
        segment.seq_number.in_window(self.send_ack, u32::from(self.recv_wnd))
    }

    /// Apply an acknowledgment value to the record.
    ///
    /// Advances `recv_max_ack` monotonically (modulo 2^32), releases every
    /// queued segment that is covered entirely, and resets the retransmit
    /// backoff when progress was made. A duplicate acknowledgment changes
    /// nothing.
    pub(super) fn apply_ack(&mut self, ack: SeqNumber, now: Instant, config: &Config) {
        if self.recv_max_ack < ack {
            self.recv_max_ack = ack;
        }

        let released = self.sent.release_through(self.recv_max_ack);
        if released == 0 {
            return;
        }

        self.retry_shift = 0;
        self.retry_count = 0;
        self.retrying = false;
        self.retry_timer = if self.sent.is_empty() {
            Expiration::Never
        } else {
            Expiration::When(now + config.retry_timeout)
        };
    }

    /// Take note of the MSS option of a SYN segment.
    ///
    /// The negotiated value is fixed for the lifetime of the connection; any
    /// later option is ignored.
    pub(super) fn apply_mss_option(&mut self, segment: &Repr) {
        if self.mss_fixed {
            return;
        }
        if let Some(mss) = segment.max_seg_size {
            self.send_mss = mss;
            self.mss_fixed = true;
        }
    }

    /// Account for a freshly framed outbound segment.
    ///
    /// Advances the send sequence by the space the segment occupies and
    /// settles a pending acknowledgment if the segment carried one.
    pub(super) fn note_transmitted(&mut self, repr: &Repr) {
        self.send_seq += repr.sequence_len();
        if repr.flags.fin() {
            self.fin_sent = true;
        }
        if repr.ack_number.is_some() {
            self.sent_ack = self.send_ack;
            self.ack_timer = Expiration::Never;
        }
    }

    /// Schedule the delayed acknowledgment, unless one is already pending.
    pub(super) fn schedule_ack(&mut self, now: Instant, config: &Config) {
        if let Expiration::Never = self.ack_timer {
            self.ack_timer = Expiration::When(now + config.ack_delay);
        }
    }

    /// Arm the retransmit timer at the base timeout.
    pub(super) fn arm_retry(&mut self, now: Instant, config: &Config) {
        self.retry_timer = Expiration::When(now + config.retry_timeout);
    }

    /// Reschedule the retransmit timer after an expiration, one backoff step
    /// further out.
    pub(super) fn backoff_retry(&mut self, now: Instant, config: &Config) {
        if self.retry_shift < RETRY_SHIFT_MAX {
            self.retry_shift += 1;
        }
        self.retry_timer = Expiration::When(
            now + config.retry_timeout * (1u32 << self.retry_shift));
    }

    /// The earliest pending deadline of this record.
    pub(super) fn poll_at(&self) -> Expiration {
        self.ack_timer
            .earliest(self.fin_timer)
            .earliest(self.retry_timer)
    }
}

impl<P> SentQueue<P> {
    pub fn new() -> Self {
        SentQueue {
            entries: [None, None, None, None, None, None, None, None],
            head: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == SENT_QUEUE_LEN
    }

    /// Append a segment in transmission order.
    ///
    /// Returns the entry for immediate transmission. When the queue is at
    /// capacity the segment is handed back instead.
    pub fn push(&mut self, entry: Sent<P>) -> core::result::Result<&mut Sent<P>, Sent<P>> {
        if self.is_full() {
            return Err(entry);
        }
        let idx = (self.head + self.len) % SENT_QUEUE_LEN;
        self.entries[idx] = Some(entry);
        self.len += 1;
        match self.entries[idx].as_mut() {
            Some(entry) => Ok(entry),
            None => unreachable!(),
        }
    }

    /// The oldest unacknowledged segment.
    pub fn front_mut(&mut self) -> Option<&mut Sent<P>> {
        if self.is_empty() {
            return None;
        }
        self.entries[self.head].as_mut()
    }

    /// Drop every segment whose byte range is covered by `ack`.
    ///
    /// Returns the number of released entries. An entry is covered only when
    /// `ack` reaches its end sequence number.
    pub fn release_through(&mut self, ack: SeqNumber) -> usize {
        let mut released = 0;
        while self.len > 0 {
            let end = match self.entries[self.head] {
                Some(ref entry) => entry.end,
                None => break,
            };
            if !(end <= ack) {
                break;
            }
            self.entries[self.head] = None;
            self.head = (self.head + 1) % SENT_QUEUE_LEN;
            self.len -= 1;
            released += 1;
        }
        released
    }

    /// Discard all pending segments without delivering them.
    pub fn clear(&mut self) {
        for entry in self.entries.iter_mut() {
            *entry = None;
        }
        self.head = 0;
        self.len = 0;
    }
}
