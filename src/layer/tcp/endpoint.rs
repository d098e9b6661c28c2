use crate::layer::{Error, Result};
use crate::managed::{Pool, Slice, Slot};
use crate::time::{Expiration, Instant};
use crate::wire::{Checksum, IpAddress, PayloadMut};
use crate::wire::tcp::{Flags, Packet, Repr};

use super::{segment, CloseReason, Config, Host, Token, MAX_SEG_LIFETIME, MAX_WINDOW};
use super::connection::{ConnectWait, Sent, Tcb};
use super::isn::IsnGenerator;
use super::state::{transition, Event, State};

/// Handles the TCP connection records.
///
/// The endpoint owns a fixed pool of records, resolves inbound segments to
/// them, applies the state machine and runs the protocol timers. It is
/// driven from a single worker context; see the module documentation.
pub struct Endpoint<'a, P> {
    pool: Pool<'a, Tcb<P>>,
    isn: IsnGenerator,
    config: Config,
}

/// The local and remote end points identifying a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FourTuple {
    pub local: IpAddress,
    pub remote: IpAddress,
    pub local_port: u16,
    pub remote_port: u16,
}

/// The index of a connection.
///
/// Useful for storing in other structs to reference the connection at
/// another point in time. The key is invalidated when the connection itself
/// is closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotKey {
    key: crate::managed::Key,
}

impl<'a, P: PayloadMut> Endpoint<'a, P> {
    pub fn new(slots: Slice<'a, Slot<Tcb<P>>>, isn: IsnGenerator, config: Config) -> Self {
        Endpoint {
            pool: Pool::new(slots),
            isn,
            config,
        }
    }

    /// Construct an endpoint owning storage for `capacity` connections.
    #[cfg(feature = "std")]
    pub fn with_capacity(capacity: usize, isn: IsnGenerator, config: Config) -> Self {
        Endpoint {
            pool: Pool::with_capacity(capacity),
            isn,
            config,
        }
    }

    /// The fixed number of connection records.
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// The number of records currently in use.
    pub fn in_use(&self) -> usize {
        self.pool.len()
    }

    /// Actively open a connection to a remote end point.
    ///
    /// Allocates a record, sends the initial SYN and leaves the handshake to
    /// the worker context. The outcome can be observed through
    /// [`connect_outcome`] and the host's `established`/`closed` hooks.
    ///
    /// Fails with [`Error::Exhausted`] when the pool is full, in which case
    /// no state is touched.
    ///
    /// [`connect_outcome`]: #method.connect_outcome
    /// [`Error::Exhausted`]: ../enum.Error.html
    pub fn open<H>(
        &mut self,
        tuple: FourTuple,
        user: Token,
        now: Instant,
        host: &mut H,
    ) -> Result<SlotKey>
        where H: Host<P>
    {
        if !tuple.local.is_specified() || !tuple.remote.is_specified() {
            return Err(Error::Illegal);
        }
        if tuple.local_port == 0 || tuple.remote_port == 0 {
            return Err(Error::Illegal);
        }
        if self.lookup_exact(tuple).is_some() {
            return Err(Error::Illegal);
        }

        let config = self.config;
        let isn = self.isn.get_isn(tuple, now);

        let mut tcb = Tcb::new(tuple, user);
        tcb.seed_isn(isn);
        tcb.connect = ConnectWait::Pending;

        let opened = transition(State::Closed, Event::OpenActive);
        tcb.state = opened.next;

        let key = match self.pool.insert(tcb) {
            Some(key) => SlotKey { key },
            None => return Err(Error::Exhausted),
        };

        if opened.effects.send_syn {
            let tcb = match self.pool.get_mut(key.key) {
                Some(tcb) => tcb,
                None => return Err(Error::Illegal),
            };
            let mut flags = Flags::default();
            flags.set_syn(true);
            let sent = send_control(tcb, host, &config, flags, now);
            if let Err(err) = sent {
                self.release(key);
                return Err(err);
            }
        }

        Ok(key)
    }

    /// Passively open a local port.
    ///
    /// The record accepts a single successful connection attempt; the owner
    /// is told about it through the host's `established` hook.
    pub fn listen(&mut self, local: IpAddress, port: u16, user: Token) -> Result<SlotKey> {
        if port == 0 {
            return Err(Error::Illegal);
        }

        let tuple = FourTuple {
            local,
            local_port: port,
            // Filled by the remote connection attempt.
            remote: IpAddress::Unspecified,
            remote_port: 0,
        };
        if self.lookup_exact(tuple).is_some() {
            return Err(Error::Illegal);
        }

        let mut tcb = Tcb::new(tuple, user);
        tcb.accept = true;
        tcb.state = transition(State::Closed, Event::OpenPassive).next;

        match self.pool.insert(tcb) {
            Some(key) => Ok(SlotKey { key }),
            None => Err(Error::Exhausted),
        }
    }

    /// Queue application data for transmission.
    ///
    /// The data is segmented by the negotiated MSS, framed, queued for
    /// retransmission and transmitted. Returns the number of bytes taken,
    /// which may be short of `data` when the retransmission queue fills up.
    pub fn send<H>(
        &mut self,
        key: SlotKey,
        data: &[u8],
        now: Instant,
        host: &mut H,
    ) -> Result<usize>
        where H: Host<P>
    {
        let config = self.config;
        let tcb = self.pool.get_mut(key.key).ok_or(Error::Illegal)?;

        match tcb.state() {
            State::Established | State::CloseWait => (),
            _ => return Err(Error::Illegal),
        }
        if tcb.shutdown {
            return Err(Error::Illegal);
        }

        let mut queued = 0;
        for chunk in data.chunks(usize::from(tcb.send_mss()).max(1)) {
            if tcb.sent.is_full() {
                break;
            }
            let was_empty = tcb.sent.is_empty();

            let mut flags = Flags::default();
            flags.set_ack(true);
            flags.set_psh(true);
            let buf = match segment::prepare_segment(host, tcb, flags, 0, chunk) {
                Ok(buf) => buf,
                Err(err) if queued == 0 => return Err(err),
                Err(_) => break,
            };

            let end = tcb.send_seq;
            if let Ok(entry) = tcb.sent.push(Sent { end, buf }) {
                host.transmit(&mut entry.buf);
            }
            if was_empty {
                tcb.arm_retry(now, &config);
            }
            queued += chunk.len();
        }

        if queued == 0 && !data.is_empty() {
            return Err(Error::Exhausted);
        }
        Ok(queued)
    }

    /// Close the connection in an orderly fashion.
    ///
    /// In the synchronized states this sends FIN and walks the regular
    /// shutdown exchange; a connection that never completed its handshake is
    /// released immediately.
    pub fn close<H>(&mut self, key: SlotKey, now: Instant, host: &mut H) -> Result<()>
        where H: Host<P>
    {
        let config = self.config;
        let tcb = self.pool.get_mut(key.key).ok_or(Error::Illegal)?;

        match tcb.state() {
            State::Listen | State::SynSent => {
                tcb.finish_connect(Err(CloseReason::Normal));
                host.closed(key, CloseReason::Normal);
                self.release(key);
                Ok(())
            }
            State::Established | State::CloseWait => {
                let closed = transition(tcb.state(), Event::Close);
                tcb.state = closed.next;
                tcb.shutdown = true;
                if closed.effects.send_fin {
                    // The recovery deadline is armed first so the record is
                    // bounded even if framing the FIN fails.
                    tcb.fin_timer = Expiration::When(now + config.fin_timeout);
                    let mut flags = Flags::default();
                    flags.set_fin(true);
                    flags.set_ack(true);
                    send_control(tcb, host, &config, flags, now)?;
                }
                Ok(())
            }
            _ => Err(Error::Illegal),
        }
    }

    /// Abort the connection: emit a reset and release the record.
    pub fn abort<H>(&mut self, key: SlotKey, host: &mut H) -> Result<()>
        where H: Host<P>
    {
        let tcb = self.pool.get_mut(key.key).ok_or(Error::Illegal)?;

        if tcb.state() != State::Listen && tcb.tuple().remote.is_specified() {
            // Best effort; the record is torn down either way.
            if let Ok(mut buf) = segment::prepare_reset(host, tcb) {
                host.transmit(&mut buf);
            }
        }
        tcb.finish_connect(Err(CloseReason::Aborted));
        host.closed(key, CloseReason::Aborted);
        self.release(key);
        Ok(())
    }

    /// Entry point for the demultiplexer.
    ///
    /// Validates the segment, resolves the connection it belongs to and
    /// applies it. Segments that fail validation are dropped without a
    /// response; valid segments matching no connection are answered with a
    /// reset.
    pub fn inbound<H>(
        &mut self,
        frame: &[u8],
        src: IpAddress,
        dst: IpAddress,
        now: Instant,
        host: &mut H,
    ) -> Result<()>
        where H: Host<P>
    {
        let packet = match Packet::new_checked(frame, Checksum::Manual {
            src_addr: src,
            dst_addr: dst,
        }) {
            Ok(packet) => packet,
            Err(err) => {
                net_debug!("dropping inbound segment: {}", err);
                return Err(err.into());
            }
        };

        let repr = packet.repr();
        let payload = packet.payload_slice();
        let tuple = FourTuple {
            local: dst,
            remote: src,
            local_port: repr.dst_port,
            remote_port: repr.src_port,
        };

        match self.lookup(tuple) {
            Some(key) => self.segment_arrives(key, tuple, &repr, payload, now, host),
            None => {
                net_trace!("segment for no connection: {}", repr);
                if let Ok(Some(mut buf)) = segment::prepare_stray_reset(host, &repr, dst, src) {
                    host.transmit(&mut buf);
                }
                Ok(())
            }
        }
    }

    /// Fire every deadline that has passed.
    ///
    /// Call from the worker context whenever the instant reported by
    /// [`poll_at`] has been reached.
    ///
    /// [`poll_at`]: #method.poll_at
    pub fn poll<H>(&mut self, now: Instant, host: &mut H)
        where H: Host<P>
    {
        for idx in 0..self.pool.capacity() {
            let key = match self.pool.key_at(idx) {
                Some(key) => SlotKey { key },
                None => continue,
            };
            self.poll_record(key, now, host);
        }
    }

    /// The next deadline of any record.
    pub fn poll_at(&self) -> Expiration {
        self.pool.iter()
            .fold(Expiration::Never, |acc, (_, tcb)| acc.earliest(tcb.poll_at()))
    }

    /// Iterate read-only over all allocated records.
    ///
    /// State must not be mutated from within the callback, which the shared
    /// reference enforces.
    pub fn for_each<F>(&self, mut f: F)
        where F: FnMut(SlotKey, &Tcb<P>)
    {
        for (key, tcb) in self.pool.iter() {
            f(SlotKey { key }, tcb);
        }
    }

    /// Look at a single record.
    pub fn get(&self, key: SlotKey) -> Option<&Tcb<P>> {
        self.pool.get(key.key)
    }

    /// The state of a connection.
    pub fn get_state(&self, key: SlotKey) -> Option<State> {
        self.get(key).map(Tcb::state)
    }

    /// The receive window currently advertised by a connection.
    pub fn recv_window(&self, key: SlotKey) -> Option<u16> {
        self.get(key).map(Tcb::recv_window)
    }

    /// The maximum segment size advertised to the peer of a connection.
    pub fn recv_mss(&self, key: SlotKey) -> Option<u16> {
        self.get(key).map(|_| self.config.recv_mss)
    }

    /// The maximum segment size for data sent to the peer.
    pub fn send_mss(&self, key: SlotKey) -> Option<u16> {
        self.get(key).map(Tcb::send_mss)
    }

    /// The one-shot outcome of an active open, once it concluded.
    pub fn connect_outcome(&self, key: SlotKey) -> Option<core::result::Result<(), CloseReason>> {
        self.get(key).and_then(Tcb::connect_outcome)
    }

    /// Change the advertised receive window, capped at [`MAX_WINDOW`].
    ///
    /// [`MAX_WINDOW`]: ../constant.MAX_WINDOW.html
    pub fn set_recv_window(&mut self, key: SlotKey, window: u16) -> Result<()> {
        let tcb = self.pool.get_mut(key.key).ok_or(Error::Illegal)?;
        tcb.recv_wnd = window.min(MAX_WINDOW);
        Ok(())
    }

    /// Apply a validated segment to its connection.
    fn segment_arrives<H>(
        &mut self,
        key: SlotKey,
        tuple: FourTuple,
        repr: &Repr,
        payload: &[u8],
        now: Instant,
        host: &mut H,
    ) -> Result<()>
        where H: Host<P>
    {
        let config = self.config;

        // A fresh initial sequence number, in case a listener accepts.
        let fresh_isn = match self.pool.get(key.key) {
            Some(tcb) if tcb.state() == State::Listen
                && repr.flags.syn() && !repr.flags.ack() && !repr.flags.rst() =>
                Some(self.isn.get_isn(tuple, now)),
            Some(_) => None,
            None => return Err(Error::Illegal),
        };

        let tcb = self.pool.get_mut(key.key).ok_or(Error::Illegal)?;

        // A reset short-circuits, after the sequence check that guards
        // against off-path injection. This check must not be skipped.
        if repr.flags.rst() {
            let acceptable = match tcb.state() {
                State::SynSent => repr.ack_number == Some(tcb.send_seq),
                State::Listen => false,
                _ => tcb.validate_sequence(repr),
            };
            if !acceptable {
                net_debug!("dropping reset outside the window");
                return Err(Error::SequenceOutOfWindow);
            }
            net_debug!("{} reset by peer", tcb.state());
            tcb.state = transition(tcb.state(), Event::Rst).next;
            tcb.finish_connect(Err(CloseReason::Reset));
            host.closed(key, CloseReason::Reset);
            self.release(key);
            return Ok(());
        }

        match tcb.state() {
            State::Listen => {
                if repr.ack_number.is_some() {
                    // Acknowledging a previous incarnation; answered like a
                    // closed socket.
                    if let Ok(Some(mut buf)) =
                        segment::prepare_stray_reset(host, repr, tuple.local, tuple.remote)
                    {
                        host.transmit(&mut buf);
                    }
                    return Ok(());
                }
                if !repr.flags.syn() {
                    return Ok(());
                }

                // Adopt the remote and answer the connection attempt.
                tcb.tuple.remote = tuple.remote;
                tcb.tuple.remote_port = tuple.remote_port;
                if !tcb.tuple.local.is_specified() {
                    tcb.tuple.local = tuple.local;
                }
                if let Some(isn) = fresh_isn {
                    tcb.seed_isn(isn);
                }
                tcb.send_ack = repr.seq_number + 1;
                tcb.apply_mss_option(repr);

                let accepted = transition(State::Listen, Event::Syn);
                tcb.state = accepted.next;
                if accepted.effects.send_syn_ack {
                    let mut flags = Flags::default();
                    flags.set_syn(true);
                    flags.set_ack(true);
                    send_control(tcb, host, &config, flags, now)?;
                }
                Ok(())
            }

            State::SynSent => {
                if repr.flags.syn() && repr.flags.ack() {
                    if repr.ack_number != Some(tcb.send_seq) {
                        net_debug!("syn-ack acknowledges the wrong sequence");
                        return Err(Error::SequenceOutOfWindow);
                    }
                    tcb.send_ack = repr.seq_number + 1;
                    tcb.apply_mss_option(repr);
                    if let Some(ack) = repr.ack_number {
                        tcb.apply_ack(ack, now, &config);
                    }

                    let opened = transition(State::SynSent, Event::SynAck);
                    tcb.state = opened.next;
                    if opened.effects.send_ack {
                        let mut buf = segment::prepare_ack(host, tcb)?;
                        host.transmit(&mut buf);
                    }
                    if opened.effects.established {
                        tcb.finish_connect(Ok(()));
                        host.established(key);
                    }
                    return Ok(());
                }
                if repr.flags.syn() {
                    // Simultaneous open. The queued SYN is superseded by a
                    // SYN+ACK carrying the same initial sequence number.
                    tcb.send_ack = repr.seq_number + 1;
                    tcb.apply_mss_option(repr);
                    tcb.sent.clear();
                    tcb.send_seq = tcb.send_seq - 1;

                    let crossed = transition(State::SynSent, Event::Syn);
                    tcb.state = crossed.next;
                    if crossed.effects.send_syn_ack {
                        let mut flags = Flags::default();
                        flags.set_syn(true);
                        flags.set_ack(true);
                        send_control(tcb, host, &config, flags, now)?;
                    }
                    return Ok(());
                }
                // Anything else cannot be validated against a window yet.
                Ok(())
            }

            _ => {
                // Sequence validation against the advertised window.
                if !tcb.validate_sequence(repr) {
                    net_debug!("{} segment outside window, re-asserting ack", tcb.state());
                    let mut buf = segment::prepare_ack(host, tcb)?;
                    host.transmit(&mut buf);
                    return Err(Error::SequenceOutOfWindow);
                }

                let event = tcb.classify(repr);

                if let Some(ack) = repr.ack_number {
                    tcb.apply_ack(ack, now, &config);
                }

                // In-order payload goes up to the owner immediately; the
                // engine keeps no reassembly buffer, so anything else is
                // dropped and our position re-asserted.
                let mut data_advanced = false;
                if repr.payload_len > 0 {
                    match tcb.state() {
                        State::Established | State::FinWait1 | State::FinWait2 => {
                            if repr.seq_number == tcb.send_ack {
                                host.deliver(key, payload, tcb.user_token());
                                tcb.send_ack += payload.len();
                                data_advanced = true;
                            } else {
                                let mut buf = segment::prepare_ack(host, tcb)?;
                                host.transmit(&mut buf);
                                return Ok(());
                            }
                        }
                        _ => (),
                    }
                }

                if repr.flags.fin() {
                    if repr.seq_number + usize::from(repr.payload_len) == tcb.send_ack {
                        tcb.fin_rcvd = true;
                        tcb.send_ack += 1;
                    } else {
                        // The peer's FIN is not in order yet.
                        let mut buf = segment::prepare_ack(host, tcb)?;
                        host.transmit(&mut buf);
                        return Ok(());
                    }
                }

                let event = match event {
                    Some(event) => event,
                    None => {
                        if data_advanced {
                            tcb.schedule_ack(now, &config);
                        }
                        return Ok(());
                    }
                };

                let applied = transition(tcb.state(), event);
                if applied.next != tcb.state() {
                    net_debug!("{} -> {}", tcb.state(), applied.next);
                }
                tcb.state = applied.next;
                let effects = applied.effects;

                let mut acked_now = false;
                if effects.send_ack {
                    let mut buf = segment::prepare_ack(host, tcb)?;
                    host.transmit(&mut buf);
                    acked_now = true;
                }
                if effects.established {
                    tcb.finish_connect(Ok(()));
                    host.established(key);
                }
                if effects.end_of_data {
                    host.end_of_data(key, tcb.user_token());
                }
                if effects.start_time_wait {
                    tcb.fin_timer = Expiration::When(now + MAX_SEG_LIFETIME);
                    tcb.retry_timer = Expiration::Never;
                }
                if data_advanced && !acked_now {
                    tcb.schedule_ack(now, &config);
                }
                if effects.release {
                    host.closed(key, CloseReason::Normal);
                    self.release(key);
                }
                Ok(())
            }
        }
    }

    /// Run the timers of one record.
    fn poll_record<H>(&mut self, key: SlotKey, now: Instant, host: &mut H)
        where H: Host<P>
    {
        let config = self.config;
        let tcb = match self.pool.get_mut(key.key) {
            Some(tcb) => tcb,
            None => return,
        };

        if tcb.retry_timer.is_due(now) {
            if tcb.sent.is_empty() {
                tcb.retry_timer = Expiration::Never;
                tcb.retrying = false;
            } else if tcb.retry_count >= config.max_retransmits {
                net_debug!("{} gave up after {} retransmissions",
                    tcb.state(), tcb.retry_count);
                tcb.state = State::Closed;
                tcb.finish_connect(Err(CloseReason::RetransmitExhausted));
                host.closed(key, CloseReason::RetransmitExhausted);
                self.release(key);
                return;
            } else {
                tcb.retry_count += 1;
                tcb.retrying = true;
                if let Some(entry) = tcb.sent.front_mut() {
                    // Retransmitted verbatim, sequence number included.
                    host.transmit(&mut entry.buf);
                }
                tcb.backoff_retry(now, &config);
            }
        }

        if tcb.ack_timer.is_due(now) {
            tcb.ack_timer = Expiration::Never;
            if tcb.sent_ack != tcb.send_ack {
                // Best effort: a failed allocation leaves the acknowledgment
                // to the next outbound segment.
                if let Ok(mut buf) = segment::prepare_ack(host, tcb) {
                    host.transmit(&mut buf);
                }
            }
        }

        if tcb.fin_timer.is_due(now) {
            tcb.fin_timer = Expiration::Never;
            match tcb.state() {
                State::TimeWait => {
                    let expired = transition(State::TimeWait, Event::TimeWaitExpired);
                    tcb.state = expired.next;
                    if expired.effects.release {
                        host.closed(key, CloseReason::Normal);
                        self.release(key);
                    }
                }
                State::FinWait1 | State::FinWait2 | State::Closing | State::LastAck => {
                    // The peer never answered our FIN; bound the resource
                    // retention instead of waiting forever.
                    net_debug!("{} fin unanswered, forcing teardown", tcb.state());
                    tcb.state = State::Closed;
                    host.closed(key, CloseReason::FinTimeout);
                    self.release(key);
                }
                _ => (),
            }
        }
    }

    /// Resolve a segment to its connection.
    ///
    /// An exact tuple match wins; otherwise a listener on the local port
    /// accepts the segment.
    fn lookup(&self, tuple: FourTuple) -> Option<SlotKey> {
        let mut listener = None;
        for (key, tcb) in self.pool.iter() {
            let candidate = tcb.tuple();
            if candidate.local_port != tuple.local_port {
                continue;
            }
            let local_matches = candidate.local == tuple.local
                || !candidate.local.is_specified();
            if !local_matches {
                continue;
            }
            if candidate.remote == tuple.remote && candidate.remote_port == tuple.remote_port {
                return Some(SlotKey { key });
            }
            if tcb.state() == State::Listen && !candidate.remote.is_specified() {
                listener = Some(SlotKey { key });
            }
        }
        listener
    }

    fn lookup_exact(&self, tuple: FourTuple) -> Option<SlotKey> {
        self.pool.iter()
            .find(|(_, tcb)| tcb.tuple() == tuple)
            .map(|(key, _)| SlotKey { key })
    }

    /// Return a record to the pool.
    ///
    /// Dropping the record cancels its deadlines and discards, not delivers,
    /// any segments still queued for retransmission.
    fn release(&mut self, key: SlotKey) {
        let _ = self.pool.release(key.key);
    }
}

/// Frame, queue and transmit a sequence-consuming control segment.
///
/// SYN, SYN+ACK and FIN flow through here: they enter the retransmission
/// queue and arm the retry timer when the queue was previously idle.
fn send_control<P, H>(
    tcb: &mut Tcb<P>,
    host: &mut H,
    config: &Config,
    flags: Flags,
    now: Instant,
) -> Result<()>
    where P: PayloadMut, H: Host<P>
{
    let was_empty = tcb.sent.is_empty();
    let buf = segment::prepare_segment(host, tcb, flags, config.recv_mss, &[])?;
    let end = tcb.send_seq;

    match tcb.sent.push(Sent { end, buf }) {
        Ok(entry) => {
            host.transmit(&mut entry.buf);
        }
        Err(mut unqueued) => {
            // No retransmission slot left; the segment still goes out once.
            host.transmit(&mut unqueued.buf);
        }
    }
    if was_empty {
        tcb.arm_retry(now, config);
    }
    Ok(())
}
