//! The connection state machine.
//!
//! The transition function is pure: it maps a state and an event to the next
//! state and a set of side effects, without touching any connection record.
//! The receive processor classifies an incoming segment into an [`Event`] and
//! the endpoint interprets the returned [`Effects`], so every state change
//! flows through the table in [`transition`].
//!
//! [`Event`]: enum.Event.html
//! [`Effects`]: struct.Effects.html
//! [`transition`]: fn.transition.html
use core::fmt;

/// State enum of the state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    /// Marker state of an unused or terminated connection.
    Closed,

    /// A listening connection, akin to an open server socket.
    Listen,

    /// An open connection request.
    SynSent,

    /// Connection request we intend to answer, waiting on the ack.
    SynRcvd,

    /// An open connection.
    Established,

    /// Other side closed its direction already.
    CloseWait,

    /// Connection closes after the other side closed its already.
    LastAck,

    /// Closed our side of the connection.
    FinWait1,

    /// Closing the connection nicely, initiated by us and acknowledged.
    FinWait2,

    /// Both sides recognized the connection as closed.
    TimeWait,

    /// Closed both sides but we don't know the other knows.
    Closing,
}

/// An input to the state machine.
///
/// Received-segment events are pre-classified by the receive processor: the
/// distinction between a plain acknowledgment and one that covers our FIN, or
/// between a lone FIN and one that simultaneously acknowledges our FIN, needs
/// connection state the pure table does not see.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// An active local open was requested.
    OpenActive,

    /// A passive local open was requested.
    OpenPassive,

    /// A local close was requested.
    Close,

    /// A segment with SYN (and no ACK) arrived.
    Syn,

    /// A segment with SYN and ACK arrived.
    SynAck,

    /// An acknowledgment of something other than our FIN arrived.
    Ack,

    /// An acknowledgment covering our FIN arrived.
    AckOfFin,

    /// The peer's FIN arrived, not acknowledging our own.
    Fin,

    /// The peer's FIN arrived, simultaneously acknowledging ours.
    FinAck,

    /// A sequence-validated RST arrived.
    Rst,

    /// The 2MSL hold in TIME_WAIT ran out.
    TimeWaitExpired,
}

/// The side effects of a transition.
///
/// Segment emissions go through the segment builder, timer starts and owner
/// notifications through the endpoint. A default value means "do nothing".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Effects {
    /// Send a SYN segment.
    pub send_syn: bool,

    /// Send a SYN+ACK segment.
    pub send_syn_ack: bool,

    /// Send an ACK-only segment immediately, bypassing the delayed ack.
    pub send_ack: bool,

    /// Send a FIN segment and arm the lost-FIN recovery timer.
    pub send_fin: bool,

    /// Start the max-segment-lifetime hold before releasing the record.
    pub start_time_wait: bool,

    /// The connection became established; notify the owner.
    pub established: bool,

    /// The peer will send no more data; deliver end-of-data to the owner.
    pub end_of_data: bool,

    /// The record reached CLOSED and is to be released.
    pub release: bool,
}

/// The result of applying an event to a state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub next: State,
    pub effects: Effects,
}

/// Apply one event to a state.
///
/// The function is total: an event that has no rule in the current state
/// leaves the state unchanged with no effects, which makes dropping an
/// unexpected segment the default behaviour.
pub fn transition(current: State, event: Event) -> Transition {
    use self::Event::*;
    use self::State::*;

    let mut effects = Effects::default();
    let next = match (current, event) {
        (Closed, OpenActive) => {
            effects.send_syn = true;
            SynSent
        },
        (Closed, OpenPassive) => Listen,

        (Listen, Syn) => {
            effects.send_syn_ack = true;
            SynRcvd
        },

        (SynSent, SynAck) => {
            effects.send_ack = true;
            effects.established = true;
            Established
        },
        // Simultaneous open.
        (SynSent, Syn) => {
            effects.send_syn_ack = true;
            SynRcvd
        },

        (SynRcvd, Ack) => {
            effects.established = true;
            Established
        },

        (Established, Close) => {
            effects.send_fin = true;
            FinWait1
        },
        (Established, Fin) => {
            effects.send_ack = true;
            effects.end_of_data = true;
            CloseWait
        },

        (FinWait1, AckOfFin) => FinWait2,
        (FinWait1, Fin) => {
            effects.send_ack = true;
            effects.end_of_data = true;
            Closing
        },
        (FinWait1, FinAck) => {
            effects.send_ack = true;
            effects.end_of_data = true;
            effects.start_time_wait = true;
            TimeWait
        },

        (FinWait2, Fin) | (FinWait2, FinAck) => {
            effects.send_ack = true;
            effects.end_of_data = true;
            effects.start_time_wait = true;
            TimeWait
        },

        (Closing, Ack) | (Closing, AckOfFin) => {
            effects.start_time_wait = true;
            TimeWait
        },

        (CloseWait, Close) => {
            effects.send_fin = true;
            LastAck
        },

        (LastAck, Ack) | (LastAck, AckOfFin) => {
            effects.release = true;
            Closed
        },

        (TimeWait, TimeWaitExpired) => {
            effects.release = true;
            Closed
        },

        // A sequence-validated reset tears down any state immediately. The
        // receive processor never classifies Rst for a record in Closed.
        (_, Rst) => {
            effects.release = true;
            Closed
        },

        // Everything else is a no-op; the segment is dropped.
        (state, _) => state,
    };

    Transition { next, effects }
}

impl State {
    /// A human readable name of the state.
    pub fn name(self) -> &'static str {
        match self {
            State::Closed => "CLOSED",
            State::Listen => "LISTEN",
            State::SynSent => "SYN_SENT",
            State::SynRcvd => "SYN_RCVD",
            State::Established => "ESTABLISHED",
            State::CloseWait => "CLOSE_WAIT",
            State::LastAck => "LAST_ACK",
            State::FinWait1 => "FIN_WAIT_1",
            State::FinWait2 => "FIN_WAIT_2",
            State::TimeWait => "TIME_WAIT",
            State::Closing => "CLOSING",
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
        f.write_str(self.name())
    }
}
