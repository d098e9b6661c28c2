//! The TCP protocol engine.
//!
//! Relevant material for reading:
//! Main TCP rfc (skip if confident): https://tools.ietf.org/html/rfc793
//! Errata and comments: https://tools.ietf.org/html/rfc1122#section-4.2
//!     Notably still assuming some good-faith on hosts
//! RST handling specifically: https://www.snellman.net/blog/archive/2016-02-01-tcp-rst/
//!     OS comparison in particular
//!
//! The engine owns per-connection state, drives the state machine, frames
//! outbound segments, validates inbound ones and manages the retransmission
//! and flow-control timers. Everything below the segment level is the
//! business of collaborators: buffers, transmission, and the owner context
//! are reached through the [`Host`] trait, and timer expirations are polled
//! from the worker loop instead of dispatched from interrupt context.
//!
//! ## Structure
//!
//! The [`Endpoint`] stores the connection records in a fixed pool and hands
//! out [`SlotKey`]s, which behave similar to specialized file descriptors. A
//! key is invalidated when its connection is released; using it afterwards
//! is a caller error and observable as a failed lookup.
//!
//! ## Driving the engine
//!
//! One worker context calls [`Endpoint::inbound`] for each segment the
//! demultiplexer hands over and [`Endpoint::poll`] whenever the deadline
//! reported by [`Endpoint::poll_at`] passes. All mutation happens on this
//! single path, which is what makes the records lock-free.
//!
//! ## Deviations
//!
//! An incoming segment in a closed state is simply dropped if it had RST
//! set. Packets with RST should *never* be answered with a packet with RST,
//! per the reset generation rules of RFC793.
//!
//! The window scale option is decoded for wire compatibility but no scaling
//! is ever applied; the advertised window is authoritative as transmitted.
//! This is a known protocol limitation of the engine, not an oversight.
//!
//! [`Endpoint`]: struct.Endpoint.html
//! [`Endpoint::inbound`]: struct.Endpoint.html#method.inbound
//! [`Endpoint::poll`]: struct.Endpoint.html#method.poll
//! [`Endpoint::poll_at`]: struct.Endpoint.html#method.poll_at
//! [`SlotKey`]: struct.SlotKey.html
//! [`Host`]: trait.Host.html
use crate::time::Duration;
use crate::wire::PayloadMut;

mod connection;
mod endpoint;
mod isn;
mod segment;
mod state;
#[cfg(test)]
mod tests;

pub use self::connection::Tcb;

pub use self::endpoint::{
    Endpoint,
    FourTuple,
    SlotKey};

pub use self::state::{
    transition,
    Effects,
    Event,
    State,
    Transition};

// Publically exposed for initialization.
pub use self::isn::IsnGenerator;

/// The send MSS assumed until the peer announces one.
///
/// RFC 1122 4.2.2.6: "If an MSS option is not received at connection setup,
/// TCP MUST assume a default send MSS of 536".
pub const DEFAULT_MSS: u16 = 536;

/// The cap on the advertised receive window.
pub const MAX_WINDOW: u16 = 4 * 1024;

/// The maximum segment lifetime, bounding the TIME_WAIT hold.
pub const MAX_SEG_LIFETIME: Duration = Duration::from_secs(60);

/// The cap of the retransmission backoff exponent.
///
/// The exponent occupied five bits in the original bookkeeping; backoff
/// saturates here instead of growing without bound.
pub(crate) const RETRY_SHIFT_MAX: u8 = 31;

/// Capacity of the per-connection queue of unacknowledged segments.
pub(crate) const SENT_QUEUE_LEN: usize = 8;

/// Tunable timing and retry parameters of an endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// The base retransmission timeout, doubled on each consecutive expiry.
    pub retry_timeout: Duration,

    /// How long an acknowledgment may be delayed.
    ///
    /// RFC 1122 requires this to stay below 500ms.
    pub ack_delay: Duration,

    /// How long to wait for the peer's answer after sending FIN before
    /// tearing the connection down regardless.
    pub fin_timeout: Duration,

    /// Consecutive unanswered retransmissions after which the connection is
    /// presumed dead.
    pub max_retransmits: u8,

    /// The maximum segment size advertised to peers.
    pub recv_mss: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            retry_timeout: Duration::from_millis(1000),
            ack_delay: Duration::from_millis(500),
            fin_timeout: Duration::from_secs(1),
            max_retransmits: 9,
            recv_mss: 1460,
        }
    }
}

/// An opaque token a connection owner registers for data delivery.
///
/// Forwarded verbatim to [`Host::deliver`]; the engine never interprets it.
///
/// [`Host::deliver`]: trait.Host.html#tymethod.deliver
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Token(pub usize);

/// Why a connection ended, as reported to the owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// An orderly close ran to completion.
    Normal,

    /// The connection was aborted locally.
    Aborted,

    /// The peer reset the connection.
    Reset,

    /// Retransmissions went unanswered up to the attempt ceiling; the
    /// connection is presumed dead.
    RetransmitExhausted,

    /// The peer never answered our FIN within the recovery timeout.
    FinTimeout,
}

/// The collaborators of the engine, bundled.
///
/// An implementation connects the engine to the packet system, the wire and
/// the owning context. Every entry point of the [`Endpoint`] takes the host
/// by reference, keeping all callbacks on the single worker path.
///
/// [`Endpoint`]: struct.Endpoint.html
pub trait Host<P: PayloadMut> {
    /// Allocate a segment buffer of exactly `len` bytes.
    ///
    /// `None` when the packet system is out of buffers; the engine reports
    /// this as a resource error without retrying.
    fn alloc(&mut self, len: usize) -> Option<P>;

    /// Hand a framed segment to the underlying send primitive.
    ///
    /// The engine retains queued segments for retransmission; the buffer is
    /// only borrowed for the duration of the call.
    fn transmit(&mut self, segment: &mut P);

    /// Deliver in-order payload bytes to the owning context.
    fn deliver(&mut self, key: SlotKey, data: &[u8], token: Token);

    /// The peer will send no more data on this connection.
    fn end_of_data(&mut self, key: SlotKey, token: Token) {
        let _ = (key, token);
    }

    /// The connection completed its handshake.
    fn established(&mut self, key: SlotKey) {
        let _ = key;
    }

    /// The connection reached its end; the key is no longer valid.
    fn closed(&mut self, key: SlotKey, reason: CloseReason);
}
