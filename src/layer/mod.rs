//! The processing logic of the protocol engine.
//!
//! The split mirrors the one between `wire` and `layer`: packet layout and
//! codecs live in [`wire`], while this module owns the connection state and
//! the rules for advancing it. All state lives in an endpoint structure that
//! is driven from a single worker context, so no locking is required.
//!
//! [`wire`]: ../wire/index.html

pub mod tcp;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// The operation was not permitted.
    ///
    /// Returned when a connection is not in a state that allows the request,
    /// for example sending on a connection that was already shut down.
    Illegal,

    /// The action could not be completed because there were not enough
    /// resources.
    ///
    /// Covers both an exhausted connection pool and a failed buffer
    /// allocation. This is a resource limit, not a transient condition; the
    /// engine never retries it internally.
    Exhausted,

    /// An incoming segment could not be interpreted and was dropped.
    ///
    /// No response is generated for such segments.
    Malformed,

    /// An incoming segment did not overlap the receive window.
    ///
    /// The segment was dropped without being applied to any state. A
    /// corrective acknowledgment may have been sent.
    SequenceOutOfWindow,
}

/// A wire error surfaces as a dropped, uninterpretable segment.
impl From<crate::wire::Error> for Error {
    fn from(_: crate::wire::Error) -> Self {
        Error::Malformed
    }
}
