//! Initial sequence number generation, as recommended by rfc6528.
//!
//! Uses a keyed short-input PRF (SipHash-2-4) over the connection four tuple
//! so that sequence numbers are unpredictable across connections while
//! remaining stable for a tuple within the key lifetime:
//!
//! > ISN = M + PRF(secretkey, localip, localport, remoteip, remoteport)
use super::endpoint::FourTuple;
use crate::time::Instant;
use crate::wire::{IpAddress, Ipv6Address, TcpSeqNumber};

/// A generator for the initial sequence number of new connections.
///
/// The derived number additionally advances with time (one step every four
/// milliseconds) so that reincarnations of a tuple do not restart at the
/// same point of the sequence space.
pub struct IsnGenerator {
    keys: (u64, u64),
}

// The standard initial values, as ASCII text.
const IV: [&[u8; 8]; 4] = [
    b"somepseu",
    b"dorandom",
    b"lygenera",
    b"tedbytes"];

struct Sip {
    v0: u64,
    v1: u64,
    v2: u64,
    v3: u64,
}

impl IsnGenerator {
    /// Create a generator with a pre-defined secret key.
    ///
    /// Create the key bytes with some cryptographically random means or
    /// derive them from another key with a key derivation function.
    pub fn from_secret_key_bytes(bytes: [u8; 16]) -> Self {
        use core::convert::TryInto;
        let a = u64::from_le_bytes(bytes[..8].try_into().unwrap());
        let b = u64::from_le_bytes(bytes[8..].try_into().unwrap());
        IsnGenerator { keys: (a, b), }
    }

    /// Create a generator by deriving a key from the standard `RandomState`.
    #[cfg(feature = "std")]
    pub fn from_std_hash() -> Self {
        use std::hash::{Hasher, BuildHasher};
        use std::collections::hash_map::RandomState;

        let hash = RandomState::new().build_hasher();
        let x0 = {
            let mut hash = hash.clone();
            hash.write_u64(0);
            hash.finish()
        };
        let x1 = {
            let mut hash = hash.clone();
            hash.write_u64(1);
            hash.finish()
        };

        IsnGenerator {
            keys: (x0, x1),
        }
    }

    /// Get the initial sequence number for a connection.
    ///
    /// # Panics
    ///
    /// This function panics if the connection tuple contains anything other
    /// than an IPv4 or an IPv6 address pair. Tuples are concrete by the time
    /// a connection is opened.
    pub fn get_isn(&self, connection: FourTuple, time: Instant) -> TcpSeqNumber {
        let mut state = Sip::init(self.keys.0, self.keys.1);

        let num = match (connection.local, connection.remote) {
            (IpAddress::Ipv4(here), IpAddress::Ipv4(there)) => {
                let m = u64::from(here.to_network_integer())
                    | u64::from(there.to_network_integer()) << 32;
                let p = u64::from(connection.local_port)
                    | u64::from(connection.remote_port) << 16
                    // Message length = 12
                    | 12_u64 << 56;
                state.absorb(m);
                state.absorb(p);
                state.finalize()
            },
            (IpAddress::Ipv6(here), IpAddress::Ipv6(there)) => {
                let (m0, m1) = Self::ipv6_to_messages(here);
                let (m2, m3) = Self::ipv6_to_messages(there);
                let p = u64::from(connection.local_port)
                    | u64::from(connection.remote_port) << 16
                    // Message length = 36
                    | 36_u64 << 56;
                state.absorb(m0);
                state.absorb(m1);
                state.absorb(m2);
                state.absorb(m3);
                state.finalize()
            },
            _ => panic!("initial sequence numbers need a concrete address pair"),
        };

        TcpSeqNumber((num as u32).wrapping_add((time.total_millis() / 4) as u32))
    }

    fn ipv6_to_messages(addr: Ipv6Address) -> (u64, u64) {
        let Ipv6Address([a, b, c, d, e, f, g, h, i, j, k, l, m, n, o, p]) = addr;
        let m0 = u64::from_be_bytes([a, b, c, d, e, f, g, h]);
        let m1 = u64::from_be_bytes([i, j, k, l, m, n, o, p]);
        (m0, m1)
    }
}

impl Sip {
    const SIP_C: usize = 2;
    const SIP_D: usize = 4;

    fn init(k0: u64, k1: u64) -> Self {
        Sip {
            v0: u64::from_be_bytes(*IV[0]) ^ k0,
            v1: u64::from_be_bytes(*IV[1]) ^ k1,
            v2: u64::from_be_bytes(*IV[2]) ^ k0,
            v3: u64::from_be_bytes(*IV[3]) ^ k1,
        }
    }

    fn round(&mut self) {
        self.v0 = self.v0.wrapping_add(self.v1);
        self.v1 = self.v1.rotate_left(13);
        self.v1 ^= self.v0;
        self.v0 = self.v0.rotate_left(32);
        self.v2 = self.v2.wrapping_add(self.v3);
        self.v3 = self.v3.rotate_left(16);
        self.v3 ^= self.v2;
        self.v0 = self.v0.wrapping_add(self.v3);
        self.v3 = self.v3.rotate_left(21);
        self.v3 ^= self.v0;
        self.v2 = self.v2.wrapping_add(self.v1);
        self.v1 = self.v1.rotate_left(17);
        self.v1 ^= self.v2;
        self.v2 = self.v2.rotate_left(32);
    }

    /// Process a single portion of the message.
    ///
    /// All users need to manually absorb the length in the last block, which
    /// arranges the input to only have 8-byte blocks in all cases.
    fn absorb(&mut self, m: u64) {
        self.v3 ^= m;
        (0..Self::SIP_C).for_each(|_| self.round());
        self.v0 ^= m;
    }

    /// Do the finalization rounds.
    fn finalize(mut self) -> u64 {
        self.v2 ^= 0xff;
        (0..Self::SIP_D).for_each(|_| self.round());
        self.v0 ^ self.v1 ^ self.v2 ^ self.v3
    }
}
