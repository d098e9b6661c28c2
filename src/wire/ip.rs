//! Network addresses and the transport pseudo-header checksum.
//!
//! Addressing and routing are the business of the surrounding stack; the
//! engine only needs enough of the IP layer to identify a connection end
//! point and to seed the transport checksum.
use core::fmt;

/// A four-octet IPv4 address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ipv4Address(pub [u8; 4]);

/// A sixteen-octet IPv6 address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ipv6Address(pub [u8; 16]);

/// An internetworking address of either family.
///
/// `Unspecified` stands in for a remote that is not yet known, such as the
/// peer of a listening connection before the first SYN arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IpAddress {
    Unspecified,
    Ipv4(Ipv4Address),
    Ipv6(Ipv6Address),
}

/// Transport protocol numbers carried in the pseudo header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpProtocol {
    Tcp,
}

impl Ipv4Address {
    pub const fn new(a0: u8, a1: u8, a2: u8, a3: u8) -> Ipv4Address {
        Ipv4Address([a0, a1, a2, a3])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The address as a host-order integer, for hashing.
    pub fn to_network_integer(self) -> u32 {
        u32::from_be_bytes(self.0)
    }
}

impl Ipv6Address {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl IpAddress {
    /// Whether this is a concrete address of either family.
    pub fn is_specified(&self) -> bool {
        match self {
            IpAddress::Unspecified => false,
            _ => true,
        }
    }
}

impl Default for IpAddress {
    fn default() -> Self {
        IpAddress::Unspecified
    }
}

impl From<Ipv4Address> for IpAddress {
    fn from(addr: Ipv4Address) -> Self {
        IpAddress::Ipv4(addr)
    }
}

impl From<Ipv6Address> for IpAddress {
    fn from(addr: Ipv6Address) -> Self {
        IpAddress::Ipv6(addr)
    }
}

impl From<IpProtocol> for u8 {
    fn from(proto: IpProtocol) -> u8 {
        match proto {
            IpProtocol::Tcp => 6,
        }
    }
}

impl fmt::Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let Ipv4Address([a, b, c, d]) = self;
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

impl fmt::Display for Ipv6Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, chunk) in self.0.chunks(2).enumerate() {
            if i != 0 {
                write!(f, ":")?;
            }
            write!(f, "{:x}", u16::from_be_bytes([chunk[0], chunk[1]]))?;
        }
        Ok(())
    }
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IpAddress::Unspecified => write!(f, "*"),
            IpAddress::Ipv4(addr) => addr.fmt(f),
            IpAddress::Ipv6(addr) => addr.fmt(f),
        }
    }
}

pub(crate) mod checksum {
    use byteorder::{ByteOrder, NetworkEndian};

    use super::{IpAddress, IpProtocol};

    fn propagate_carries(word: u32) -> u16 {
        let sum = (word >> 16) + (word & 0xffff);
        ((sum >> 16) as u16) + (sum as u16)
    }

    /// Compute an RFC 1071 compliant checksum (without the final complement).
    pub(crate) fn data(mut data: &[u8]) -> u16 {
        let mut accum = 0u32;

        while data.len() >= 2 {
            accum += NetworkEndian::read_u16(data) as u32;
            accum = propagate_carries(accum) as u32;
            data = &data[2..];
        }

        // The last remaining odd byte, if any.
        if let Some(&value) = data.first() {
            accum += (value as u32) << 8;
        }

        propagate_carries(accum)
    }

    /// Combine several RFC 1071 compliant checksums.
    pub(crate) fn combine(checksums: &[u16]) -> u16 {
        let mut accum: u32 = 0;
        for &word in checksums {
            accum += word as u32;
        }
        propagate_carries(accum)
    }

    /// Compute a transport pseudo-header checksum.
    ///
    /// # Panics
    /// This function panics unless `src_addr` and `dst_addr` belong to the
    /// same family, and that family is IPv4 or IPv6. Connection tuples are
    /// concrete by the time a segment is framed.
    pub(crate) fn pseudo_header(src_addr: &IpAddress, dst_addr: &IpAddress,
                                protocol: IpProtocol, length: u32) -> u16 {
        match (src_addr, dst_addr) {
            (IpAddress::Ipv4(src_addr), IpAddress::Ipv4(dst_addr)) => {
                let mut proto_len = [0u8; 4];
                proto_len[1] = protocol.into();
                NetworkEndian::write_u16(&mut proto_len[2..4], length as u16);

                combine(&[
                    data(src_addr.as_bytes()),
                    data(dst_addr.as_bytes()),
                    data(&proto_len[..])
                ])
            },

            (IpAddress::Ipv6(src_addr), IpAddress::Ipv6(dst_addr)) => {
                let mut proto_len = [0u8; 8];
                proto_len[7] = protocol.into();
                NetworkEndian::write_u32(&mut proto_len[0..4], length);
                combine(&[
                    data(src_addr.as_bytes()),
                    data(dst_addr.as_bytes()),
                    data(&proto_len[..])
                ])
            }

            _ => panic!("Unexpected pseudo header addresses: {}, {}",
                        src_addr, dst_addr)
        }
    }
}
