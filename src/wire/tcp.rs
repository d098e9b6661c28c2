use core::{cmp, fmt, ops};
use byteorder::{ByteOrder, NetworkEndian};

use super::{Error, IpAddress, IpProtocol, Result};
use super::{Payload, PayloadMut};
use super::ip::checksum;

/// A TCP sequence number.
///
/// A sequence number is a monotonically advancing integer modulo 2<sup>32</sup>.
/// Sequence numbers do not have a discontiguity when compared pairwise across
/// an overflow of the underlying integer.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash)]
pub struct SeqNumber(pub u32);

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SeqNumber {
    /// Whether the number lies within `[base, base + window)` modulo 2^32.
    pub fn in_window(self, base: SeqNumber, window: u32) -> bool {
        self.0.wrapping_sub(base.0) < window
    }
}

impl ops::Add<usize> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: usize) -> SeqNumber {
        if rhs > i32::max_value() as usize {
            panic!("attempt to add to sequence number with unsigned overflow")
        }
        SeqNumber(self.0.wrapping_add(rhs as u32))
    }
}

impl ops::AddAssign<usize> for SeqNumber {
    fn add_assign(&mut self, rhs: usize) {
        *self = *self + rhs;
    }
}

impl ops::Sub<usize> for SeqNumber {
    type Output = SeqNumber;

    fn sub(self, rhs: usize) -> SeqNumber {
        if rhs > i32::max_value() as usize {
            panic!("attempt to subtract from sequence number with unsigned overflow")
        }
        SeqNumber(self.0.wrapping_sub(rhs as u32))
    }
}

impl ops::Sub for SeqNumber {
    type Output = usize;

    fn sub(self, rhs: SeqNumber) -> usize {
        let result = self.0.wrapping_sub(rhs.0) as i32;
        if result < 0 {
            panic!("attempt to subtract sequence numbers with underflow")
        }
        result as usize
    }
}

impl cmp::PartialOrd for SeqNumber {
    fn partial_cmp(&self, other: &SeqNumber) -> Option<cmp::Ordering> {
        (self.0.wrapping_sub(other.0) as i32).partial_cmp(&0)
    }
}

/// The set of control flags of a segment.
///
/// Only the six flags of the original header layout are modeled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flags(pub u16);

/// A read/write wrapper around a TCP segment buffer.
#[derive(Debug, PartialEq, Clone)]
pub struct Packet<T> {
    buffer: T,
    repr: Repr,
}

mod field {
    #![allow(non_snake_case)]

    use crate::wire::field::Field;

    pub const SRC_PORT: Field = 0..2;
    pub const DST_PORT: Field = 2..4;
    pub const SEQ_NUM:  Field = 4..8;
    pub const ACK_NUM:  Field = 8..12;
    pub const FLAGS:    Field = 12..14;
    pub const WIN_SIZE: Field = 14..16;
    pub const CHECKSUM: Field = 16..18;
    pub const URGENT:   Field = 18..20;

    pub fn OPTIONS(length: u8) -> Field {
        URGENT.end..(length as usize)
    }

    pub const FLG_FIN: u16 = 0x001;
    pub const FLG_SYN: u16 = 0x002;
    pub const FLG_RST: u16 = 0x004;
    pub const FLG_PSH: u16 = 0x008;
    pub const FLG_ACK: u16 = 0x010;
    pub const FLG_URG: u16 = 0x020;
    pub const FLG_CTL: u16 = 0x03f;

    pub const OPT_END: u8 = 0x00;
    pub const OPT_NOP: u8 = 0x01;
    pub const OPT_MSS: u8 = 0x02;
    pub const OPT_WS:  u8 = 0x03;
}

/// The length of the fixed header, excluding options.
pub const HEADER_LEN: usize = field::URGENT.end;

impl<T: Payload> Packet<T> {
    /// Imbue a raw octet buffer with TCP segment structure.
    pub fn new_unchecked(buffer: T, repr: Repr) -> Packet<T> {
        Packet { buffer, repr, }
    }

    /// Parse and validate a buffer, producing the packet and its
    /// representation.
    pub fn new_checked(buffer: T, checksum: Checksum) -> Result<Packet<T>> {
        let repr = Repr::parse(&buffer, checksum)?;
        Ok(Packet { buffer, repr })
    }

    /// Ensure that no header accessor method will panic if called.
    ///
    /// Returns `Err(Error::Truncated)` if the buffer is too short and
    /// `Err(Error::Malformed)` if the header length field has a value smaller
    /// than the minimal header length.
    pub fn check_len(&self) -> Result<()> {
        let len = self.buffer.payload().len();
        if len < field::URGENT.end {
            Err(Error::Truncated)
        } else {
            let header_len = self.header_len() as usize;
            if len < header_len {
                Err(Error::Truncated)
            } else if header_len < field::URGENT.end {
                Err(Error::Malformed)
            } else {
                Ok(())
            }
        }
    }

    /// Consume the packet, returning the underlying buffer.
    pub fn into_inner(self) -> T {
        self.buffer
    }

    /// Retrieve the packet representation.
    pub fn repr(&self) -> Repr {
        self.repr
    }

    /// Return the source port field.
    #[inline]
    pub fn src_port(&self) -> u16 {
        let data = self.buffer.payload();
        NetworkEndian::read_u16(&data[field::SRC_PORT])
    }

    /// Return the destination port field.
    #[inline]
    pub fn dst_port(&self) -> u16 {
        let data = self.buffer.payload();
        NetworkEndian::read_u16(&data[field::DST_PORT])
    }

    /// Return the sequence number field.
    #[inline]
    pub fn seq_number(&self) -> SeqNumber {
        let data = self.buffer.payload();
        SeqNumber(NetworkEndian::read_u32(&data[field::SEQ_NUM]))
    }

    /// Return the acknowledgement number field.
    #[inline]
    pub fn ack_number(&self) -> SeqNumber {
        let data = self.buffer.payload();
        SeqNumber(NetworkEndian::read_u32(&data[field::ACK_NUM]))
    }

    /// Read the control flags.
    pub fn flags(&self) -> Flags {
        let data = self.buffer.payload();
        Flags(NetworkEndian::read_u16(&data[field::FLAGS]) & field::FLG_CTL)
    }

    /// Return the header length, in octets.
    ///
    /// The wire encodes this as the 4-bit data offset in units of words.
    #[inline]
    pub fn header_len(&self) -> u8 {
        let data = self.buffer.payload();
        let raw = NetworkEndian::read_u16(&data[field::FLAGS]);
        ((raw >> 12) * 4) as u8
    }

    /// Return the window size field.
    #[inline]
    pub fn window_len(&self) -> u16 {
        let data = self.buffer.payload();
        NetworkEndian::read_u16(&data[field::WIN_SIZE])
    }

    /// Return the checksum field.
    #[inline]
    pub fn checksum(&self) -> u16 {
        let data = self.buffer.payload();
        NetworkEndian::read_u16(&data[field::CHECKSUM])
    }

    /// Return the urgent pointer field.
    #[inline]
    pub fn urgent_at(&self) -> u16 {
        let data = self.buffer.payload();
        NetworkEndian::read_u16(&data[field::URGENT])
    }

    /// Return the length of the segment, in terms of sequence space.
    pub fn sequence_len(&self) -> usize {
        let data = self.buffer.payload();
        data.len()
            - self.header_len() as usize
            + self.flags().sequence_len()
    }

    /// Return the option bytes.
    #[inline]
    pub fn options(&self) -> &[u8] {
        let header_len = self.header_len();
        let data = self.buffer.payload();
        &data[field::OPTIONS(header_len)]
    }

    /// Return the payload bytes.
    #[inline]
    pub fn payload_slice(&self) -> &[u8] {
        let header_len = self.header_len() as usize;
        let data = self.buffer.payload();
        &data[header_len..]
    }

    /// Validate the packet checksum.
    ///
    /// # Panics
    /// This function panics unless `src_addr` and `dst_addr` belong to the
    /// same family, and that family is IPv4 or IPv6.
    pub fn verify_checksum(&self, src_addr: IpAddress, dst_addr: IpAddress) -> bool {
        let data = self.buffer.payload();
        checksum::combine(&[
            checksum::pseudo_header(&src_addr, &dst_addr, IpProtocol::Tcp,
                                    data.len() as u32),
            checksum::data(data)
        ]) == !0
    }
}

impl<T: PayloadMut> Packet<T> {
    /// Set the source port field.
    #[inline]
    pub fn set_src_port(&mut self, value: u16) {
        let data = self.buffer.payload_mut();
        NetworkEndian::write_u16(&mut data[field::SRC_PORT], value)
    }

    /// Set the destination port field.
    #[inline]
    pub fn set_dst_port(&mut self, value: u16) {
        let data = self.buffer.payload_mut();
        NetworkEndian::write_u16(&mut data[field::DST_PORT], value)
    }

    /// Set the sequence number field.
    #[inline]
    pub fn set_seq_number(&mut self, value: SeqNumber) {
        let data = self.buffer.payload_mut();
        NetworkEndian::write_u32(&mut data[field::SEQ_NUM], value.0)
    }

    /// Set the acknowledgement number field.
    #[inline]
    pub fn set_ack_number(&mut self, value: SeqNumber) {
        let data = self.buffer.payload_mut();
        NetworkEndian::write_u32(&mut data[field::ACK_NUM], value.0)
    }

    /// Set the control flags.
    #[inline]
    pub fn set_flags(&mut self, Flags(flags): Flags) {
        let data = self.buffer.payload_mut();
        let raw = NetworkEndian::read_u16(&data[field::FLAGS]) & !0x0fff;
        NetworkEndian::write_u16(&mut data[field::FLAGS], raw | (flags & field::FLG_CTL))
    }

    /// Set the header length, in octets.
    #[inline]
    pub fn set_header_len(&mut self, value: u8) {
        let data = self.buffer.payload_mut();
        let raw = NetworkEndian::read_u16(&data[field::FLAGS]);
        let raw = (raw & !0xf000) | ((value as u16) / 4) << 12;
        NetworkEndian::write_u16(&mut data[field::FLAGS], raw)
    }

    /// Set the window size field.
    #[inline]
    pub fn set_window_len(&mut self, value: u16) {
        let data = self.buffer.payload_mut();
        NetworkEndian::write_u16(&mut data[field::WIN_SIZE], value)
    }

    /// Set the checksum field.
    #[inline]
    pub fn set_checksum(&mut self, value: u16) {
        let data = self.buffer.payload_mut();
        NetworkEndian::write_u16(&mut data[field::CHECKSUM], value)
    }

    /// Set the urgent pointer field.
    #[inline]
    pub fn set_urgent_at(&mut self, value: u16) {
        let data = self.buffer.payload_mut();
        NetworkEndian::write_u16(&mut data[field::URGENT], value)
    }

    /// Compute and fill in the checksum over the segment and pseudo header.
    ///
    /// # Panics
    /// This function panics unless `src_addr` and `dst_addr` belong to the
    /// same family, and that family is IPv4 or IPv6.
    pub fn fill_checksum(&mut self, src_addr: IpAddress, dst_addr: IpAddress) {
        self.set_checksum(0);
        let checksum = {
            let data = self.buffer.payload();
            !checksum::combine(&[
                checksum::pseudo_header(&src_addr, &dst_addr, IpProtocol::Tcp,
                                        data.len() as u32),
                checksum::data(data)
            ])
        };
        self.set_checksum(checksum)
    }

    /// Return a mutable view of the option bytes.
    #[inline]
    pub fn options_mut(&mut self) -> &mut [u8] {
        let header_len = self.header_len();
        let data = self.buffer.payload_mut();
        &mut data[field::OPTIONS(header_len)]
    }

    /// Return a mutable view of the payload bytes.
    #[inline]
    pub fn payload_mut_slice(&mut self) -> &mut [u8] {
        let header_len = self.header_len() as usize;
        let data = self.buffer.payload_mut();
        &mut data[header_len..]
    }
}

impl Flags {
    /// Return the FIN flag.
    #[inline]
    pub fn fin(&self) -> bool {
        self.0 & field::FLG_FIN != 0
    }

    /// Return the SYN flag.
    #[inline]
    pub fn syn(&self) -> bool {
        self.0 & field::FLG_SYN != 0
    }

    /// Return the RST flag.
    #[inline]
    pub fn rst(&self) -> bool {
        self.0 & field::FLG_RST != 0
    }

    /// Return the PSH flag.
    #[inline]
    pub fn psh(&self) -> bool {
        self.0 & field::FLG_PSH != 0
    }

    /// Return the ACK flag.
    #[inline]
    pub fn ack(&self) -> bool {
        self.0 & field::FLG_ACK != 0
    }

    /// Return the URG flag.
    #[inline]
    pub fn urg(&self) -> bool {
        self.0 & field::FLG_URG != 0
    }

    /// Set the FIN flag.
    #[inline]
    pub fn set_fin(&mut self, value: bool) {
        self.set(field::FLG_FIN, value)
    }

    /// Set the SYN flag.
    #[inline]
    pub fn set_syn(&mut self, value: bool) {
        self.set(field::FLG_SYN, value)
    }

    /// Set the RST flag.
    #[inline]
    pub fn set_rst(&mut self, value: bool) {
        self.set(field::FLG_RST, value)
    }

    /// Set the PSH flag.
    #[inline]
    pub fn set_psh(&mut self, value: bool) {
        self.set(field::FLG_PSH, value)
    }

    /// Set the ACK flag.
    #[inline]
    pub fn set_ack(&mut self, value: bool) {
        self.set(field::FLG_ACK, value)
    }

    /// Set the URG flag.
    #[inline]
    pub fn set_urg(&mut self, value: bool) {
        self.set(field::FLG_URG, value)
    }

    #[inline]
    fn set(&mut self, mask: u16, value: bool) {
        let flag = if value { mask } else { 0 };
        self.0 = (self.0 & !mask) | flag;
    }

    /// Return the length of the control flags, in terms of sequence space.
    ///
    /// SYN and FIN each occupy one unit of the sequence space.
    pub fn sequence_len(self) -> usize {
        (if self.syn() { 1 } else { 0 })
        + (if self.fin() { 1 } else { 0 })
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.syn() { write!(f, " syn")? }
        if self.fin() { write!(f, " fin")? }
        if self.rst() { write!(f, " rst")? }
        if self.psh() { write!(f, " psh")? }
        if self.ack() { write!(f, " ack")? }
        if self.urg() { write!(f, " urg")? }
        Ok(())
    }
}

/// A representation of a single TCP option.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TcpOption<'a> {
    EndOfList,
    NoOperation,
    MaxSegmentSize(u16),
    WindowScale(u8),
    Unknown { kind: u8, data: &'a [u8] }
}

impl<'a> TcpOption<'a> {
    /// Parse the leading option of the buffer, returning it together with the
    /// remaining option bytes.
    pub fn parse(buffer: &'a [u8]) -> Result<(&'a [u8], TcpOption<'a>)> {
        let (length, option);
        match *buffer.get(0).ok_or(Error::Truncated)? {
            field::OPT_END => {
                length = 1;
                option = TcpOption::EndOfList;
            }
            field::OPT_NOP => {
                length = 1;
                option = TcpOption::NoOperation;
            }
            kind => {
                length = *buffer.get(1).ok_or(Error::Truncated)? as usize;
                if length < 2 {
                    return Err(Error::Malformed);
                }
                let data = buffer.get(2..length).ok_or(Error::Truncated)?;
                match (kind, length) {
                    (field::OPT_MSS, 4) =>
                        option = TcpOption::MaxSegmentSize(NetworkEndian::read_u16(data)),
                    (field::OPT_MSS, _) =>
                        return Err(Error::Malformed),
                    (field::OPT_WS, 3) =>
                        option = TcpOption::WindowScale(data[0]),
                    (field::OPT_WS, _) =>
                        return Err(Error::Malformed),
                    (_, _) =>
                        option = TcpOption::Unknown { kind, data },
                }
            }
        }
        Ok((&buffer[length..], option))
    }

    /// The number of bytes the encoded option occupies.
    pub fn buffer_len(&self) -> usize {
        match self {
            TcpOption::EndOfList => 1,
            TcpOption::NoOperation => 1,
            TcpOption::MaxSegmentSize(_) => 4,
            TcpOption::WindowScale(_) => 3,
            TcpOption::Unknown { data, .. } => 2 + data.len(),
        }
    }

    /// Encode the option, returning the rest of the buffer.
    pub fn emit<'b>(&self, buffer: &'b mut [u8]) -> &'b mut [u8] {
        let length;
        match *self {
            TcpOption::EndOfList => {
                length = 1;
                // Remaining padding space is initialized as well.
                for p in buffer.iter_mut() {
                    *p = field::OPT_END;
                }
            }
            TcpOption::NoOperation => {
                length = 1;
                buffer[0] = field::OPT_NOP;
            }
            TcpOption::MaxSegmentSize(value) => {
                length = self.buffer_len();
                buffer[0] = field::OPT_MSS;
                buffer[1] = length as u8;
                NetworkEndian::write_u16(&mut buffer[2..], value)
            }
            TcpOption::WindowScale(value) => {
                length = self.buffer_len();
                buffer[0] = field::OPT_WS;
                buffer[1] = length as u8;
                buffer[2] = value;
            }
            TcpOption::Unknown { kind, data: provided } => {
                length = self.buffer_len();
                buffer[0] = kind;
                buffer[1] = length as u8;
                buffer[2..length].copy_from_slice(provided)
            }
        }
        &mut buffer[length..]
    }
}

/// Option values recognized by the engine.
///
/// Each field is updated only when the corresponding option is present, so a
/// decoder handing out defaults keeps them for absent options, and values
/// taken before a decode error are retained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentOptions {
    /// The maximum segment size the peer will accept.
    pub mss: Option<u16>,

    /// The peer's window scale shift.
    ///
    /// Decoded for wire compatibility; no scaling is ever applied to window
    /// values.
    pub window_scale: Option<u8>,
}

impl SegmentOptions {
    /// Decode an option byte sequence, updating fields as they appear.
    ///
    /// Unknown options with a valid length byte are skipped. On a malformed
    /// or truncated option the remainder of the sequence is abandoned and the
    /// error returned, while options already decoded stay applied.
    pub fn parse(&mut self, mut options: &[u8]) -> Result<()> {
        while !options.is_empty() {
            let (rest, option) = TcpOption::parse(options)?;
            match option {
                TcpOption::EndOfList => break,
                TcpOption::NoOperation => (),
                TcpOption::MaxSegmentSize(value) => self.mss = Some(value),
                TcpOption::WindowScale(value) => self.window_scale = Some(value),
                TcpOption::Unknown { kind, .. } => {
                    net_trace!("skipping unknown tcp option {}", kind);
                },
            }
            options = rest;
        }
        Ok(())
    }
}

/// A high-level representation of a TCP segment header.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    pub src_port:     u16,
    pub dst_port:     u16,
    pub flags:        Flags,
    pub seq_number:   SeqNumber,
    pub ack_number:   Option<SeqNumber>,
    pub window_len:   u16,
    pub max_seg_size: Option<u16>,
    pub window_scale: Option<u8>,
    pub payload_len:  u16,
}

/// Abstraction for checksum behaviour.
///
/// The checksum covers a pseudo header for the transport protocol consisting
/// of the source and destination address.
pub enum Checksum {
    /// Fill the checksum on emission and verify it when parsing.
    Manual {
        src_addr: IpAddress,
        dst_addr: IpAddress,
    },

    /// Never inspect the checksum.
    ///
    /// This assumes that some layer below has already performed the necessary
    /// checks.
    Ignored,
}

impl Repr {
    /// Parse a TCP segment and return a high-level representation.
    pub fn parse(
        packet: &impl Payload,
        checksum: Checksum,
    ) -> Result<Repr> {
        let packet = Packet::new_unchecked(packet, Repr {
            src_port: 0,
            dst_port: 0,
            flags: Flags(0),
            seq_number: SeqNumber(0),
            ack_number: None,
            window_len: 0,
            max_seg_size: None,
            window_scale: None,
            payload_len: 0,
        });
        packet.check_len()?;

        // Source and destination ports must be present.
        if packet.src_port() == 0 { return Err(Error::Malformed) }
        if packet.dst_port() == 0 { return Err(Error::Malformed) }

        if let Checksum::Manual { src_addr, dst_addr } = checksum {
            if !packet.verify_checksum(src_addr, dst_addr) {
                return Err(Error::WrongChecksum)
            }
        }

        let flags = packet.flags();
        let ack_number = if flags.ack() {
            Some(packet.ack_number())
        } else {
            None
        };
        // The PSH flag is not interpreted. The URG flag and the urgent field
        // are not interpreted either, which is standards-compliant.

        let mut options = SegmentOptions::default();
        options.parse(packet.options())?;

        Ok(Repr {
            src_port:     packet.src_port(),
            dst_port:     packet.dst_port(),
            flags,
            seq_number:   packet.seq_number(),
            ack_number,
            window_len:   packet.window_len(),
            max_seg_size: options.mss,
            window_scale: options.window_scale,
            payload_len:  packet.payload_slice().len() as u16,
        })
    }

    /// Return the length of the header that will be emitted from this
    /// representation, options included and padded to a word boundary.
    pub fn header_len(&self) -> usize {
        let mut length = field::URGENT.end;
        if self.max_seg_size.is_some() {
            length += 4
        }
        if self.window_scale.is_some() {
            length += 3
        }
        if length % 4 != 0 {
            length += 4 - length % 4;
        }
        length
    }

    /// Return the length of a buffer required to emit this representation.
    pub fn buffer_len(&self) -> usize {
        self.header_len() + usize::from(self.payload_len)
    }

    /// Return the length of the segment, in terms of sequence space.
    pub fn sequence_len(&self) -> usize {
        usize::from(self.payload_len) + self.flags.sequence_len()
    }

    /// Emit this representation into a segment buffer.
    ///
    /// The payload bytes are not touched.
    pub fn emit<T: PayloadMut>(&self, packet: &mut Packet<T>) {
        packet.set_src_port(self.src_port);
        packet.set_dst_port(self.dst_port);
        packet.set_seq_number(self.seq_number);
        packet.set_ack_number(self.ack_number.unwrap_or(SeqNumber(0)));
        packet.set_header_len(self.header_len() as u8);
        let mut flags = self.flags;
        flags.set_ack(self.ack_number.is_some());
        packet.set_flags(flags);
        packet.set_window_len(self.window_len);
        {
            let mut options = packet.options_mut();
            if let Some(value) = self.max_seg_size {
                let tmp = options; options = TcpOption::MaxSegmentSize(value).emit(tmp);
            }
            if let Some(value) = self.window_scale {
                let tmp = options; options = TcpOption::WindowScale(value).emit(tmp);
            }
            if options.len() > 0 {
                TcpOption::EndOfList.emit(options);
            }
        }
        packet.set_urgent_at(0);
        packet.set_checksum(0);
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TCP src={} dst={}", self.src_port, self.dst_port)?;
        self.flags.fmt(f)?;
        write!(f, " seq={}", self.seq_number)?;
        if let Some(ack_number) = self.ack_number {
            write!(f, " ack={}", ack_number)?;
        }
        write!(f, " win={}", self.window_len)?;
        write!(f, " len={}", self.payload_len)?;
        if let Some(max_seg_size) = self.max_seg_size {
            write!(f, " mss={}", max_seg_size)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::wire::Ipv4Address;
    use super::*;

    const SRC_ADDR: Ipv4Address = Ipv4Address([192, 168, 1, 1]);
    const DST_ADDR: Ipv4Address = Ipv4Address([192, 168, 1, 2]);

    static PACKET_BYTES: [u8; 28] =
        [0xbf, 0x00, 0x00, 0x50,
         0x01, 0x23, 0x45, 0x67,
         0x89, 0xab, 0xcd, 0xef,
         0x60, 0x35, 0x01, 0x23,
         0x01, 0xb6, 0x02, 0x01,
         0x03, 0x03, 0x0c, 0x01,
         0xaa, 0x00, 0x00, 0xff];

    static OPTION_BYTES: [u8; 4] =
        [0x03, 0x03, 0x0c, 0x01];

    static PAYLOAD_BYTES: [u8; 4] =
        [0xaa, 0x00, 0x00, 0xff];

    #[test]
    fn test_deconstruct() {
        let packet = Packet::new_checked(&PACKET_BYTES[..], Checksum::Ignored).unwrap();
        assert_eq!(packet.src_port(), 48896);
        assert_eq!(packet.dst_port(), 80);
        assert_eq!(packet.seq_number(), SeqNumber(0x01234567));
        assert_eq!(packet.ack_number(), SeqNumber(0x89abcdef));
        assert_eq!(packet.header_len(), 24);
        assert_eq!(packet.flags().fin(), true);
        assert_eq!(packet.flags().syn(), false);
        assert_eq!(packet.flags().rst(), true);
        assert_eq!(packet.flags().psh(), false);
        assert_eq!(packet.flags().ack(), true);
        assert_eq!(packet.flags().urg(), true);
        assert_eq!(packet.window_len(), 0x0123);
        assert_eq!(packet.urgent_at(), 0x0201);
        assert_eq!(packet.checksum(), 0x01b6);
        assert_eq!(packet.options(), &OPTION_BYTES[..]);
        assert_eq!(packet.payload_slice(), &PAYLOAD_BYTES[..]);
        assert_eq!(packet.verify_checksum(SRC_ADDR.into(), DST_ADDR.into()), true);
    }

    #[test]
    fn test_construct() {
        let mut bytes = vec![0xa5; PACKET_BYTES.len()];
        let mut packet = Packet::new_unchecked(&mut bytes[..], packet_repr());
        packet.set_src_port(48896);
        packet.set_dst_port(80);
        packet.set_seq_number(SeqNumber(0x01234567));
        packet.set_ack_number(SeqNumber(0x89abcdef));
        packet.set_header_len(24);
        let mut flags = Flags::default();
        flags.set_fin(true);
        flags.set_rst(true);
        flags.set_ack(true);
        flags.set_urg(true);
        packet.set_flags(flags);
        packet.set_window_len(0x0123);
        packet.set_urgent_at(0x0201);
        packet.set_checksum(0xEEEE);
        packet.options_mut().copy_from_slice(&OPTION_BYTES[..]);
        packet.payload_mut_slice().copy_from_slice(&PAYLOAD_BYTES[..]);
        packet.fill_checksum(SRC_ADDR.into(), DST_ADDR.into());
        assert_eq!(&bytes[..], &PACKET_BYTES[..]);
    }

    #[test]
    fn test_truncated() {
        let packet = Packet::new_checked(&PACKET_BYTES[..23], Checksum::Ignored);
        assert_eq!(packet.unwrap_err(), Error::Truncated);
    }

    #[test]
    fn test_impossible_len() {
        let mut bytes = vec![0; 20];
        let mut packet = Packet::new_unchecked(&mut bytes[..], packet_repr());
        packet.set_header_len(10);
        assert_eq!(packet.check_len(), Err(Error::Malformed));
    }

    static SYN_PACKET_BYTES: [u8; 24] =
        [0xbf, 0x00, 0x00, 0x50,
         0x01, 0x23, 0x45, 0x67,
         0x00, 0x00, 0x00, 0x00,
         0x50, 0x02, 0x01, 0x23,
         0x7a, 0x8d, 0x00, 0x00,
         0xaa, 0x00, 0x00, 0xff];

    fn packet_repr() -> Repr {
        Repr {
            src_port:     48896,
            dst_port:     80,
            seq_number:   SeqNumber(0x01234567),
            ack_number:   None,
            window_len:   0x0123,
            flags:        Flags(super::field::FLG_SYN),
            max_seg_size: None,
            window_scale: None,
            payload_len:  PAYLOAD_BYTES.len() as _,
        }
    }

    #[test]
    fn test_parse() {
        let packet = Packet::new_checked(
            &SYN_PACKET_BYTES[..],
            Checksum::Manual { src_addr: SRC_ADDR.into(), dst_addr: DST_ADDR.into(), })
        .unwrap();
        assert_eq!(packet.repr(), packet_repr());
        assert_eq!(packet.payload_slice(), &PAYLOAD_BYTES[..]);
    }

    #[test]
    fn test_emit() {
        let repr = packet_repr();
        let mut bytes = vec![0xa5; repr.buffer_len()];
        let mut packet = Packet::new_unchecked(&mut bytes[..], repr);
        repr.emit(&mut packet);
        packet.payload_mut_slice().copy_from_slice(&PAYLOAD_BYTES);
        packet.fill_checksum(SRC_ADDR.into(), DST_ADDR.into());
        assert_eq!(&bytes[..], &SYN_PACKET_BYTES[..]);
    }

    #[test]
    fn test_header_len_multiple_of_4() {
        let mut repr = packet_repr();
        repr.window_scale = Some(0); // This option needs 3 bytes.
        assert_eq!(repr.header_len() % 4, 0); // Should e.g. be 24 instead of 23.
    }

    #[test]
    fn test_sequence_compare() {
        assert!(SeqNumber(5) < SeqNumber(6));
        // Ordering is consistent across the wrap of the sequence space.
        assert!(SeqNumber(0xffff_fff0) < SeqNumber(0x0000_0010));
        assert_eq!(SeqNumber(0x0000_0010) - SeqNumber(0xffff_fff0), 0x20);
    }

    #[test]
    fn test_sequence_window() {
        let base = SeqNumber(0xffff_fff0);
        assert!(SeqNumber(0x0000_0010).in_window(base, 64));
        assert!(!SeqNumber(0x8000_0000).in_window(base, 64));
        assert!(base.in_window(base, 64));
        assert!(!base.in_window(base, 0));
    }

    macro_rules! assert_option_parses {
        ($opt:expr, $data:expr) => ({
            assert_eq!(TcpOption::parse($data), Ok((&[][..], $opt)));
            let buffer = &mut [0; 40][..$opt.buffer_len()];
            assert_eq!($opt.emit(buffer), &mut []);
            assert_eq!(&*buffer, $data);
        })
    }

    #[test]
    fn test_tcp_options() {
        assert_option_parses!(TcpOption::EndOfList,
                              &[0x00]);
        assert_option_parses!(TcpOption::NoOperation,
                              &[0x01]);
        assert_option_parses!(TcpOption::MaxSegmentSize(1460),
                              &[0x02, 0x04, 0x05, 0xb4]);
        assert_option_parses!(TcpOption::WindowScale(12),
                              &[0x03, 0x03, 0x0c]);
        assert_option_parses!(TcpOption::Unknown { kind: 12, data: &[1, 2, 3][..] },
                              &[0x0c, 0x05, 0x01, 0x02, 0x03])
    }

    #[test]
    fn test_malformed_tcp_options() {
        assert_eq!(TcpOption::parse(&[]),
                   Err(Error::Truncated));
        assert_eq!(TcpOption::parse(&[0xc]),
                   Err(Error::Truncated));
        assert_eq!(TcpOption::parse(&[0xc, 0x05, 0x01, 0x02]),
                   Err(Error::Truncated));
        assert_eq!(TcpOption::parse(&[0xc, 0x00]),
                   Err(Error::Malformed));
        assert_eq!(TcpOption::parse(&[0xc, 0x01]),
                   Err(Error::Malformed));
        assert_eq!(TcpOption::parse(&[0x2, 0x02]),
                   Err(Error::Malformed));
        assert_eq!(TcpOption::parse(&[0x3, 0x02]),
                   Err(Error::Malformed));
    }

    #[test]
    fn test_option_round_trip() {
        // The values taken before a decode error are kept as-is.
        let mut decoded = SegmentOptions::default();
        decoded.parse(&[0x02, 0x04, 0x05, 0xb4, 0x00]).unwrap();
        assert_eq!(decoded.mss, Some(1460));
        assert_eq!(decoded.window_scale, None);

        let mut partial = SegmentOptions::default();
        let result = partial.parse(&[0x02, 0x04, 0x05, 0xb4, 0x08, 0x01]);
        assert_eq!(result, Err(Error::Malformed));
        assert_eq!(partial.mss, Some(1460));
    }

    #[test]
    fn test_options_nop_padding() {
        // NOP and END do not modify any decoded value.
        let mut decoded = SegmentOptions::default();
        decoded.parse(&[0x01, 0x01, 0x02, 0x04, 0x05, 0xb4, 0x00, 0x01]).unwrap();
        assert_eq!(decoded.mss, Some(1460));
    }
}
