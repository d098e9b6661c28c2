//! Framing of outbound segments.
//!
//! The builder fills header fields from the connection record, writes the
//! option bytes and computes the checksum over the segment and the pseudo
//! header of the connection tuple. Buffers come from the collaborating
//! packet system; an allocation failure is surfaced as a resource error and
//! never retried here.
use crate::layer::{Error, Result};
use crate::wire::{IpAddress, PayloadMut};
use crate::wire::tcp::{Flags, Packet, Repr, SeqNumber};

use super::Host;
use super::connection::Tcb;

/// Frame one outbound segment for a connection.
///
/// Sequence number, acknowledgment, window and ports are taken from the
/// record. A SYN advertises the given receive MSS as its single option. The
/// record's send sequence advances by the space the segment occupies and a
/// carried acknowledgment settles the delayed-ack bookkeeping.
pub(super) fn prepare_segment<P, H>(
    host: &mut H,
    tcb: &mut Tcb<P>,
    flags: Flags,
    recv_mss: u16,
    payload: &[u8],
) -> Result<P>
    where P: PayloadMut, H: Host<P>
{
    let repr = Repr {
        src_port: tcb.tuple().local_port,
        dst_port: tcb.tuple().remote_port,
        flags,
        seq_number: tcb.send_seq,
        ack_number: if flags.ack() { Some(tcb.send_ack) } else { None },
        window_len: tcb.recv_window(),
        max_seg_size: if flags.syn() { Some(recv_mss) } else { None },
        window_scale: None,
        payload_len: payload.len() as u16,
    };

    let mut buf = host.alloc(repr.buffer_len()).ok_or(Error::Exhausted)?;
    {
        let mut packet = Packet::new_unchecked(&mut buf, repr);
        repr.emit(&mut packet);
        packet.payload_mut_slice().copy_from_slice(payload);
        packet.fill_checksum(tcb.tuple().local, tcb.tuple().remote);
    }

    tcb.note_transmitted(&repr);
    net_trace!("{} tx {}", tcb.state(), repr);
    Ok(buf)
}

/// Frame an acknowledgment-only segment.
pub(super) fn prepare_ack<P, H>(host: &mut H, tcb: &mut Tcb<P>) -> Result<P>
    where P: PayloadMut, H: Host<P>
{
    let mut flags = Flags::default();
    flags.set_ack(true);
    prepare_segment(host, tcb, flags, 0, &[])
}

/// Frame a reset for an existing connection.
pub(super) fn prepare_reset<P, H>(host: &mut H, tcb: &mut Tcb<P>) -> Result<P>
    where P: PayloadMut, H: Host<P>
{
    let mut flags = Flags::default();
    flags.set_rst(true);
    flags.set_ack(true);
    prepare_segment(host, tcb, flags, 0, &[])
}

/// Frame the reset answer to a segment that matches no connection.
///
/// Follows the reset generation rules for the closed state: a segment that
/// carries an acknowledgment is answered with a bare RST at that sequence
/// number, anything else with RST+ACK covering the stray segment. Incoming
/// resets are never answered.
pub(super) fn prepare_stray_reset<P, H>(
    host: &mut H,
    segment: &Repr,
    local: IpAddress,
    remote: IpAddress,
) -> Result<Option<P>>
    where P: PayloadMut, H: Host<P>
{
    if segment.flags.rst() {
        return Ok(None);
    }

    let mut flags = Flags::default();
    flags.set_rst(true);

    let repr = match segment.ack_number {
        Some(ack_number) => Repr {
            src_port: segment.dst_port,
            dst_port: segment.src_port,
            flags,
            seq_number: ack_number,
            ack_number: None,
            window_len: 0,
            max_seg_size: None,
            window_scale: None,
            payload_len: 0,
        },
        None => Repr {
            src_port: segment.dst_port,
            dst_port: segment.src_port,
            flags,
            seq_number: SeqNumber(0),
            ack_number: Some(segment.seq_number + segment.sequence_len()),
            window_len: 0,
            max_seg_size: None,
            window_scale: None,
            payload_len: 0,
        },
    };

    let mut buf = host.alloc(repr.buffer_len()).ok_or(Error::Exhausted)?;
    {
        let mut packet = Packet::new_unchecked(&mut buf, repr);
        repr.emit(&mut packet);
        packet.fill_checksum(local, remote);
    }
    Ok(Some(buf))
}
