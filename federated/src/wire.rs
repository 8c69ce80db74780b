//! C1: the fixed little-endian wire codec (spec §4.1).
//!
//! Every message is `tag_byte ‖ payload`. All integers are little-endian
//! regardless of host byte order, and strings are a `u8` length prefix
//! followed by raw (non-null-terminated) bytes. This is a hand-rolled
//! [`Decoder`]/[`Encoder`] pair rather than a derived `serde`/`bincode` codec
//! (the REDESIGN FLAG in spec §9, "Tagged enums for messages": a discriminated
//! union decoded once at the wire boundary) because the exact byte layout is a
//! hard requirement, not an implementation detail a generic framing would
//! preserve.

use bytes::{Buf, BufMut, BytesMut};
use rti_core::{FederateId, Interval, PortId, Tag, Timestamp};
use tokio_util::codec::{Decoder, Encoder};

/// Reasons the RTI can give for refusing a connecting federate (spec §4.1 REJECT).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    FederationIdMismatch,
    FedIdOutOfRange,
    FedIdInUse,
    UnexpectedMessage,
    WrongServer,
}

impl RejectReason {
    fn to_byte(self) -> u8 {
        match self {
            Self::FederationIdMismatch => 0,
            Self::FedIdOutOfRange => 1,
            Self::FedIdInUse => 2,
            Self::UnexpectedMessage => 3,
            Self::WrongServer => 4,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::FederationIdMismatch),
            1 => Some(Self::FedIdOutOfRange),
            2 => Some(Self::FedIdInUse),
            3 => Some(Self::UnexpectedMessage),
            4 => Some(Self::WrongServer),
            _ => None,
        }
    }
}

/// The full set of messages exchanged between the RTI and a federate, and
/// between federates over a direct physical connection.
///
/// `ProvisionalTimeAdvanceGrant` is a supplemental addition (SPEC_FULL §9,
/// grounded in `original_source`'s PTAG): spec.md's wire table only lists
/// ordinary `TimeAdvanceGrant`, but does not forbid this — federates
/// connected via zero-delay cycles need a grant that does not promise no
/// further messages at that tag.
#[derive(Debug, Clone, PartialEq)]
pub enum RtiMessage {
    FedId {
        federate_id: FederateId,
        federation_id: String,
    },
    Timestamp(Timestamp),
    Ack,
    /// `None` means clock synchronization is disabled for this federate.
    UdpPort(Option<u16>),
    Reject(RejectReason),
    AddressQuery(FederateId),
    AddressAd(i32),
    Message {
        port: PortId,
        federate: FederateId,
        data: Vec<u8>,
    },
    TimedMessage {
        port: PortId,
        federate: FederateId,
        tag: Tag,
        data: Vec<u8>,
    },
    NextEventTag(Tag),
    LogicalTagComplete(Tag),
    TimeAdvanceGrant(Tag),
    ProvisionalTimeAdvanceGrant(Tag),
    StopRequest(Timestamp),
    StopRequestReply(Timestamp),
    StopGranted(Timestamp),
    Resign,
    ClockSyncT1(Timestamp),
    ClockSyncT3 {
        federate_id: FederateId,
        timestamp: Timestamp,
    },
    ClockSyncT4(Timestamp),
    ClockSyncT4CodedProbe(Timestamp),
}

const TAG_FED_ID: u8 = 1;
const TAG_TIMESTAMP: u8 = 2;
const TAG_ACK: u8 = 3;
const TAG_UDP_PORT: u8 = 4;
const TAG_REJECT: u8 = 5;
const TAG_ADDRESS_QUERY: u8 = 6;
const TAG_ADDRESS_AD: u8 = 7;
const TAG_MESSAGE: u8 = 8;
const TAG_TIMED_MESSAGE: u8 = 9;
const TAG_NEXT_EVENT_TAG: u8 = 10;
const TAG_LOGICAL_TAG_COMPLETE: u8 = 11;
const TAG_TIME_ADVANCE_GRANT: u8 = 12;
const TAG_STOP_REQUEST: u8 = 13;
const TAG_STOP_REQUEST_REPLY: u8 = 14;
const TAG_STOP_GRANTED: u8 = 15;
const TAG_RESIGN: u8 = 16;
const TAG_PHYS_CLOCK_T1: u8 = 17;
const TAG_PHYS_CLOCK_T3: u8 = 18;
const TAG_PHYS_CLOCK_T4: u8 = 19;
const TAG_PHYS_CLOCK_T4_CODED_PROBE: u8 = 20;
const TAG_PROVISIONAL_TIME_ADVANCE_GRANT: u8 = 21;

/// Bounded-capacity read cursor over an in-memory frame. Each getter returns
/// `None` (rather than panicking) when the buffer does not yet hold enough
/// bytes, so the decoder can cleanly report "need more data".
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return None;
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16_le(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32_le(&mut self) -> Option<u32> {
        self.take(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32_le(&mut self) -> Option<i32> {
        self.u32_le().map(|v| v as i32)
    }

    fn i64_le(&mut self) -> Option<i64> {
        self.take(8).map(|b| {
            i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        })
    }

    fn consumed(&self) -> usize {
        self.pos
    }
}

/// Error taxonomy for framed I/O (spec §4.1: `{Closed, Timeout, Io, UnexpectedEof}`).
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("connection closed")]
    Closed,
    #[error("operation timed out")]
    Timeout,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("unexpected end of frame")]
    UnexpectedEof,
    #[error("unrecognized message tag {0}")]
    InvalidTag(u8),
    #[error("federation id is not valid UTF-8")]
    InvalidUtf8,
}

/// The [`Decoder`]/[`Encoder`] pair for [`RtiMessage`], used to build a
/// `Framed<TcpStream, WireCodec>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WireCodec;

impl Decoder for WireCodec {
    type Item = RtiMessage;
    type Error = WireError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RtiMessage>, WireError> {
        if buf.is_empty() {
            return Ok(None);
        }
        let tag = buf[0];
        let mut cur = Cursor::new(&buf[1..]);

        let msg = match tag {
            TAG_FED_ID => {
                let Some(fed_id) = cur.u16_le() else {
                    return Ok(None);
                };
                let Some(name_len) = cur.u8() else {
                    return Ok(None);
                };
                let Some(name_bytes) = cur.take(name_len as usize) else {
                    return Ok(None);
                };
                let federation_id = std::str::from_utf8(name_bytes)
                    .map_err(|_| WireError::InvalidUtf8)?
                    .to_owned();
                RtiMessage::FedId {
                    federate_id: FederateId::from_u16(fed_id),
                    federation_id,
                }
            }
            TAG_TIMESTAMP => {
                let Some(t) = cur.i64_le() else { return Ok(None) };
                RtiMessage::Timestamp(Timestamp::from_nanos(t))
            }
            TAG_ACK => RtiMessage::Ack,
            TAG_UDP_PORT => {
                let Some(port) = cur.u16_le() else {
                    return Ok(None);
                };
                RtiMessage::UdpPort(if port == 0 { None } else { Some(port) })
            }
            TAG_REJECT => {
                let Some(cause) = cur.u8() else { return Ok(None) };
                let reason = RejectReason::from_byte(cause).ok_or(WireError::InvalidTag(cause))?;
                RtiMessage::Reject(reason)
            }
            TAG_ADDRESS_QUERY => {
                let Some(fed_id) = cur.u16_le() else {
                    return Ok(None);
                };
                RtiMessage::AddressQuery(FederateId::from_u16(fed_id))
            }
            TAG_ADDRESS_AD => {
                let Some(port) = cur.i32_le() else {
                    return Ok(None);
                };
                RtiMessage::AddressAd(port)
            }
            TAG_MESSAGE => {
                let Some(port) = cur.u16_le() else {
                    return Ok(None);
                };
                let Some(fed) = cur.u16_le() else {
                    return Ok(None);
                };
                let Some(len) = cur.u32_le() else {
                    return Ok(None);
                };
                let Some(data) = cur.take(len as usize) else {
                    return Ok(None);
                };
                RtiMessage::Message {
                    port: PortId::from_u16(port),
                    federate: FederateId::from_u16(fed),
                    data: data.to_vec(),
                }
            }
            TAG_TIMED_MESSAGE => {
                let Some(port) = cur.u16_le() else {
                    return Ok(None);
                };
                let Some(fed) = cur.u16_le() else {
                    return Ok(None);
                };
                let Some(len) = cur.u32_le() else {
                    return Ok(None);
                };
                let Some(tag_time) = cur.i64_le() else {
                    return Ok(None);
                };
                let Some(tag_microstep) = cur.u32_le() else {
                    return Ok(None);
                };
                let Some(data) = cur.take(len as usize) else {
                    return Ok(None);
                };
                RtiMessage::TimedMessage {
                    port: PortId::from_u16(port),
                    federate: FederateId::from_u16(fed),
                    tag: Tag::new(Timestamp::from_nanos(tag_time), tag_microstep),
                    data: data.to_vec(),
                }
            }
            TAG_NEXT_EVENT_TAG => {
                let Some(t) = decode_tag(&mut cur) else {
                    return Ok(None);
                };
                RtiMessage::NextEventTag(t)
            }
            TAG_LOGICAL_TAG_COMPLETE => {
                let Some(t) = decode_tag(&mut cur) else {
                    return Ok(None);
                };
                RtiMessage::LogicalTagComplete(t)
            }
            TAG_TIME_ADVANCE_GRANT => {
                let Some(t) = decode_tag(&mut cur) else {
                    return Ok(None);
                };
                RtiMessage::TimeAdvanceGrant(t)
            }
            TAG_PROVISIONAL_TIME_ADVANCE_GRANT => {
                let Some(t) = decode_tag(&mut cur) else {
                    return Ok(None);
                };
                RtiMessage::ProvisionalTimeAdvanceGrant(t)
            }
            TAG_STOP_REQUEST => {
                let Some(t) = cur.i64_le() else { return Ok(None) };
                RtiMessage::StopRequest(Timestamp::from_nanos(t))
            }
            TAG_STOP_REQUEST_REPLY => {
                let Some(t) = cur.i64_le() else { return Ok(None) };
                RtiMessage::StopRequestReply(Timestamp::from_nanos(t))
            }
            TAG_STOP_GRANTED => {
                let Some(t) = cur.i64_le() else { return Ok(None) };
                RtiMessage::StopGranted(Timestamp::from_nanos(t))
            }
            TAG_RESIGN => RtiMessage::Resign,
            TAG_PHYS_CLOCK_T1 => {
                let Some(t) = cur.i64_le() else { return Ok(None) };
                RtiMessage::ClockSyncT1(Timestamp::from_nanos(t))
            }
            TAG_PHYS_CLOCK_T3 => {
                let Some(fed_id) = cur.u16_le() else {
                    return Ok(None);
                };
                let Some(t) = cur.i64_le() else { return Ok(None) };
                RtiMessage::ClockSyncT3 {
                    federate_id: FederateId::from_u16(fed_id),
                    timestamp: Timestamp::from_nanos(t),
                }
            }
            TAG_PHYS_CLOCK_T4 => {
                let Some(t) = cur.i64_le() else { return Ok(None) };
                RtiMessage::ClockSyncT4(Timestamp::from_nanos(t))
            }
            TAG_PHYS_CLOCK_T4_CODED_PROBE => {
                let Some(t) = cur.i64_le() else { return Ok(None) };
                RtiMessage::ClockSyncT4CodedProbe(Timestamp::from_nanos(t))
            }
            other => return Err(WireError::InvalidTag(other)),
        };

        let total = 1 + cur.consumed();
        buf.advance(total);
        Ok(Some(msg))
    }
}

fn decode_tag(cur: &mut Cursor<'_>) -> Option<Tag> {
    let time = cur.i64_le()?;
    let microstep = cur.u32_le()?;
    Some(Tag::new(Timestamp::from_nanos(time), microstep))
}

fn encode_tag(buf: &mut BytesMut, tag: Tag) {
    buf.put_i64_le(tag.time.as_nanos());
    buf.put_u32_le(tag.microstep);
}

impl Encoder<RtiMessage> for WireCodec {
    type Error = WireError;

    fn encode(&mut self, item: RtiMessage, buf: &mut BytesMut) -> Result<(), WireError> {
        match item {
            RtiMessage::FedId {
                federate_id,
                federation_id,
            } => {
                let name = federation_id.as_bytes();
                buf.reserve(1 + 2 + 1 + name.len());
                buf.put_u8(TAG_FED_ID);
                buf.put_u16_le(federate_id.as_u16());
                buf.put_u8(name.len() as u8);
                buf.put_slice(name);
            }
            RtiMessage::Timestamp(ts) => {
                buf.reserve(9);
                buf.put_u8(TAG_TIMESTAMP);
                buf.put_i64_le(ts.as_nanos());
            }
            RtiMessage::Ack => {
                buf.reserve(1);
                buf.put_u8(TAG_ACK);
            }
            RtiMessage::UdpPort(port) => {
                buf.reserve(3);
                buf.put_u8(TAG_UDP_PORT);
                buf.put_u16_le(port.unwrap_or(0));
            }
            RtiMessage::Reject(reason) => {
                buf.reserve(2);
                buf.put_u8(TAG_REJECT);
                buf.put_u8(reason.to_byte());
            }
            RtiMessage::AddressQuery(fed_id) => {
                buf.reserve(3);
                buf.put_u8(TAG_ADDRESS_QUERY);
                buf.put_u16_le(fed_id.as_u16());
            }
            RtiMessage::AddressAd(port) => {
                buf.reserve(5);
                buf.put_u8(TAG_ADDRESS_AD);
                buf.put_i32_le(port);
            }
            RtiMessage::Message {
                port,
                federate,
                data,
            } => {
                buf.reserve(9 + data.len());
                buf.put_u8(TAG_MESSAGE);
                buf.put_u16_le(port.as_u16());
                buf.put_u16_le(federate.as_u16());
                buf.put_u32_le(data.len() as u32);
                buf.put_slice(&data);
            }
            RtiMessage::TimedMessage {
                port,
                federate,
                tag,
                data,
            } => {
                buf.reserve(21 + data.len());
                buf.put_u8(TAG_TIMED_MESSAGE);
                buf.put_u16_le(port.as_u16());
                buf.put_u16_le(federate.as_u16());
                buf.put_u32_le(data.len() as u32);
                encode_tag(buf, tag);
                buf.put_slice(&data);
            }
            RtiMessage::NextEventTag(tag) => {
                buf.reserve(13);
                buf.put_u8(TAG_NEXT_EVENT_TAG);
                encode_tag(buf, tag);
            }
            RtiMessage::LogicalTagComplete(tag) => {
                buf.reserve(13);
                buf.put_u8(TAG_LOGICAL_TAG_COMPLETE);
                encode_tag(buf, tag);
            }
            RtiMessage::TimeAdvanceGrant(tag) => {
                buf.reserve(13);
                buf.put_u8(TAG_TIME_ADVANCE_GRANT);
                encode_tag(buf, tag);
            }
            RtiMessage::ProvisionalTimeAdvanceGrant(tag) => {
                buf.reserve(13);
                buf.put_u8(TAG_PROVISIONAL_TIME_ADVANCE_GRANT);
                encode_tag(buf, tag);
            }
            RtiMessage::StopRequest(ts) => {
                buf.reserve(9);
                buf.put_u8(TAG_STOP_REQUEST);
                buf.put_i64_le(ts.as_nanos());
            }
            RtiMessage::StopRequestReply(ts) => {
                buf.reserve(9);
                buf.put_u8(TAG_STOP_REQUEST_REPLY);
                buf.put_i64_le(ts.as_nanos());
            }
            RtiMessage::StopGranted(ts) => {
                buf.reserve(9);
                buf.put_u8(TAG_STOP_GRANTED);
                buf.put_i64_le(ts.as_nanos());
            }
            RtiMessage::Resign => {
                buf.reserve(1);
                buf.put_u8(TAG_RESIGN);
            }
            RtiMessage::ClockSyncT1(ts) => {
                buf.reserve(9);
                buf.put_u8(TAG_PHYS_CLOCK_T1);
                buf.put_i64_le(ts.as_nanos());
            }
            RtiMessage::ClockSyncT3 {
                federate_id,
                timestamp,
            } => {
                buf.reserve(11);
                buf.put_u8(TAG_PHYS_CLOCK_T3);
                buf.put_u16_le(federate_id.as_u16());
                buf.put_i64_le(timestamp.as_nanos());
            }
            RtiMessage::ClockSyncT4(ts) => {
                buf.reserve(9);
                buf.put_u8(TAG_PHYS_CLOCK_T4);
                buf.put_i64_le(ts.as_nanos());
            }
            RtiMessage::ClockSyncT4CodedProbe(ts) => {
                buf.reserve(9);
                buf.put_u8(TAG_PHYS_CLOCK_T4_CODED_PROBE);
                buf.put_i64_le(ts.as_nanos());
            }
        }
        Ok(())
    }
}

/// A connection delay annotating one upstream edge (spec §3 `upstream_delay[]`).
pub type Delay = Interval;

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: RtiMessage) {
        let mut codec = WireCodec;
        let mut buf = BytesMut::new();
        codec.encode(msg.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().expect("full frame");
        assert_eq!(decoded, msg);
        assert!(buf.is_empty(), "decoder must consume exactly one frame");
    }

    #[test]
    fn round_trips_every_message_kind() {
        round_trip(RtiMessage::FedId {
            federate_id: FederateId::from_u16(3),
            federation_id: "my_federation".into(),
        });
        round_trip(RtiMessage::Timestamp(Timestamp::from_nanos(12_345)));
        round_trip(RtiMessage::Ack);
        round_trip(RtiMessage::UdpPort(None));
        round_trip(RtiMessage::UdpPort(Some(9001)));
        round_trip(RtiMessage::Reject(RejectReason::FedIdInUse));
        round_trip(RtiMessage::AddressQuery(FederateId::from_u16(1)));
        round_trip(RtiMessage::AddressAd(-1));
        round_trip(RtiMessage::AddressAd(40123));
        round_trip(RtiMessage::Message {
            port: PortId::from_u16(2),
            federate: FederateId::from_u16(4),
            data: vec![1, 2, 3, 4, 5],
        });
        round_trip(RtiMessage::TimedMessage {
            port: PortId::from_u16(2),
            federate: FederateId::from_u16(4),
            tag: Tag::new(Timestamp::from_nanos(99), 7),
            data: vec![],
        });
        round_trip(RtiMessage::NextEventTag(Tag::new(
            Timestamp::from_nanos(5),
            0,
        )));
        round_trip(RtiMessage::LogicalTagComplete(Tag::new(
            Timestamp::from_nanos(5),
            2,
        )));
        round_trip(RtiMessage::TimeAdvanceGrant(Tag::new(
            Timestamp::from_nanos(5),
            0,
        )));
        round_trip(RtiMessage::ProvisionalTimeAdvanceGrant(Tag::new(
            Timestamp::from_nanos(5),
            0,
        )));
        round_trip(RtiMessage::StopRequest(Timestamp::from_nanos(100)));
        round_trip(RtiMessage::StopRequestReply(Timestamp::from_nanos(120)));
        round_trip(RtiMessage::StopGranted(Timestamp::from_nanos(120)));
        round_trip(RtiMessage::Resign);
        round_trip(RtiMessage::ClockSyncT1(Timestamp::from_nanos(1)));
        round_trip(RtiMessage::ClockSyncT3 {
            federate_id: FederateId::from_u16(0),
            timestamp: Timestamp::from_nanos(2),
        });
        round_trip(RtiMessage::ClockSyncT4(Timestamp::from_nanos(3)));
        round_trip(RtiMessage::ClockSyncT4CodedProbe(Timestamp::from_nanos(4)));
    }

    #[test]
    fn decode_waits_for_a_full_frame() {
        let mut codec = WireCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(
                RtiMessage::Message {
                    port: PortId::from_u16(0),
                    federate: FederateId::from_u16(0),
                    data: vec![9, 9, 9],
                },
                &mut buf,
            )
            .unwrap();
        let mut partial = buf.split_to(buf.len() - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        // Feed the remaining byte back in; now a full frame is available.
        partial.extend_from_slice(&buf);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut codec = WireCodec;
        let mut buf = BytesMut::from(&b"\xffnonsense"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(WireError::InvalidTag(0xff))
        ));
    }
}
