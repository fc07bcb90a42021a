//! Pure parse/emit functions for the `drdynvc` wire format.
//!
//! Every PDU is framed by one header byte split into three bitfields: the top nibble is the
//! command, the next two bits are `Sp` (command-specific — the width of the total-length field
//! on `DATA_FIRST`, reserved otherwise), and the bottom two bits are `cbChId`, the width of the
//! channel id that follows. All multi-byte integers are little-endian. A parse failure here is
//! never fatal to the stream: the caller logs and drops the PDU.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ChannelError, ChannelResult};

/// The command carried in the top nibble of the header byte.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Cmd {
    CreateRequest = 0x01,
    DataFirst = 0x02,
    Data = 0x03,
    CloseRequest = 0x04,
    Capabilities = 0x05,
}

impl Cmd {
    fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            0x01 => Some(Self::CreateRequest),
            0x02 => Some(Self::DataFirst),
            0x03 => Some(Self::Data),
            0x04 => Some(Self::CloseRequest),
            0x05 => Some(Self::Capabilities),
            _ => None,
        }
    }
}

/// Width of a variable-length integer field, stored in the wire's 2-bit code.
///
/// `w=2` is reserved and [`FieldWidth::for_value`] never emits it, but [`FieldWidth::read`]
/// honors it as a 4-byte read on input, matching the source's forward-compatibility stance
/// (spec Open Question a).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FieldWidth(u8);

impl FieldWidth {
    pub const W0: FieldWidth = FieldWidth(0);
    pub const W1: FieldWidth = FieldWidth(1);
    pub const W3: FieldWidth = FieldWidth(3);

    pub fn from_code(code: u8) -> FieldWidth {
        FieldWidth(code & 0b11)
    }

    pub fn code(self) -> u8 {
        self.0
    }

    pub fn byte_len(self) -> usize {
        match self.0 {
            0 => 1,
            1 => 2,
            _ => 4, // w=2 (reserved) and w=3 both read and write as 4 bytes
        }
    }

    /// Smallest width that can hold `value`: the rule the emitter always applies.
    pub fn for_value(value: u32) -> FieldWidth {
        if value <= u8::MAX as u32 {
            FieldWidth::W0
        } else if value <= u16::MAX as u32 {
            FieldWidth::W1
        } else {
            FieldWidth::W3
        }
    }

    pub fn read(self, src: &[u8]) -> Option<(u32, &[u8])> {
        let n = self.byte_len();
        if src.len() < n {
            return None;
        }
        let value = match n {
            1 => src[0] as u32,
            2 => u16::from_le_bytes([src[0], src[1]]) as u32,
            _ => u32::from_le_bytes([src[0], src[1], src[2], src[3]]),
        };
        Some((value, &src[n..]))
    }

    pub fn write(self, value: u32, dst: &mut BytesMut) {
        match self.byte_len() {
            1 => dst.put_u8(value as u8),
            2 => dst.put_u16_le(value as u16),
            _ => dst.put_u32_le(value),
        }
    }
}

fn header_byte(cmd: Cmd, sp: FieldWidth, cb_ch_id: FieldWidth) -> u8 {
    ((cmd as u8) << 4) | (sp.code() << 2) | cb_ch_id.code()
}

/// A fully decoded inbound `drdynvc` PDU (the directions this subsystem receives: capability
/// announcement, create/close *responses*, and data fragments).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundPdu {
    Capabilities { version: u16 },
    CreateResponse { channel_id: u32, creation_status: i32 },
    DataFirst { channel_id: u32, total_length: u32, fragment: Bytes },
    Data { channel_id: u32, fragment: Bytes },
    CloseResponse { channel_id: u32 },
}

/// Decode one complete `drdynvc` PDU from a reassembled chunk.
///
/// Per spec §4.1, `CAPABILITIES` is the only command legal before the handshake completes; the
/// caller is responsible for rejecting any other command while not yet `Ready`, since that
/// decision depends on manager state this pure function does not have.
pub fn decode(bytes: &[u8]) -> ChannelResult<InboundPdu> {
    let (&header, rest) = bytes.split_first().ok_or(ChannelError::ShortPdu)?;
    let cmd = Cmd::from_nibble(header >> 4).ok_or(ChannelError::UnknownCommand(header >> 4))?;
    let sp = FieldWidth::from_code((header >> 2) & 0b11);
    let cb_ch_id = FieldWidth::from_code(header & 0b11);

    match cmd {
        Cmd::Capabilities => {
            let (_pad, rest) = rest.split_first().ok_or(ChannelError::ShortPdu)?;
            let (version, _) = FieldWidth::W1.read(rest).ok_or(ChannelError::ShortPdu)?;
            Ok(InboundPdu::Capabilities { version: version as u16 })
        }
        Cmd::CreateRequest => {
            let (channel_id, rest) = cb_ch_id.read(rest).ok_or(ChannelError::ShortPdu)?;
            if rest.len() < 4 {
                return Err(ChannelError::ShortPdu);
            }
            let creation_status = i32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
            Ok(InboundPdu::CreateResponse {
                channel_id,
                creation_status,
            })
        }
        Cmd::DataFirst => {
            let (channel_id, rest) = cb_ch_id.read(rest).ok_or(ChannelError::ShortPdu)?;
            let (total_length, rest) = sp.read(rest).ok_or(ChannelError::ShortPdu)?;
            Ok(InboundPdu::DataFirst {
                channel_id,
                total_length,
                fragment: Bytes::copy_from_slice(rest),
            })
        }
        Cmd::Data => {
            let (channel_id, rest) = cb_ch_id.read(rest).ok_or(ChannelError::ShortPdu)?;
            Ok(InboundPdu::Data {
                channel_id,
                fragment: Bytes::copy_from_slice(rest),
            })
        }
        Cmd::CloseRequest => {
            let (channel_id, _) = cb_ch_id.read(rest).ok_or(ChannelError::ShortPdu)?;
            Ok(InboundPdu::CloseResponse { channel_id })
        }
    }
}

/// Emit the 4-byte capabilities announcement: 1 reserved pad byte, then the version as
/// little-endian `u16`. For version 1 this is bit-for-bit `00 01 00 50`, matching the source's
/// hardcoded literal.
pub fn encode_capabilities(version: u16) -> Bytes {
    let mut dst = BytesMut::with_capacity(4);
    dst.put_u8(header_byte(Cmd::Capabilities, FieldWidth::W0, FieldWidth::W0));
    dst.put_u8(0); // pad
    dst.put_u16_le(version);
    dst.freeze()
}

/// Emit a `CREATE_REQUEST`: variable-uint channel id, then the NUL-terminated channel name.
pub fn encode_create_request(channel_id: u32, name: &str) -> Bytes {
    let cb_ch_id = FieldWidth::for_value(channel_id);
    let mut dst = BytesMut::with_capacity(2 + cb_ch_id.byte_len() + name.len() + 1);
    dst.put_u8(0); // header placeholder, back-patched below
    cb_ch_id.write(channel_id, &mut dst);
    dst.put_slice(name.as_bytes());
    dst.put_u8(0);
    dst[0] = header_byte(Cmd::CreateRequest, FieldWidth::W0, cb_ch_id);
    dst.freeze()
}

/// Emit a `CLOSE_REQUEST`: variable-uint channel id only.
pub fn encode_close_request(channel_id: u32) -> Bytes {
    let cb_ch_id = FieldWidth::for_value(channel_id);
    let mut dst = BytesMut::with_capacity(1 + cb_ch_id.byte_len());
    dst.put_u8(0);
    cb_ch_id.write(channel_id, &mut dst);
    dst[0] = header_byte(Cmd::CloseRequest, FieldWidth::W0, cb_ch_id);
    dst.freeze()
}

/// Worst-case minimum chunk size: header, a 4-byte id, a 4-byte length, and one byte of actual
/// data. Documents the absolute floor; `fragment_dvc_payload` itself checks the *actual* id and
/// length widths for each call, which are usually far smaller, so a chunk size below this
/// constant is not automatically rejected — see the per-call check below.
pub const MIN_CHUNK_SIZE: u32 = 1 + 4 + 4 + 1;

/// Split `payload` into the wire-ready `drdynvc` PDUs that carry it to `channel_id`, faithfully
/// reproducing the source's per-item buffer sizing: each PDU's *total* size (header + id field
/// [+ length field] + fragment) is capped at `chunk_size`, and only the first PDU gains a
/// `DATA_FIRST` header (and its length field) if the whole payload cannot fit after the id field
/// of a single `DATA` PDU (spec §4.2). An empty payload yields zero PDUs, matching the source's
/// `while (Length > 0)` loop. `chunk_size` is rejected only when the id (and, for the first PDU,
/// length) fields of the *actual* call leave no room for at least one byte of payload, not
/// against the worst-case [`MIN_CHUNK_SIZE`] — a small `channel_id` easily fits in chunk sizes
/// well under that constant.
pub fn fragment_dvc_payload(channel_id: u32, payload: &[u8], chunk_size: u32) -> ChannelResult<Vec<Bytes>> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }

    let cb_ch_id = FieldWidth::for_value(channel_id);
    let chunk_size = chunk_size as usize;
    let total_len = payload.len();
    let mut out = Vec::new();
    let mut offset = 0usize;
    let mut first = true;

    while offset < total_len {
        let mut dst = BytesMut::with_capacity(chunk_size.max(1));
        dst.put_u8(0); // header placeholder
        cb_ch_id.write(channel_id, &mut dst);

        let available_for_plain_data = chunk_size.saturating_sub(dst.len());
        let remaining = total_len - offset;

        let cmd = if first && remaining > available_for_plain_data {
            let sp = FieldWidth::for_value(total_len as u32);
            if chunk_size <= dst.len() + sp.byte_len() {
                return Err(ChannelError::ChunkTooSmall);
            }
            sp.write(total_len as u32, &mut dst);
            dst[0] = header_byte(Cmd::DataFirst, sp, cb_ch_id);
            Cmd::DataFirst
        } else {
            if chunk_size <= dst.len() {
                return Err(ChannelError::ChunkTooSmall);
            }
            dst[0] = header_byte(Cmd::Data, FieldWidth::W0, cb_ch_id);
            Cmd::Data
        };
        debug_assert!(matches!(cmd, Cmd::DataFirst | Cmd::Data));

        let take = (chunk_size - dst.len()).min(total_len - offset);
        dst.put_slice(&payload[offset..offset + take]);
        offset += take;
        first = false;

        out.push(dst.freeze());
    }

    Ok(out)
}
