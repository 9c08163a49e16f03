//! Protocol codec
//!
//! Encoding and decoding for the proto header and structured messages.

use std::io::Read;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{ClientError, Result};

/// Proto header size: version (1) + type (1) + 48-bit body size (6)
pub const PROTO_HEADER_SIZE: usize = 8;

/// Message header size: info (1) + result (1) + generation (4) +
/// record version (8) + field count (2) + op count (2)
pub const MSG_HEADER_SIZE: usize = 18;

/// Current protocol version
pub const PROTO_VERSION: u8 = 2;

/// Maximum body size (128 MB)
pub const MAX_BODY_SIZE: u64 = 128 * 1024 * 1024;

/// Info flag: command reads the record
pub const INFO_READ: u8 = 0x01;

/// Info flag: command writes the record
pub const INFO_WRITE: u8 = 0x02;

/// Info flag: command deletes the record
pub const INFO_DELETE: u8 = 0x04;

// =============================================================================
// Proto Header
// =============================================================================

/// Message type tag carried in the proto header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Newline-delimited text info exchange
    Info,
    /// Structured key-value message
    Message,
}

impl MessageType {
    fn as_u8(self) -> u8 {
        match self {
            MessageType::Info => 1,
            MessageType::Message => 3,
        }
    }
}

/// Decoded proto header
#[derive(Debug, Clone, Copy)]
pub struct ProtoHeader {
    pub msg_type: MessageType,
    pub size: u64,
}

/// Encode a proto header into a buffer
pub fn encode_proto_header(buf: &mut BytesMut, msg_type: MessageType, size: u64) {
    buf.put_u8(PROTO_VERSION);
    buf.put_u8(msg_type.as_u8());
    // 48-bit big-endian size
    buf.put_u16((size >> 32) as u16);
    buf.put_u32(size as u32);
}

/// Decode a proto header
///
/// A bad version, unknown type or oversized body means the stream is
/// desynchronized; callers must destroy the connection.
pub fn decode_proto_header(bytes: &[u8; PROTO_HEADER_SIZE]) -> Result<ProtoHeader> {
    if bytes[0] != PROTO_VERSION {
        return Err(ClientError::Protocol(format!(
            "Unknown protocol version: {}",
            bytes[0]
        )));
    }

    let msg_type = match bytes[1] {
        1 => MessageType::Info,
        3 => MessageType::Message,
        t => {
            return Err(ClientError::Protocol(format!(
                "Unknown message type: 0x{:02x}",
                t
            )))
        }
    };

    let size = ((bytes[2] as u64) << 40)
        | ((bytes[3] as u64) << 32)
        | ((bytes[4] as u64) << 24)
        | ((bytes[5] as u64) << 16)
        | ((bytes[6] as u64) << 8)
        | (bytes[7] as u64);

    if size > MAX_BODY_SIZE {
        return Err(ClientError::Protocol(format!(
            "Body too large: {} bytes (max {})",
            size, MAX_BODY_SIZE
        )));
    }

    Ok(ProtoHeader { msg_type, size })
}

// =============================================================================
// Message Fields and Ops
// =============================================================================

/// Field type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Namespace,
    Set,
    Digest,
    TxnId,
}

impl FieldType {
    fn as_u8(self) -> u8 {
        match self {
            FieldType::Namespace => 0,
            FieldType::Set => 1,
            FieldType::Digest => 2,
            FieldType::TxnId => 3,
        }
    }

    fn from_u8(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(FieldType::Namespace),
            1 => Ok(FieldType::Set),
            2 => Ok(FieldType::Digest),
            3 => Ok(FieldType::TxnId),
            t => Err(ClientError::Protocol(format!(
                "Unknown field type: 0x{:02x}",
                t
            ))),
        }
    }
}

/// Server result codes carried in the message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    NotFound,
    GenerationMismatch,
    ParameterError,
    ServerError,
    ServerTimeout,
    Unknown(u8),
}

impl ResultCode {
    pub fn from_u8(code: u8) -> Self {
        match code {
            0 => ResultCode::Ok,
            1 => ResultCode::NotFound,
            2 => ResultCode::GenerationMismatch,
            3 => ResultCode::ParameterError,
            4 => ResultCode::ServerError,
            5 => ResultCode::ServerTimeout,
            c => ResultCode::Unknown(c),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            ResultCode::Ok => 0,
            ResultCode::NotFound => 1,
            ResultCode::GenerationMismatch => 2,
            ResultCode::ParameterError => 3,
            ResultCode::ServerError => 4,
            ResultCode::ServerTimeout => 5,
            ResultCode::Unknown(c) => c,
        }
    }
}

/// A fully decoded message frame (header, fields, op values)
#[derive(Debug, Clone)]
pub struct MessageFrame {
    pub info: u8,
    pub result: ResultCode,
    pub generation: u32,
    pub record_version: u64,
    pub fields: Vec<(FieldType, Vec<u8>)>,
    pub value: Option<Vec<u8>>,
}

// =============================================================================
// Message Encoding/Decoding
// =============================================================================

/// Encode a complete message (proto header + body)
///
/// `value` present means a single write op is attached; absent means no ops
/// (reads and deletes carry their intent in the info flags).
pub fn encode_message(
    info: u8,
    generation: u32,
    record_version: u64,
    fields: &[(FieldType, &[u8])],
    value: Option<&[u8]>,
) -> BytesMut {
    let n_ops: u16 = if value.is_some() { 1 } else { 0 };

    let mut body_size = MSG_HEADER_SIZE;
    for (_, data) in fields {
        body_size += 5 + data.len();
    }
    if let Some(v) = value {
        body_size += 5 + v.len();
    }

    let mut buf = BytesMut::with_capacity(PROTO_HEADER_SIZE + body_size);
    encode_proto_header(&mut buf, MessageType::Message, body_size as u64);

    // message header
    buf.put_u8(info);
    buf.put_u8(0); // result code, unused in requests
    buf.put_u32(generation);
    buf.put_u64(record_version);
    buf.put_u16(fields.len() as u16);
    buf.put_u16(n_ops);

    // fields
    for (ftype, data) in fields {
        buf.put_u8(ftype.as_u8());
        buf.put_u32(data.len() as u32);
        buf.put_slice(data);
    }

    // single write op
    if let Some(v) = value {
        buf.put_u8(0); // op tag, single op kind for now
        buf.put_u32(v.len() as u32);
        buf.put_slice(v);
    }

    buf
}

/// Encode a complete response message (proto header + body)
///
/// The server-side shape of [`encode_message`]; also used by test
/// fixtures standing in for a node.
pub fn encode_response(
    result: ResultCode,
    generation: u32,
    record_version: u64,
    value: Option<&[u8]>,
) -> BytesMut {
    let n_ops: u16 = if value.is_some() { 1 } else { 0 };
    let mut body_size = MSG_HEADER_SIZE;
    if let Some(v) = value {
        body_size += 5 + v.len();
    }

    let mut buf = BytesMut::with_capacity(PROTO_HEADER_SIZE + body_size);
    encode_proto_header(&mut buf, MessageType::Message, body_size as u64);

    buf.put_u8(0); // info flags, unused in responses
    buf.put_u8(result.as_u8());
    buf.put_u32(generation);
    buf.put_u64(record_version);
    buf.put_u16(0); // no fields
    buf.put_u16(n_ops);

    if let Some(v) = value {
        buf.put_u8(0);
        buf.put_u32(v.len() as u32);
        buf.put_slice(v);
    }

    buf
}

/// Decode a message body (excluding the proto header)
pub fn decode_message(body: &[u8]) -> Result<MessageFrame> {
    if body.len() < MSG_HEADER_SIZE {
        return Err(ClientError::Protocol(format!(
            "Incomplete message header: expected {} bytes, got {}",
            MSG_HEADER_SIZE,
            body.len()
        )));
    }

    let mut buf = body;
    let info = buf.get_u8();
    let result = ResultCode::from_u8(buf.get_u8());
    let generation = buf.get_u32();
    let record_version = buf.get_u64();
    let n_fields = buf.get_u16();
    let n_ops = buf.get_u16();

    let mut fields = Vec::with_capacity(n_fields as usize);
    for _ in 0..n_fields {
        if buf.remaining() < 5 {
            return Err(ClientError::Protocol("Truncated field header".to_string()));
        }
        let ftype = FieldType::from_u8(buf.get_u8())?;
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return Err(ClientError::Protocol(format!(
                "Truncated field data: expected {} bytes, got {}",
                len,
                buf.remaining()
            )));
        }
        fields.push((ftype, buf.copy_to_bytes(len).to_vec()));
    }

    let mut value = None;
    for _ in 0..n_ops {
        if buf.remaining() < 5 {
            return Err(ClientError::Protocol("Truncated op header".to_string()));
        }
        let _tag = buf.get_u8();
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return Err(ClientError::Protocol(format!(
                "Truncated op data: expected {} bytes, got {}",
                len,
                buf.remaining()
            )));
        }
        value = Some(buf.copy_to_bytes(len).to_vec());
    }

    Ok(MessageFrame {
        info,
        result,
        generation,
        record_version,
        fields,
        value,
    })
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read one complete frame (header + body) from a stream
///
/// Used where the staged state machine is not needed (pipeline reader
/// thread, info exchanges). Blocks until the frame is complete or the
/// stream errors.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<(ProtoHeader, Vec<u8>)> {
    let mut header = [0u8; PROTO_HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let proto = decode_proto_header(&header)?;

    let mut body = vec![0u8; proto.size as usize];
    if proto.size > 0 {
        reader.read_exact(&mut body)?;
    }

    Ok((proto, body))
}
