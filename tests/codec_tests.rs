//! Codec Tests
//!
//! Tests for proto header and message encoding/decoding.

use std::io::Cursor;

use meshkv_client::protocol::{
    decode_message, decode_proto_header, encode_message, encode_response, read_frame, FieldType,
    MessageType, ResultCode, INFO_READ, INFO_WRITE, MSG_HEADER_SIZE, PROTO_HEADER_SIZE,
};

// =============================================================================
// Proto Header Tests
// =============================================================================

#[test]
fn test_proto_header_round_trip() {
    let buf = encode_message(INFO_READ, 0, 0, &[], None);

    let header: [u8; PROTO_HEADER_SIZE] = buf[..PROTO_HEADER_SIZE].try_into().unwrap();
    let proto = decode_proto_header(&header).unwrap();

    assert_eq!(proto.msg_type, MessageType::Message);
    assert_eq!(proto.size as usize, buf.len() - PROTO_HEADER_SIZE);
}

#[test]
fn test_proto_header_wire_layout() {
    let buf = encode_message(INFO_READ, 0, 0, &[], None);

    assert_eq!(buf[0], 2); // version
    assert_eq!(buf[1], 3); // message type

    // 48-bit big-endian size equals the message header size.
    let size = u64::from_be_bytes([0, 0, buf[2], buf[3], buf[4], buf[5], buf[6], buf[7]]);
    assert_eq!(size as usize, MSG_HEADER_SIZE);
}

#[test]
fn test_proto_header_bad_version() {
    let header = [9u8, 3, 0, 0, 0, 0, 0, 0];
    let err = decode_proto_header(&header).unwrap_err();
    assert!(err.to_string().contains("version"));
}

#[test]
fn test_proto_header_bad_type() {
    let header = [2u8, 7, 0, 0, 0, 0, 0, 0];
    let err = decode_proto_header(&header).unwrap_err();
    assert!(err.to_string().contains("Unknown message type"));
}

#[test]
fn test_proto_header_oversized_body() {
    let header = [2u8, 3, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
    let err = decode_proto_header(&header).unwrap_err();
    assert!(err.to_string().contains("too large"));
}

// =============================================================================
// Message Round-Trip Tests
// =============================================================================

#[test]
fn test_message_round_trip_with_fields_and_value() {
    let digest = [7u8; 20];
    let fields: Vec<(FieldType, &[u8])> = vec![
        (FieldType::Namespace, b"test"),
        (FieldType::Set, b"demo"),
        (FieldType::Digest, &digest),
    ];

    let buf = encode_message(INFO_WRITE, 3, 42, &fields, Some(b"hello"));
    let frame = decode_message(&buf[PROTO_HEADER_SIZE..]).unwrap();

    assert_eq!(frame.info, INFO_WRITE);
    assert_eq!(frame.result, ResultCode::Ok);
    assert_eq!(frame.generation, 3);
    assert_eq!(frame.record_version, 42);
    assert_eq!(frame.fields.len(), 3);
    assert_eq!(frame.fields[0], (FieldType::Namespace, b"test".to_vec()));
    assert_eq!(frame.fields[2], (FieldType::Digest, digest.to_vec()));
    assert_eq!(frame.value, Some(b"hello".to_vec()));
}

#[test]
fn test_message_round_trip_no_value() {
    let buf = encode_message(INFO_READ, 0, 0, &[(FieldType::Namespace, b"test")], None);
    let frame = decode_message(&buf[PROTO_HEADER_SIZE..]).unwrap();

    assert_eq!(frame.value, None);
    assert_eq!(frame.fields.len(), 1);
}

#[test]
fn test_response_round_trip() {
    let buf = encode_response(ResultCode::NotFound, 0, 0, None);
    let frame = decode_message(&buf[PROTO_HEADER_SIZE..]).unwrap();
    assert_eq!(frame.result, ResultCode::NotFound);
    assert_eq!(frame.value, None);

    let buf = encode_response(ResultCode::Ok, 9, 17, Some(b"payload"));
    let frame = decode_message(&buf[PROTO_HEADER_SIZE..]).unwrap();
    assert_eq!(frame.result, ResultCode::Ok);
    assert_eq!(frame.generation, 9);
    assert_eq!(frame.record_version, 17);
    assert_eq!(frame.value, Some(b"payload".to_vec()));
}

#[test]
fn test_empty_value_distinct_from_absent() {
    let buf = encode_response(ResultCode::Ok, 1, 0, Some(b""));
    let frame = decode_message(&buf[PROTO_HEADER_SIZE..]).unwrap();
    assert_eq!(frame.value, Some(Vec::new()));
}

// =============================================================================
// Malformed Message Tests
// =============================================================================

#[test]
fn test_truncated_message_header() {
    let err = decode_message(&[0u8; 4]).unwrap_err();
    assert!(err.to_string().contains("Incomplete message header"));
}

#[test]
fn test_truncated_field() {
    let buf = encode_message(INFO_READ, 0, 0, &[(FieldType::Set, b"demo")], None);
    let body = &buf[PROTO_HEADER_SIZE..];

    // Chop the field data off mid-way.
    let err = decode_message(&body[..body.len() - 2]).unwrap_err();
    assert!(err.to_string().contains("Truncated field"));
}

#[test]
fn test_unknown_field_type() {
    let buf = encode_message(INFO_READ, 0, 0, &[(FieldType::Set, b"demo")], None);
    let mut body = buf[PROTO_HEADER_SIZE..].to_vec();

    // The field tag sits right after the fixed message header.
    body[MSG_HEADER_SIZE] = 0xEE;
    let err = decode_message(&body).unwrap_err();
    assert!(err.to_string().contains("Unknown field type"));
}

// =============================================================================
// Stream I/O Tests
// =============================================================================

#[test]
fn test_read_frame_from_stream() {
    let buf = encode_response(ResultCode::Ok, 2, 0, Some(b"streamed"));
    let mut cursor = Cursor::new(buf.to_vec());

    let (proto, body) = read_frame(&mut cursor).unwrap();
    assert_eq!(proto.msg_type, MessageType::Message);

    let frame = decode_message(&body).unwrap();
    assert_eq!(frame.generation, 2);
    assert_eq!(frame.value, Some(b"streamed".to_vec()));
}

#[test]
fn test_read_frame_multiple_sequential() {
    let mut stream = Vec::new();
    for i in 0..3u32 {
        stream.extend_from_slice(&encode_response(ResultCode::Ok, i, 0, None));
    }

    let mut cursor = Cursor::new(stream);
    for i in 0..3u32 {
        let (_, body) = read_frame(&mut cursor).unwrap();
        assert_eq!(decode_message(&body).unwrap().generation, i);
    }
}

#[test]
fn test_read_frame_truncated_stream() {
    let buf = encode_response(ResultCode::Ok, 0, 0, Some(b"cut short"));
    let mut cursor = Cursor::new(buf[..buf.len() - 3].to_vec());
    assert!(read_frame(&mut cursor).is_err());
}

// =============================================================================
// Result Code Tests
// =============================================================================

#[test]
fn test_result_code_round_trip() {
    for code in [
        ResultCode::Ok,
        ResultCode::NotFound,
        ResultCode::GenerationMismatch,
        ResultCode::ParameterError,
        ResultCode::ServerError,
        ResultCode::ServerTimeout,
    ] {
        assert_eq!(ResultCode::from_u8(code.as_u8()), code);
    }
    assert_eq!(ResultCode::from_u8(200), ResultCode::Unknown(200));
}
