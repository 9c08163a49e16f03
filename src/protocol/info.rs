//! Info protocol
//!
//! Text-based request/response used for cluster discovery: a request is a
//! newline-delimited list of names; the response is `name\tvalue` records
//! separated by newlines.

use bytes::{BufMut, BytesMut};

use super::codec::{encode_proto_header, MessageType, PROTO_HEADER_SIZE};

/// Encode an info request for the given names
pub fn encode_info_request(names: &[&str]) -> BytesMut {
    let mut body_size = 0;
    for name in names {
        body_size += name.len() + 1;
    }

    let mut buf = BytesMut::with_capacity(PROTO_HEADER_SIZE + body_size);
    encode_proto_header(&mut buf, MessageType::Info, body_size as u64);

    for name in names {
        buf.put_slice(name.as_bytes());
        buf.put_u8(b'\n');
    }

    buf
}

/// Encode an info response body from name/value pairs
///
/// The server-side counterpart of [`parse_info_response`]; also used by
/// test fixtures standing in for a node.
pub fn encode_info_response(pairs: &[(&str, &str)]) -> BytesMut {
    let mut body_size = 0;
    for (name, value) in pairs {
        body_size += name.len() + 1 + value.len() + 1;
    }

    let mut buf = BytesMut::with_capacity(PROTO_HEADER_SIZE + body_size);
    encode_proto_header(&mut buf, MessageType::Info, body_size as u64);

    for (name, value) in pairs {
        buf.put_slice(name.as_bytes());
        buf.put_u8(b'\t');
        buf.put_slice(value.as_bytes());
        buf.put_u8(b'\n');
    }

    buf
}

/// Parse an info response body into name/value pairs
///
/// Tolerates a trailing record with no terminating newline and bare names
/// with no tab-separated value (the value comes back empty).
pub fn parse_info_response(body: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();

    for line in body.split('\n') {
        if line.is_empty() {
            continue;
        }
        match line.split_once('\t') {
            Some((name, value)) => pairs.push((name.to_string(), value.to_string())),
            None => pairs.push((line.to_string(), String::new())),
        }
    }

    pairs
}

/// Find a single named value in an info response body
pub fn find_info_value<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}
