//! Wire protocol
//!
//! Defines the binary protocol spoken to MeshKV nodes.
//!
//! ## Proto Header (all messages)
//! ```text
//! ┌───────────┬──────────┬──────────────────────────┐
//! │ Version(1)│ Type (1) │   Body Size (6, BE)      │
//! └───────────┴──────────┴──────────────────────────┘
//! ```
//!
//! ### Types
//! - 1: INFO    - newline-delimited text request/response
//! - 3: MESSAGE - structured key-value message
//!
//! ## Message Body
//! ```text
//! ┌────────┬─────────┬────────┬─────────────┬──────────┬────────┐
//! │Info (1)│Result(1)│ Gen (4)│ Version (8) │Fields (2)│ Ops (2)│
//! └────────┴─────────┴────────┴─────────────┴──────────┴────────┘
//! ```
//! followed by `n_fields` fields and `n_ops` ops, each encoded as
//! `type (1) + len (4, BE) + data`.
//!
//! All multi-byte integers are big-endian on the wire.

mod codec;
pub mod info;

pub use codec::{
    decode_message, decode_proto_header, encode_message, encode_response, read_frame, FieldType,
    MessageFrame, MessageType, ProtoHeader, ResultCode, INFO_DELETE, INFO_READ, INFO_WRITE,
    MAX_BODY_SIZE, MSG_HEADER_SIZE, PROTO_HEADER_SIZE, PROTO_VERSION,
};
