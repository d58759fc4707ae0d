//! The Quill wire protocol
//!
//! Every exchange is a [`Packet`]: a JSON object carrying the protocol
//! name and version, a type tag, an optional session token, a timestamp
//! and an opaque payload. Packets travel back to back on a persistent
//! stream without length prefixes; [`PacketCodec`] finds the boundaries
//! with a streaming JSON parser.
//!
//! ```text
//!   {"protocol":"quill","version":"1.0","type":"PING",
//!    "timestamp":"2024-01-01T12:00:00Z","payload":{}}
//! ```
//!
//! The payload is decoded into a concrete type only once the tag is
//! known, see [`Request::from_packet`].

mod codec;
mod packet;
mod payload;

pub use codec::{MAX_PACKET_BYTES, PacketCodec};
pub use packet::{PROTOCOL_NAME, PROTOCOL_VERSION, Packet, PacketType};
pub use payload::{
    AttachmentPayload, BodyPayload, ContentPartPayload, DeliveryFailure, ErrorCode,
    ErrorResponsePayload, FetchPayload, FetchResponsePayload, MessageView, PingResponsePayload,
    Request, SendOptionsPayload, SendPayload, SendResponsePayload, Status,
};
