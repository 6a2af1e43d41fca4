//! # Warden Protocol Library
//!
//! Wire types shared by the `wardend` daemon and its clients.
//!
//! ## Layers
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Application Messages           │  MessagePack Envelope
//! ├─────────────────────────────────────────┤
//! │              Framing                    │  Length-prefixed, LZ4
//! ├─────────────────────────────────────────┤
//! │                 TCP                     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Envelope, Frame, FrameCodec, Message};
//! use protocol::messages::FileListRequest;
//!
//! let message = Message::FileListRequest(FileListRequest {
//!     path: "reports".to_string(),
//! });
//! let bytes = Envelope::new(1, message).to_msgpack().unwrap();
//!
//! let codec = FrameCodec::new();
//! let wire = codec.encode(&Frame::new(bytes)).unwrap();
//! let (frame, _) = codec.decode(&wire).unwrap();
//! let envelope = Envelope::from_msgpack(&frame.payload).unwrap();
//! assert_eq!(envelope.sequence, 1);
//! ```

pub mod error;
pub mod framing;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use framing::{
    Frame, FrameCodec, FrameFlags, COMPRESSION_THRESHOLD, FRAME_HEADER_SIZE, FRAME_MAGIC,
    MAX_FRAME_SIZE,
};
pub use messages::{
    Envelope, ErrorCode, ErrorMessage, Message, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE,
    PROTOCOL_VERSION,
};
