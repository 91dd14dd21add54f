// (c) 2025 Ross Younger

//! Common functions and definitions shared by every part of the wire protocol
//!
//! # On-Wire Framing
//!
//! All protocol messages are sent in two parts:
//!
//! * A frame header: the payload length, as a 4-byte big-endian unsigned integer
//! * The payload: a 1-byte [tag](super::Tag) followed by the message fields
//!
//! Every variable-length field inside a payload (names, file contents, free text)
//! is itself preceded by a 4-byte big-endian length. Nothing is ever delimited by
//! a separator character, so arbitrary binary content passes through untouched.

use tokio::io::{AsyncRead, AsyncWrite};

/////////////////////////////////////////////////////////////////////////////////////////////
// STREAM TYPEDEFS

/// Marker trait for streams used for sending data
pub trait SendingStream: AsyncWrite + Send + Unpin {}
impl<T: AsyncWrite + Send + Unpin> SendingStream for T {}

/// Marker trait for streams used for receiving data
pub trait ReceivingStream: AsyncRead + Send + Unpin {}
impl<T: AsyncRead + Send + Unpin> ReceivingStream for T {}

/// Syntactic sugar helper type
#[derive(Debug)]
pub struct SendReceivePair<S: SendingStream, R: ReceivingStream> {
    /// outbound data
    pub send: S,
    /// inbound data
    pub recv: R,
}

impl<S: SendingStream, R: ReceivingStream> From<(S, R)> for SendReceivePair<S, R> {
    fn from(value: (S, R)) -> Self {
        Self {
            send: value.0,
            recv: value.1,
        }
    }
}

impl From<tokio::net::TcpStream>
    for SendReceivePair<tokio::net::tcp::OwnedWriteHalf, tokio::net::tcp::OwnedReadHalf>
{
    fn from(value: tokio::net::TcpStream) -> Self {
        let (recv, send) = value.into_split();
        Self { send, recv }
    }
}

/////////////////////////////////////////////////////////////////////////////////////////////
// LIMITS

/// The on-wire size of the frame header, which is fixed (any change would constitute a breaking protocol change)
pub const FRAME_HEADER_SIZE: usize = 4;

/// The on-wire size of a field length prefix
pub const FIELD_HEADER_SIZE: usize = 4;

/// Default limit on the payload size of a single frame.
///
/// <div class="warning">
/// This limit is important to prevent excessive memory consumption in the event of bugs, network
/// corruption or a hostile peer. Since every file is transferred in a single frame, it is also the
/// largest file that can be stored.
/// </div>
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/////////////////////////////////////////////////////////////////////////////////////////////
// ERRORS

/// A malformed frame, or a failure of the underlying transport while reading or writing one.
///
/// Any of these is fatal to the connection it occurred on.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame header announced a payload larger than we are prepared to accept
    #[error("frame of {size} bytes exceeds the limit of {limit} bytes")]
    FrameTooLarge {
        /// Announced (or attempted) payload size
        size: usize,
        /// Configured limit
        limit: u32,
    },
    /// The frame header announced an empty payload; every payload has at least a tag
    #[error("empty frame")]
    EmptyFrame,
    /// A field ran off the end of its frame
    #[error("truncated {field}: needed {needed} bytes but only {available} remain")]
    Truncated {
        /// The field being decoded
        field: &'static str,
        /// Bytes required
        needed: usize,
        /// Bytes left in the payload
        available: usize,
    },
    /// The payload tag is not one we know
    #[error("unknown message tag {0:#04x}")]
    UnknownTag(u8),
    /// An outcome carried a status code we do not know
    #[error("unknown status code {0}")]
    UnknownStatus(u8),
    /// The payload contained more data than its message requires
    #[error("{0} unexpected trailing bytes in frame")]
    TrailingBytes(usize),
    /// A text field did not contain valid UTF-8
    #[error("field {field} is not valid UTF-8")]
    InvalidUtf8 {
        /// The field being decoded
        field: &'static str,
    },
    /// A field is too long to be described by its length prefix
    #[error("field {field} of {len} bytes is too long to encode")]
    FieldTooLong {
        /// The field being encoded
        field: &'static str,
        /// Its length
        len: usize,
    },
    /// The stream ended part-way through a frame
    #[error("connection closed part-way through a frame ({0} bytes pending)")]
    UnexpectedEof(usize),
    /// A well-formed message arrived at a point in the conversation where it makes no sense
    #[error("unexpected {0} message")]
    Unexpected(super::Tag),
    /// The underlying transport failed
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Is this error a failure of the transport, as opposed to a malformed frame?
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, ProtocolError::Io(_) | ProtocolError::UnexpectedEof(_))
    }
}
