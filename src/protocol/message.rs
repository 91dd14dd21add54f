//! Protocol message definitions and their payload encoding
// (c) 2025 Ross Younger

use std::fmt::Display;

use bytes::{Buf as _, BufMut as _, Bytes, BytesMut};

use super::common::{ProtocolError, FIELD_HEADER_SIZE};

/// Reason text sent when a handshake names a user who is already connected
pub const USERNAME_IN_USE: &str = "username in use";
/// Reason text sent when a delete names a file that does not exist or belongs to somebody else
pub const NOT_FOUND_OR_NOT_OWNER: &str = "not found or not owner";
/// Notification text sent to every connected client when the server stops
pub const SHUTTING_DOWN: &str = "server is shutting down";

/// The first byte of every payload, identifying the message it carries
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::FromRepr)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Tag {
    Handshake = 0x01,
    HandshakeAck = 0x02,
    UploadRequest = 0x10,
    UploadResult = 0x11,
    ListRequest = 0x20,
    ListResponse = 0x21,
    DownloadRequest = 0x30,
    DownloadResponse = 0x31,
    NotFound = 0x32,
    DownloadFailed = 0x33,
    DeleteRequest = 0x40,
    DeleteResult = 0x41,
    Notify = 0x50,
}

/// Machine-readable codes advising of the outcome of an operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::FromRepr)]
#[repr(u8)]
pub enum Status {
    /// Success. An outcome with this status carries no reason.
    Ok = 0,
    /// Generic failure, usually a storage error
    Failed = 1,
    /// The named file does not exist, or does not belong to the requester
    NotFound = 2,
    /// The requested username belongs to a live session
    NameInUse = 3,
    /// The username or filename is not acceptable
    InvalidName = 4,
}

/// Result of a handshake, upload or delete
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The operation succeeded
    Ok,
    /// The operation failed.
    ///
    /// `status` should not be [`Status::Ok`]; if it is, it is sent as [`Status::Failed`].
    Error {
        /// What went wrong
        status: Status,
        /// Human-readable explanation
        reason: String,
    },
}

impl Outcome {
    /// Convenience constructor
    pub fn error<S: Into<String>>(status: Status, reason: S) -> Self {
        Outcome::Error {
            status,
            reason: reason.into(),
        }
    }

    /// Did the operation succeed?
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok)
    }
}

impl Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Ok => write!(f, "Ok"),
            Outcome::Error { status, reason } => write!(f, "{status}: {reason}"),
        }
    }
}

/// One line of a file listing
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListEntry {
    /// The file's owner. (Ordered first so that listings sort by owner.)
    pub owner: String,
    /// Name of the file, without any directory component
    pub filename: String,
}

impl Display for ListEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.filename, self.owner)
    }
}

/// A single protocol message. Each frame on the wire carries exactly one of these.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// C ➡️ S: the first message on every connection, declaring who the client is
    Handshake {
        /// Requested identity
        username: String,
    },
    /// S ➡️ C: reply to [`Message::Handshake`]
    HandshakeAck(Outcome),
    /// C ➡️ S: store a file owned by the sender
    UploadRequest {
        /// Name to store the file as
        filename: String,
        /// File contents
        content: Bytes,
    },
    /// S ➡️ C: reply to [`Message::UploadRequest`]
    UploadResult(Outcome),
    /// C ➡️ S: list every stored file
    ListRequest,
    /// S ➡️ C: reply to [`Message::ListRequest`], in no guaranteed order
    ListResponse(Vec<ListEntry>),
    /// C ➡️ S: fetch a file
    DownloadRequest {
        /// Owner of the file
        owner: String,
        /// Name of the file
        filename: String,
    },
    /// S ➡️ C: successful reply to [`Message::DownloadRequest`]
    DownloadResponse {
        /// Name of the file
        filename: String,
        /// File contents
        content: Bytes,
    },
    /// S ➡️ C: the requested file does not exist
    NotFound,
    /// S ➡️ C: the requested file exists but could not be read
    DownloadFailed {
        /// Human-readable explanation
        reason: String,
    },
    /// C ➡️ S: remove a file owned by the sender
    DeleteRequest {
        /// Name of the file
        filename: String,
    },
    /// S ➡️ C: reply to [`Message::DeleteRequest`]
    DeleteResult(Outcome),
    /// S ➡️ C: unsolicited notification; may arrive at any time after the handshake
    Notify {
        /// Human-readable text
        text: String,
    },
}

impl Message {
    /// The tag that identifies this message on the wire
    #[must_use]
    pub fn tag(&self) -> Tag {
        match self {
            Message::Handshake { .. } => Tag::Handshake,
            Message::HandshakeAck(_) => Tag::HandshakeAck,
            Message::UploadRequest { .. } => Tag::UploadRequest,
            Message::UploadResult(_) => Tag::UploadResult,
            Message::ListRequest => Tag::ListRequest,
            Message::ListResponse(_) => Tag::ListResponse,
            Message::DownloadRequest { .. } => Tag::DownloadRequest,
            Message::DownloadResponse { .. } => Tag::DownloadResponse,
            Message::NotFound => Tag::NotFound,
            Message::DownloadFailed { .. } => Tag::DownloadFailed,
            Message::DeleteRequest { .. } => Tag::DeleteRequest,
            Message::DeleteResult(_) => Tag::DeleteResult,
            Message::Notify { .. } => Tag::Notify,
        }
    }

    /// Syntactic sugar constructor
    pub fn notify<S: Into<String>>(text: S) -> Self {
        Message::Notify { text: text.into() }
    }

    /// Appends the payload encoding of this message (tag and fields, no frame header) to `dst`
    pub(crate) fn encode_payload(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        dst.put_u8(self.tag() as u8);
        match self {
            Message::ListRequest | Message::NotFound => (),
            Message::Handshake { username } => put_field(dst, "username", username.as_bytes())?,
            Message::HandshakeAck(outcome)
            | Message::UploadResult(outcome)
            | Message::DeleteResult(outcome) => put_outcome(dst, outcome)?,
            Message::UploadRequest { filename, content }
            | Message::DownloadResponse { filename, content } => {
                put_field(dst, "filename", filename.as_bytes())?;
                put_field(dst, "content", content)?;
            }
            Message::ListResponse(entries) => {
                let count = u32::try_from(entries.len()).map_err(|_| {
                    ProtocolError::FieldTooLong {
                        field: "entries",
                        len: entries.len(),
                    }
                })?;
                dst.put_u32(count);
                for entry in entries {
                    put_field(dst, "filename", entry.filename.as_bytes())?;
                    put_field(dst, "owner", entry.owner.as_bytes())?;
                }
            }
            Message::DownloadRequest { owner, filename } => {
                put_field(dst, "owner", owner.as_bytes())?;
                put_field(dst, "filename", filename.as_bytes())?;
            }
            Message::DownloadFailed { reason } => put_field(dst, "reason", reason.as_bytes())?,
            Message::DeleteRequest { filename } => put_field(dst, "filename", filename.as_bytes())?,
            Message::Notify { text } => put_field(dst, "text", text.as_bytes())?,
        }
        Ok(())
    }

    /// Decodes a complete payload (tag and fields, no frame header).
    ///
    /// The payload must contain exactly one message; leftover bytes are an error.
    pub(crate) fn decode_payload(payload: Bytes) -> Result<Self, ProtocolError> {
        let mut rd = FieldReader(payload);
        let raw_tag = rd.u8("tag")?;
        let tag = Tag::from_repr(raw_tag).ok_or(ProtocolError::UnknownTag(raw_tag))?;
        let msg = match tag {
            Tag::Handshake => Message::Handshake {
                username: rd.string("username")?,
            },
            Tag::HandshakeAck => Message::HandshakeAck(rd.outcome()?),
            Tag::UploadRequest => Message::UploadRequest {
                filename: rd.string("filename")?,
                content: rd.bytes("content")?,
            },
            Tag::UploadResult => Message::UploadResult(rd.outcome()?),
            Tag::ListRequest => Message::ListRequest,
            Tag::ListResponse => {
                let count = rd.u32("entry count")?;
                // Don't trust the count for preallocation; every entry needs at least two length prefixes.
                let plausible = rd.remaining() / (2 * FIELD_HEADER_SIZE);
                let mut entries = Vec::with_capacity(plausible.min(count as usize));
                for _ in 0..count {
                    let filename = rd.string("filename")?;
                    let owner = rd.string("owner")?;
                    entries.push(ListEntry { owner, filename });
                }
                Message::ListResponse(entries)
            }
            Tag::DownloadRequest => Message::DownloadRequest {
                owner: rd.string("owner")?,
                filename: rd.string("filename")?,
            },
            Tag::DownloadResponse => Message::DownloadResponse {
                filename: rd.string("filename")?,
                content: rd.bytes("content")?,
            },
            Tag::NotFound => Message::NotFound,
            Tag::DownloadFailed => Message::DownloadFailed {
                reason: rd.string("reason")?,
            },
            Tag::DeleteRequest => Message::DeleteRequest {
                filename: rd.string("filename")?,
            },
            Tag::DeleteResult => Message::DeleteResult(rd.outcome()?),
            Tag::Notify => Message::Notify {
                text: rd.string("text")?,
            },
        };
        rd.finish()?;
        Ok(msg)
    }
}

fn put_field(dst: &mut BytesMut, field: &'static str, data: &[u8]) -> Result<(), ProtocolError> {
    let len = u32::try_from(data.len()).map_err(|_| ProtocolError::FieldTooLong {
        field,
        len: data.len(),
    })?;
    dst.reserve(FIELD_HEADER_SIZE + data.len());
    dst.put_u32(len);
    dst.put_slice(data);
    Ok(())
}

fn put_outcome(dst: &mut BytesMut, outcome: &Outcome) -> Result<(), ProtocolError> {
    match outcome {
        Outcome::Ok => dst.put_u8(Status::Ok as u8),
        Outcome::Error { status, reason } => {
            let status = if *status == Status::Ok {
                Status::Failed
            } else {
                *status
            };
            dst.put_u8(status as u8);
            put_field(dst, "reason", reason.as_bytes())?;
        }
    }
    Ok(())
}

/// Cursor over a payload which knows how to pull out our field types
struct FieldReader(Bytes);

impl FieldReader {
    fn remaining(&self) -> usize {
        self.0.remaining()
    }

    fn need(&self, field: &'static str, needed: usize) -> Result<(), ProtocolError> {
        if self.0.remaining() < needed {
            return Err(ProtocolError::Truncated {
                field,
                needed,
                available: self.0.remaining(),
            });
        }
        Ok(())
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, ProtocolError> {
        self.need(field, 1)?;
        Ok(self.0.get_u8())
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, ProtocolError> {
        self.need(field, 4)?;
        Ok(self.0.get_u32())
    }

    fn bytes(&mut self, field: &'static str) -> Result<Bytes, ProtocolError> {
        let len = self.u32(field)? as usize;
        self.need(field, len)?;
        Ok(self.0.split_to(len))
    }

    fn string(&mut self, field: &'static str) -> Result<String, ProtocolError> {
        let raw = self.bytes(field)?;
        String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8 { field })
    }

    fn outcome(&mut self) -> Result<Outcome, ProtocolError> {
        let raw = self.u8("status")?;
        let status = Status::from_repr(raw).ok_or(ProtocolError::UnknownStatus(raw))?;
        if status == Status::Ok {
            return Ok(Outcome::Ok);
        }
        Ok(Outcome::Error {
            status,
            reason: self.string("reason")?,
        })
    }

    fn finish(self) -> Result<(), ProtocolError> {
        match self.0.remaining() {
            0 => Ok(()),
            n => Err(ProtocolError::TrailingBytes(n)),
        }
    }
}
