//! # 📖 The fileshed protocol
// (c) 2025 Ross Younger
//!
//! Clients talk to the server over a single long-lived TCP connection.
//!
//! * Client ➡️ Server: [`Handshake`](Message::Handshake), naming the user
//! * S ➡️ C: [`HandshakeAck`](Message::HandshakeAck). If it is not OK, the server closes the connection.
//!   Only one connection may be live for any given username.
//! * Then, any number of times:
//!   * C ➡️ S: one request
//!   * S ➡️ C: exactly one reply to that request
//!
//! The client MUST NOT send a request until it has received the reply to the previous one.
//!
//! At any time after the handshake the server may also send a [`Notify`](Message::Notify),
//! for example to tell the owner of a file that somebody downloaded it, or to announce shutdown.
//! Clients must be prepared to receive these interleaved with replies.
//!
//! | Request | Reply |
//! |---------|-------|
//! | [`UploadRequest`](Message::UploadRequest) | [`UploadResult`](Message::UploadResult) |
//! | [`ListRequest`](Message::ListRequest) | [`ListResponse`](Message::ListResponse) |
//! | [`DownloadRequest`](Message::DownloadRequest) | [`DownloadResponse`](Message::DownloadResponse), [`NotFound`](Message::NotFound) or [`DownloadFailed`](Message::DownloadFailed) |
//! | [`DeleteRequest`](Message::DeleteRequest) | [`DeleteResult`](Message::DeleteResult) |
//!
//! Any malformed frame, or any message that makes no sense at that point in the conversation,
//! is a [`ProtocolError`] and the connection is closed.
//!
//! See [common] for the on-wire framing.

pub mod codec;
pub mod common;
mod message;

pub use codec::WireCodec;
pub use common::{ProtocolError, ReceivingStream, SendReceivePair, SendingStream};
pub use message::{
    ListEntry, Message, Outcome, Status, Tag, NOT_FOUND_OR_NOT_OWNER, SHUTTING_DOWN,
    USERNAME_IN_USE,
};

#[cfg(test)]
pub(crate) mod test_helpers;
