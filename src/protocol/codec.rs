//! Frame codec: turns [`Message`]s into framed bytes and back again
// (c) 2025 Ross Younger

use bytes::{Buf as _, BufMut as _, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::common::{ProtocolError, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE};
use super::Message;

/// Encodes a message as a complete frame (header and payload)
pub fn encode(msg: &Message, max_frame_size: u32) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(msg, &mut buf, max_frame_size)?;
    Ok(buf.freeze())
}

fn encode_into(msg: &Message, dst: &mut BytesMut, max_frame_size: u32) -> Result<(), ProtocolError> {
    let start = dst.len();
    // Placeholder header, patched once we know the payload length
    dst.put_u32(0);
    if let Err(e) = msg.encode_payload(dst) {
        dst.truncate(start);
        return Err(e);
    }
    let size = dst.len() - start - FRAME_HEADER_SIZE;
    let wire_size = match u32::try_from(size) {
        Ok(s) if s <= max_frame_size => s,
        _ => {
            dst.truncate(start);
            return Err(ProtocolError::FrameTooLarge {
                size,
                limit: max_frame_size,
            });
        }
    };
    dst[start..start + FRAME_HEADER_SIZE].copy_from_slice(&wire_size.to_be_bytes());
    Ok(())
}

/// Attempts to decode one frame from the front of `src`.
///
/// # Return
/// * `Ok(Some(message))` if a complete frame was present. Its bytes are consumed from `src`.
/// * `Ok(None)` if more data is needed. Nothing is consumed.
/// * `Err` if the frame is malformed. The connection should be abandoned.
pub fn decode(src: &mut BytesMut, max_frame_size: u32) -> Result<Option<Message>, ProtocolError> {
    if src.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }
    let mut header = [0u8; FRAME_HEADER_SIZE];
    header.copy_from_slice(&src[..FRAME_HEADER_SIZE]);
    let size = u32::from_be_bytes(header);
    if size == 0 {
        return Err(ProtocolError::EmptyFrame);
    }
    if size > max_frame_size {
        return Err(ProtocolError::FrameTooLarge {
            size: size as usize,
            limit: max_frame_size,
        });
    }
    let total = FRAME_HEADER_SIZE + size as usize;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }
    src.advance(FRAME_HEADER_SIZE);
    let payload = src.split_to(size as usize).freeze();
    Message::decode_payload(payload).map(Some)
}

/// [`tokio_util::codec`] adapter for the wire protocol.
///
/// Use with `FramedRead` / `FramedWrite`. Reading through a `FramedRead` is cancellation safe,
/// which [`tokio::select!`]-based shutdown relies on.
#[derive(Debug, Clone, Copy)]
pub struct WireCodec {
    max_frame_size: u32,
}

impl WireCodec {
    /// Constructor
    #[must_use]
    pub fn new(max_frame_size: u32) -> Self {
        Self { max_frame_size }
    }

    /// The largest payload this codec will accept or produce
    #[must_use]
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for WireCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, ProtocolError> {
        decode(src, self.max_frame_size)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Message>, ProtocolError> {
        match self.decode(buf)? {
            Some(msg) => Ok(Some(msg)),
            None if buf.is_empty() => Ok(None),
            None => Err(ProtocolError::UnexpectedEof(buf.len())),
        }
    }
}

impl Encoder<Message> for WireCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        encode_into(&item, dst, self.max_frame_size)
    }
}

impl Encoder<&Message> for WireCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &Message, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        encode_into(item, dst, self.max_frame_size)
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};
    use futures_util::{SinkExt as _, StreamExt as _};
    use pretty_assertions::assert_eq;
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::{decode, encode, WireCodec};
    use crate::protocol::{Message, Outcome, ProtocolError};

    const LIMIT: u32 = 1024;

    #[test]
    fn frame_layout() {
        let f = encode(&Message::ListRequest, LIMIT).unwrap();
        assert_eq!(&f[..], b"\x00\x00\x00\x01\x20");
    }

    #[test]
    fn needs_more_data() {
        let frame = encode(
            &Message::Notify {
                text: "hello".into(),
            },
            LIMIT,
        )
        .unwrap();
        for cut in 0..frame.len() {
            let mut partial = BytesMut::from(&frame[..cut]);
            assert!(decode(&mut partial, LIMIT).unwrap().is_none(), "cut at {cut}");
            assert_eq!(partial.len(), cut, "partial decode must not consume");
        }
        let mut whole = BytesMut::from(&frame[..]);
        assert_eq!(
            decode(&mut whole, LIMIT).unwrap(),
            Some(Message::notify("hello"))
        );
        assert!(whole.is_empty());
    }

    #[test]
    fn back_to_back_frames() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode(&Message::ListRequest, LIMIT).unwrap());
        buf.extend_from_slice(&encode(&Message::HandshakeAck(Outcome::Ok), LIMIT).unwrap());
        assert_eq!(decode(&mut buf, LIMIT).unwrap(), Some(Message::ListRequest));
        assert_eq!(
            decode(&mut buf, LIMIT).unwrap(),
            Some(Message::HandshakeAck(Outcome::Ok))
        );
        assert_eq!(decode(&mut buf, LIMIT).unwrap(), None);
    }

    #[test]
    fn oversized_header_rejected() {
        // Edge cases up to 2^32, to trap any signedness issues
        for size in [LIMIT + 1, 1u32 << 31, u32::MAX] {
            let mut buf = BytesMut::from(&size.to_be_bytes()[..]);
            let e = decode(&mut buf, LIMIT).unwrap_err();
            assert!(matches!(e, ProtocolError::FrameTooLarge { .. }), "{size}");
        }
    }

    #[test]
    fn zero_length_rejected() {
        let mut buf = BytesMut::from(&[0u8, 0, 0, 0][..]);
        assert!(matches!(
            decode(&mut buf, LIMIT).unwrap_err(),
            ProtocolError::EmptyFrame
        ));
    }

    #[test]
    fn oversized_message_not_encoded() {
        let msg = Message::UploadRequest {
            filename: "big".into(),
            content: Bytes::from(vec![0u8; LIMIT as usize]),
        };
        let e = encode(&msg, LIMIT).unwrap_err();
        assert!(matches!(e, ProtocolError::FrameTooLarge { limit: LIMIT, .. }));

        // and the codec leaves the destination buffer as it found it
        let mut dst = BytesMut::from(&b"prefix"[..]);
        let mut codec = WireCodec::new(LIMIT);
        assert!(tokio_util::codec::Encoder::encode(&mut codec, &msg, &mut dst).is_err());
        assert_eq!(&dst[..], b"prefix");
    }

    #[tokio::test]
    async fn framed_stream_with_split_reads() {
        let msg = Message::UploadRequest {
            filename: "notes.txt".into(),
            content: Bytes::from_static(b"a:b:c"),
        };
        let frame = encode(&msg, LIMIT).unwrap();
        let mock = tokio_test::io::Builder::new()
            .read(&frame[..3])
            .read(&frame[3..9])
            .read(&frame[9..])
            .build();
        let mut reader = FramedRead::new(mock, WireCodec::new(LIMIT));
        assert_eq!(reader.next().await.unwrap().unwrap(), msg);
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn truncated_stream_is_an_error() {
        let frame = encode(&Message::notify("cut short"), LIMIT).unwrap();
        let mock = tokio_test::io::Builder::new()
            .read(&frame[..frame.len() - 2])
            .build();
        let mut reader = FramedRead::new(mock, WireCodec::new(LIMIT));
        let e = reader.next().await.unwrap().unwrap_err();
        assert!(matches!(e, ProtocolError::UnexpectedEof(_)));
    }

    #[tokio::test]
    async fn framed_write() {
        let expected = encode(&Message::NotFound, LIMIT).unwrap();
        let mock = tokio_test::io::Builder::new().write(&expected).build();
        let mut writer = FramedWrite::new(mock, WireCodec::new(LIMIT));
        writer.send(Message::NotFound).await.unwrap();
    }
}
