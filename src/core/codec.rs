//! Tokio codec framing [`Command`]s over a byte stream.
//!
//! Wire format:
//! ```text
//! [Magic(4)] [Length(4, big-endian)] [Content(N, bincode Command)]
//! ```
//!
//! The decoder peeks at the first four buffered bytes without consuming them.
//! Anything that does not start with the magic constant yields nothing, so
//! this codec can share a pipeline with decoders for other protocols; the
//! buffer is only surrendered once a complete frame is present. To keep that
//! contract from becoming a memory hole, a buffer that grows past
//! [`MAX_FRAME_SIZE`] without ever matching the magic is treated as a fatal
//! decode error.

use crate::config::{MAGIC_BYTES, MAX_FRAME_SIZE};
use crate::error::{constants, RemotingError};
use crate::protocol::command::Command;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Bytes of framing overhead ahead of the content section
const HEADER_LEN: usize = 8;

/// Framing codec for [`Command`]s. Stateless and freely cloneable.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandCodec;

impl Decoder for CommandCodec {
    type Item = Command;
    type Error = RemotingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Command>, RemotingError> {
        if src.len() < 4 {
            return Ok(None);
        }

        if src[..4] != MAGIC_BYTES {
            // Not ours; leave the buffer for other decoders in the pipeline,
            // but refuse to hoard unbounded foreign bytes.
            if src.len() > MAX_FRAME_SIZE {
                return Err(RemotingError::Decode(
                    constants::ERR_FOREIGN_TRAFFIC.to_string(),
                ));
            }
            return Ok(None);
        }

        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
        if length > MAX_FRAME_SIZE {
            return Err(RemotingError::Decode(format!(
                "{}: {length} bytes",
                constants::ERR_OVERSIZED_FRAME
            )));
        }

        if src.len() < HEADER_LEN + length {
            src.reserve(HEADER_LEN + length - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let content = src.split_to(length);
        let command = bincode::deserialize(&content)
            .map_err(|e| RemotingError::Decode(format!("malformed frame content: {e}")))?;

        Ok(Some(command))
    }
}

impl Encoder<Command> for CommandCodec {
    type Error = RemotingError;

    fn encode(&mut self, command: Command, dst: &mut BytesMut) -> Result<(), RemotingError> {
        let content = bincode::serialize(&command)?;
        if content.len() > MAX_FRAME_SIZE {
            return Err(RemotingError::Decode(format!(
                "{}: {} bytes",
                constants::ERR_OVERSIZED_FRAME,
                content.len()
            )));
        }

        dst.reserve(HEADER_LEN + content.len());
        dst.put_slice(&MAGIC_BYTES);
        dst.put_u32(content.len() as u32);
        dst.put_slice(&content);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::protocol::command::system_code;

    fn encode(command: Command) -> BytesMut {
        let mut buf = BytesMut::new();
        CommandCodec.encode(command, &mut buf).unwrap();
        buf
    }

    #[test]
    fn roundtrip() {
        let mut request = Command::request(7, Some(b"payload".to_vec()));
        request.put_ext_field("trace_id", "t-1");

        let mut buf = encode(request.clone());
        let decoded = CommandCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, request);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_yields_nothing() {
        let full = encode(Command::request(1, Some(vec![0xAB; 64])));

        for cut in [0, 1, 3, 4, 7, 8, full.len() - 1] {
            let mut partial = BytesMut::from(&full[..cut]);
            assert!(CommandCodec.decode(&mut partial).unwrap().is_none());
            // Buffer must be retained untouched for the next read.
            assert_eq!(&partial[..], &full[..cut]);
        }
    }

    #[test]
    fn foreign_magic_yields_nothing() {
        let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\n"[..]);
        assert!(CommandCodec.decode(&mut buf).unwrap().is_none());
        assert_eq!(&buf[..], b"GET / HTTP/1.1\r\n");
    }

    #[test]
    fn foreign_traffic_is_bounded() {
        let mut buf = BytesMut::new();
        buf.resize(MAX_FRAME_SIZE + 1, 0x00);
        assert!(matches!(
            CommandCodec.decode(&mut buf),
            Err(RemotingError::Decode(_))
        ));
    }

    #[test]
    fn oversized_declared_length_is_fatal() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC_BYTES);
        buf.put_u32(MAX_FRAME_SIZE as u32 + 1);
        assert!(matches!(
            CommandCodec.decode(&mut buf),
            Err(RemotingError::Decode(_))
        ));
    }

    #[test]
    fn two_frames_in_one_buffer() {
        let first = Command::request(1, None);
        let second = Command::failure(first.req_id, system_code::SYSTEM_ERROR, "boom");

        let mut buf = encode(first.clone());
        buf.extend_from_slice(&encode(second.clone()));

        assert_eq!(CommandCodec.decode(&mut buf).unwrap().unwrap(), first);
        assert_eq!(CommandCodec.decode(&mut buf).unwrap().unwrap(), second);
        assert!(CommandCodec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn absent_and_empty_body_are_distinct() {
        let absent = Command::request(2, None);
        let empty = Command::request(2, Some(Vec::new()));

        let mut buf = encode(absent.clone());
        let decoded_absent = CommandCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded_absent.body, None);

        let mut buf = encode(empty.clone());
        let decoded_empty = CommandCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded_empty.body, Some(Vec::new()));
    }
}
