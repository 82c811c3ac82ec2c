use crate::{Message, MessageType, ProtocolError, Result, MAX_MESSAGE_SIZE};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Length prefix size in bytes
const LENGTH_PREFIX: usize = 4;

/// Codec for broker messages with length-prefixed framing
///
/// Frame format: [4-byte length (big-endian)] [1-byte message type] [bincode body]
/// The length covers the type byte and the body.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageCodec;

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let mut length_bytes = [0u8; LENGTH_PREFIX];
        length_bytes.copy_from_slice(&src[..LENGTH_PREFIX]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length == 0 {
            return Err(ProtocolError::EmptyFrame);
        }
        if length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(length));
        }

        let frame_len = LENGTH_PREFIX + length;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX);
        let type_byte = src.get_u8();
        let message_type =
            MessageType::from_u8(type_byte).ok_or(ProtocolError::InvalidMessageType(type_byte))?;
        let body = src.split_to(length - 1);

        Message::decode_body(message_type, &body).map(Some)
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        let body = item.encode_body()?;

        let length = 1 + body.len();
        if length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(length));
        }

        dst.reserve(LENGTH_PREFIX + length);
        dst.put_u32(length as u32);
        dst.put_u8(item.message_type().as_u8());
        dst.put_slice(&body);

        Ok(())
    }
}
