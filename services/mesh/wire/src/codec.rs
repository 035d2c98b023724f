//! Fixed-layout binary encoding of [`ChatMessage`].
//!
//! The codec is pure and total: it never touches directory or chat state and
//! it does not append or verify the checksum. Framing with the checksum is
//! layered on top by the router.

use crate::error::CodecError;
use crate::message::{
    ChatMessage, DisplayName, MessageKind, Payload, MAX_PAYLOAD_SIZE, NAME_CAPACITY,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the fixed header: type, timestamp, name, address, payload length
pub const HEADER_SIZE: usize = 1 + 8 + NAME_CAPACITY + 2 + 1;

/// Largest encoded body (header plus maximum payload)
pub const MAX_ENCODED_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE;

/// Encoded size of a message
pub fn encoded_len(msg: &ChatMessage) -> usize {
    HEADER_SIZE + msg.payload.len()
}

/// Encode a message into `buf`
pub fn encode_into(msg: &ChatMessage, buf: &mut BytesMut) -> Result<(), CodecError> {
    let payload_len = msg.payload.len();
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(CodecError::PayloadTooLarge(payload_len));
    }

    buf.reserve(HEADER_SIZE + payload_len);
    buf.put_u8(msg.kind as u8);
    buf.put_u64_le(msg.timestamp);

    let name = msg.sender_name.as_bytes();
    let name = &name[..name.len().min(NAME_CAPACITY)];
    buf.put_slice(name);
    buf.put_bytes(0, NAME_CAPACITY - name.len());

    buf.put_u16(msg.sender_address);
    buf.put_u8(payload_len as u8);
    buf.put_slice(&msg.payload);

    Ok(())
}

/// Encode a message to a fresh buffer
pub fn encode(msg: &ChatMessage) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::with_capacity(encoded_len(msg));
    encode_into(msg, &mut buf)?;
    Ok(buf.freeze())
}

/// Decode exactly one message body
pub fn decode(input: &[u8]) -> Result<ChatMessage, CodecError> {
    if input.len() < HEADER_SIZE {
        return Err(CodecError::Truncated {
            needed: HEADER_SIZE,
            available: input.len(),
        });
    }

    let mut buf = input;
    let kind = MessageKind::try_from(buf.get_u8())?;
    let timestamp = buf.get_u64_le();

    let sender_name = DisplayName::from_wire(&buf[..NAME_CAPACITY]);
    buf.advance(NAME_CAPACITY);

    let sender_address = buf.get_u16();
    let payload_len = buf.get_u8() as usize;

    if buf.remaining() < payload_len {
        return Err(CodecError::Truncated {
            needed: HEADER_SIZE + payload_len,
            available: input.len(),
        });
    }
    if buf.remaining() > payload_len {
        return Err(CodecError::TrailingBytes(buf.remaining() - payload_len));
    }

    let payload = Payload::from_slice(&buf[..payload_len]);

    Ok(ChatMessage {
        kind,
        timestamp,
        sender_name,
        sender_address,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice_says(text: &str) -> ChatMessage {
        ChatMessage::text(0x0102030405060708, DisplayName::new("Alice"), 0x0001, text)
    }

    #[test]
    fn test_layout() {
        let bytes = encode(&alice_says("hi")).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 2);
        assert_eq!(bytes[0], 1);
        // timestamp is little-endian
        assert_eq!(&bytes[1..9], &[8, 7, 6, 5, 4, 3, 2, 1]);
        // name is zero padded
        assert_eq!(&bytes[9..19], b"Alice\0\0\0\0\0");
        // address is big-endian
        assert_eq!(&bytes[19..21], &[0x00, 0x01]);
        assert_eq!(bytes[21], 2);
        assert_eq!(&bytes[22..], b"hi");
    }

    #[test]
    fn test_round_trip_text_and_broadcast() {
        let text = alice_says("hello over the mesh");
        assert_eq!(decode(&encode(&text).unwrap()).unwrap(), text);

        let announce = ChatMessage::broadcast(42, DisplayName::new("Carol"), 0x0003);
        let bytes = encode(&announce).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(decode(&bytes).unwrap(), announce);
    }

    #[test]
    fn test_round_trip_full_payload_and_full_name() {
        let msg = ChatMessage {
            kind: MessageKind::Text,
            timestamp: u64::MAX,
            sender_name: DisplayName::new("ABCDEFGHIJ"),
            sender_address: 0xFFFE,
            payload: Payload::from_slice(&[0xAB; MAX_PAYLOAD_SIZE]),
        };
        let bytes = encode(&msg).unwrap();
        assert_eq!(bytes.len(), MAX_ENCODED_SIZE);
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let mut msg = alice_says("");
        msg.payload = Payload::from_slice(&[0u8; MAX_PAYLOAD_SIZE + 1]);
        assert_eq!(
            encode(&msg).unwrap_err(),
            CodecError::PayloadTooLarge(MAX_PAYLOAD_SIZE + 1)
        );
    }

    #[test]
    fn test_decode_short_header() {
        let err = decode(&[1, 2]).unwrap_err();
        assert_eq!(
            err,
            CodecError::Truncated {
                needed: HEADER_SIZE,
                available: 2
            }
        );
        assert!(err.is_framing());
    }

    #[test]
    fn test_decode_payload_past_end() {
        let bytes = encode(&alice_says("hello")).unwrap();
        let cut = &bytes[..bytes.len() - 1];
        assert!(matches!(decode(cut), Err(CodecError::Truncated { .. })));

        let mut lying = bytes.to_vec();
        lying[HEADER_SIZE - 1] = 200;
        assert!(matches!(decode(&lying), Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut bytes = encode(&alice_says("hi")).unwrap().to_vec();
        bytes.push(0);
        assert_eq!(decode(&bytes).unwrap_err(), CodecError::TrailingBytes(1));
    }

    #[test]
    fn test_decode_unknown_kind() {
        let mut bytes = encode(&alice_says("hi")).unwrap().to_vec();
        bytes[0] = 9;
        assert_eq!(decode(&bytes).unwrap_err(), CodecError::UnknownKind(9));
    }

    #[test]
    fn test_decode_unterminated_name() {
        let mut bytes = encode(&alice_says("hi")).unwrap().to_vec();
        bytes[9..19].copy_from_slice(b"XXXXXXXXXX");
        let msg = decode(&bytes).unwrap();
        assert_eq!(msg.sender_name.as_str(), "XXXXXXXXXX");
        assert_eq!(msg.text_lossy(), "hi");
    }
}
