//! Node framing: 4-byte little-endian body length, then the bincode-encoded message.

use crate::protocol::Message;

pub const LEN_SIZE: usize = 4;
/// Upper bound for one frame body. Payloads are capped well below this.
pub const MAX_FRAME_LEN: u32 = 1024 * 1024; // 1 MiB

/// Encode a message into a single frame.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, FrameEncodeError> {
    let body = bincode::serialize(msg)?;
    let len = u32::try_from(body.len()).map_err(|_| FrameEncodeError::TooLarge)?;
    if len > MAX_FRAME_LEN {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut out = Vec::with_capacity(LEN_SIZE + body.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame too large")]
    TooLarge,
}

/// Body length announced by a frame header. Rejects oversized frames before any body is read.
pub fn body_len(header: [u8; LEN_SIZE]) -> Result<usize, FrameDecodeError> {
    let len = u32::from_le_bytes(header);
    if len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge);
    }
    Ok(len as usize)
}

/// Decode a frame body (header already stripped).
pub fn decode_body(body: &[u8]) -> Result<Message, FrameDecodeError> {
    Ok(bincode::deserialize(body)?)
}

/// Decode one frame from the front of `bytes`; returns the message and bytes consumed.
/// `NeedMore` means the buffer holds only part of a frame.
pub fn decode_frame(bytes: &[u8]) -> Result<(Message, usize), FrameDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    let len = body_len([bytes[0], bytes[1], bytes[2], bytes[3]])?;
    let end = LEN_SIZE + len;
    if bytes.len() < end {
        return Err(FrameDecodeError::NeedMore);
    }
    Ok((decode_body(&bytes[LEN_SIZE..end])?, end))
}

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large")]
    TooLarge,
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;
    use crate::protocol::PROTOCOL_VERSION;

    fn beacon() -> Message {
        Message::Beacon {
            protocol_version: PROTOCOL_VERSION,
            node_id: NodeId::new("node-a"),
            display_name: "Pixel Watch".into(),
            listen_port: 45689,
        }
    }

    #[test]
    fn frame_roundtrip() {
        let msg = Message::ChannelMessage {
            source: NodeId::new("phone"),
            channel: "/MessageChannel".into(),
            payload: br#"{"x":{"int64":1}}"#.to_vec(),
        };
        let frame = encode_frame(&msg).unwrap();
        let (decoded, n) = decode_frame(&frame).unwrap();
        assert_eq!(n, frame.len());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn partial_read_need_more() {
        let frame = encode_frame(&beacon()).unwrap();
        assert!(matches!(
            decode_frame(&frame[..2]),
            Err(FrameDecodeError::NeedMore)
        ));
        assert!(matches!(
            decode_frame(&frame[..frame.len() - 1]),
            Err(FrameDecodeError::NeedMore)
        ));
    }

    #[test]
    fn back_to_back_frames() {
        let a = beacon();
        let b = Message::Leave {
            node_id: NodeId::new("node-a"),
        };
        let mut buf = encode_frame(&a).unwrap();
        let first = buf.len();
        buf.extend_from_slice(&encode_frame(&b).unwrap());
        let (m1, n1) = decode_frame(&buf).unwrap();
        assert_eq!(n1, first);
        let (m2, _) = decode_frame(&buf[n1..]).unwrap();
        assert_eq!(m1, a);
        assert_eq!(m2, b);
    }

    #[test]
    fn oversized_header_rejected() {
        let header = (MAX_FRAME_LEN + 1).to_le_bytes();
        assert!(matches!(body_len(header), Err(FrameDecodeError::TooLarge)));
    }
}
