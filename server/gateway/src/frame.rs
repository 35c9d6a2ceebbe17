use anyhow::{anyhow, Result};
use bytes::{Buf, BufMut, BytesMut};

/// Header layout, big-endian on the wire: `length:i32, request_id:i64,
/// type:i32, sequence:i32, verify_code:u64`. Field order is taken from the
/// original implementation's `DataPackage` struct (spec leaves exact field
/// order implementation-defined).
pub const HEADER_LEN: usize = 4 + 8 + 4 + 4 + 8;

/// Refuse to buffer a frame whose declared length exceeds this, so a
/// corrupted or hostile length prefix can't exhaust memory before the
/// header is even fully parsed.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameType {
    Unknown = 0,
    Text = 1,
    Binary = 2,
    FileStream = 3,
    HeartBeat = 4,
}

impl FrameType {
    fn from_i32(v: i32) -> Self {
        match v {
            1 => FrameType::Text,
            2 => FrameType::Binary,
            3 => FrameType::FileStream,
            4 => FrameType::HeartBeat,
            _ => FrameType::Unknown,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Frame {
    pub request_id: i64,
    pub frame_type: FrameType,
    pub sequence: i32,
    pub payload: BytesMut,
}

impl Frame {
    pub fn new(request_id: i64, frame_type: FrameType, payload: impl Into<BytesMut>) -> Self {
        Self {
            request_id,
            frame_type,
            sequence: 0,
            payload: payload.into(),
        }
    }

    pub fn text(request_id: i64, payload: impl Into<BytesMut>) -> Self {
        Self::new(request_id, FrameType::Text, payload)
    }

    pub fn heartbeat(request_id: i64) -> Self {
        Self::new(request_id, FrameType::HeartBeat, BytesMut::new())
    }
}

/// FNV-1a over the payload bytes. Not cryptographic — the original's
/// `std::hash<string_view>` is implementation-defined and cannot be
/// reproduced bit-for-bit across languages, so this picks a fixed algorithm
/// both ends can agree on instead.
pub fn verify_code(payload: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET;
    for &b in payload {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

pub fn encode(frame: &Frame) -> BytesMut {
    let total_len = HEADER_LEN + frame.payload.len();
    let mut buf = BytesMut::with_capacity(total_len);
    buf.put_i32(total_len as i32);
    buf.put_i64(frame.request_id);
    buf.put_i32(frame.frame_type as i32);
    buf.put_i32(frame.sequence);
    buf.put_u64(verify_code(&frame.payload));
    buf.extend_from_slice(&frame.payload);
    buf
}

/// Attempts to decode one frame from the front of `buf`. Returns `Ok(None)`
/// if not enough bytes have arrived yet (the caller should read more from
/// the socket and retry) without consuming anything, matching the
/// `can_read()`/`read()` accumulation contract this module is built around.
pub fn try_decode(buf: &mut BytesMut) -> Result<Option<Frame>> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let declared_len = i32::from_be_bytes(buf[0..4].try_into().unwrap());
    if declared_len < HEADER_LEN as i32 {
        return Err(anyhow!("frame length {declared_len} smaller than header"));
    }
    let declared_len = declared_len as usize;
    if declared_len > MAX_FRAME_LEN {
        return Err(anyhow!("frame length {declared_len} exceeds maximum {MAX_FRAME_LEN}"));
    }
    if buf.len() < declared_len {
        return Ok(None);
    }

    let mut header = buf.split_to(declared_len);
    header.advance(4); // length already consumed above
    let request_id = header.get_i64();
    let frame_type = FrameType::from_i32(header.get_i32());
    let sequence = header.get_i32();
    let expected_code = header.get_u64();
    let payload = header;

    let actual_code = verify_code(&payload);
    if actual_code != expected_code {
        return Err(anyhow!(
            "verify code mismatch: expected {expected_code}, got {actual_code}"
        ));
    }

    Ok(Some(Frame {
        request_id,
        frame_type,
        sequence,
        payload,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_round_trips() {
        let frame = Frame::text(42, BytesMut::from(&b"hello"[..]));
        let mut wire = encode(&frame);
        let decoded = try_decode(&mut wire).unwrap().expect("full frame available");
        assert_eq!(decoded.request_id, 42);
        assert_eq!(decoded.frame_type, FrameType::Text);
        assert_eq!(&decoded.payload[..], b"hello");
        assert!(wire.is_empty());
    }

    #[test]
    fn partial_frame_returns_none_without_consuming() {
        let frame = Frame::text(1, BytesMut::from(&b"hello world"[..]));
        let wire = encode(&frame);
        let mut partial = BytesMut::from(&wire[..wire.len() - 1]);
        let before_len = partial.len();
        assert!(try_decode(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), before_len);
    }

    #[test]
    fn tampered_payload_fails_verify_code() {
        let frame = Frame::text(1, BytesMut::from(&b"hello"[..]));
        let mut wire = encode(&frame);
        let last = wire.len() - 1;
        wire[last] ^= 0xff;
        assert!(try_decode(&mut wire).is_err());
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_i32((MAX_FRAME_LEN + 1) as i32);
        buf.put_bytes(0, HEADER_LEN - 4);
        assert!(try_decode(&mut buf).is_err());
    }

    #[test]
    fn two_queued_frames_decode_independently() {
        let a = encode(&Frame::text(1, BytesMut::from(&b"a"[..])));
        let b = encode(&Frame::text(2, BytesMut::from(&b"bb"[..])));
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&a);
        buf.extend_from_slice(&b);

        let first = try_decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.request_id, 1);
        let second = try_decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.request_id, 2);
        assert!(buf.is_empty());
    }
}
