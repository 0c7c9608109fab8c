//! Wire framing: a big-endian `u32` byte length followed by the event
//! envelope as JSON. The decoder is incremental, so partial TCP reads are
//! fine; a frame that fails to parse is consumed whole and reported, leaving
//! the stream usable.

use barkwatch_events::Event;
use thiserror::Error;

/// Upper bound on a single frame. A one-second 48 kHz audio batch encodes to
/// well under 2 MiB of JSON; anything near this limit is a corrupt length
/// prefix, not data.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame length {len} exceeds limit of {MAX_FRAME_BYTES} bytes")]
    Oversized { len: usize },
    #[error("malformed frame payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub fn encode_frame(event: &Event) -> Result<Vec<u8>, CodecError> {
    let payload = serde_json::to_vec(event)?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(CodecError::Oversized { len: payload.len() });
    }
    let mut frame = Vec::with_capacity(LEN_PREFIX + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Reassembles frames from an arbitrary byte stream.
#[derive(Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pops the next complete frame, if one has fully arrived. A malformed
    /// payload is dropped from the buffer before the error returns, so the
    /// caller can log and keep decoding.
    pub fn next_frame(&mut self) -> Result<Option<Event>, CodecError> {
        if self.buf.len() < LEN_PREFIX {
            return Ok(None);
        }
        let mut len_bytes = [0u8; LEN_PREFIX];
        len_bytes.copy_from_slice(&self.buf[..LEN_PREFIX]);
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > MAX_FRAME_BYTES {
            // The stream is unframeable from here on; the connection layer
            // drops the peer on this error.
            return Err(CodecError::Oversized { len });
        }
        if self.buf.len() < LEN_PREFIX + len {
            return Ok(None);
        }

        let payload: Vec<u8> = self.buf.drain(..LEN_PREFIX + len).skip(LEN_PREFIX).collect();
        let event = serde_json::from_slice(&payload)?;
        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barkwatch_events::{ClientAnnounce, ClientHeartbeat};

    fn announce(addr: &str) -> Event {
        Event::ClientAnnounce(ClientAnnounce {
            local_addr: addr.to_string(),
        })
    }

    #[test]
    fn encode_then_decode_yields_the_event() {
        let event = announce("192.168.0.5:41000");
        let frame = encode_frame(&event).unwrap();

        let mut decoder = FrameDecoder::new();
        decoder.extend(&frame);
        assert_eq!(decoder.next_frame().unwrap(), Some(event));
        assert_eq!(decoder.next_frame().unwrap(), None);
    }

    #[test]
    fn partial_bytes_decode_to_nothing_until_complete() {
        let frame = encode_frame(&announce("a")).unwrap();
        let mut decoder = FrameDecoder::new();

        for chunk in frame.chunks(3) {
            decoder.extend(chunk);
        }
        // All bytes are in; the frame pops.
        assert!(decoder.next_frame().unwrap().is_some());
    }

    #[test]
    fn split_delivery_never_yields_early() {
        let frame = encode_frame(&announce("a")).unwrap();
        let (head, tail) = frame.split_at(frame.len() - 1);

        let mut decoder = FrameDecoder::new();
        decoder.extend(head);
        assert_eq!(decoder.next_frame().unwrap(), None);
        decoder.extend(tail);
        assert!(decoder.next_frame().unwrap().is_some());
    }

    #[test]
    fn back_to_back_frames_pop_in_order() {
        let mut decoder = FrameDecoder::new();
        let first = announce("first");
        let second = Event::ClientHeartbeat(ClientHeartbeat {});
        decoder.extend(&encode_frame(&first).unwrap());
        decoder.extend(&encode_frame(&second).unwrap());

        assert_eq!(decoder.next_frame().unwrap(), Some(first));
        assert_eq!(decoder.next_frame().unwrap(), Some(second));
        assert_eq!(decoder.next_frame().unwrap(), None);
    }

    #[test]
    fn malformed_payload_is_consumed_and_decoding_continues() {
        let garbage = b"not json at all";
        let mut decoder = FrameDecoder::new();
        decoder.extend(&(garbage.len() as u32).to_be_bytes());
        decoder.extend(garbage);
        decoder.extend(&encode_frame(&announce("after")).unwrap());

        assert!(matches!(
            decoder.next_frame(),
            Err(CodecError::Malformed(_))
        ));
        assert_eq!(decoder.next_frame().unwrap(), Some(announce("after")));
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&(u32::MAX).to_be_bytes());
        decoder.extend(&[0u8; 16]);
        assert!(matches!(
            decoder.next_frame(),
            Err(CodecError::Oversized { .. })
        ));
    }
}
