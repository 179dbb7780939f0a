//! Frame splitting for the game server byte stream
//!
//! The game server writes pretty-printed JSON with no delimiter between
//! frames, and TCP is free to split or coalesce those writes. The codec
//! yields one [`InboundFrame`] per complete JSON object and keeps partial
//! objects buffered until the rest arrives.

use std::io;

use bytes::{Buf, BytesMut};
use serde_json::Value;
use tokio_util::codec::Decoder;

use crate::protocol::InboundFrame;

/// Default upper bound for a single buffered frame (1 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Decoder turning the raw socket stream into JSON frames
///
/// Every frame the game server sends is a JSON object, so only bytes
/// starting with `{` are parsed. Anything else between frames is reported
/// as malformed and skipped. An oversized frame is skipped through to its
/// closing brace, so no piece of it is ever mistaken for a new frame.
#[derive(Debug, Clone)]
pub struct JsonFrameCodec {
    max_frame_bytes: usize,
    skipping: Option<FrameSkip>,
}

impl Default for JsonFrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl JsonFrameCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            skipping: None,
        }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    /// Drop an oversized frame. Its prefix parsed cleanly, so bracket depth
    /// is reliable and the rest of it is swallowed by later calls.
    fn drop_oversized(&mut self, src: &mut BytesMut) -> InboundFrame {
        let mut skip = FrameSkip::default();
        let discarded = match skip.scan(&src[..]) {
            Some(end) => end,
            None => {
                skip.scanned = 0;
                self.skipping = Some(skip);
                src.len()
            }
        };
        src.advance(discarded);
        InboundFrame::Malformed {
            reason: format!("frame exceeds {} bytes", self.max_frame_bytes),
            discarded,
        }
    }

    /// Drop a frame that failed to parse: through its closing brace when
    /// that is already buffered, otherwise up to the next `{`.
    fn drop_invalid(src: &mut BytesMut, reason: String) -> InboundFrame {
        let discarded = FrameSkip::default().scan(&src[..]).unwrap_or_else(|| {
            src[1..]
                .iter()
                .position(|&b| b == b'{')
                .map_or(src.len(), |i| i + 1)
        });
        src.advance(discarded);
        InboundFrame::Malformed { reason, discarded }
    }

    /// Consume the tail of a dropped frame. Returns false while the tail is
    /// still incomplete.
    fn finish_skip(&mut self, src: &mut BytesMut) -> bool {
        let Some(mut skip) = self.skipping.take() else {
            return true;
        };
        match skip.scan(&src[..]) {
            Some(end) => {
                src.advance(end);
                true
            }
            // Unbalanced input. Give up and resync on the next object.
            None if skip.scanned > self.max_frame_bytes => true,
            None => {
                src.clear();
                self.skipping = Some(skip);
                false
            }
        }
    }
}

impl Decoder for JsonFrameCodec {
    type Item = InboundFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<InboundFrame>, io::Error> {
        if !self.finish_skip(src) {
            return Ok(None);
        }

        let start = src.iter().position(|&b| b == b'{').unwrap_or(src.len());
        if start > 0 {
            let stray = !src[..start].iter().all(u8::is_ascii_whitespace);
            src.advance(start);
            if stray {
                return Ok(Some(InboundFrame::Malformed {
                    reason: "bytes outside a JSON object".to_string(),
                    discarded: start,
                }));
            }
        }
        if src.is_empty() {
            return Ok(None);
        }

        let (next, consumed) = {
            let mut stream = serde_json::Deserializer::from_slice(&src[..]).into_iter::<Value>();
            let next = stream.next();
            (next, stream.byte_offset())
        };

        match next {
            Some(Ok(value)) => {
                src.advance(consumed);
                Ok(Some(InboundFrame::State(value)))
            }
            Some(Err(e)) if e.is_eof() => {
                if src.len() > self.max_frame_bytes {
                    Ok(Some(self.drop_oversized(src)))
                } else {
                    Ok(None)
                }
            }
            Some(Err(e)) => Ok(Some(Self::drop_invalid(src, e.to_string()))),
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<InboundFrame>, io::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                let discarded = src.len();
                src.clear();
                Ok(Some(InboundFrame::Malformed {
                    reason: "stream ended inside a frame".to_string(),
                    discarded,
                }))
            }
        }
    }
}

/// Bracket depth through a frame being thrown away, string-aware so braces
/// inside string values don't count.
#[derive(Debug, Clone, Default)]
struct FrameSkip {
    depth: usize,
    in_string: bool,
    escaped: bool,
    scanned: usize,
}

impl FrameSkip {
    /// Offset just past the byte that closes the outermost bracket, if it
    /// is in `bytes`.
    fn scan(&mut self, bytes: &[u8]) -> Option<usize> {
        for (i, &b) in bytes.iter().enumerate() {
            self.scanned += 1;
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
                continue;
            }
            match b {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Some(i + 1);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_all(codec: &mut JsonFrameCodec, buf: &mut BytesMut) -> Vec<InboundFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_coalesced_frames_are_split() {
        let mut codec = JsonFrameCodec::default();
        let mut buf = BytesMut::from(&b"{\"phase\":0}{\"phase\":1}\n{\n  \"phase\" : 2\n}\n"[..]);

        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(
            frames,
            vec![
                InboundFrame::State(json!({"phase": 0})),
                InboundFrame::State(json!({"phase": 1})),
                InboundFrame::State(json!({"phase": 2})),
            ]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_waits_for_remainder() {
        let mut codec = JsonFrameCodec::default();
        let mut buf = BytesMut::from(&b"{\"playerID\": 7, \"game"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(!buf.is_empty());

        buf.extend_from_slice(b"State\": {}}");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(InboundFrame::State(json!({"playerID": 7, "gameState": {}})))
        );
    }

    #[test]
    fn test_garbage_is_dropped_without_ending_stream() {
        let mut codec = JsonFrameCodec::default();
        let mut buf = BytesMut::from(&b"not json at all"[..]);

        match codec.decode(&mut buf).unwrap() {
            Some(InboundFrame::Malformed { discarded, .. }) => assert_eq!(discarded, 15),
            other => panic!("expected malformed frame, got {:?}", other),
        }
        assert!(buf.is_empty());

        buf.extend_from_slice(b"{\"phase\":1}");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(InboundFrame::State(json!({"phase": 1})))
        );
    }

    #[test]
    fn test_oversized_partial_frame_is_discarded() {
        let mut codec = JsonFrameCodec::new(16);
        let mut buf = BytesMut::from(&b"{\"cards\": [\"9S\", \"11H\", \"2C\""[..]);

        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(InboundFrame::Malformed { .. })
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_oversized_frame_tail_never_becomes_state() {
        let mut codec = JsonFrameCodec::new(16);
        let mut buf = BytesMut::from(&b"{\"cards\": [\"9S\", \"11H\", \"2C\""[..]);
        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(InboundFrame::Malformed { .. })
        ));

        buf.extend_from_slice(b", \"10D\"]}");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());

        buf.extend_from_slice(b"\"tail\"]}{\"phase\":1}");
        let frames = decode_all(&mut codec, &mut buf);
        assert!(matches!(frames[0], InboundFrame::Malformed { discarded: 8, .. }));
        assert_eq!(frames[1..], [InboundFrame::State(json!({"phase": 1}))]);
    }

    #[test]
    fn test_nested_objects_of_dropped_frame_are_skipped() {
        let mut codec = JsonFrameCodec::new(16);
        let mut buf = BytesMut::from(&b"{\"seats\": [{\"id\":1},"[..]);
        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(InboundFrame::Malformed { .. })
        ));

        buf.extend_from_slice(b" {\"id\":\"}\"}]}{\"phase\":3}");
        assert_eq!(
            decode_all(&mut codec, &mut buf),
            vec![InboundFrame::State(json!({"phase": 3}))]
        );
    }

    #[test]
    fn test_stray_bytes_before_frame_keep_the_frame() {
        let mut codec = JsonFrameCodec::default();
        let mut buf = BytesMut::from(&b"x{\"phase\":1}"[..]);

        let frames = decode_all(&mut codec, &mut buf);
        assert!(matches!(frames[0], InboundFrame::Malformed { discarded: 1, .. }));
        assert_eq!(frames[1..], [InboundFrame::State(json!({"phase": 1}))]);
    }

    #[test]
    fn test_stray_close_then_split_frame() {
        let mut codec = JsonFrameCodec::default();
        let mut buf = BytesMut::from(&b"}{\"phase\":"[..]);

        let frames = decode_all(&mut codec, &mut buf);
        assert!(matches!(frames[..], [InboundFrame::Malformed { discarded: 1, .. }]));

        buf.extend_from_slice(b"2}");
        assert_eq!(
            decode_all(&mut codec, &mut buf),
            vec![InboundFrame::State(json!({"phase": 2}))]
        );
    }

    #[test]
    fn test_invalid_frame_is_dropped_up_to_its_close() {
        let mut codec = JsonFrameCodec::default();
        let mut buf = BytesMut::from(&b"{\"phase\": nope}{\"phase\":1}"[..]);

        let frames = decode_all(&mut codec, &mut buf);
        assert!(matches!(frames[0], InboundFrame::Malformed { discarded: 15, .. }));
        assert_eq!(frames[1..], [InboundFrame::State(json!({"phase": 1}))]);
    }

    #[test]
    fn test_scalars_are_never_frames() {
        let mut codec = JsonFrameCodec::default();
        let mut buf = BytesMut::from(&b"2 \"tail\" true null"[..]);

        let frames = decode_all(&mut codec, &mut buf);
        assert!(frames
            .iter()
            .all(|f| matches!(f, InboundFrame::Malformed { .. })));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_eof_inside_frame_reports_malformed() {
        let mut codec = JsonFrameCodec::default();
        let mut buf = BytesMut::from(&b"{\"phase\":"[..]);

        assert!(matches!(
            codec.decode_eof(&mut buf).unwrap(),
            Some(InboundFrame::Malformed { .. })
        ));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_whitespace_only_is_not_a_frame() {
        let mut codec = JsonFrameCodec::default();
        let mut buf = BytesMut::from(&b" \r\n\t "[..]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }
}
