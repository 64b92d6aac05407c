//! Minimal SETTINGS exchange driven by whatever bytes the peer delivers.

use bytes::{Buf, BytesMut};

use crate::frame::{FrameHeader, FRAME_HEADER_LEN};

/// Where the client stands in the SETTINGS exchange. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingSettingsHeader,
    AwaitingSettingsPayload { length: usize },
    Flooding,
}

/// What the caller must do after feeding bytes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The current unit is incomplete.
    NeedMore,
    /// The peer's SETTINGS was consumed: send the ACK, then start flooding.
    /// Returned exactly once per handshake.
    SendAck,
    /// Already flooding; inbound bytes are discarded.
    Ignored,
}

#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
    inbuf: BytesMut,
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::AwaitingSettingsHeader,
            inbuf: BytesMut::with_capacity(1024),
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Bytes received but not yet consumed by a complete header or payload.
    pub fn buffered(&self) -> usize {
        self.inbuf.len()
    }

    /// The input buffer, for reading straight from the transport. Follow with [`Handshake::step`].
    pub fn input_mut(&mut self) -> &mut BytesMut {
        &mut self.inbuf
    }

    /// Appends one inbound delivery and advances as far as it allows.
    pub fn receive(&mut self, chunk: &[u8]) -> Progress {
        if self.state == HandshakeState::Flooding {
            return Progress::Ignored;
        }
        self.inbuf.extend_from_slice(chunk);
        self.step()
    }

    /// Re-evaluates the state against the buffered bytes. One delivery may
    /// complete both the header and the payload.
    pub fn step(&mut self) -> Progress {
        if self.state == HandshakeState::AwaitingSettingsHeader {
            if self.inbuf.len() < FRAME_HEADER_LEN {
                return Progress::NeedMore;
            }
            // The advertised length is trusted as-is.
            let length = FrameHeader::peek_length(&self.inbuf);
            self.inbuf.advance(FRAME_HEADER_LEN);
            self.state = HandshakeState::AwaitingSettingsPayload { length };
        }

        if let HandshakeState::AwaitingSettingsPayload { length } = self.state {
            if self.inbuf.len() < length {
                return Progress::NeedMore;
            }
            self.inbuf.advance(length);
            self.state = HandshakeState::Flooding;
            // Anything past the peer's SETTINGS is never looked at.
            self.inbuf.clear();
            return Progress::SendAck;
        }

        self.inbuf.clear();
        Progress::Ignored
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}
