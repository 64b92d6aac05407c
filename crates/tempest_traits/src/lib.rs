use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

/// Why a flood run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TerminationCause {
    /// The transport could not be opened at all.
    ConnectFailed(String),
    /// The peer closed its side of the transport (EOF observed).
    PeerClosed,
    /// A write to the transport failed.
    WriteFailed(String),
    /// A read from the transport failed.
    ReadFailed(String),
}

/// Telemetry for a single flood run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloodReport {
    pub frames_written: u64,
    /// Stream identifier of the last HEADERS frame fully written, 0 if none.
    pub last_stream_id: u32,
    pub cause: TerminationCause,
    pub elapsed_ms: u128,
}

/// What the peer context reports once it has been joined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSummary {
    pub connections: u64,
    /// Connections the peer tore down with GOAWAY ENHANCE_YOUR_CALM.
    pub abuse_terminations: u64,
}

/// A one-way termination request into an independently scheduled context.
/// Implementations must tolerate being called more than once.
pub trait Terminate: Send + Sync {
    fn request_termination(&self);
}

/// A running peer hosted behind the isolation boundary.
#[async_trait]
pub trait PeerContext: Send {
    /// The endpoint handed across the boundary at startup.
    fn endpoint(&self) -> SocketAddr;

    /// Detached handle that can stop the context from anywhere.
    fn terminator(&self) -> Arc<dyn Terminate>;

    /// Requests termination (if not already requested) and waits for the context to exit.
    async fn shutdown(self: Box<Self>) -> anyhow::Result<PeerSummary>;
}

/// Starts peers under test in their own execution context.
#[async_trait]
pub trait PeerHost: Send + Sync {
    async fn launch(&self) -> anyhow::Result<Box<dyn PeerContext>>;

    /// Returns the semantic identifier of the host.
    fn name(&self) -> &str;
}
