use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use h2::server::SendResponse;
use h2::{Reason, RecvStream};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tempest_traits::{PeerContext, PeerHost, PeerSummary, Terminate};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// How long in-flight connections get to wind down once termination is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub bind: SocketAddr,
    /// Streams the peer may reset for protocol errors before it sends
    /// GOAWAY ENHANCE_YOUR_CALM and drops the connection. `None` disables
    /// the defense.
    pub reset_limit: Option<usize>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            reset_limit: Some(100),
        }
    }
}

/// Hosts an `h2` server on a dedicated OS thread with its own runtime.
pub struct H2PeerHost {
    config: PeerConfig,
}

impl H2PeerHost {
    pub fn new(config: PeerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PeerHost for H2PeerHost {
    async fn launch(&self) -> Result<Box<dyn PeerContext>> {
        let peer = IsolatedPeer::spawn(self.config.clone()).await?;
        Ok(Box::new(peer))
    }

    fn name(&self) -> &str {
        "h2"
    }
}

/// Termination request into the peer thread. Only the first call sends anything.
struct ShutdownSignal(Mutex<Option<oneshot::Sender<()>>>);

impl Terminate for ShutdownSignal {
    fn request_termination(&self) {
        if let Some(tx) = self.0.lock().take() {
            debug!("Requesting peer termination");
            let _ = tx.send(());
        }
    }
}

/// A running peer. The endpoint is the only value that ever crosses from
/// the peer thread to its launcher.
pub struct IsolatedPeer {
    endpoint: SocketAddr,
    shutdown: Arc<ShutdownSignal>,
    thread: Option<JoinHandle<Result<PeerSummary>>>,
}

impl IsolatedPeer {
    pub async fn spawn(config: PeerConfig) -> Result<Self> {
        let (endpoint_tx, endpoint_rx) = flume::bounded(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let thread = std::thread::Builder::new()
            .name("h2-peer".into())
            .spawn(move || run_isolated(config, endpoint_tx, shutdown_rx))
            .context("failed to spawn peer thread")?;

        let endpoint = match endpoint_rx.recv_async().await {
            Ok(endpoint) => endpoint,
            Err(_) => {
                // The thread dropped its sender without reporting: it has exited.
                let exit = tokio::task::spawn_blocking(move || thread.join()).await?;
                return Err(match exit {
                    Ok(Err(e)) => e.context("peer failed to start"),
                    Ok(Ok(_)) => anyhow!("peer exited before reporting its endpoint"),
                    Err(_) => anyhow!("peer thread panicked during startup"),
                });
            }
        };
        info!("Peer listening on {}", endpoint);

        Ok(Self {
            endpoint,
            shutdown: Arc::new(ShutdownSignal(Mutex::new(Some(shutdown_tx)))),
            thread: Some(thread),
        })
    }
}

#[async_trait]
impl PeerContext for IsolatedPeer {
    fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    fn terminator(&self) -> Arc<dyn Terminate> {
        self.shutdown.clone()
    }

    async fn shutdown(mut self: Box<Self>) -> Result<PeerSummary> {
        self.shutdown.request_termination();
        let thread = self
            .thread
            .take()
            .ok_or_else(|| anyhow!("peer already joined"))?;
        let exit = tokio::task::spawn_blocking(move || thread.join()).await?;
        let summary = exit.map_err(|_| anyhow!("peer thread panicked"))??;
        info!(
            "Peer exited: {} connections, {} terminated for abuse",
            summary.connections, summary.abuse_terminations
        );
        Ok(summary)
    }
}

impl Drop for IsolatedPeer {
    fn drop(&mut self) {
        // Never leave the peer thread running behind a dropped handle.
        self.shutdown.request_termination();
    }
}

#[derive(Default)]
struct PeerStats {
    connections: AtomicU64,
    abuse_terminations: AtomicU64,
}

impl PeerStats {
    fn snapshot(&self) -> PeerSummary {
        PeerSummary {
            connections: self.connections.load(Ordering::Relaxed),
            abuse_terminations: self.abuse_terminations.load(Ordering::Relaxed),
        }
    }
}

fn run_isolated(
    config: PeerConfig,
    endpoint_tx: flume::Sender<SocketAddr>,
    shutdown: oneshot::Receiver<()>,
) -> Result<PeerSummary> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build peer runtime")?;

    runtime.block_on(async move {
        let listener = TcpListener::bind(config.bind)
            .await
            .with_context(|| format!("failed to bind {}", config.bind))?;
        let endpoint = listener.local_addr()?;
        endpoint_tx
            .send(endpoint)
            .map_err(|_| anyhow!("launcher went away before the endpoint was reported"))?;
        drop(endpoint_tx);

        serve(listener, config.reset_limit, shutdown).await
    })
}

async fn serve(
    listener: TcpListener,
    reset_limit: Option<usize>,
    mut shutdown: oneshot::Receiver<()>,
) -> Result<PeerSummary> {
    let stats = Arc::new(PeerStats::default());
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => {
                let (socket, remote) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("Peer accept failed: {}", e);
                        continue;
                    }
                };
                stats.connections.fetch_add(1, Ordering::Relaxed);
                connections.spawn(serve_connection(socket, remote, reset_limit, stats.clone()));
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    debug!("Peer terminating with {} live connections", connections.len());
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    connections.shutdown().await;

    Ok(stats.snapshot())
}

async fn serve_connection(
    socket: TcpStream,
    remote: SocketAddr,
    reset_limit: Option<usize>,
    stats: Arc<PeerStats>,
) {
    let mut builder = h2::server::Builder::new();
    builder.max_local_error_reset_streams(reset_limit);

    let mut conn = match builder.handshake::<_, Bytes>(socket).await {
        Ok(conn) => conn,
        Err(e) => {
            debug!("Handshake with {} failed: {}", remote, e);
            return;
        }
    };

    while let Some(next) = conn.accept().await {
        match next {
            Ok((request, respond)) => {
                tokio::spawn(async move {
                    if let Err(e) = respond_hello(request, respond).await {
                        debug!("Response failed: {}", e);
                    }
                });
            }
            Err(e) if e.reason() == Some(Reason::ENHANCE_YOUR_CALM) => {
                stats.abuse_terminations.fetch_add(1, Ordering::Relaxed);
                warn!("Closing abusive connection from {}: {}", remote, e);
                return;
            }
            Err(e) => {
                debug!("Connection from {} ended: {}", remote, e);
                return;
            }
        }
    }
}

async fn respond_hello(
    _request: http::Request<RecvStream>,
    mut respond: SendResponse<Bytes>,
) -> Result<()> {
    let response = http::Response::builder()
        .status(200)
        .header("content-type", "text/plain")
        .body(())?;
    let mut body = respond.send_response(response, false)?;
    body.send_data(Bytes::from_static(b"Hello, world!\n"), true)?;
    Ok(())
}
