//! Per-node abstraction over one logical, repeatedly reconnected WebSocket
//! connection.
//!
//! A `ConnectionWrapper` outlives the physical connections it carries: the
//! node server (or the node-side client) installs each freshly handshaken
//! socket via [`ConnectionWrapper::run_connection`], which atomically replaces
//! the previous one. Writers and the inbound-frame consumer observe a single
//! stable object for the whole lifetime of the peer.
use std::sync::Arc;

use futures_util::{stream::SplitSink, SinkExt as _, StreamExt as _};
use tokio_tungstenite::tungstenite;
use zksync_concurrency::{ctx, ctx::channel, scope, signal, sync};

use super::WsStream;

/// Capacity of the inbound-frame channel. The read pump blocks once the
/// consumer falls this many frames behind.
const READ_CHANNEL_CAPACITY: usize = 100;

type Sink = SplitSink<WsStream, tungstenite::Message>;

/// Write-half state, guarded by a single async mutex so that at most one
/// writer touches the sink at a time.
struct SinkState {
    /// Sink of the currently installed connection, if any.
    sink: Option<Sink>,
    /// Signal of the generation owning `sink`. Sent when that connection is
    /// replaced or the wrapper shuts down.
    takeover: Arc<signal::Once>,
}

/// Errors returned by [`ConnectionWrapper::write`].
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// No physical connection is currently installed.
    #[error("no active connection")]
    NoActiveConnection,
    /// The wrapper has been shut down and will never carry a connection again.
    #[error("connection wrapper is shut down")]
    Shutdown,
    /// The write failed on the wire; the connection has been dropped.
    #[error("transport: {0:#}")]
    Transport(#[source] anyhow::Error),
    /// Context canceled while waiting for the sink.
    #[error(transparent)]
    Canceled(#[from] ctx::Canceled),
}

/// One logical connection to a peer.
pub struct ConnectionWrapper {
    state: sync::Mutex<SinkState>,
    read_send: channel::Sender<Vec<u8>>,
    shutdown: signal::Once,
}

impl std::fmt::Debug for ConnectionWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionWrapper").finish_non_exhaustive()
    }
}

impl ConnectionWrapper {
    /// Constructs a wrapper with no connection installed, and the receiver of
    /// inbound frames aggregated across all its physical connections.
    pub fn new() -> (Arc<Self>, channel::Receiver<Vec<u8>>) {
        let (read_send, read_recv) = channel::bounded(READ_CHANNEL_CAPACITY);
        let this = Arc::new(Self {
            state: sync::Mutex::new(SinkState {
                sink: None,
                takeover: Arc::new(signal::Once::new()),
            }),
            read_send,
            shutdown: signal::Once::new(),
        });
        (this, read_recv)
    }

    /// Whether [`ConnectionWrapper::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.shutdown.try_recv()
    }

    /// Sends a single binary frame to the peer.
    pub async fn write(&self, ctx: &ctx::Ctx, data: Vec<u8>) -> Result<(), WriteError> {
        let mut state = sync::lock(ctx, &self.state).await?.into_async();
        if self.shutdown.try_recv() {
            return Err(WriteError::Shutdown);
        }
        let Some(sink) = state.sink.as_mut() else {
            return Err(WriteError::NoActiveConnection);
        };
        match ctx.wait(sink.send(tungstenite::Message::Binary(data))).await? {
            Ok(()) => Ok(()),
            Err(err) => {
                // The connection is broken. Drop it so that subsequent writes
                // fail fast, and wake its read pump.
                state.sink = None;
                state.takeover.send();
                Err(WriteError::Transport(err.into()))
            }
        }
    }

    /// Installs `conn` as the active connection and pumps its inbound frames
    /// into the read channel. The previously installed connection (if any) is
    /// torn down and its `run_connection` call returns.
    ///
    /// Returns `Ok(())` when the connection was cleanly superseded or the
    /// wrapper was shut down, and an error when the peer closed the socket or
    /// the transport failed.
    pub async fn run_connection(&self, ctx: &ctx::Ctx, conn: WsStream) -> anyhow::Result<()> {
        let (sink, mut stream) = conn.split();
        let takeover = Arc::new(signal::Once::new());
        {
            let mut state = sync::lock(ctx, &self.state).await?.into_async();
            if self.shutdown.try_recv() {
                anyhow::bail!("connection wrapper is shut down");
            }
            state.takeover.send();
            if let Some(mut old) = state.sink.take() {
                let _ = ctx.wait(old.close()).await;
            }
            state.sink = Some(sink);
            state.takeover = takeover.clone();
        }

        let res: ctx::Result<()> = scope::run!(ctx, |ctx, s| async {
            // Terminate the read pump when this connection is replaced by a
            // newer one or the wrapper shuts down.
            s.spawn(cancel_on(&takeover, ctx));
            s.spawn(cancel_on(&self.shutdown, ctx));
            loop {
                let frame = match ctx.wait(stream.next()).await? {
                    Some(frame) => frame.map_err(anyhow::Error::from)?,
                    None => return Err(anyhow::anyhow!("connection closed by peer").into()),
                };
                match frame {
                    tungstenite::Message::Binary(data) => {
                        self.read_send.send(ctx, data).await?;
                    }
                    tungstenite::Message::Text(data) => {
                        self.read_send.send(ctx, data.into_bytes()).await?;
                    }
                    tungstenite::Message::Close(_) => {
                        return Err(anyhow::anyhow!("connection closed by peer").into());
                    }
                    // Ping/pong frames are handled by tungstenite itself.
                    _ => {}
                }
            }
        })
        .await;

        // Uninstall the sink unless a newer connection already owns the slot.
        {
            let mut state = self.state.lock().await;
            if Arc::ptr_eq(&state.takeover, &takeover) {
                state.sink = None;
                state.takeover.send();
            }
        }
        match res {
            Ok(()) | Err(ctx::Error::Canceled(_)) => Ok(()),
            Err(ctx::Error::Internal(err)) => Err(err),
        }
    }

    /// Shuts the wrapper down: tears down the active connection and makes all
    /// subsequent writes fail with [`WriteError::Shutdown`]. Idempotent.
    pub async fn close(&self) {
        self.shutdown.send();
        let mut state = self.state.lock().await;
        state.takeover.send();
        if let Some(mut sink) = state.sink.take() {
            let _ = sink.close().await;
        }
    }
}

/// Resolves to `Canceled` as soon as `signal` fires.
async fn cancel_on(signal: &signal::Once, ctx: &ctx::Ctx) -> ctx::Result<()> {
    signal.recv(ctx).await?;
    Err(ctx::Canceled.into())
}
