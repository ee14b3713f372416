//! WebSocket server accepting node connections.
//!
//! Each accepted TCP connection goes through the two-step handshake: the
//! auth header is checked synchronously inside the WebSocket upgrade
//! callback, and the challenge response is read as the first binary frame.
//! Only then is the socket handed to the node's connection wrapper.
use std::sync::Arc;

use anyhow::Context as _;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::StreamExt as _;
use tls_listener::TlsListener;
use tokio_tungstenite::{
    accept_hdr_async_with_config,
    tungstenite::{
        self,
        handshake::server::{ErrorResponse, Request, Response},
        http,
        protocol::WebSocketConfig,
    },
};
use zksync_concurrency::{ctx, limiter, scope};

use super::{
    conn::ConnectionWrapper,
    handshake::{
        AttemptId, ConnectionAcceptor, CHALLENGE_HEADER, ENCODED_AUTH_HEADER_MAX_LEN,
    },
    tls_acceptor, AsyncStream, Listener, WsStream,
};
use crate::{config::WsServerConfig, metrics::METRICS};

/// WebSocket server for node connections.
pub(crate) struct NodeServer {
    cfg: WsServerConfig,
    acceptor: Arc<dyn ConnectionAcceptor>,
}

impl NodeServer {
    pub(crate) fn new(cfg: WsServerConfig, acceptor: Arc<dyn ConnectionAcceptor>) -> Self {
        Self { cfg, acceptor }
    }

    /// Runs the accept loop until the context is canceled.
    pub(crate) async fn run(&self, ctx: &ctx::Ctx) -> anyhow::Result<()> {
        let listener = self.cfg.addr.bind(false).context("addr.bind()")?;
        match &self.cfg.tls {
            Some(tls) => {
                let acceptor = tls_acceptor(tls)?;
                self.run_with_listener(ctx, TlsListener::new(acceptor, listener))
                    .await
            }
            None => self.run_with_listener(ctx, listener).await,
        }
    }

    async fn run_with_listener<L: Listener>(
        &self,
        ctx: &ctx::Ctx,
        mut listener: L,
    ) -> anyhow::Result<()> {
        let res: ctx::Result<()> = scope::run!(ctx, |ctx, s| async {
            let accept_limiter = limiter::Limiter::new(ctx, self.cfg.accept_rate);
            loop {
                accept_limiter.acquire(ctx, 1).await?;
                let stream = match ctx.wait(listener.accept()).await? {
                    Ok(stream) => stream,
                    Err(err) => {
                        tracing::info!("accepting node connection: {err:#}");
                        continue;
                    }
                };
                s.spawn(async {
                    if let Err(err) = self.handle_connection(ctx, stream).await {
                        tracing::info!("node connection: {err:#}");
                    }
                    Ok(())
                });
            }
        })
        .await;
        match res {
            Ok(()) | Err(ctx::Error::Canceled(_)) => Ok(()),
            Err(ctx::Error::Internal(err)) => Err(err),
        }
    }

    /// Authenticates one inbound connection and runs it to completion.
    async fn handle_connection(
        &self,
        ctx: &ctx::Ctx,
        stream: Box<dyn AsyncStream>,
    ) -> anyhow::Result<()> {
        let handshake_ctx = ctx.with_timeout(self.cfg.handshake_timeout);
        let (wrapper, ws) = self.handshake(&handshake_ctx, stream).await?;
        METRICS.connected_nodes.inc_by(1);
        let res = wrapper.run_connection(ctx, ws).await;
        METRICS.connected_nodes.dec_by(1);
        res
    }

    /// Runs both handshake steps. On any failure the pending attempt is
    /// aborted and the socket is closed without reaching application logic.
    async fn handshake(
        &self,
        ctx: &ctx::Ctx,
        stream: Box<dyn AsyncStream>,
    ) -> anyhow::Result<(Arc<ConnectionWrapper>, WsStream)> {
        let mut attempt: Option<AttemptId> = None;
        let acceptor = self.acceptor.as_ref();
        let path = self.cfg.path.as_str();
        let callback = |req: &Request, mut resp: Response| match accept_upgrade(
            acceptor, path, req, &mut resp,
        ) {
            Ok(id) => {
                attempt = Some(id);
                Ok(resp)
            }
            Err(status) => {
                METRICS.handshake_rejections.inc();
                let mut err = ErrorResponse::new(None);
                *err.status_mut() = status;
                Err(err)
            }
        };
        let ws_config = WebSocketConfig {
            max_message_size: Some(self.cfg.max_frame_bytes),
            max_frame_size: Some(self.cfg.max_frame_bytes),
            ..WebSocketConfig::default()
        };
        let mut ws: WsStream = ctx
            .wait(accept_hdr_async_with_config(stream, callback, Some(ws_config)))
            .await?
            .context("websocket upgrade")?;
        let attempt = attempt.context("upgrade callback did not run")?;

        let res = async {
            let frame = ctx
                .wait(ws.next())
                .await?
                .context("connection closed during handshake")?
                .context("reading challenge response")?;
            let tungstenite::Message::Binary(response) = frame else {
                anyhow::bail!("expected a binary challenge-response frame");
            };
            self.acceptor
                .finalize_handshake(&attempt, &response)
                .map_err(anyhow::Error::from)
        }
        .await;
        match res {
            Ok(wrapper) => Ok((wrapper, ws)),
            Err(err) => {
                METRICS.handshake_rejections.inc();
                self.acceptor.abort_handshake(&attempt);
                let _ = ctx.wait(ws.close(None)).await;
                Err(err).context("finalizing handshake")
            }
        }
    }
}

/// Synchronous part of the handshake, run inside the upgrade header
/// callback. Returns the HTTP status to reject the upgrade with on failure.
pub(crate) fn accept_upgrade(
    acceptor: &dyn ConnectionAcceptor,
    path: &str,
    req: &Request,
    resp: &mut Response,
) -> Result<AttemptId, http::StatusCode> {
    if req.uri().path() != path {
        return Err(http::StatusCode::NOT_FOUND);
    }
    let Some(header) = req.headers().get(http::header::AUTHORIZATION) else {
        return Err(http::StatusCode::BAD_REQUEST);
    };
    if header.as_bytes().len() > ENCODED_AUTH_HEADER_MAX_LEN {
        return Err(http::StatusCode::BAD_REQUEST);
    }
    let Ok(auth) = BASE64.decode(header.as_bytes()) else {
        return Err(http::StatusCode::BAD_REQUEST);
    };
    let (id, challenge) = acceptor.start_handshake(&auth).map_err(|err| {
        tracing::info!("start_handshake(): {err:#}");
        err.http_status()
    })?;
    let value = http::HeaderValue::from_str(&BASE64.encode(challenge))
        .map_err(|_| http::StatusCode::INTERNAL_SERVER_ERROR)?;
    resp.headers_mut()
        .insert(http::HeaderName::from_static(CHALLENGE_HEADER), value);
    Ok(id)
}
