//! Node-side client maintaining a connection to a gateway.
use std::sync::Arc;

use anyhow::Context as _;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::SinkExt as _;
use tokio_tungstenite::{
    client_async,
    tungstenite::{self, http},
};
use zksync_concurrency::{ctx, ctx::channel, time};

use super::{
    conn::ConnectionWrapper,
    handshake::{ConnectionInitiator, CHALLENGE_HEADER},
    AsyncStream, WsStream,
};
use crate::config::CONNECT_RETRY;

/// Deadline for completing the dial + upgrade + challenge exchange.
const HANDSHAKE_TIMEOUT: time::Duration = time::Duration::seconds(10);

/// Client maintaining one logical connection from a node to its gateway.
/// Reconnects with a fixed backoff for as long as the context is active.
pub struct Connector {
    url: String,
    initiator: Arc<dyn ConnectionInitiator>,
    wrapper: Arc<ConnectionWrapper>,
}

impl Connector {
    /// Constructs a connector dialing `url` (a `ws://host:port/path` URL).
    /// Returns the receiver of inbound frames.
    pub fn new(
        url: String,
        initiator: Arc<dyn ConnectionInitiator>,
    ) -> (Self, channel::Receiver<Vec<u8>>) {
        let (wrapper, read_recv) = ConnectionWrapper::new();
        (
            Self {
                url,
                initiator,
                wrapper,
            },
            read_recv,
        )
    }

    /// The connection wrapper used for writes.
    pub fn wrapper(&self) -> &Arc<ConnectionWrapper> {
        &self.wrapper
    }

    /// Dials, authenticates and pumps the connection, reconnecting after
    /// [`CONNECT_RETRY`] whenever it drops. Returns once the context is
    /// canceled or the wrapper is closed.
    pub async fn run(&self, ctx: &ctx::Ctx) -> anyhow::Result<()> {
        while ctx.is_active() && !self.wrapper.is_closed() {
            if let Err(err) = self.run_once(ctx).await {
                tracing::info!("connection to gateway: {err:#}");
            }
            if let Err(ctx::Canceled) = ctx.sleep(CONNECT_RETRY).await {
                break;
            }
        }
        Ok(())
    }

    async fn run_once(&self, ctx: &ctx::Ctx) -> anyhow::Result<()> {
        let ws = self
            .connect(&ctx.with_timeout(HANDSHAKE_TIMEOUT))
            .await
            .context("connect()")?;
        self.wrapper.run_connection(ctx, ws).await
    }

    /// Dials the gateway and runs the client side of the handshake.
    async fn connect(&self, ctx: &ctx::Ctx) -> anyhow::Result<WsStream> {
        let uri: http::Uri = self.url.parse().context("parsing url")?;
        if uri.scheme_str() != Some("ws") {
            anyhow::bail!("unsupported url scheme: {:?}", uri.scheme_str());
        }
        let host = uri.host().context("url without host")?;
        let port = uri.port_u16().unwrap_or(80);
        let authority = uri
            .authority()
            .context("url without authority")?
            .as_str()
            .to_string();
        let stream: Box<dyn AsyncStream> = Box::new(
            ctx.wait(tokio::net::TcpStream::connect((host, port)))
                .await?
                .context("TcpStream::connect()")?,
        );

        let auth = self.initiator.new_auth_header(uri.path())?;
        let req = http::Request::builder()
            .method(http::Method::GET)
            .uri(&self.url)
            .header(http::header::HOST, authority)
            .header(http::header::CONNECTION, "Upgrade")
            .header(http::header::UPGRADE, "websocket")
            .header(http::header::SEC_WEBSOCKET_VERSION, "13")
            .header(
                http::header::SEC_WEBSOCKET_KEY,
                tungstenite::handshake::client::generate_key(),
            )
            .header(http::header::AUTHORIZATION, BASE64.encode(&auth))
            .body(())?;
        let (mut ws, resp) = ctx
            .wait(client_async(req, stream))
            .await?
            .context("websocket upgrade")?;

        let challenge = BASE64
            .decode(
                resp.headers()
                    .get(CHALLENGE_HEADER)
                    .context("missing challenge header")?
                    .as_bytes(),
            )
            .context("challenge is not base64")?;
        let response = self.initiator.challenge_response(&challenge)?;
        ctx.wait(ws.send(tungstenite::Message::Binary(response)))
            .await?
            .context("sending challenge response")?;
        Ok(ws)
    }
}
