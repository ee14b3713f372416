//! Network layer of the gateway: WebSocket connection wrapper, handshake
//! protocol, HTTP user server, WebSocket node server and node-side client.
use std::{fs::File, io::BufReader, sync::Arc};

use anyhow::Context as _;
use tls_listener::TlsListener;
use tokio::net::TcpListener;
use tokio_rustls::{rustls, server::TlsStream, TlsAcceptor};

use crate::config::TlsConfig;

pub mod client;
pub mod conn;
pub mod handshake;
pub mod http;
pub mod server;
#[cfg(test)]
mod tests;

/// Byte stream a WebSocket or HTTP connection can run over.
/// Type-erases TCP vs TLS-over-TCP.
pub trait AsyncStream:
    tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static
{
}

impl<T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static> AsyncStream for T {}

/// WebSocket connection over a type-erased byte stream.
pub type WsStream = tokio_tungstenite::WebSocketStream<Box<dyn AsyncStream>>;

/// Abstraction over TCP and TLS listeners.
#[async_trait::async_trait]
pub(crate) trait Listener: 'static + Send {
    async fn accept(&mut self) -> anyhow::Result<Box<dyn AsyncStream>>;
}

#[async_trait::async_trait]
impl Listener for TcpListener {
    async fn accept(&mut self) -> anyhow::Result<Box<dyn AsyncStream>> {
        let (stream, _) = TcpListener::accept(self).await?;
        Ok(Box::new(stream))
    }
}

#[async_trait::async_trait]
impl Listener for TlsListener<TcpListener, TlsAcceptor> {
    async fn accept(&mut self) -> anyhow::Result<Box<dyn AsyncStream>> {
        let (stream, _): (TlsStream<tokio::net::TcpStream>, _) =
            TlsListener::accept(self).await?;
        Ok(Box::new(stream))
    }
}

/// Loads PEM key material and builds a TLS acceptor for a listener.
pub(crate) fn tls_acceptor(cfg: &TlsConfig) -> anyhow::Result<TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(
        File::open(&cfg.cert_path).context("opening TLS certificate")?,
    ))
    .collect::<Result<Vec<_>, _>>()
    .context("parsing TLS certificate")?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(
        File::open(&cfg.key_path).context("opening TLS key")?,
    ))
    .context("parsing TLS key")?
    .context("no private key found")?;
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("building TLS config")?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}
