//! On-disk gateway configuration.
//!
//! The file format keeps everything human-editable: addresses and keys are
//! TextFmt-encoded strings, durations are integer milliseconds. Conversion
//! into the typed [`gateway::GatewayConfig`] validates everything upfront.
use std::{net::SocketAddr, path::PathBuf};

use anyhow::Context as _;
use gateway_crypto::Text;
use serde::{Deserialize, Serialize};
use zksync_concurrency::{limiter, net, time};

/// Decodes a JSON document, rejecting trailing data.
pub fn decode_json<T: serde::de::DeserializeOwned>(json: &str) -> anyhow::Result<T> {
    let mut d = serde_json::Deserializer::from_str(json);
    let p = T::deserialize(&mut d)?;
    d.end()?;
    Ok(p)
}

fn millis(ms: u64) -> anyhow::Result<time::Duration> {
    Ok(time::Duration::milliseconds(ms.try_into()?))
}

fn default_content_type() -> String {
    "application/jsonrpc; charset=utf-8".into()
}

/// TLS key material locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsSection {
    /// Path to the PEM-encoded certificate chain.
    pub cert_path: PathBuf,
    /// Path to the PEM-encoded private key.
    pub key_path: PathBuf,
}

/// An HTTP listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpServerSection {
    /// Address to listen on.
    pub addr: SocketAddr,
    /// TLS configuration. Plain TCP if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSection>,
    /// URL path served by this listener.
    pub path: String,
    /// Timeout for reading the request head.
    pub read_timeout_ms: u64,
    /// Bound on draining in-flight connections during shutdown.
    pub write_timeout_ms: u64,
    /// Deadline for handling a single request.
    pub request_timeout_ms: u64,
    /// Maximal accepted request body size in bytes.
    pub max_request_bytes: usize,
    /// Value of the `content-type` header of responses.
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

impl HttpServerSection {
    fn parse(&self) -> anyhow::Result<gateway::HttpServerConfig> {
        Ok(gateway::HttpServerConfig {
            addr: net::tcp::ListenerAddr::new(self.addr),
            tls: self.tls.as_ref().map(|tls| gateway::TlsConfig {
                cert_path: tls.cert_path.clone(),
                key_path: tls.key_path.clone(),
            }),
            path: self.path.clone(),
            read_timeout: millis(self.read_timeout_ms).context("read_timeout_ms")?,
            write_timeout: millis(self.write_timeout_ms).context("write_timeout_ms")?,
            request_timeout: millis(self.request_timeout_ms).context("request_timeout_ms")?,
            max_request_bytes: self.max_request_bytes,
            content_type: self.content_type.clone(),
        })
    }
}

/// The WebSocket listener for node connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsServerSection {
    /// Address to listen on.
    pub addr: SocketAddr,
    /// TLS configuration. Plain TCP if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSection>,
    /// URL path the nodes connect to.
    pub path: String,
    /// Deadline for completing the authentication handshake.
    pub handshake_timeout_ms: u64,
    /// Maximal accepted WebSocket message size in bytes.
    pub max_frame_bytes: usize,
    /// Maximal number of connections accepted in a burst.
    pub accept_burst: usize,
    /// Interval at which the accept budget refreshes by one.
    pub accept_refresh_ms: u64,
}

impl WsServerSection {
    fn parse(&self) -> anyhow::Result<gateway::WsServerConfig> {
        Ok(gateway::WsServerConfig {
            addr: net::tcp::ListenerAddr::new(self.addr),
            tls: self.tls.as_ref().map(|tls| gateway::TlsConfig {
                cert_path: tls.cert_path.clone(),
                key_path: tls.key_path.clone(),
            }),
            path: self.path.clone(),
            handshake_timeout: millis(self.handshake_timeout_ms)
                .context("handshake_timeout_ms")?,
            max_frame_bytes: self.max_frame_bytes,
            accept_rate: limiter::Rate {
                burst: self.accept_burst,
                refresh: millis(self.accept_refresh_ms).context("accept_refresh_ms")?,
            },
        })
    }
}

/// A single DON member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSection {
    /// Human-readable node name, used only for logging.
    pub name: String,
    /// TextFmt-encoded address the node authenticates with.
    pub address: String,
}

/// A DON served by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonSection {
    /// Unique DON identifier.
    pub don_id: String,
    /// Handler type for this DON.
    pub handler_name: String,
    /// Handler-specific configuration, passed through verbatim.
    #[serde(default)]
    pub handler_config: serde_json::Value,
    /// Member nodes allowed to connect on behalf of this DON.
    pub members: Vec<NodeSection>,
}

impl DonSection {
    fn parse(&self) -> anyhow::Result<gateway::DonConfig> {
        let members = self
            .members
            .iter()
            .enumerate()
            .map(|(i, m)| {
                Ok(gateway::NodeConfig {
                    name: m.name.clone(),
                    address: Text::new(&m.address)
                        .decode()
                        .with_context(|| format!("members[{i}].address"))?,
                })
            })
            .collect::<anyhow::Result<_>>()?;
        Ok(gateway::DonConfig {
            don_id: self.don_id.clone(),
            handler_name: self.handler_name.clone(),
            handler_config: self.handler_config.clone(),
            members,
        })
    }
}

/// Top-level gateway configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Listener for user HTTP requests.
    pub user_server: HttpServerSection,
    /// Listener for node WebSocket connections.
    pub node_server: WsServerSection,
    /// DONs served by this gateway.
    pub dons: Vec<DonSection>,
    /// Address to serve Prometheus metrics on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_server_addr: Option<SocketAddr>,
}

impl AppConfig {
    /// Converts the file representation into the typed gateway config.
    pub fn gateway_config(&self) -> anyhow::Result<gateway::GatewayConfig> {
        Ok(gateway::GatewayConfig {
            user_server: self.user_server.parse().context("user_server")?,
            node_server: self.node_server.parse().context("node_server")?,
            dons: self
                .dons
                .iter()
                .enumerate()
                .map(|(i, don)| don.parse().with_context(|| format!("dons[{i}]")))
                .collect::<anyhow::Result<_>>()?,
        })
    }
}
