//! Gateway configs.
use std::path::PathBuf;

use gateway_crypto::secp256k1;
use zksync_concurrency::{limiter, net, time};

/// How often a node retries to establish a connection to its gateway.
pub(crate) const CONNECT_RETRY: time::Duration = time::Duration::seconds(10);

/// TLS key material locations for a listener.
#[derive(Debug, Clone, PartialEq)]
pub struct TlsConfig {
    /// Path to the PEM-encoded certificate chain.
    pub cert_path: PathBuf,
    /// Path to the PEM-encoded private key.
    pub key_path: PathBuf,
}

/// Configuration of an HTTP listener.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpServerConfig {
    /// Address to listen on.
    pub addr: net::tcp::ListenerAddr,
    /// TLS configuration. Plain TCP if `None`.
    pub tls: Option<TlsConfig>,
    /// URL path served by this listener.
    pub path: String,
    /// Timeout for reading the request head.
    pub read_timeout: time::Duration,
    /// Bound on draining in-flight connections during shutdown.
    pub write_timeout: time::Duration,
    /// Deadline for handling a single request.
    pub request_timeout: time::Duration,
    /// Maximal accepted request body size; larger bodies get HTTP 413.
    pub max_request_bytes: usize,
    /// Value of the `content-type` header of JSON-RPC responses.
    pub content_type: String,
}

/// Configuration of the WebSocket listener for node connections.
#[derive(Debug, Clone, PartialEq)]
pub struct WsServerConfig {
    /// Address to listen on.
    pub addr: net::tcp::ListenerAddr,
    /// TLS configuration. Plain TCP if `None`.
    pub tls: Option<TlsConfig>,
    /// URL path the nodes connect to.
    pub path: String,
    /// Deadline for completing the authentication handshake.
    pub handshake_timeout: time::Duration,
    /// Maximal accepted WebSocket message size; larger frames kill the
    /// connection.
    pub max_frame_bytes: usize,
    /// Maximal rate at which inbound TCP connections are accepted.
    pub accept_rate: limiter::Rate,
}

/// A single DON member.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    /// Human-readable node name, used only for logging.
    pub name: String,
    /// Address the node authenticates with.
    pub address: secp256k1::Address,
}

/// Configuration of a single DON served by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct DonConfig {
    /// Unique DON identifier, matched against `don_id` of incoming messages.
    pub don_id: String,
    /// Name of the handler type for this DON, resolved via `HandlerRegistry`.
    pub handler_name: String,
    /// Handler-specific configuration, passed verbatim to the constructor.
    pub handler_config: serde_json::Value,
    /// Member nodes allowed to connect on behalf of this DON.
    pub members: Vec<NodeConfig>,
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Listener for user HTTP requests.
    pub user_server: HttpServerConfig,
    /// Listener for node WebSocket connections.
    pub node_server: WsServerConfig,
    /// DONs served by this gateway.
    pub dons: Vec<DonConfig>,
}
