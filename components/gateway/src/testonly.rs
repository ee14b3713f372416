//! Test-only utilities.
use std::sync::{Arc, Mutex};

use gateway_crypto::secp256k1;
use rand::{
    distributions::{Alphanumeric, Distribution, Standard},
    Rng,
};
use tokio_tungstenite::{tungstenite::protocol::Role, WebSocketStream};
use zksync_concurrency::{ctx, net};

use crate::{
    config::{DonConfig, GatewayConfig, HttpServerConfig, NodeConfig, WsServerConfig},
    connection_manager::MessageSender,
    message::{Message, MessageBody},
    network::WsStream,
};

fn rand_str<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len).map(|_| rng.sample(Alphanumeric) as char).collect()
}

impl Distribution<MessageBody> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> MessageBody {
        MessageBody {
            message_id: rand_str(rng, 16),
            method: rand_str(rng, 8),
            don_id: rand_str(rng, 8),
            sender: String::new(),
            payload: serde_json::json!({ "data": rand_str(rng, 32) }),
        }
    }
}

/// Signs a random message addressed to `don_id`.
pub fn signed_message(
    rng: &mut impl Rng,
    don_id: &str,
    key: &secp256k1::SecretKey,
) -> Message {
    let mut body: MessageBody = rng.gen();
    body.don_id = don_id.into();
    Message::sign(body, key).expect("signing a random valid body")
}

/// Connects two WebSocket endpoints over an in-memory duplex pipe.
pub async fn ws_pipe() -> (WsStream, WsStream) {
    let (client, server) = tokio::io::duplex(1 << 16);
    let client = WebSocketStream::from_raw_socket(
        Box::new(client) as Box<dyn crate::network::AsyncStream>,
        Role::Client,
        None,
    )
    .await;
    let server = WebSocketStream::from_raw_socket(
        Box::new(server) as Box<dyn crate::network::AsyncStream>,
        Role::Server,
        None,
    )
    .await;
    (client, server)
}

/// `MessageSender` recording every sent message instead of hitting the wire.
pub struct RecordingSender {
    members: Vec<secp256k1::Address>,
    sent: Mutex<Vec<(secp256k1::Address, Message)>>,
}

impl RecordingSender {
    /// Constructs a sender with the given member set.
    pub fn new(members: Vec<secp256k1::Address>) -> Arc<Self> {
        Arc::new(Self {
            members,
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Messages sent so far.
    pub fn sent(&self) -> Vec<(secp256k1::Address, Message)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl MessageSender for RecordingSender {
    fn members(&self) -> Vec<secp256k1::Address> {
        self.members.clone()
    }

    async fn send_to_node(
        &self,
        _ctx: &ctx::Ctx,
        addr: &secp256k1::Address,
        msg: &Message,
    ) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push((*addr, msg.clone()));
        Ok(())
    }
}

/// HTTP server config bound to a reserved localhost port.
pub fn make_http_config(path: &str) -> HttpServerConfig {
    HttpServerConfig {
        addr: net::tcp::testonly::reserve_listener(),
        tls: None,
        path: path.into(),
        read_timeout: zksync_concurrency::time::Duration::seconds(5),
        write_timeout: zksync_concurrency::time::Duration::seconds(5),
        request_timeout: zksync_concurrency::time::Duration::seconds(5),
        max_request_bytes: 1 << 20,
        content_type: "application/jsonrpc; charset=utf-8".into(),
    }
}

/// WebSocket node-server config bound to a reserved localhost port.
pub fn make_ws_config(path: &str) -> WsServerConfig {
    WsServerConfig {
        addr: net::tcp::testonly::reserve_listener(),
        tls: None,
        path: path.into(),
        handshake_timeout: zksync_concurrency::time::Duration::seconds(5),
        max_frame_bytes: 1 << 20,
        accept_rate: zksync_concurrency::limiter::Rate::INF,
    }
}

/// DON config with the `"dummy"` handler and the given members.
pub fn make_don_config(don_id: &str, keys: &[secp256k1::SecretKey]) -> DonConfig {
    DonConfig {
        don_id: don_id.into(),
        handler_name: "dummy".into(),
        handler_config: serde_json::Value::Null,
        members: keys
            .iter()
            .enumerate()
            .map(|(i, key)| NodeConfig {
                name: format!("node_{i}"),
                address: key.address(),
            })
            .collect(),
    }
}

/// Full gateway config with a single DON.
pub fn make_gateway_config(don: DonConfig) -> GatewayConfig {
    GatewayConfig {
        user_server: make_http_config("/user"),
        node_server: make_ws_config("/node"),
        dons: vec![don],
    }
}
