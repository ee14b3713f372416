//! Tracking of node connections, grouped by DON.
//!
//! The `ConnectionManager` owns one `ConnectionWrapper` per configured node
//! and implements the server side of the handshake: an inbound connection is
//! bound to a `(don_id, address)` pair by its auth header and installed into
//! that node's wrapper. A background `Runner` drains each wrapper's read
//! channel and dispatches validated node messages to the DON's handler.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock},
};

use anyhow::Context as _;
use gateway_crypto::{secp256k1, ByteFmt};
use zksync_concurrency::{ctx, ctx::channel, scope};

use crate::{
    codec,
    config::DonConfig,
    handler::Handler,
    message::Message,
    metrics::{ResultLabel, METRICS},
    network::{
        conn::ConnectionWrapper,
        handshake::{
            self, AttemptId, AuthHeader, ConnectionAcceptor, HandshakeError,
        },
    },
};

/// Sink for messages addressed to DON members. The seam between handlers
/// and the transport, so handlers can be tested against a recording mock.
#[async_trait::async_trait]
pub trait MessageSender: Send + Sync {
    /// Addresses of all members of the DON, in configuration order.
    fn members(&self) -> Vec<secp256k1::Address>;
    /// Encodes `msg` as a JSON-RPC request and sends it to the given member.
    async fn send_to_node(
        &self,
        ctx: &ctx::Ctx,
        addr: &secp256k1::Address,
        msg: &Message,
    ) -> anyhow::Result<()>;
}

/// Connections of the members of a single DON.
pub struct DonConnections {
    cfg: DonConfig,
    nodes: HashMap<secp256k1::Address, Arc<ConnectionWrapper>>,
    handler: OnceLock<Arc<dyn Handler>>,
}

impl DonConnections {
    /// Validates the DON config and sets up one connection wrapper per
    /// member. Returns the per-member read channels for the runner.
    fn new(
        cfg: DonConfig,
    ) -> anyhow::Result<(
        Arc<Self>,
        Vec<(secp256k1::Address, channel::Receiver<Vec<u8>>)>,
    )> {
        anyhow::ensure!(!cfg.don_id.is_empty(), "empty don_id");
        anyhow::ensure!(
            !cfg.members.is_empty(),
            "DON {:?} has no members",
            cfg.don_id
        );
        let mut nodes = HashMap::new();
        let mut readers = Vec::with_capacity(cfg.members.len());
        for member in &cfg.members {
            let (wrapper, read_recv) = ConnectionWrapper::new();
            anyhow::ensure!(
                nodes.insert(member.address, wrapper).is_none(),
                "duplicate member address {} in DON {:?}",
                member.address,
                cfg.don_id
            );
            readers.push((member.address, read_recv));
        }
        Ok((
            Arc::new(Self {
                cfg,
                nodes,
                handler: OnceLock::new(),
            }),
            readers,
        ))
    }

    /// Identifier of this DON.
    pub fn don_id(&self) -> &str {
        &self.cfg.don_id
    }

    /// Wires the handler of this DON. May be called at most once.
    pub fn set_handler(&self, handler: Arc<dyn Handler>) -> anyhow::Result<()> {
        self.handler
            .set(handler)
            .map_err(|_| anyhow::anyhow!("handler already set for DON {:?}", self.cfg.don_id))
    }

    pub(crate) fn handler(&self) -> anyhow::Result<Arc<dyn Handler>> {
        self.handler
            .get()
            .cloned()
            .with_context(|| format!("no handler set for DON {:?}", self.cfg.don_id))
    }

    /// Decodes, validates and dispatches one frame received from a node
    /// connection authenticated as `addr`.
    async fn dispatch_node_frame(
        &self,
        ctx: &ctx::Ctx,
        addr: secp256k1::Address,
        raw: &[u8],
    ) -> anyhow::Result<()> {
        let msg = codec::decode_request(raw).context("decoding")?;
        let signer = msg.validate().context("validation")?;
        anyhow::ensure!(
            signer == addr,
            "message signed by {signer}, connection authenticated as {addr}"
        );
        anyhow::ensure!(
            msg.body.don_id == self.cfg.don_id,
            "message for DON {:?} received on a {:?} connection",
            msg.body.don_id,
            self.cfg.don_id
        );
        self.handler()?.handle_node_message(ctx, msg, addr).await
    }
}

#[async_trait::async_trait]
impl MessageSender for DonConnections {
    fn members(&self) -> Vec<secp256k1::Address> {
        self.cfg.members.iter().map(|m| m.address).collect()
    }

    async fn send_to_node(
        &self,
        ctx: &ctx::Ctx,
        addr: &secp256k1::Address,
        msg: &Message,
    ) -> anyhow::Result<()> {
        let conn = self
            .nodes
            .get(addr)
            .with_context(|| format!("unknown node {addr} in DON {:?}", self.cfg.don_id))?;
        let raw = codec::encode_request(msg)?;
        conn.write(ctx, raw).await?;
        Ok(())
    }
}

/// A pending handshake attempt.
struct Attempt {
    don_id: String,
    address: secp256k1::Address,
    challenge: Vec<u8>,
}

/// Tracks the connections of all configured DONs.
pub struct ConnectionManager {
    dons: HashMap<String, Arc<DonConnections>>,
    attempts: Mutex<HashMap<AttemptId, Attempt>>,
}

impl ConnectionManager {
    /// Validates the DON configs and constructs the manager, plus the runner
    /// of the dispatch loops.
    pub fn new(cfgs: &[DonConfig]) -> anyhow::Result<(Arc<Self>, Runner)> {
        let mut dons = HashMap::new();
        let mut readers = Vec::new();
        for cfg in cfgs {
            anyhow::ensure!(
                !dons.contains_key(&cfg.don_id),
                "duplicate DON id {:?}",
                cfg.don_id
            );
            let (don, don_readers) = DonConnections::new(cfg.clone())?;
            readers.extend(don_readers.into_iter().map(|(addr, recv)| NodeReader {
                don: don.clone(),
                addr,
                recv,
            }));
            dons.insert(cfg.don_id.clone(), don);
        }
        Ok((
            Arc::new(Self {
                dons,
                attempts: Mutex::new(HashMap::new()),
            }),
            Runner { readers },
        ))
    }

    /// Connections of the given DON, if it is configured.
    pub fn don(&self, don_id: &str) -> Option<&Arc<DonConnections>> {
        self.dons.get(don_id)
    }
}

impl ConnectionAcceptor for ConnectionManager {
    fn start_handshake(&self, auth: &[u8]) -> Result<(AttemptId, Vec<u8>), HandshakeError> {
        let header = AuthHeader::decode(auth).map_err(HandshakeError::MalformedAuthHeader)?;
        header.verify().map_err(HandshakeError::InvalidSignature)?;
        let don = self
            .dons
            .get(&header.don_id)
            .ok_or_else(|| HandshakeError::UnknownDon(header.don_id.clone()))?;
        if !don.nodes.contains_key(&header.sender) {
            return Err(HandshakeError::NotAMember);
        }
        let id = handshake::new_attempt_id();
        let challenge = handshake::new_challenge();
        self.attempts.lock().unwrap().insert(
            id.clone(),
            Attempt {
                don_id: header.don_id,
                address: header.sender,
                challenge: challenge.clone(),
            },
        );
        Ok((id, challenge))
    }

    fn finalize_handshake(
        &self,
        attempt: &AttemptId,
        response: &[u8],
    ) -> Result<Arc<ConnectionWrapper>, HandshakeError> {
        let att = self
            .attempts
            .lock()
            .unwrap()
            .remove(attempt)
            .ok_or(HandshakeError::UnknownAttempt)?;
        let sig: secp256k1::Signature =
            ByteFmt::decode(response).map_err(HandshakeError::InvalidSignature)?;
        sig.verify_msg(&att.challenge, &att.address)
            .map_err(HandshakeError::InvalidSignature)?;
        let don = self
            .dons
            .get(&att.don_id)
            .ok_or_else(|| HandshakeError::UnknownDon(att.don_id.clone()))?;
        don.nodes
            .get(&att.address)
            .cloned()
            .ok_or(HandshakeError::NotAMember)
    }

    fn abort_handshake(&self, attempt: &AttemptId) {
        self.attempts.lock().unwrap().remove(attempt);
    }
}

struct NodeReader {
    don: Arc<DonConnections>,
    addr: secp256k1::Address,
    recv: channel::Receiver<Vec<u8>>,
}

/// Runner of the per-node dispatch loops.
#[must_use]
pub struct Runner {
    readers: Vec<NodeReader>,
}

impl Runner {
    /// Runs a dispatch loop per configured node until the context is
    /// canceled. Per-message failures are logged and do not stop the loop.
    pub async fn run(self, ctx: &ctx::Ctx) -> anyhow::Result<()> {
        let res: ctx::Result<()> = scope::run!(ctx, |ctx, s| async {
            for reader in self.readers {
                s.spawn(async {
                    let mut reader = reader;
                    loop {
                        let Ok(raw) = reader.recv.recv(ctx).await else {
                            return Ok(());
                        };
                        match reader
                            .don
                            .dispatch_node_frame(ctx, reader.addr, &raw)
                            .await
                        {
                            Ok(()) => {
                                METRICS.node_messages[&ResultLabel::Ok].inc();
                            }
                            Err(err) => {
                                METRICS.node_messages[&ResultLabel::Err].inc();
                                tracing::info!("message from node {}: {err:#}", reader.addr);
                            }
                        };
                    }
                });
            }
            Ok(())
        })
        .await;
        match res {
            Ok(()) | Err(ctx::Error::Canceled(_)) => Ok(()),
            Err(ctx::Error::Internal(err)) => Err(err),
        }
    }
}
