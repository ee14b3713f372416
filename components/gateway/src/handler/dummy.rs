//! Pass-through handler: fan-out to all members, first response wins.
use std::{
    collections::hash_map::Entry,
    collections::HashMap,
    sync::{Arc, Mutex},
};

use gateway_crypto::secp256k1;
use zksync_concurrency::{ctx, oneshot};

use super::{Handler, UserCallbackPayload};
use crate::{connection_manager::MessageSender, message::Message};

/// Forwards every user message verbatim to all DON members and completes the
/// user callback with the first node response carrying the same message id.
pub struct DummyHandler {
    don: Arc<dyn MessageSender>,
    pending: Mutex<HashMap<String, oneshot::Sender<UserCallbackPayload>>>,
}

impl DummyHandler {
    /// Constructs a handler sending through `don`.
    pub fn new(don: Arc<dyn MessageSender>) -> Self {
        Self {
            don,
            pending: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait::async_trait]
impl Handler for DummyHandler {
    async fn handle_user_message(
        &self,
        ctx: &ctx::Ctx,
        msg: Message,
        callback: oneshot::Sender<UserCallbackPayload>,
    ) -> anyhow::Result<()> {
        match self
            .pending
            .lock()
            .unwrap()
            .entry(msg.body.message_id.clone())
        {
            Entry::Occupied(_) => {
                anyhow::bail!("message {:?} is already in flight", msg.body.message_id)
            }
            Entry::Vacant(entry) => entry.insert(callback),
        };
        for addr in self.don.members() {
            if let Err(err) = self.don.send_to_node(ctx, &addr, &msg).await {
                tracing::info!("send_to_node({addr}): {err:#}");
            }
        }
        Ok(())
    }

    async fn handle_node_message(
        &self,
        _ctx: &ctx::Ctx,
        msg: Message,
        _addr: secp256k1::Address,
    ) -> anyhow::Result<()> {
        // First response wins; the rest are dropped here.
        let Some(callback) = self.pending.lock().unwrap().remove(&msg.body.message_id) else {
            return Ok(());
        };
        let _ = callback.send(UserCallbackPayload::ok(msg));
        Ok(())
    }

    fn cancel_user_message(&self, msg: &Message) {
        self.pending.lock().unwrap().remove(&msg.body.message_id);
    }
}
