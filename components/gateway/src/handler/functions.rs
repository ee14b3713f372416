//! Functions handler: fan-out with an acknowledgement quorum.
use std::{
    collections::hash_map::Entry,
    collections::HashMap,
    sync::{Arc, Mutex},
};

use anyhow::Context as _;
use gateway_crypto::secp256k1;
use zksync_concurrency::{ctx, oneshot};

use super::{Handler, UserCallbackPayload};
use crate::{
    connection_manager::MessageSender,
    message::{Message, MessageBody},
};

/// Number of node acknowledgements required to report success to the user.
const REQUIRED_ACKS: usize = 2;

/// Method name of the synthetic response sent once the quorum is reached.
const ACK_METHOD: &str = "ack";

struct Pending {
    callback: oneshot::Sender<UserCallbackPayload>,
    /// `message_id` of the originating user message.
    message_id: String,
    don_id: String,
    acks: usize,
}

/// Tracks requests by the `request_id` field of their payload and completes
/// the user callback with a synthetic `"ack"` response once [`REQUIRED_ACKS`]
/// members have acknowledged the request.
pub struct FunctionsHandler {
    don: Arc<dyn MessageSender>,
    pending: Mutex<HashMap<String, Pending>>,
}

impl FunctionsHandler {
    /// Constructs a handler sending through `don`.
    pub fn new(don: Arc<dyn MessageSender>) -> Self {
        Self {
            don,
            pending: Mutex::new(HashMap::new()),
        }
    }
}

/// Extracts the `request_id` string from a message payload.
fn request_id(msg: &Message) -> anyhow::Result<String> {
    Ok(msg
        .body
        .payload
        .get("request_id")
        .context("payload without request_id")?
        .as_str()
        .context("request_id is not a string")?
        .to_string())
}

#[async_trait::async_trait]
impl Handler for FunctionsHandler {
    async fn handle_user_message(
        &self,
        ctx: &ctx::Ctx,
        msg: Message,
        callback: oneshot::Sender<UserCallbackPayload>,
    ) -> anyhow::Result<()> {
        let id = request_id(&msg)?;
        match self.pending.lock().unwrap().entry(id) {
            Entry::Occupied(entry) => {
                anyhow::bail!("request {:?} is already in flight", entry.key())
            }
            Entry::Vacant(entry) => entry.insert(Pending {
                callback,
                message_id: msg.body.message_id.clone(),
                don_id: msg.body.don_id.clone(),
                acks: 0,
            }),
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
        let id = request_id(&msg)?;
        let mut pending = self.pending.lock().unwrap();
        // Acks for unknown (e.g. already completed) requests are dropped.
        let Entry::Occupied(mut entry) = pending.entry(id) else {
            return Ok(());
        };
        entry.get_mut().acks += 1;
        if entry.get().acks < REQUIRED_ACKS {
            return Ok(());
        }
        let done = entry.remove();
        let ack = Message {
            signature: String::new(),
            body: MessageBody {
                message_id: done.message_id,
                method: ACK_METHOD.into(),
                don_id: done.don_id,
                sender: String::new(),
                payload: serde_json::Value::Null,
            },
        };
        let _ = done.callback.send(UserCallbackPayload::ok(ack));
        Ok(())
    }

    fn cancel_user_message(&self, msg: &Message) {
        // A message which failed request_id extraction never got tracked.
        if let Ok(id) = request_id(msg) {
            self.pending.lock().unwrap().remove(&id);
        }
    }
}
