//! Pluggable per-DON message handlers.
//!
//! A handler owns the application semantics of one DON: what to do with a
//! user request, and how node responses complete it. The transport hands it
//! validated messages only.
use std::{collections::HashMap, sync::Arc};

use anyhow::Context as _;
use gateway_crypto::secp256k1;
use zksync_concurrency::{ctx, oneshot};

use crate::{
    codec::ErrorCode,
    config::DonConfig,
    connection_manager::MessageSender,
    message::Message,
};

mod dummy;
mod functions;
#[cfg(test)]
mod tests;

pub use dummy::DummyHandler;
pub use functions::FunctionsHandler;

/// Terminal outcome of a user request, delivered through the callback.
#[derive(Debug)]
pub struct UserCallbackPayload {
    /// Response message for the user. Meaningful only when `err_code` is
    /// [`ErrorCode::NoError`].
    pub msg: Message,
    /// Outcome code.
    pub err_code: ErrorCode,
    /// Human-readable error description when `err_code` is not `NoError`.
    pub err_msg: String,
}

impl UserCallbackPayload {
    /// Successful outcome carrying a response message.
    pub fn ok(msg: Message) -> Self {
        Self {
            msg,
            err_code: ErrorCode::NoError,
            err_msg: String::new(),
        }
    }
}

/// Application logic of a DON.
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    /// Handles a validated user message. The handler must eventually complete
    /// `callback` exactly once; dropping it reports an internal error to the
    /// user.
    async fn handle_user_message(
        &self,
        ctx: &ctx::Ctx,
        msg: Message,
        callback: oneshot::Sender<UserCallbackPayload>,
    ) -> anyhow::Result<()>;

    /// Handles a validated message from the DON member at `addr`.
    async fn handle_node_message(
        &self,
        ctx: &ctx::Ctx,
        msg: Message,
        addr: secp256k1::Address,
    ) -> anyhow::Result<()>;

    /// Drops any pending state for a user message whose callback will never
    /// be awaited again. Called when the request deadline expires.
    fn cancel_user_message(&self, msg: &Message);
}

type Constructor =
    Box<dyn Fn(&DonConfig, Arc<dyn MessageSender>) -> anyhow::Result<Arc<dyn Handler>> + Send + Sync>;

/// Registry of handler constructors, keyed by the handler-type name used in
/// DON configs.
pub struct HandlerRegistry {
    constructors: HashMap<String, Constructor>,
}

impl Default for HandlerRegistry {
    /// Registry with the built-in handler types: `"dummy"` and `"functions"`.
    fn default() -> Self {
        let mut this = Self::empty();
        this.register("dummy", |_, don| Ok(Arc::new(DummyHandler::new(don))));
        this.register("functions", |_, don| {
            Ok(Arc::new(FunctionsHandler::new(don)))
        });
        this
    }
}

impl HandlerRegistry {
    /// Registry with no handler types registered.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registers a handler constructor under `name`, replacing any previous
    /// registration.
    pub fn register(
        &mut self,
        name: &str,
        constructor: impl Fn(&DonConfig, Arc<dyn MessageSender>) -> anyhow::Result<Arc<dyn Handler>>
            + Send
            + Sync
            + 'static,
    ) {
        self.constructors.insert(name.into(), Box::new(constructor));
    }

    /// Constructs a handler for the given DON config.
    pub fn new_handler(
        &self,
        cfg: &DonConfig,
        don: Arc<dyn MessageSender>,
    ) -> anyhow::Result<Arc<dyn Handler>> {
        let constructor = self
            .constructors
            .get(&cfg.handler_name)
            .with_context(|| format!("unknown handler type {:?}", cfg.handler_name))?;
        constructor(cfg, don)
            .with_context(|| format!("constructing {:?} handler", cfg.handler_name))
    }
}
