//! Gateway relaying signed JSON-RPC messages between users and DON
//! (Decentralized Oracle Network) nodes.
//!
//! Users talk plain HTTP; nodes keep long-lived WebSocket connections
//! authenticated by a challenge-response handshake. Per-DON handlers define
//! what a request means and when it is complete.
use std::sync::Arc;

use anyhow::Context as _;
use zksync_concurrency::{ctx, scope};

pub mod codec;
mod config;
pub mod connection_manager;
pub mod handler;
pub mod message;
mod metrics;
pub mod network;
pub mod testonly;

pub use config::*;

use crate::{
    connection_manager::ConnectionManager,
    handler::HandlerRegistry,
    network::{http::UserServer, server::NodeServer},
};

/// Gateway state observable from outside.
pub struct Gateway {
    cfg: GatewayConfig,
    manager: Arc<ConnectionManager>,
}

/// Runner of the gateway background tasks.
#[must_use]
pub struct Runner {
    gateway: Arc<Gateway>,
    manager_runner: connection_manager::Runner,
}

impl Gateway {
    /// Validates the config, constructs the per-DON connection state and
    /// wires the handlers. Call [`Runner::run`] to serve.
    pub fn new(cfg: GatewayConfig, registry: &HandlerRegistry) -> anyhow::Result<(Arc<Self>, Runner)> {
        hyper::header::HeaderValue::from_str(&cfg.user_server.content_type)
            .context("user_server.content_type")?;
        let (manager, manager_runner) = ConnectionManager::new(&cfg.dons)?;
        for don_cfg in &cfg.dons {
            let don = manager
                .don(&don_cfg.don_id)
                .context("DON missing after construction")?
                .clone();
            let handler = registry.new_handler(don_cfg, don.clone())?;
            don.set_handler(handler)?;
        }
        let gateway = Arc::new(Self { cfg, manager });
        Ok((
            gateway.clone(),
            Runner {
                gateway,
                manager_runner,
            },
        ))
    }

    /// Connection manager of this gateway.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }
}

impl Runner {
    /// Runs the user HTTP server, the node WebSocket server and the message
    /// dispatch loops until the context is canceled.
    pub async fn run(self, ctx: &ctx::Ctx) -> anyhow::Result<()> {
        let user_server = UserServer::new(
            self.gateway.cfg.user_server.clone(),
            self.gateway.manager.clone(),
        )
        .context("user_server")?;
        let node_server = NodeServer::new(
            self.gateway.cfg.node_server.clone(),
            self.gateway.manager.clone(),
        );
        let manager_runner = self.manager_runner;
        let res: ctx::Result<()> = scope::run!(ctx, |ctx, s| async {
            s.spawn(async {
                manager_runner
                    .run(ctx)
                    .await
                    .context("connection_manager")?;
                Ok(())
            });
            s.spawn(async {
                user_server.run(ctx).await.context("user_server")?;
                Ok(())
            });
            s.spawn(async {
                node_server.run(ctx).await.context("node_server")?;
                Ok(())
            });
            Ok(())
        })
        .await;
        match res {
            Ok(()) | Err(ctx::Error::Canceled(_)) => Ok(()),
            Err(ctx::Error::Internal(err)) => Err(err),
        }
    }
}
