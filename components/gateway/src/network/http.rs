//! HTTP server for user requests.
//!
//! Accepts signed JSON-RPC messages over `POST {path}`, routes them to the
//! handler of the addressed DON and replies with the handler's callback
//! payload. Serves a fixed health probe on `GET /health`.
use std::sync::Arc;

use anyhow::Context as _;
use http_body_util::{BodyExt as _, Full, Limited};
use hyper::{body::Bytes, server::conn::http1, service::service_fn, Method, Request, Response,
    StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use tls_listener::TlsListener;
use zksync_concurrency::{ctx, oneshot, scope};

use super::{tls_acceptor, Listener};
use crate::{
    codec::{self, ErrorCode},
    config::HttpServerConfig,
    connection_manager::ConnectionManager,
    handler::UserCallbackPayload,
    metrics::{ResultLabel, METRICS},
};

/// Path of the health probe endpoint.
pub const HEALTH_PATH: &str = "/health";

/// HTTP server for user requests.
pub(crate) struct UserServer {
    cfg: HttpServerConfig,
    content_type: hyper::header::HeaderValue,
    manager: Arc<ConnectionManager>,
}

impl UserServer {
    pub(crate) fn new(
        cfg: HttpServerConfig,
        manager: Arc<ConnectionManager>,
    ) -> anyhow::Result<Self> {
        let content_type = hyper::header::HeaderValue::from_str(&cfg.content_type)
            .context("content_type")?;
        Ok(Self {
            cfg,
            content_type,
            manager,
        })
    }

    /// Runs the accept loop until the context is canceled, then drains
    /// in-flight connections.
    pub(crate) async fn run(&self, ctx: &ctx::Ctx) -> anyhow::Result<()> {
        let listener = self.cfg.addr.bind(false).context("addr.bind()")?;
        match &self.cfg.tls {
            Some(tls) => {
                let acceptor = tls_acceptor(tls)?;
                self.run_with_listener(ctx, TlsListener::new(acceptor, listener))
                    .await
            }
            None => self.run_with_listener(ctx, listener).await,
        }
    }

    async fn run_with_listener<L: Listener>(
        &self,
        ctx: &ctx::Ctx,
        mut listener: L,
    ) -> anyhow::Result<()> {
        let graceful = hyper_util::server::graceful::GracefulShutdown::new();
        let mut http = http1::Builder::new();
        http.timer(TokioTimer::new())
            .header_read_timeout(std::time::Duration::try_from(self.cfg.read_timeout)?);

        scope::run!(ctx, |ctx, s| async {
            while let Ok(res) = ctx.wait(listener.accept()).await {
                match res {
                    Ok(stream) => {
                        let io = TokioIo::new(stream);
                        let conn =
                            http.serve_connection(io, service_fn(|req| self.handle(ctx, req)));
                        let fut = graceful.watch(conn);
                        s.spawn_bg(async {
                            if let Err(err) = fut.await {
                                tracing::info!("serving user connection: {err:#}");
                            }
                            Ok(())
                        });
                    }
                    Err(err) => {
                        tracing::info!("accepting user connection: {err:#}");
                        continue;
                    }
                }
            }
            // Bounded drain of in-flight requests.
            let _ = tokio::time::timeout(
                std::time::Duration::try_from(self.cfg.write_timeout)?,
                graceful.shutdown(),
            )
            .await;
            Ok(())
        })
        .await
    }

    async fn handle(
        &self,
        ctx: &ctx::Ctx,
        req: Request<hyper::body::Incoming>,
    ) -> anyhow::Result<Response<Full<Bytes>>> {
        if req.method() == Method::GET && req.uri().path() == HEALTH_PATH {
            return Ok(Response::new(Full::new(Bytes::from_static(b"OK"))));
        }
        if req.method() != Method::POST || req.uri().path() != self.cfg.path {
            let mut resp = Response::new(Full::default());
            *resp.status_mut() = StatusCode::NOT_FOUND;
            return Ok(resp);
        }
        let body = match Limited::new(req.into_body(), self.cfg.max_request_bytes)
            .collect()
            .await
        {
            Ok(collected) => collected.to_bytes(),
            Err(_) => {
                let mut resp = Response::new(Full::default());
                *resp.status_mut() = StatusCode::PAYLOAD_TOO_LARGE;
                return Ok(resp);
            }
        };

        let started = std::time::Instant::now();
        let ctx = &ctx.with_timeout(self.cfg.request_timeout);
        let (status, payload) = self.handle_user_call(ctx, &body).await;
        METRICS.user_request_latency.observe(started.elapsed());
        let label = if status.is_success() {
            ResultLabel::Ok
        } else {
            ResultLabel::Err
        };
        METRICS.user_requests[&label].inc();

        let mut resp = Response::new(Full::new(Bytes::from(payload)));
        *resp.status_mut() = status;
        resp.headers_mut()
            .insert(hyper::header::CONTENT_TYPE, self.content_type.clone());
        Ok(resp)
    }

    /// Runs the user-call pipeline: decode, validate, dispatch to the DON's
    /// handler, await the callback. Every outcome maps to a JSON-RPC body.
    async fn handle_user_call(&self, ctx: &ctx::Ctx, raw: &[u8]) -> (StatusCode, Vec<u8>) {
        let msg = match codec::decode_request(raw) {
            Ok(msg) => msg,
            Err(err) => {
                return error_response(
                    "",
                    StatusCode::BAD_REQUEST,
                    ErrorCode::UserMessageParseError,
                    &format!("{err:#}"),
                );
            }
        };
        let id = msg.body.message_id.clone();
        if let Err(err) = msg.validate() {
            return error_response(
                &id,
                StatusCode::BAD_REQUEST,
                ErrorCode::UserMessageParseError,
                &format!("{err:#}"),
            );
        }
        let Some(don) = self.manager.don(&msg.body.don_id) else {
            return error_response(
                &id,
                StatusCode::BAD_REQUEST,
                ErrorCode::UserMessageParseError,
                &format!("unsupported DON: {:?}", msg.body.don_id),
            );
        };
        let handler = match don.handler() {
            Ok(handler) => handler,
            Err(err) => {
                return error_response(
                    &id,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::FatalError,
                    &format!("{err:#}"),
                );
            }
        };
        let (send, recv) = oneshot::channel();
        if let Err(err) = handler.handle_user_message(ctx, msg.clone(), send).await {
            return error_response(
                &id,
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::FatalError,
                &format!("{err:#}"),
            );
        }
        match recv.recv_or_disconnected(ctx).await {
            Ok(Ok(payload)) => callback_response(&id, payload),
            Ok(Err(_)) => error_response(
                &id,
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::FatalError,
                "handler dropped the request",
            ),
            Err(ctx::Canceled) => {
                // The callback will never be awaited again, so the handler
                // must not keep state for it.
                handler.cancel_user_message(&msg);
                error_response(
                    &id,
                    StatusCode::GATEWAY_TIMEOUT,
                    ErrorCode::FatalError,
                    "request timed out",
                )
            }
        }
    }
}

fn callback_response(id: &str, payload: UserCallbackPayload) -> (StatusCode, Vec<u8>) {
    match payload.err_code {
        ErrorCode::NoError => match codec::encode_response(&payload.msg) {
            Ok(body) => (StatusCode::OK, body),
            Err(err) => error_response(
                id,
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::FatalError,
                &format!("encoding response: {err:#}"),
            ),
        },
        code => {
            let status = match code {
                ErrorCode::UserMessageParseError => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            error_response(id, status, code, &payload.err_msg)
        }
    }
}

fn error_response(
    id: &str,
    status: StatusCode,
    code: ErrorCode,
    message: &str,
) -> (StatusCode, Vec<u8>) {
    let body = codec::encode_new_error_response(id, code, message, serde_json::Value::Null)
        // Serializing a flat struct of strings cannot fail.
        .unwrap_or_default();
    (status, body)
}
