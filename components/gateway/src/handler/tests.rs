use zksync_concurrency::{ctx, oneshot, scope};

use super::*;
use crate::{
    codec::ErrorCode,
    testonly::{signed_message, RecordingSender},
};

const DON: &str = "don_test";

fn make_keys(rng: &mut impl rand::Rng, n: usize) -> Vec<gateway_crypto::secp256k1::SecretKey> {
    (0..n).map(|_| rng.gen()).collect()
}

#[tokio::test]
async fn dummy_fans_out_and_first_response_wins() {
    zksync_concurrency::testonly::abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    let rng = &mut ctx.rng();
    let keys = make_keys(rng, 3);
    let sender = RecordingSender::new(keys.iter().map(|k| k.address()).collect());
    let handler = DummyHandler::new(sender.clone());

    let msg = signed_message(rng, DON, &keys[0]);
    let (send, recv) = oneshot::channel();
    handler
        .handle_user_message(ctx, msg.clone(), send)
        .await
        .unwrap();
    // Fan-out reached every member.
    let sent = sender.sent();
    assert_eq!(sent.len(), 3);
    for (i, key) in keys.iter().enumerate() {
        assert_eq!(sent[i].0, key.address());
        assert_eq!(sent[i].1, msg);
    }

    // First node response completes the callback.
    let resp = signed_message(rng, DON, &keys[1]);
    let mut resp = resp;
    resp.body.message_id = msg.body.message_id.clone();
    handler
        .handle_node_message(ctx, resp.clone(), keys[1].address())
        .await
        .unwrap();
    let payload = recv.recv_or_disconnected(ctx).await.unwrap().unwrap();
    assert_eq!(payload.err_code, ErrorCode::NoError);
    assert_eq!(payload.msg.body.message_id, msg.body.message_id);

    // A second response for the same id is silently dropped.
    handler
        .handle_node_message(ctx, resp, keys[2].address())
        .await
        .unwrap();
}

#[tokio::test]
async fn dummy_rejects_duplicate_inflight_id() {
    zksync_concurrency::testonly::abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    let rng = &mut ctx.rng();
    let keys = make_keys(rng, 1);
    let sender = RecordingSender::new(vec![keys[0].address()]);
    let handler = DummyHandler::new(sender);

    let msg = signed_message(rng, DON, &keys[0]);
    let (send1, _recv1) = oneshot::channel();
    handler
        .handle_user_message(ctx, msg.clone(), send1)
        .await
        .unwrap();
    let (send2, _recv2) = oneshot::channel();
    assert!(handler.handle_user_message(ctx, msg, send2).await.is_err());
}

#[tokio::test]
async fn functions_requires_two_acks() {
    zksync_concurrency::testonly::abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    let rng = &mut ctx.rng();
    let keys = make_keys(rng, 3);
    let sender = RecordingSender::new(keys.iter().map(|k| k.address()).collect());
    let handler = FunctionsHandler::new(sender.clone());

    let mut msg = signed_message(rng, DON, &keys[0]);
    msg.body.payload = serde_json::json!({ "request_id": "req_1" });
    let (send, recv) = oneshot::channel();
    handler
        .handle_user_message(ctx, msg.clone(), send)
        .await
        .unwrap();
    assert_eq!(sender.sent().len(), 3);

    let mut ack = signed_message(rng, DON, &keys[1]);
    ack.body.payload = serde_json::json!({ "request_id": "req_1" });

    let res: ctx::Result<()> = scope::run!(ctx, |ctx, s| async {
        s.spawn_bg(async {
            // One ack is not enough.
            handler
                .handle_node_message(ctx, ack.clone(), keys[1].address())
                .await
                .unwrap();
            handler
                .handle_node_message(ctx, ack.clone(), keys[2].address())
                .await
                .unwrap();
            Ok(())
        });
        let payload = recv.recv_or_disconnected(ctx).await?.unwrap();
        assert_eq!(payload.err_code, ErrorCode::NoError);
        assert_eq!(payload.msg.body.method, "ack");
        assert_eq!(payload.msg.body.message_id, msg.body.message_id);
        Ok(())
    })
    .await;
    res.unwrap();
}

#[tokio::test]
async fn dummy_cancel_frees_pending_state() {
    zksync_concurrency::testonly::abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    let rng = &mut ctx.rng();
    let keys = make_keys(rng, 1);
    let sender = RecordingSender::new(vec![keys[0].address()]);
    let handler = DummyHandler::new(sender);

    let msg = signed_message(rng, DON, &keys[0]);
    let (send, _recv) = oneshot::channel();
    handler
        .handle_user_message(ctx, msg.clone(), send)
        .await
        .unwrap();
    handler.cancel_user_message(&msg);

    // A late node response finds nothing to complete.
    handler
        .handle_node_message(ctx, msg.clone(), keys[0].address())
        .await
        .unwrap();
    // The message id is free again.
    let (send, _recv) = oneshot::channel();
    handler.handle_user_message(ctx, msg, send).await.unwrap();
}

#[tokio::test]
async fn functions_cancel_frees_pending_state() {
    zksync_concurrency::testonly::abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    let rng = &mut ctx.rng();
    let keys = make_keys(rng, 1);
    let sender = RecordingSender::new(vec![keys[0].address()]);
    let handler = FunctionsHandler::new(sender);

    let mut msg = signed_message(rng, DON, &keys[0]);
    msg.body.payload = serde_json::json!({ "request_id": "req_1" });
    let (send, _recv) = oneshot::channel();
    handler
        .handle_user_message(ctx, msg.clone(), send)
        .await
        .unwrap();
    handler.cancel_user_message(&msg);

    // The request id is free again.
    let (send, _recv) = oneshot::channel();
    handler.handle_user_message(ctx, msg, send).await.unwrap();
}

#[tokio::test]
async fn functions_rejects_payload_without_request_id() {
    zksync_concurrency::testonly::abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    let rng = &mut ctx.rng();
    let keys = make_keys(rng, 1);
    let sender = RecordingSender::new(vec![keys[0].address()]);
    let handler = FunctionsHandler::new(sender);

    let msg = signed_message(rng, DON, &keys[0]);
    let (send, _recv) = oneshot::channel();
    assert!(handler.handle_user_message(ctx, msg, send).await.is_err());
}

#[test]
fn registry_rejects_unknown_handler_type() {
    let registry = HandlerRegistry::default();
    let mut cfg = crate::testonly::make_don_config("don_x", &[]);
    cfg.handler_name = "no_such_handler".into();
    let sender = RecordingSender::new(vec![]);
    assert!(registry.new_handler(&cfg, sender).is_err());
}
