use assert_matches::assert_matches;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::{SinkExt as _, StreamExt as _};
use rand::Rng as _;
use tokio_tungstenite::tungstenite::{self, http};
use zksync_concurrency::{ctx, scope, testonly::abort_on_panic, time};

use super::{
    conn::{ConnectionWrapper, WriteError},
    handshake::{
        AuthHeader, ConnectionAcceptor as _, ConnectionInitiator as _, HandshakeError,
        NodeInitiator, CHALLENGE_HEADER, ENCODED_AUTH_HEADER_MAX_LEN,
    },
    server::accept_upgrade,
};
use crate::{
    connection_manager::ConnectionManager,
    testonly::{make_don_config, ws_pipe},
};

#[test]
fn auth_header_roundtrip() {
    let ctx = ctx::test_root(&ctx::RealClock);
    let rng = &mut ctx.rng();
    let key = rng.gen::<gateway_crypto::secp256k1::SecretKey>();
    let header = AuthHeader::sign("don_a", "/node", &key).unwrap();
    let decoded = AuthHeader::decode(&header.encode().unwrap()).unwrap();
    assert_eq!(header, decoded);
    decoded.verify().unwrap();
}

#[test]
fn auth_header_tamper_detection() {
    let ctx = ctx::test_root(&ctx::RealClock);
    let rng = &mut ctx.rng();
    let key = rng.gen::<gateway_crypto::secp256k1::SecretKey>();
    let header = AuthHeader::sign("don_a", "/node", &key).unwrap();
    let mut tampered = header.clone();
    tampered.don_id = "don_b".into();
    assert!(tampered.verify().is_err());
    let mut tampered = header.clone();
    tampered.url = "/elsewhere".into();
    assert!(tampered.verify().is_err());
    let mut tampered = header;
    tampered.sender = rng.gen();
    assert!(tampered.verify().is_err());
}

#[test]
fn challenge_response_verifies() {
    let ctx = ctx::test_root(&ctx::RealClock);
    let rng = &mut ctx.rng();
    let key = rng.gen::<gateway_crypto::secp256k1::SecretKey>();
    let initiator = NodeInitiator {
        don_id: "don_a".into(),
        key: key.clone(),
    };
    let challenge = rng.gen::<[u8; 32]>();
    let response = initiator.challenge_response(&challenge).unwrap();
    let sig: gateway_crypto::secp256k1::Signature =
        gateway_crypto::ByteFmt::decode(&response).unwrap();
    sig.verify_msg(&challenge, &key.address()).unwrap();
    // Wrong-length challenges are refused outright.
    assert!(initiator.challenge_response(&challenge[..16]).is_err());
}

fn upgrade_request(auth: Option<&str>) -> http::Request<()> {
    let mut builder = http::Request::builder().method(http::Method::GET).uri("/node");
    if let Some(auth) = auth {
        builder = builder.header(http::header::AUTHORIZATION, auth);
    }
    builder.body(()).unwrap()
}

/// Sets up a manager with one DON of one node and returns it with the
/// node's key.
fn make_manager(
    rng: &mut impl rand::Rng,
) -> (
    std::sync::Arc<ConnectionManager>,
    gateway_crypto::secp256k1::SecretKey,
) {
    let key = rng.gen::<gateway_crypto::secp256k1::SecretKey>();
    let cfg = make_don_config("don_a", std::slice::from_ref(&key));
    let (manager, _runner) = ConnectionManager::new(&[cfg]).unwrap();
    (manager, key)
}

#[test]
fn upgrade_rejects_oversized_header() {
    let ctx = ctx::test_root(&ctx::RealClock);
    let rng = &mut ctx.rng();
    let (manager, _key) = make_manager(rng);
    let req = upgrade_request(Some(&"A".repeat(ENCODED_AUTH_HEADER_MAX_LEN + 1)));
    let mut resp = http::Response::new(());
    let err = accept_upgrade(manager.as_ref(), "/node", &req, &mut resp).unwrap_err();
    assert_eq!(err, http::StatusCode::BAD_REQUEST);
}

#[test]
fn upgrade_rejects_bad_base64() {
    let ctx = ctx::test_root(&ctx::RealClock);
    let rng = &mut ctx.rng();
    let (manager, _key) = make_manager(rng);
    let req = upgrade_request(Some("!!! not base64 !!!"));
    let mut resp = http::Response::new(());
    let err = accept_upgrade(manager.as_ref(), "/node", &req, &mut resp).unwrap_err();
    assert_eq!(err, http::StatusCode::BAD_REQUEST);
}

#[test]
fn upgrade_rejects_missing_header_and_bad_path() {
    let ctx = ctx::test_root(&ctx::RealClock);
    let rng = &mut ctx.rng();
    let (manager, _key) = make_manager(rng);
    let mut resp = http::Response::new(());
    let err = accept_upgrade(manager.as_ref(), "/node", &upgrade_request(None), &mut resp)
        .unwrap_err();
    assert_eq!(err, http::StatusCode::BAD_REQUEST);
    let err = accept_upgrade(
        manager.as_ref(),
        "/other",
        &upgrade_request(None),
        &mut resp,
    )
    .unwrap_err();
    assert_eq!(err, http::StatusCode::NOT_FOUND);
}

#[test]
fn upgrade_rejects_unknown_signer() {
    let ctx = ctx::test_root(&ctx::RealClock);
    let rng = &mut ctx.rng();
    let (manager, _key) = make_manager(rng);
    // Valid header signed by a key that is not a DON member.
    let other = rng.gen::<gateway_crypto::secp256k1::SecretKey>();
    let auth = AuthHeader::sign("don_a", "/node", &other)
        .unwrap()
        .encode()
        .unwrap();
    let req = upgrade_request(Some(&BASE64.encode(&auth)));
    let mut resp = http::Response::new(());
    let err = accept_upgrade(manager.as_ref(), "/node", &req, &mut resp).unwrap_err();
    assert_eq!(err, http::StatusCode::UNAUTHORIZED);
}

#[test]
fn handshake_full_flow() {
    let ctx = ctx::test_root(&ctx::RealClock);
    let rng = &mut ctx.rng();
    let (manager, key) = make_manager(rng);
    let initiator = NodeInitiator {
        don_id: "don_a".into(),
        key,
    };

    let auth = initiator.new_auth_header("/node").unwrap();
    let req = upgrade_request(Some(&BASE64.encode(&auth)));
    let mut resp = http::Response::new(());
    let attempt = accept_upgrade(manager.as_ref(), "/node", &req, &mut resp).unwrap();

    // A bad challenge response is rejected, and consumes the attempt.
    let bad = initiator.challenge_response(&vec![0u8; 32]).unwrap();
    assert_matches!(
        manager.finalize_handshake(&attempt, &bad),
        Err(HandshakeError::InvalidSignature(_))
    );
    assert_matches!(
        manager.finalize_handshake(&attempt, &bad),
        Err(HandshakeError::UnknownAttempt)
    );

    // Retry the whole flow with a correct response.
    let mut resp = http::Response::new(());
    let attempt = accept_upgrade(manager.as_ref(), "/node", &req, &mut resp).unwrap();
    let challenge = BASE64
        .decode(resp.headers().get(CHALLENGE_HEADER).unwrap().as_bytes())
        .unwrap();
    let response = initiator.challenge_response(&challenge).unwrap();
    manager.finalize_handshake(&attempt, &response).unwrap();

    // Aborted attempts cannot be finalized.
    let mut resp = http::Response::new(());
    let attempt = accept_upgrade(manager.as_ref(), "/node", &req, &mut resp).unwrap();
    manager.abort_handshake(&attempt);
    assert_matches!(
        manager.finalize_handshake(&attempt, &response),
        Err(HandshakeError::UnknownAttempt)
    );
}

#[tokio::test]
async fn wrapper_write_without_connection() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    let (wrapper, _read_recv) = ConnectionWrapper::new();
    assert_matches!(
        wrapper.write(ctx, b"data".to_vec()).await,
        Err(WriteError::NoActiveConnection)
    );
}

#[tokio::test]
async fn wrapper_pumps_frames_both_ways() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    let (wrapper, mut read_recv) = ConnectionWrapper::new();
    let (mut peer, conn) = ws_pipe().await;
    let res: ctx::Result<()> = scope::run!(ctx, |ctx, s| async {
        let conn_task = s.spawn(async { Ok(wrapper.run_connection(ctx, conn).await) });
        peer.send(tungstenite::Message::Binary(b"inbound".to_vec()))
            .await
            .unwrap();
        assert_eq!(read_recv.recv(ctx).await?, b"inbound".to_vec());
        wrapper.write(ctx, b"outbound".to_vec()).await.unwrap();
        let frame = peer.next().await.unwrap().unwrap();
        assert_eq!(frame, tungstenite::Message::Binary(b"outbound".to_vec()));
        // Closing the peer terminates run_connection with an error.
        peer.close(None).await.unwrap();
        assert!(conn_task.join(ctx).await?.is_err());
        Ok(())
    })
    .await;
    res.unwrap();
}

#[tokio::test]
async fn wrapper_reconnect_takeover() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    let (wrapper, mut read_recv) = ConnectionWrapper::new();
    let (_peer1, conn1) = ws_pipe().await;
    let (mut peer2, conn2) = ws_pipe().await;
    let res: ctx::Result<()> = scope::run!(ctx, |ctx, s| async {
        let first = s.spawn(async { Ok(wrapper.run_connection(ctx, conn1).await) });
        // Wait until the first connection is installed.
        while wrapper.write(ctx, b"probe".to_vec()).await.is_err() {
            ctx.sleep(time::Duration::milliseconds(10)).await?;
        }
        // Installing a newer connection supersedes the first one cleanly.
        let second = s.spawn(async { Ok(wrapper.run_connection(ctx, conn2).await) });
        assert!(first.join(ctx).await?.is_ok());
        // Writes now reach the second peer.
        wrapper.write(ctx, b"after".to_vec()).await.unwrap();
        let frame = peer2.next().await.unwrap().unwrap();
        assert_eq!(frame, tungstenite::Message::Binary(b"after".to_vec()));
        peer2.close(None).await.unwrap();
        assert!(second.join(ctx).await?.is_err());
        Ok(())
    })
    .await;
    res.unwrap();
    let _ = read_recv.try_recv();
}

#[tokio::test]
async fn wrapper_close_is_idempotent_and_terminal() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    let (wrapper, _read_recv) = ConnectionWrapper::new();
    let (_peer, conn) = ws_pipe().await;
    let res: ctx::Result<()> = scope::run!(ctx, |ctx, s| async {
        let conn_task = s.spawn(async { Ok(wrapper.run_connection(ctx, conn).await) });
        while wrapper.write(ctx, b"probe".to_vec()).await.is_err() {
            ctx.sleep(time::Duration::milliseconds(10)).await?;
        }
        wrapper.close().await;
        wrapper.close().await;
        assert!(conn_task.join(ctx).await?.is_ok());
        assert_matches!(
            wrapper.write(ctx, b"data".to_vec()).await,
            Err(WriteError::Shutdown)
        );
        // Running a new connection on a closed wrapper fails.
        let (_peer2, conn2) = ws_pipe().await;
        assert!(wrapper.run_connection(ctx, conn2).await.is_err());
        Ok(())
    })
    .await;
    res.unwrap();
}
