//! Challenge-response authentication of node connections.
//!
//! A node proves control of its secret key twice: once by signing the auth
//! header it presents during the WebSocket upgrade, and once by signing the
//! fresh random challenge the gateway returns in the upgrade response. The
//! second signature defeats replay of a captured upgrade request.
use std::sync::Arc;

use anyhow::Context as _;
use gateway_crypto::{secp256k1, ByteFmt};
use rand::Rng as _;
use tokio_tungstenite::tungstenite::http;

use super::conn::ConnectionWrapper;
use crate::message::DON_ID_MAX_LEN;

/// Maximal length of the base64-encoded auth header, in bytes.
pub const ENCODED_AUTH_HEADER_MAX_LEN: usize = 512;
/// Length of the random challenge sent to the node.
pub const CHALLENGE_LEN: usize = 32;
/// HTTP response header carrying the base64-encoded challenge.
pub const CHALLENGE_HEADER: &str = "challenge";

/// Opaque identifier of a pending handshake attempt.
pub type AttemptId = String;

/// Generates a fresh attempt identifier: 128 random bits, hex-encoded.
pub(crate) fn new_attempt_id() -> AttemptId {
    hex::encode(rand::rngs::OsRng.gen::<[u8; 16]>())
}

/// Generates a fresh random challenge.
pub(crate) fn new_challenge() -> Vec<u8> {
    rand::rngs::OsRng.gen::<[u8; CHALLENGE_LEN]>().to_vec()
}

/// Authentication material a node presents in the upgrade request.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthHeader {
    /// DON the node claims membership of.
    pub don_id: String,
    /// Address of the node's key.
    pub sender: secp256k1::Address,
    /// URL path of the endpoint the node dialed, bound into the signature
    /// so a header captured for one gateway cannot be presented to another.
    pub url: String,
    /// Recoverable signature over the fields above.
    pub signature: secp256k1::Signature,
}

impl AuthHeader {
    /// Byte encoding of the signed portion: `don_id` zero-padded to 64 bytes,
    /// then the 20-byte sender address, then the URL path bytes.
    fn signing_bytes(don_id: &str, sender: &secp256k1::Address, url: &str) -> anyhow::Result<Vec<u8>> {
        if don_id.is_empty() || don_id.len() > DON_ID_MAX_LEN {
            anyhow::bail!("bad don_id length: {}", don_id.len());
        }
        let mut buf = vec![0u8; DON_ID_MAX_LEN];
        buf[..don_id.len()].copy_from_slice(don_id.as_bytes());
        buf.extend_from_slice(sender.as_bytes());
        buf.extend_from_slice(url.as_bytes());
        Ok(buf)
    }

    /// Builds and signs an auth header.
    pub fn sign(don_id: &str, url: &str, key: &secp256k1::SecretKey) -> anyhow::Result<Self> {
        let sender = key.address();
        let bytes = Self::signing_bytes(don_id, &sender, url)?;
        Ok(Self {
            don_id: don_id.into(),
            sender,
            url: url.into(),
            signature: key.sign(&bytes)?,
        })
    }

    /// Encodes the header: signed portion followed by the 65-byte signature.
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let mut buf = Self::signing_bytes(&self.don_id, &self.sender, &self.url)?;
        buf.extend(ByteFmt::encode(&self.signature));
        Ok(buf)
    }

    /// Decodes and structurally validates a header. Does not verify the
    /// signature; call [`AuthHeader::verify`] separately.
    pub fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        const PREFIX_LEN: usize = DON_ID_MAX_LEN + secp256k1::ADDRESS_LENGTH;
        if bytes.len() < PREFIX_LEN + secp256k1::SIGNATURE_LENGTH {
            anyhow::bail!("auth header too short: {} bytes", bytes.len());
        }
        let (head, signature) = bytes.split_at(bytes.len() - secp256k1::SIGNATURE_LENGTH);
        let don_id_raw = &head[..DON_ID_MAX_LEN];
        let don_id_len = don_id_raw
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(DON_ID_MAX_LEN);
        let don_id = std::str::from_utf8(&don_id_raw[..don_id_len])
            .context("don_id is not utf8")?
            .to_string();
        if don_id.is_empty() {
            anyhow::bail!("empty don_id");
        }
        let sender: secp256k1::Address = ByteFmt::decode(&head[DON_ID_MAX_LEN..PREFIX_LEN])?;
        let url = std::str::from_utf8(&head[PREFIX_LEN..])
            .context("url is not utf8")?
            .to_string();
        Ok(Self {
            don_id,
            sender,
            url,
            signature: ByteFmt::decode(signature)?,
        })
    }

    /// Verifies the signature against the claimed sender address.
    pub fn verify(&self) -> anyhow::Result<()> {
        let bytes = Self::signing_bytes(&self.don_id, &self.sender, &self.url)?;
        self.signature.verify_msg(&bytes, &self.sender)
    }
}

/// Client side of the handshake.
pub trait ConnectionInitiator: Send + Sync {
    /// Produces the raw (pre-base64) auth header for the upgrade request.
    fn new_auth_header(&self, url: &str) -> anyhow::Result<Vec<u8>>;
    /// Produces the response to the server's challenge: the first binary
    /// frame sent after the upgrade.
    fn challenge_response(&self, challenge: &[u8]) -> anyhow::Result<Vec<u8>>;
}

/// Standard node-side initiator: signs with the node key.
pub struct NodeInitiator {
    /// DON the node belongs to.
    pub don_id: String,
    /// Node secret key.
    pub key: secp256k1::SecretKey,
}

impl ConnectionInitiator for NodeInitiator {
    fn new_auth_header(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        AuthHeader::sign(&self.don_id, url, &self.key)?.encode()
    }

    fn challenge_response(&self, challenge: &[u8]) -> anyhow::Result<Vec<u8>> {
        if challenge.len() != CHALLENGE_LEN {
            anyhow::bail!("unexpected challenge length: {}", challenge.len());
        }
        Ok(ByteFmt::encode(&self.key.sign(challenge)?))
    }
}

/// Errors rejecting a handshake attempt.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// The auth header failed structural decoding.
    #[error("malformed auth header: {0:#}")]
    MalformedAuthHeader(#[source] anyhow::Error),
    /// A signature did not verify.
    #[error("invalid signature: {0:#}")]
    InvalidSignature(#[source] anyhow::Error),
    /// The claimed DON is not served by this gateway.
    #[error("unknown DON: {0:?}")]
    UnknownDon(String),
    /// The claimed address is not a member of the claimed DON.
    #[error("address is not a DON member")]
    NotAMember,
    /// The attempt id does not match any pending handshake.
    #[error("unknown handshake attempt")]
    UnknownAttempt,
}

impl HandshakeError {
    /// HTTP status the upgrade request is rejected with.
    pub fn http_status(&self) -> http::StatusCode {
        match self {
            Self::MalformedAuthHeader(_) => http::StatusCode::BAD_REQUEST,
            Self::InvalidSignature(_)
            | Self::UnknownDon(_)
            | Self::NotAMember
            | Self::UnknownAttempt => http::StatusCode::UNAUTHORIZED,
        }
    }
}

/// Server side of the handshake, implemented by the connection manager.
pub trait ConnectionAcceptor: Send + Sync {
    /// Validates the decoded auth header and opens a handshake attempt.
    /// Returns the attempt id and the challenge to send back.
    fn start_handshake(&self, auth: &[u8]) -> Result<(AttemptId, Vec<u8>), HandshakeError>;
    /// Verifies the challenge response and resolves the attempt to the
    /// connection wrapper of the authenticated node.
    fn finalize_handshake(
        &self,
        attempt: &AttemptId,
        response: &[u8],
    ) -> Result<Arc<ConnectionWrapper>, HandshakeError>;
    /// Discards a pending attempt that will not be finalized.
    fn abort_handshake(&self, attempt: &AttemptId);
}
