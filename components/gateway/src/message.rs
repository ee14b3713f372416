//! Signed message envelope exchanged between users, the gateway and DON nodes.
//!
//! The signature covers a deterministic byte encoding of the body, so any
//! party holding the message can recover the signer's address and check it
//! against the `sender` field without out-of-band key distribution.
use anyhow::Context as _;
use gateway_crypto::{secp256k1, ByteFmt, Text, TextFmt};
use serde::{Deserialize, Serialize};

/// Maximal length of [`MessageBody::message_id`], in bytes.
pub const MESSAGE_ID_MAX_LEN: usize = 128;
/// Maximal length of [`MessageBody::method`], in bytes.
pub const METHOD_MAX_LEN: usize = 64;
/// Maximal length of [`MessageBody::don_id`], in bytes.
pub const DON_ID_MAX_LEN: usize = 64;
/// Length of a hex-encoded 65-byte signature with the `0x` prefix.
pub const SIGNATURE_HEX_LEN: usize = 132;
/// Length of a hex-encoded 20-byte address with the `0x` prefix.
pub const SENDER_HEX_LEN: usize = 42;

/// Message envelope: a body plus a recoverable signature over its
/// deterministic encoding.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Hex-encoded 65-byte `[R‖S‖V]` signature over [`MessageBody::signing_bytes`].
    pub signature: String,
    /// Signed payload.
    pub body: MessageBody,
}

/// Body of a [`Message`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageBody {
    /// Client-chosen request identifier, unique per sender.
    pub message_id: String,
    /// Name of the operation this message requests or responds to.
    pub method: String,
    /// Identifier of the DON this message is addressed to.
    pub don_id: String,
    /// Hex-encoded address of the signer. Must match the address recovered
    /// from the signature; validation rejects the message otherwise.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sender: String,
    /// Method-specific payload. `Null` stands for "no payload".
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl MessageBody {
    /// Checks field presence and length limits. Run before signing or
    /// verifying; the signing encoding is only well-defined for valid bodies.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.message_id.is_empty() {
            anyhow::bail!("empty message_id");
        }
        if self.message_id.len() > MESSAGE_ID_MAX_LEN {
            anyhow::bail!("message_id too long: {} bytes", self.message_id.len());
        }
        if self.method.is_empty() {
            anyhow::bail!("empty method");
        }
        if self.method.len() > METHOD_MAX_LEN {
            anyhow::bail!("method too long: {} bytes", self.method.len());
        }
        if self.don_id.is_empty() {
            anyhow::bail!("empty don_id");
        }
        if self.don_id.len() > DON_ID_MAX_LEN {
            anyhow::bail!("don_id too long: {} bytes", self.don_id.len());
        }
        if !self.sender.is_empty() && self.sender.len() != SENDER_HEX_LEN {
            anyhow::bail!("unexpected sender length: {}", self.sender.len());
        }
        Ok(())
    }

    /// Deterministic byte encoding covered by the signature:
    /// `message_id` zero-padded to 128 bytes, `method` to 64, `don_id` to 64,
    /// followed by the canonical JSON encoding of `payload` (serde_json
    /// serializes object keys in sorted order). `sender` is deliberately
    /// excluded, since it is derived from the signature itself.
    pub fn signing_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let mut buf =
            Vec::with_capacity(MESSAGE_ID_MAX_LEN + METHOD_MAX_LEN + DON_ID_MAX_LEN + 256);
        buf.extend(padded(&self.message_id, MESSAGE_ID_MAX_LEN).context("message_id")?);
        buf.extend(padded(&self.method, METHOD_MAX_LEN).context("method")?);
        buf.extend(padded(&self.don_id, DON_ID_MAX_LEN).context("don_id")?);
        if !self.payload.is_null() {
            buf.extend(serde_json::to_vec(&self.payload).context("payload")?);
        }
        Ok(buf)
    }
}

impl Message {
    /// Signs `body` with `key`, filling in `signature` and `sender`.
    pub fn sign(mut body: MessageBody, key: &secp256k1::SecretKey) -> anyhow::Result<Self> {
        body.validate()?;
        let sig = key.sign(&body.signing_bytes()?)?;
        body.sender = TextFmt::encode(&key.address());
        Ok(Self {
            signature: format!("0x{}", hex::encode(ByteFmt::encode(&sig))),
            body,
        })
    }

    /// Validates the message and verifies its signature.
    ///
    /// Recovers the signer's address from the signature and requires the
    /// claimed `sender` to match it, so tampering with either field is
    /// rejected. Returns the signer's address.
    pub fn validate(&self) -> anyhow::Result<secp256k1::Address> {
        self.body.validate()?;
        let signer = self.verify_signature()?;
        let claimed: secp256k1::Address = Text::new(&self.body.sender)
            .decode()
            .context("decoding sender")?;
        anyhow::ensure!(
            claimed == signer,
            "sender {claimed} does not match the signer {signer}"
        );
        Ok(signer)
    }

    /// Verifies the signature against the body without mutating the message.
    pub fn verify_signature(&self) -> anyhow::Result<secp256k1::Address> {
        if self.signature.len() != SIGNATURE_HEX_LEN {
            anyhow::bail!("unexpected signature length: {}", self.signature.len());
        }
        let raw = self
            .signature
            .strip_prefix("0x")
            .context("signature is not 0x-prefixed")?;
        let sig: secp256k1::Signature =
            ByteFmt::decode(&hex::decode(raw).context("signature is not hex")?)?;
        let bytes = self.body.signing_bytes()?;
        let signer = sig.recover(&bytes).context("signer recovery")?.address();
        sig.verify_msg(&bytes, &signer).context("verification")?;
        Ok(signer)
    }
}

fn padded(field: &str, max: usize) -> anyhow::Result<Vec<u8>> {
    if field.len() > max {
        anyhow::bail!("field too long: {} > {max} bytes", field.len());
    }
    let mut buf = vec![0u8; max];
    buf[..field.len()].copy_from_slice(field.as_bytes());
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use gateway_crypto::secp256k1::SecretKey;
    use rand::Rng as _;
    use zksync_concurrency::ctx;

    use super::*;

    fn make_body() -> MessageBody {
        MessageBody {
            message_id: "abcd".into(),
            method: "request".into(),
            don_id: "don_1".into(),
            sender: String::new(),
            payload: serde_json::json!({"key": "value", "nested": {"a": 1}}),
        }
    }

    #[test]
    fn sign_then_validate() {
        let ctx = ctx::test_root(&ctx::RealClock);
        let rng = &mut ctx.rng();
        let key: SecretKey = rng.gen();
        let msg = Message::sign(make_body(), &key).unwrap();
        assert_eq!(msg.signature.len(), SIGNATURE_HEX_LEN);
        assert_eq!(msg.body.sender.len(), SENDER_HEX_LEN);
        let signer = msg.validate().unwrap();
        assert_eq!(signer, key.address());
        assert_eq!(msg.body.sender, TextFmt::encode(&key.address()));
    }

    #[test]
    fn tampered_body_fails_validation() {
        let ctx = ctx::test_root(&ctx::RealClock);
        let rng = &mut ctx.rng();
        let key: SecretKey = rng.gen();
        let mut msg = Message::sign(make_body(), &key).unwrap();
        msg.body.method = "different".into();
        assert!(msg.validate().is_err());
    }

    #[test]
    fn tampered_sender_fails_validation() {
        let ctx = ctx::test_root(&ctx::RealClock);
        let rng = &mut ctx.rng();
        let key: SecretKey = rng.gen();

        // Flipping a single hex digit of the sender.
        let mut msg = Message::sign(make_body(), &key).unwrap();
        let mut sender = std::mem::take(&mut msg.body.sender).into_bytes();
        let last = sender.last_mut().unwrap();
        *last = if *last == b'0' { b'1' } else { b'0' };
        msg.body.sender = String::from_utf8(sender).unwrap();
        assert!(msg.validate().is_err());

        // Replacing the sender with a different well-formed address.
        let mut msg = Message::sign(make_body(), &key).unwrap();
        msg.body.sender = TextFmt::encode(&rng.gen::<gateway_crypto::secp256k1::Address>());
        assert!(msg.validate().is_err());

        // Dropping the sender entirely.
        let mut msg = Message::sign(make_body(), &key).unwrap();
        msg.body.sender = String::new();
        assert!(msg.validate().is_err());

        // Non-hex sender of the right length.
        let mut msg = Message::sign(make_body(), &key).unwrap();
        msg.body.sender = format!("0x{}", "zx".repeat(20));
        assert!(msg.validate().is_err());
    }

    #[test]
    fn field_limits() {
        let mut body = make_body();
        body.message_id = "m".repeat(MESSAGE_ID_MAX_LEN + 1);
        assert!(body.validate().is_err());
        body = make_body();
        body.method = "m".repeat(METHOD_MAX_LEN + 1);
        assert!(body.validate().is_err());
        body = make_body();
        body.don_id = String::new();
        assert!(body.validate().is_err());
        assert!(make_body().validate().is_ok());
    }

    #[test]
    fn signing_bytes_deterministic() {
        // Two payloads with the same contents in different insertion order
        // must produce identical signing bytes.
        let mut a = make_body();
        a.payload = serde_json::from_str(r#"{"b": 2, "a": 1}"#).unwrap();
        let mut b = make_body();
        b.payload = serde_json::from_str(r#"{"a": 1, "b": 2}"#).unwrap();
        assert_eq!(a.signing_bytes().unwrap(), b.signing_bytes().unwrap());
    }
}
