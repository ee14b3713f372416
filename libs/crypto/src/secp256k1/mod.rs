//! ECDSA signatures over the secp256k1 curve, chosen to match the EVM
//! `ecrecover` precompile: signatures are recoverable and signers are
//! identified by their 20-byte Ethereum-style address.

use std::hash::Hash;

use anyhow::bail;
use zeroize::ZeroizeOnDrop;

use crate::{keccak256::Keccak256, ByteFmt, Text, TextFmt};

mod testonly;

#[cfg(test)]
mod tests;

/// Length of the `[R‖S‖V]` byte encoding of a [`Signature`].
pub const SIGNATURE_LENGTH: usize = 65;
/// Length of an [`Address`] in bytes.
pub const ADDRESS_LENGTH: usize = 20;

/// Secp256k1 secret key.
#[derive(ZeroizeOnDrop, PartialEq, Eq)]
pub struct SecretKey(k256::ecdsa::SigningKey);

impl SecretKey {
    /// Generates a secret key from a cryptographically-secure entropy source.
    pub fn generate() -> Self {
        Self(k256::SecretKey::random(&mut rand::rngs::OsRng).into())
    }

    /// Gets the corresponding [`PublicKey`] for this [`SecretKey`].
    pub fn public(&self) -> PublicKey {
        PublicKey(*self.0.verifying_key())
    }

    /// Address of the corresponding public key.
    pub fn address(&self) -> Address {
        self.public().address()
    }

    /// Hashes the message with Keccak256 and signs it.
    pub fn sign(&self, msg: &[u8]) -> anyhow::Result<Signature> {
        let hash = Keccak256::new(msg);
        self.sign_hash(hash.as_bytes())
    }

    /// Signs a message digest.
    pub fn sign_hash(&self, hash: &[u8]) -> anyhow::Result<Signature> {
        let (sig, recid) = self.0.sign_prehash_recoverable(hash)?;
        Ok(Signature { sig, recid })
    }
}

impl Clone for SecretKey {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl ByteFmt for SecretKey {
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        let sk = k256::ecdsa::SigningKey::from_slice(bytes)?;
        Ok(Self(sk))
    }

    fn encode(&self) -> Vec<u8> {
        self.0.to_bytes().to_vec()
    }
}

impl TextFmt for SecretKey {
    fn encode(&self) -> String {
        format!(
            "gateway:secret:secp256k1:{}",
            hex::encode(ByteFmt::encode(self))
        )
    }
    fn decode(text: Text) -> anyhow::Result<Self> {
        text.strip("gateway:secret:secp256k1:")?.decode_hex()
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey({:?})", self.public())
    }
}

/// Secp256k1 public key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PublicKey(k256::ecdsa::VerifyingKey);

impl PublicKey {
    /// Ethereum-style address of this key: the last 20 bytes of the
    /// Keccak256 hash of the uncompressed SEC1 encoding (without the
    /// leading `0x04` tag byte).
    pub fn address(&self) -> Address {
        let point = self.0.to_encoded_point(false);
        let hash = Keccak256::new(&point.as_bytes()[1..]);
        let mut addr = [0u8; ADDRESS_LENGTH];
        addr.copy_from_slice(&hash.as_bytes()[12..]);
        Address(addr)
    }
}

impl ByteFmt for PublicKey {
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        let vk = k256::ecdsa::VerifyingKey::from_sec1_bytes(bytes)?;
        Ok(Self(vk))
    }

    fn encode(&self) -> Vec<u8> {
        self.0.to_sec1_bytes().to_vec()
    }
}

impl TextFmt for PublicKey {
    fn encode(&self) -> String {
        format!(
            "gateway:public:secp256k1:{}",
            hex::encode(ByteFmt::encode(self))
        )
    }
    fn decode(text: Text) -> anyhow::Result<Self> {
        text.strip("gateway:public:secp256k1:")?.decode_hex()
    }
}

impl Hash for PublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write(&ByteFmt::encode(self))
    }
}

/// 20-byte signer address, derived from the public key.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; ADDRESS_LENGTH]);

impl Address {
    /// Returns a reference to the raw address bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }
}

impl ByteFmt for Address {
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(Self(bytes.try_into()?))
    }

    fn encode(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl TextFmt for Address {
    fn encode(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
    fn decode(text: Text) -> anyhow::Result<Self> {
        text.strip("0x")?.decode_hex()
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&TextFmt::encode(self))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&TextFmt::encode(self))
    }
}

/// Secp256k1 recoverable signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub(crate) sig: k256::ecdsa::Signature,
    /// Standard recovery ID. Shifted by 27 when serialized to bytes,
    /// for compatibility with EVM `ecrecover`.
    pub(crate) recid: k256::ecdsa::RecoveryId,
}

impl Signature {
    /// Verifies a signature against a provided signer address, taking the
    /// Keccak256 hash of the message.
    pub fn verify_msg(&self, msg: &[u8], signer: &Address) -> anyhow::Result<()> {
        let hash = Keccak256::new(msg);
        self.verify_hash(hash.as_bytes(), signer)
    }

    /// Verifies a signature against a provided signer address.
    /// Expects the input to be a hash of the message.
    ///
    /// Recovers the public key from the signature, compares its address
    /// byte-for-byte against `signer`, and then re-verifies the signature
    /// (minus the recovery byte) against the recovered key. The second
    /// check rejects malleable or otherwise invalid low-level signatures
    /// that still recover to some key.
    pub fn verify_hash(&self, hash: &[u8], signer: &Address) -> anyhow::Result<()> {
        use k256::ecdsa::signature::hazmat::PrehashVerifier as _;
        let recovered = self.recover_hash(hash)?;
        let addr = recovered.address();
        if &addr != signer {
            bail!("address mismatch: expected {signer}, got {addr}");
        }
        recovered.0.verify_prehash(hash, &self.sig)?;
        Ok(())
    }

    /// Recovers the public key from the signature, taking the Keccak256
    /// hash of the message.
    pub fn recover(&self, msg: &[u8]) -> anyhow::Result<PublicKey> {
        let hash = Keccak256::new(msg);
        self.recover_hash(hash.as_bytes())
    }

    /// Recovers the public key from the signature.
    /// Expects the input to be a hash of the message.
    pub fn recover_hash(&self, hash: &[u8]) -> anyhow::Result<PublicKey> {
        let vk = k256::ecdsa::VerifyingKey::recover_from_prehash(hash, &self.sig, self.recid)?;
        Ok(PublicKey(vk))
    }
}

impl ByteFmt for Signature {
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        if bytes.len() != SIGNATURE_LENGTH {
            bail!("unexpected signature length: {}", bytes.len());
        }
        let recid = normalize_recovery_id(bytes[64]);
        let Some(recid) = k256::ecdsa::RecoveryId::from_byte(recid) else {
            bail!("unexpected recovery ID: {}", bytes[64]);
        };
        let sig = k256::ecdsa::Signature::from_slice(&bytes[..64])?;
        Ok(Self { sig, recid })
    }

    fn encode(&self) -> Vec<u8> {
        let mut bz = vec![0u8; SIGNATURE_LENGTH];
        let (r, s) = self.sig.split_bytes();
        bz[..32].copy_from_slice(&r);
        bz[32..64].copy_from_slice(&s);
        bz[64] = self.recid.to_byte() + 27;
        bz
    }
}

impl Hash for Signature {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write(&ByteFmt::encode(self))
    }
}

/// Maps the EVM-shifted V values (27/28) back to standard recovery IDs.
fn normalize_recovery_id(v: u8) -> u8 {
    match v {
        27..=30 => v - 27,
        _ => v,
    }
}
