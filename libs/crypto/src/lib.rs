//! Cryptographic primitives used by the gateway: Keccak256 hashing and
//! recoverable ECDSA signatures over secp256k1, compatible with EVM
//! `ecrecover` semantics.

pub use fmt::*;

mod fmt;
pub mod keccak256;
pub mod secp256k1;
