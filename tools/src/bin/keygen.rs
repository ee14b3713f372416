//! Generates a secp256k1 node key and prints its text encoding.
#![allow(clippy::print_stdout)]
use gateway_crypto::{secp256k1, TextFmt as _};

fn main() {
    let key = secp256k1::SecretKey::generate();
    println!("secret key: {}", key.encode());
    println!("public key: {}", key.public().encode());
    println!("address:    {}", key.address().encode());
}
