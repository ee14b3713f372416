use std::fmt::Debug;

use rand::{
    distributions::{Distribution, Standard},
    rngs::StdRng,
    Rng, SeedableRng,
};

use crate::{
    secp256k1::{Address, PublicKey, SecretKey, Signature},
    ByteFmt,
};

fn make_rng() -> StdRng {
    StdRng::seed_from_u64(29483920)
}

fn test_byte_format<T>(rng: &mut impl Rng)
where
    T: ByteFmt + Eq + Debug,
    Standard: Distribution<T>,
{
    let v0 = rng.gen::<T>();
    let bz0 = v0.encode();
    let v1 = T::decode(&bz0).unwrap();
    assert_eq!(v0, v1);
    let bz1 = v1.encode();
    assert_eq!(bz0, bz1);
}

fn prop_byte_format<T>()
where
    T: ByteFmt + Eq + Debug,
    Standard: Distribution<T>,
{
    let rng = &mut make_rng();
    for _ in 0..10 {
        test_byte_format::<T>(rng);
    }
}

fn gen_msg(rng: &mut impl Rng) -> Vec<u8> {
    let n = rng.gen_range(0..100);
    let mut msg = vec![0u8; n];
    rng.fill_bytes(&mut msg);
    msg
}

#[test]
fn prop_public_key_format() {
    prop_byte_format::<PublicKey>();
}

#[test]
fn prop_secret_key_format() {
    prop_byte_format::<SecretKey>();
}

#[test]
fn prop_sig_format() {
    prop_byte_format::<Signature>();
}

#[test]
fn prop_address_format() {
    prop_byte_format::<Address>();
}

#[test]
fn prop_sign_verify() {
    let rng = &mut make_rng();
    for _ in 0..10 {
        let sk = rng.gen::<SecretKey>();
        let msg = gen_msg(rng);
        let sig = sk.sign(&msg).unwrap();
        sig.verify_msg(&msg, &sk.address()).unwrap();
        assert_eq!(sig.recover(&msg).unwrap(), sk.public());
    }
}

#[test]
fn prop_sign_verify_wrong_signer_fail() {
    let rng = &mut make_rng();
    for _ in 0..10 {
        let sk1 = rng.gen::<SecretKey>();
        let sk2 = rng.gen::<SecretKey>();
        let msg = gen_msg(rng);
        let sig = sk1.sign(&msg).unwrap();
        sig.verify_msg(&msg, &sk2.address()).unwrap_err();
    }
}

#[test]
fn prop_sign_verify_wrong_msg_fail() {
    let rng = &mut make_rng();
    for _ in 0..10 {
        let sk = rng.gen::<SecretKey>();
        let msg1 = gen_msg(rng);
        let msg2 = gen_msg(rng);
        let sig = sk.sign(&msg1).unwrap();
        sig.verify_msg(&msg2, &sk.address()).unwrap_err();
    }
}

#[test]
fn prop_tampered_sig_fail() {
    let rng = &mut make_rng();
    for _ in 0..10 {
        let sk = rng.gen::<SecretKey>();
        let msg = gen_msg(rng);
        let mut bz = sk.sign(&msg).unwrap().encode();
        let i = rng.gen_range(0..64);
        bz[i] ^= 0x01;
        // Either the tampered bytes don't decode, or they fail verification.
        if let Ok(sig) = Signature::decode(&bz) {
            sig.verify_msg(&msg, &sk.address()).unwrap_err();
        }
    }
}

/// Test vectors from <https://web3js.readthedocs.io/en/v1.2.0/web3-eth-accounts.html#eth-accounts-signtransaction>.
/// Checks V shifting and the derived signer address.
#[test]
fn test_ethereum_example() {
    let unhex = |h| hex::decode(h).unwrap();
    let mh = unhex("88cfbd7e51c7a40540b233cf68b62ad1df3e92462f1c6018d6d67eae0f3b08f5");
    let sk =
        SecretKey::decode(&unhex(
            "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
        ))
        .unwrap();

    assert_eq!(
        hex::encode(sk.address().as_bytes()),
        "2c7536e3605d9c16a7a3d7b1898e529396a65c23"
    );

    let sig = sk.sign_hash(&mh).unwrap();
    assert_eq!(
        hex::encode(sig.sig.r().to_bytes()),
        "c9cf86333bcb065d140032ecaab5d9281bde80f21b9687b3e94161de42d51895"
    );
    assert_eq!(
        hex::encode(sig.sig.s().to_bytes()),
        "727a108a0b8d101465414033c3f705a9c7b826e596766046ee1183dbc8aeaa68"
    );
    let bz = sig.encode();
    assert!(bz[64] == 27 || bz[64] == 28, "v is shifted when encoded");
    sig.verify_hash(&mh, &sk.address()).unwrap();
}
