use super::Keccak256;

/// Known Keccak256 test vectors.
#[test]
fn test_vectors() {
    for (msg, want) in [
        (
            &b""[..],
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470",
        ),
        (
            &b"abc"[..],
            "4e03657aea45a94fc7d47ba826c8d667c0d1e6e33a64a036ec44f58fa12d6c45",
        ),
    ] {
        assert_eq!(hex::encode(Keccak256::new(msg).as_bytes()), want);
    }
}
