//! Routing Tests
//!
//! Tests for key digesting and partition id math.

use meshkv_client::routing::{Key, KeyDigest, DIGEST_SIZE};

// =============================================================================
// Digest Tests
// =============================================================================

#[test]
fn test_digest_deterministic() {
    let a = KeyDigest::compute("users", b"alice");
    let b = KeyDigest::compute("users", b"alice");
    assert_eq!(a, b);
}

#[test]
fn test_digest_depends_on_set_and_key() {
    let base = KeyDigest::compute("users", b"alice");
    assert_ne!(base, KeyDigest::compute("users", b"bob"));
    assert_ne!(base, KeyDigest::compute("accounts", b"alice"));
}

#[test]
fn test_digest_known_vector() {
    // RIPEMD-160 of the empty message.
    let digest = KeyDigest::compute("", b"");
    assert_eq!(
        digest.to_string(),
        "0x9c1185a5c5e9fc54612808977ee8f548b2258d31"
    );
}

#[test]
fn test_digest_display_format() {
    let digest = KeyDigest::compute("set", b"key");
    let formatted = digest.to_string();

    assert!(formatted.starts_with("0x"));
    assert_eq!(formatted.len(), 2 + DIGEST_SIZE * 2);
    assert!(formatted[2..]
        .chars()
        .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

#[test]
fn test_digest_from_bytes_round_trip() {
    let digest = KeyDigest::compute("set", b"key");
    let restored = KeyDigest::from_bytes(digest.as_bytes()).unwrap();
    assert_eq!(digest, restored);
}

#[test]
fn test_digest_from_bytes_wrong_length() {
    assert!(KeyDigest::from_bytes(&[0u8; 19]).is_err());
    assert!(KeyDigest::from_bytes(&[0u8; 21]).is_err());
    assert!(KeyDigest::from_bytes(&[]).is_err());
}

// =============================================================================
// Partition Id Tests
// =============================================================================

#[test]
fn test_partition_id_stable() {
    let digest = KeyDigest::compute("users", b"alice");
    let first = digest.partition_id(4096);

    for _ in 0..100 {
        assert_eq!(digest.partition_id(4096), first);
    }
}

#[test]
fn test_partition_id_in_range() {
    for i in 0..1000u32 {
        let digest = KeyDigest::compute("users", &i.to_be_bytes());
        assert!(digest.partition_id(4096) < 4096);
        assert!(digest.partition_id(8) < 8);
        assert!(digest.partition_id(1) == 0);
    }
}

#[test]
fn test_partition_id_uses_low_bits() {
    let digest = KeyDigest::compute("users", b"alice");
    // The id under a smaller power of two is the larger id masked down.
    let wide = digest.partition_id(4096);
    let narrow = digest.partition_id(256);
    assert_eq!(narrow, wide & 255);
}

// =============================================================================
// Key Tests
// =============================================================================

#[test]
fn test_key_computes_digest() {
    let key = Key::new("test", "demo", b"record-1");
    assert_eq!(key.digest, KeyDigest::compute("demo", b"record-1"));
    assert_eq!(key.namespace, "test");
    assert_eq!(key.set, "demo");
    assert_eq!(key.user_key, b"record-1");
}

#[test]
fn test_key_digest_ignores_namespace() {
    // The namespace selects the partition table, not the digest.
    let a = Key::new("ns1", "demo", b"record-1");
    let b = Key::new("ns2", "demo", b"record-1");
    assert_eq!(a.digest, b.digest);
}
