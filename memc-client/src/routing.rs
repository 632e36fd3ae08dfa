//! Key-to-server routing.
//!
//! `simple_hash` is not a quality hash; it is a deterministic bucket selector
//! kept bit-for-bit identical to the function existing deployments route with,
//! so the same key set lands on the same servers.

/// Polynomial rolling hash over the key bytes.
///
/// The accumulator is seeded with the first byte and then every byte,
/// the first one included, is folded in as `(acc << 4) + byte` with
/// wrapping 32-bit arithmetic. An empty key hashes to 0.
///
/// Bytes are folded in as unsigned values. Deployments built where `char`
/// is signed (x86) sign-extend bytes >= 0x80, so keys containing such bytes
/// may route differently there; ASCII keys route identically.
pub fn simple_hash(key: &[u8]) -> u32 {
    let Some(&first) = key.first() else {
        return 0;
    };
    key.iter()
        .fold(u32::from(first), |acc, &byte| (acc << 4).wrapping_add(u32::from(byte)))
}

/// Picks the connection index for `key` among `count` connections.
///
/// A single connection is always chosen regardless of the hash; zero
/// connections yield `None`.
pub fn bucket(key: &[u8], count: usize) -> Option<usize> {
    match count {
        0 => None,
        1 => Some(0),
        _ => Some(simple_hash(key) as usize % count),
    }
}
