//! Shard routing
//!
//! FNV-1a 64-bit hash of the key bytes, modulo the shard count. Pure and
//! stable across calls and processes.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a 64-bit hash
pub(crate) fn fnv1a_64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    })
}

/// Shard index for `key`
///
/// `num_shards` must be at least 1; the store validates this at construction.
pub fn route_key(key: &str, num_shards: usize) -> u64 {
    debug_assert!(num_shards >= 1, "num_shards must be >= 1");
    fnv1a_64(key.as_bytes()) % num_shards as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_known_vectors() {
        assert_eq!(fnv1a_64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a_64(b"a"), 0xaf63_dc4c_8601_ec8c);
        assert_eq!(fnv1a_64(b"foobar"), 0x8594_4171_f739_67e8);
    }

    #[test]
    fn test_routing_is_stable() {
        for i in 0..1000 {
            let key = format!("sensor{}", i);
            let first = route_key(&key, 8);
            assert!(first < 8);
            assert_eq!(route_key(&key, 8), first);
        }
    }

    #[test]
    fn test_single_shard() {
        assert_eq!(route_key("anything", 1), 0);
        assert_eq!(route_key("", 1), 0);
    }

    #[test]
    fn test_distribution_touches_every_shard() {
        let mut counts = [0usize; 8];
        for i in 0..10_000 {
            counts[route_key(&format!("sensor{}", i), 8) as usize] += 1;
        }
        // Uniform would be 1250 per shard
        assert!(counts.iter().all(|&c| c > 1000 && c < 1500), "{:?}", counts);
    }
}
