//! # Key Partitioner
//!
//! The Java client's default partitioner: `toPositive(murmur2(key)) % n`.
//! Using the same hash keeps key placement identical whether a record is
//! produced by this client or by any other Kafka client.

const SEED: u32 = 0x9747_b28c;
const M: u32 = 0x5bd1_e995;
const R: u32 = 24;

/// 32-bit MurmurHash2 as implemented by Kafka.
pub fn murmur2(data: &[u8]) -> i32 {
    let length = data.len();
    let mut h: u32 = SEED ^ (length as u32);

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() >= 3 {
        h ^= u32::from(tail[2]) << 16;
    }
    if tail.len() >= 2 {
        h ^= u32::from(tail[1]) << 8;
    }
    if !tail.is_empty() {
        h ^= u32::from(tail[0]);
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h as i32
}

/// Partition for a keyed record. `partitions` must be non-zero.
pub fn partition_for_key(key: &[u8], partitions: u32) -> i32 {
    let positive = (murmur2(key) & 0x7fff_ffff) as u32;
    (positive % partitions.max(1)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_murmur2_matches_reference_vectors() {
        let cases: [(&[u8], i32); 6] = [
            (b"21", -973_932_308),
            (b"foobar", -790_332_482),
            (b"a-little-bit-long-string", -985_981_536),
            (b"a-little-bit-longer-string", -1_486_304_829),
            (b"lkjh234lh9fiuh90y23oiuhsafujhadof229phr9h19h89h8", -58_897_971),
            (b"abc", 479_470_107),
        ];
        for (input, expected) in cases {
            assert_eq!(murmur2(input), expected, "input {:?}", String::from_utf8_lossy(input));
        }
    }

    #[test]
    fn test_known_machine_placement() {
        assert_eq!(partition_for_key(b"vm-1", 6), 4);
        assert_eq!(partition_for_key(b"vm-42", 6), 1);
        assert_eq!(partition_for_key(b"", 3), 0);
    }

    proptest! {
        #[test]
        fn prop_partition_is_stable_and_in_range(key in ".{0,64}", partitions in 1u32..64) {
            let first = partition_for_key(key.as_bytes(), partitions);
            prop_assert_eq!(first, partition_for_key(key.as_bytes(), partitions));
            prop_assert!(first >= 0 && (first as u32) < partitions);
        }
    }
}
