use anyhow::Result;
use bloomfilter::Bloom;
use std::thread::{self, JoinHandle};
use tracing::debug;

/// Bloom seed shared by every table, two builds over the same keys give the same bytes.
const FIXED_SEED: [u8; 32] = *b"tablet-bloom-filter-fixed-seed!!";

/// Smallest bitmap handed to the bloom filter.
const MIN_BITS: usize = 64;

/// Bits each key gets so the filter stays within the false positive target.
pub fn bits_per_key(false_positive: f64) -> usize {
    let ln2 = std::f64::consts::LN_2;
    (-false_positive.ln() / (ln2 * ln2)).ceil() as usize
}

/// Builds the serialized filter over the given key hashes.
pub fn build(hashes: &[u32], false_positive: f64) -> Result<Vec<u8>> {
    let bits = (hashes.len() * bits_per_key(false_positive)).max(MIN_BITS);
    let mut bloom =
        Bloom::<u32>::new_with_seed(bits.div_ceil(8), hashes.len(), &FIXED_SEED)
            .map_err(anyhow::Error::msg)?;

    for hash in hashes {
        bloom.set(hash);
    }

    Ok(bloom.to_bytes())
}

/// Starts building the filter on its own thread. The thread owns the hashes.
pub fn spawn(hashes: Vec<u32>, false_positive: f64) -> Result<JoinHandle<Vec<u8>>> {
    let handle = thread::Builder::new()
        .name("tablet-filter".to_string())
        .spawn(move || {
            let filter = match build(&hashes, false_positive) {
                Ok(filter) => filter,
                Err(e) => panic!("building filter over {} keys failed: {}", hashes.len(), e),
            };
            debug!("filter built: {} keys, {} bytes", hashes.len(), filter.len());
            filter
        })?;

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key;

    #[test]
    fn test_bits_per_key() {
        assert_eq!(bits_per_key(0.01), 10);
        assert_eq!(bits_per_key(0.1), 5);
        assert_eq!(bits_per_key(0.5), 2);
    }

    #[test]
    fn test_build_contains_all_keys() {
        let hashes: Vec<u32> = (0..1000)
            .map(|i| key::hash(format!("key{:05}", i).as_bytes()))
            .collect();

        let filter = build(&hashes, 0.01).unwrap();
        let bloom = Bloom::<u32>::from_bytes(filter).unwrap();
        assert!(hashes.iter().all(|hash| bloom.check(hash)));

        let false_positives = (1000..11000)
            .map(|i| key::hash(format!("key{:05}", i).as_bytes()))
            .filter(|hash| bloom.check(hash))
            .count();
        assert!(false_positives < 500, "{} false positives", false_positives);
    }

    #[test]
    fn test_build_is_reproducible() {
        let hashes = vec![1, 2, 3, 42];
        assert_eq!(build(&hashes, 0.01).unwrap(), build(&hashes, 0.01).unwrap());
    }

    #[test]
    fn test_spawn() {
        let hashes = vec![7, 8, 9];
        let expected = build(&hashes, 0.05).unwrap();
        let handle = spawn(hashes, 0.05).unwrap();
        assert_eq!(handle.join().unwrap(), expected);
    }
}
