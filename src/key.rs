use bytes::{BufMut, Bytes, BytesMut};

/// Size of the version suffix every versioned key carries.
pub const TS_SIZE: usize = std::mem::size_of::<u64>(); // 8.

/*
Versioned key layout. Versions are stored inverted so that newer versions of
the same user key sort first.
-------------------------------------------
|   User key   |  u64::MAX - version (8B) |
-------------------------------------------
*/

/// Appends the inverted version suffix to a user key.
pub fn key_with_ts(key: &[u8], ts: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(key.len() + TS_SIZE);
    buf.put_slice(key);
    buf.put_u64(u64::MAX - ts);
    buf.freeze()
}

/// Extracts the version from a key. Keys too short to carry a suffix have version 0.
pub fn parse_ts(key: &[u8]) -> u64 {
    if key.len() <= TS_SIZE {
        return 0;
    }

    let mut suffix = [0u8; TS_SIZE];
    suffix.copy_from_slice(&key[key.len() - TS_SIZE..]);
    u64::MAX - u64::from_be_bytes(suffix)
}

/// Strips the version suffix. Keys too short to carry one are returned whole.
pub fn parse_key(key: &[u8]) -> &[u8] {
    if key.len() <= TS_SIZE {
        return key;
    }

    &key[..key.len() - TS_SIZE]
}

/// Hash of the user part of the key. All versions of a key hash the same,
/// which is what the table filter needs.
pub fn hash(key: &[u8]) -> u32 {
    crc32fast::hash(parse_key(key))
}
