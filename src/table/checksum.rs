use anyhow::{bail, Result};
use bytes::{Buf, BufMut};

/*
Checksum record layout. Same record is used for blocks and for the table index.
---------------------------------
| Algorithm (1B) | Sum (u64, 8B) |
---------------------------------
*/

/// Encoded size of a checksum record.
pub const CHECKSUM_SIZE: usize = 1 + std::mem::size_of::<u64>(); // 9.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Algorithm {
    /// CRC32 (IEEE), as computed by crc32fast.
    Crc32 = 1,
}

impl TryFrom<u8> for Algorithm {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Algorithm::Crc32),
            _ => bail!("unknown checksum algorithm {}", value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checksum {
    pub algo: Algorithm,
    pub sum: u64,
}

impl Checksum {
    pub fn calculate(data: &[u8]) -> Self {
        Self {
            algo: Algorithm::Crc32,
            sum: crc32fast::hash(data) as u64,
        }
    }

    pub fn encode(&self) -> [u8; CHECKSUM_SIZE] {
        let mut buf = [0u8; CHECKSUM_SIZE];
        let mut dst = &mut buf[..];
        dst.put_u8(self.algo as u8);
        dst.put_u64(self.sum);
        buf
    }

    pub fn decode(mut raw: &[u8]) -> Result<Self> {
        if raw.len() != CHECKSUM_SIZE {
            bail!("checksum record is {} bytes, expected {}", raw.len(), CHECKSUM_SIZE);
        }

        let algo = Algorithm::try_from(raw.get_u8())?;
        let sum = raw.get_u64();

        Ok(Self { algo, sum })
    }

    pub fn verify(&self, data: &[u8]) -> bool {
        match self.algo {
            Algorithm::Crc32 => crc32fast::hash(data) as u64 == self.sum,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode() {
        let checksum = Checksum::calculate(b"lagom");
        let encoded = checksum.encode();
        assert_eq!(encoded[0], 1);
        assert_eq!(
            &encoded[1..],
            (crc32fast::hash(b"lagom") as u64).to_be_bytes().as_slice()
        );
        assert_eq!(Checksum::decode(&encoded).unwrap(), checksum);
    }

    #[test]
    fn test_verify() {
        let checksum = Checksum::calculate(b"lagom");
        assert!(checksum.verify(b"lagom"));
        assert!(!checksum.verify(b"lagon"));
    }

    #[test]
    fn test_decode_errors() {
        assert!(Checksum::decode(&[1, 2, 3]).is_err());

        let mut encoded = Checksum::calculate(b"lagom").encode();
        encoded[0] = 7;
        assert_eq!(
            Checksum::decode(&encoded).unwrap_err().to_string(),
            "unknown checksum algorithm 7"
        );
    }
}
