use anyhow::{bail, Result};
use bytes::{Buf, BufMut, Bytes};

/*
Table index layout schema.
------------------------------------------------------------------------------------------------
| Blocks num (4B) | BlockOffset #1 | ... | BlockOffset #N | Has filter (1B) | [Filter len (4B) | Filter] |
------------------------------------------------------------------------------------------------
| Max version (8B) | Uncompressed size (4B) | On-disk size (4B) | Stale data size (4B) |
------------------------------------------------------------------------------------------------

Block offset layout schema.
-------------------------------------------------------------------------------------------
| base_key_len (4B) | base_key | max_key_len (4B) | max_key | id (4B) | offset (4B) | len (4B) |
-------------------------------------------------------------------------------------------

On-disk size is written last, once the length of the index itself is known.
*/

/// Per block bookkeeping the index spends on top of the base key.
const BLOCK_OFFSET_OVERHEAD: u32 = 40;

/// Bytes from the on-disk size field to the end of the index.
const ON_DISK_SIZE_TAIL: usize = 2 * std::mem::size_of::<u32>(); // 8.

/// What one more block descriptor costs the index, used by the capacity estimate.
pub fn estimated_block_offset_size(base_key_len: usize) -> u32 {
    let aligned = base_key_len.div_ceil(4) * 4;
    assert!(
        aligned <= (u32::MAX - BLOCK_OFFSET_OVERHEAD) as usize,
        "base key of {} bytes overflows the index estimate",
        base_key_len
    );
    aligned as u32 + BLOCK_OFFSET_OVERHEAD
}

/// Descriptor of one block in the final block stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockOffset {
    pub base_key: Bytes,
    pub max_key: Bytes,
    pub id: u32,
    /// Start of the block in the block stream.
    pub offset: u32,
    pub len: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableIndex {
    pub offsets: Vec<BlockOffset>,
    pub filter: Option<Bytes>,
    pub max_version: u64,
    pub uncompressed_size: u32,
    /// Includes the index length once the index went through `encode`.
    pub on_disk_size: u32,
    pub stale_data_size: u32,
}

impl TableIndex {
    /// Serializes the index. The on-disk size written is `self.on_disk_size`
    /// plus the length of the serialized index.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_size_hint());

        buf.put_u32(len_u32(self.offsets.len(), "block count"));
        for block in &self.offsets {
            buf.put_u32(len_u32(block.base_key.len(), "base key"));
            buf.put_slice(&block.base_key);
            buf.put_u32(len_u32(block.max_key.len(), "max key"));
            buf.put_slice(&block.max_key);
            buf.put_u32(block.id);
            buf.put_u32(block.offset);
            buf.put_u32(block.len);
        }

        match &self.filter {
            Some(filter) => {
                buf.put_u8(1);
                buf.put_u32(len_u32(filter.len(), "filter"));
                buf.put_slice(filter);
            }
            None => buf.put_u8(0),
        }

        buf.put_u64(self.max_version);
        buf.put_u32(self.uncompressed_size);
        buf.put_u32(0); // Reserved for the on-disk size.
        buf.put_u32(self.stale_data_size);

        let index_len = len_u32(buf.len(), "index");
        let on_disk_size = self
            .on_disk_size
            .checked_add(index_len)
            .unwrap_or_else(|| panic!("on-disk size overflows 32 bits"));
        let at = buf.len() - ON_DISK_SIZE_TAIL;
        buf[at..at + 4].copy_from_slice(&on_disk_size.to_be_bytes());

        buf
    }

    pub fn decode(mut raw: &[u8]) -> Result<Self> {
        let count = get_u32(&mut raw)? as usize;
        let mut offsets = Vec::with_capacity(count.min(raw.len()));
        for _ in 0..count {
            let base_key_len = get_u32(&mut raw)? as usize;
            let base_key = take(&mut raw, base_key_len)?;
            let max_key_len = get_u32(&mut raw)? as usize;
            let max_key = take(&mut raw, max_key_len)?;
            offsets.push(BlockOffset {
                base_key,
                max_key,
                id: get_u32(&mut raw)?,
                offset: get_u32(&mut raw)?,
                len: get_u32(&mut raw)?,
            });
        }

        let filter = match take(&mut raw, 1)?[0] {
            0 => None,
            1 => {
                let len = get_u32(&mut raw)? as usize;
                Some(take(&mut raw, len)?)
            }
            flag => bail!("unexpected filter flag {}", flag),
        };

        let max_version = take(&mut raw, 8)?.get_u64();
        let uncompressed_size = get_u32(&mut raw)?;
        let on_disk_size = get_u32(&mut raw)?;
        let stale_data_size = get_u32(&mut raw)?;

        if raw.has_remaining() {
            bail!("{} trailing bytes after the table index", raw.remaining());
        }

        Ok(Self {
            offsets,
            filter,
            max_version,
            uncompressed_size,
            on_disk_size,
            stale_data_size,
        })
    }

    fn encoded_size_hint(&self) -> usize {
        let keys: usize = self
            .offsets
            .iter()
            .map(|b| b.base_key.len() + b.max_key.len() + 20)
            .sum();
        let filter = self.filter.as_ref().map_or(0, |f| f.len() + 4);
        4 + keys + 1 + filter + 8 + 12
    }
}

fn len_u32(len: usize, what: &str) -> u32 {
    assert!(
        len <= u32::MAX as usize,
        "{} length {} overflows 32 bits",
        what,
        len
    );
    len as u32
}

fn take(raw: &mut &[u8], n: usize) -> Result<Bytes> {
    if raw.remaining() < n {
        bail!("table index truncated: {} bytes left, {} needed", raw.remaining(), n);
    }
    Ok(raw.copy_to_bytes(n))
}

fn get_u32(raw: &mut &[u8]) -> Result<u32> {
    Ok(take(raw, 4)?.get_u32())
}
