use super::checksum::{Checksum, CHECKSUM_SIZE};
use crate::arena::Arena;
use crate::value::ValueStruct;
use anyhow::{bail, Context, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/*
Block layout schema.
-------------------------------------------------------------------------------------------------------------
|              Data Section              |              Offsets Section              |        Extra         |
-------------------------------------------------------------------------------------------------------------
| Entry #1 | Entry #2 | ... | Entry #N | Offset #1 | ... | Offset #N | Num (4B) | Checksum | Checksum len (4B) |
-------------------------------------------------------------------------------------------------------------

Single entry layout schema. Keys are stored as a diff against the first key of the block.
-------------------------------------------------------
|                      Entry #1                 | ... |
-------------------------------------------------------
| overlap (2B) | diff_len (2B) | diff | value   | ... |
-------------------------------------------------------
*/

/// 2B overlap + 2B diff length.
pub const HEADER_SIZE: usize = 4;

/// Extra room reserved in every block buffer, compressed output has to fit the
/// block's first allocation.
pub const PADDING: usize = 256;

/// Largest single region a block buffer grows to by doubling.
const MAX_GROW_SIZE: usize = 1 << 30; // 1 GB.

const U32_SIZE: usize = std::mem::size_of::<u32>(); // 4.

/// Offsets count, checksum record and checksum length closing every block.
pub const BLOCK_TRAILER_SIZE: usize = U32_SIZE + CHECKSUM_SIZE + U32_SIZE; // 17.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Bytes shared with the block's base key.
    pub overlap: u16,
    /// Length of the key suffix stored after the header.
    pub diff: u16,
}

impl Header {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..2].copy_from_slice(&self.overlap.to_be_bytes());
        buf[2..].copy_from_slice(&self.diff.to_be_bytes());
        buf
    }

    pub fn decode(mut raw: &[u8]) -> Self {
        assert!(raw.len() >= HEADER_SIZE, "entry is shorter than its header");

        Self {
            overlap: raw.get_u16(),
            diff: raw.get_u16(),
        }
    }
}

/// Where the last added key sits in the block: enough to rebuild the max key when
/// the block closes without copying every key on the way.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct KeyDiff {
    overlap: u16,
    diff_start: usize,
    diff_len: usize,
}

/// Block being assembled by the builder.
#[derive(Debug, Default)]
pub(crate) struct Block {
    pub id: u32,
    pub data: BytesMut,
    pub base_key: Bytes,
    pub entry_offsets: Vec<u32>,
}

impl Block {
    pub fn new(id: u32, data: BytesMut) -> Self {
        Self {
            id,
            data,
            base_key: Bytes::new(),
            entry_offsets: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entry_offsets.is_empty()
    }

    /// Write cursor.
    pub fn end(&self) -> usize {
        self.data.len()
    }

    /// Suffix of the key starting at the first byte that differs from the base key.
    pub fn key_diff<'a>(&self, key: &'a [u8]) -> &'a [u8] {
        let common = key
            .iter()
            .zip(self.base_key.iter())
            .take_while(|(a, b)| a == b)
            .count();

        &key[common..]
    }

    /// Appends one entry and returns where its key diff ended up.
    pub fn add(&mut self, arena: &mut Arena, key: &[u8], value: &ValueStruct) -> KeyDiff {
        let diff_key = if self.is_empty() {
            self.base_key = Bytes::copy_from_slice(key);
            key
        } else {
            self.key_diff(key)
        };

        assert!(
            key.len() - diff_key.len() <= u16::MAX as usize,
            "key overlap of {} bytes does not fit the entry header",
            key.len() - diff_key.len()
        );
        assert!(
            diff_key.len() <= u16::MAX as usize,
            "key diff of {} bytes does not fit the entry header",
            diff_key.len()
        );

        let header = Header {
            overlap: (key.len() - diff_key.len()) as u16,
            diff: diff_key.len() as u16,
        };

        self.entry_offsets.push(self.end() as u32);

        self.append(arena, &header.encode());
        let diff_start = self.end();
        self.append(arena, diff_key);

        self.reserve(arena, value.encoded_size());
        value.encode(&mut self.data);

        KeyDiff {
            overlap: header.overlap,
            diff_start,
            diff_len: diff_key.len(),
        }
    }

    /// Closes the block: appends entry offsets, their count, the checksum of everything
    /// written so far and the checksum length. Returns the block's max key.
    pub fn finish(&mut self, arena: &mut Arena, last: &KeyDiff) -> Bytes {
        let mut max_key = BytesMut::with_capacity(last.overlap as usize + last.diff_len);
        max_key.put_slice(&self.base_key[..last.overlap as usize]);
        max_key.put_slice(&self.data[last.diff_start..last.diff_start + last.diff_len]);

        self.reserve(arena, (self.entry_offsets.len() + 1) * U32_SIZE);
        for offset in &self.entry_offsets {
            self.data.put_u32(*offset);
        }
        self.data.put_u32(self.entry_offsets.len() as u32);

        let checksum = Checksum::calculate(&self.data).encode();
        self.append(arena, &checksum);
        self.append(arena, &(checksum.len() as u32).to_be_bytes());

        max_key.freeze()
    }

    /// Size the block would have once closed if an entry with the given key and
    /// value sizes were added to it.
    pub fn projected_size(&self, key_len: usize, value_size: usize) -> u32 {
        let entries = self.entry_offsets.len() as u64 + 1;
        assert!(
            entries * U32_SIZE as u64 + BLOCK_TRAILER_SIZE as u64 <= u32::MAX as u64,
            "entry offsets of {} entries overflow 32 bits",
            entries
        );
        let offsets_size = entries * U32_SIZE as u64 + BLOCK_TRAILER_SIZE as u64;

        let estimate = self.end() as u64
            + HEADER_SIZE as u64
            + key_len as u64
            + value_size as u64
            + offsets_size;
        assert!(
            estimate <= u32::MAX as u64,
            "projected block size {} overflows 32 bits",
            estimate
        );

        estimate as u32
    }

    /// Bytes the still open block will add when closed: offsets plus the trailer.
    pub fn pending_overhead(&self) -> u32 {
        (self.entry_offsets.len() * U32_SIZE + BLOCK_TRAILER_SIZE) as u32
    }

    fn append(&mut self, arena: &mut Arena, data: &[u8]) {
        self.reserve(arena, data.len());
        self.data.put_slice(data);
    }

    /// Makes sure `need` more bytes fit without the buffer reallocating by itself.
    /// Grows by doubling, or to the exact size plus padding when doubling is not enough.
    fn reserve(&mut self, arena: &mut Arena, need: usize) {
        let end = self.end();
        if self.data.capacity() - end >= need {
            return;
        }

        let mut size = (2 * self.data.capacity()).min(MAX_GROW_SIZE);
        if end + need > size {
            size = end + need + PADDING;
        }

        let mut grown = arena.allocate(size);
        grown.put_slice(&self.data);
        self.data = grown;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub header: Header,
    pub key: Bytes,
    pub value: ValueStruct,
}

#[derive(Debug, Clone)]
pub struct DecodedBlock {
    pub offsets: Vec<u32>,
    pub entries: Vec<Entry>,
}

/// Parses a closed, uncompressed block and checks its checksum.
pub fn decode(raw: &[u8]) -> Result<DecodedBlock> {
    let checksum_len = read_u32_tail(raw).context("reading checksum length")? as usize;
    let checksum_start = (raw.len() - U32_SIZE)
        .checked_sub(checksum_len)
        .context("checksum length exceeds the block")?;
    let checksum = Checksum::decode(&raw[checksum_start..raw.len() - U32_SIZE])?;

    let body = &raw[..checksum_start];
    if !checksum.verify(body) {
        bail!("block checksum mismatch");
    }

    let count = read_u32_tail(body).context("reading offsets count")? as usize;
    let offsets_start = (body.len() - U32_SIZE)
        .checked_sub(count * U32_SIZE)
        .context("offsets section exceeds the block")?;
    let mut raw_offsets = &body[offsets_start..body.len() - U32_SIZE];
    let offsets: Vec<u32> = (0..count).map(|_| raw_offsets.get_u32()).collect();

    let data = &body[..offsets_start];
    let mut base_key = Bytes::new();
    let mut entries = Vec::with_capacity(count);

    for (i, offset) in offsets.iter().enumerate() {
        let start = *offset as usize;
        let end = offsets.get(i + 1).map_or(data.len(), |next| *next as usize);
        if start > end || end > data.len() || end - start < HEADER_SIZE {
            bail!("entry #{} is out of the block bounds", i);
        }

        let entry = &data[start..end];
        let header = Header::decode(entry);
        let diff_end = HEADER_SIZE + header.diff as usize;
        if diff_end > entry.len() || (i > 0 && header.overlap as usize > base_key.len()) {
            bail!("entry #{} has a malformed header", i);
        }

        let diff = &entry[HEADER_SIZE..diff_end];
        let key = if i == 0 {
            base_key = Bytes::copy_from_slice(diff);
            base_key.clone()
        } else {
            let mut key = BytesMut::with_capacity(header.overlap as usize + diff.len());
            key.put_slice(&base_key[..header.overlap as usize]);
            key.put_slice(diff);
            key.freeze()
        };

        entries.push(Entry {
            header,
            key,
            value: ValueStruct::decode(&entry[diff_end..])?,
        });
    }

    Ok(DecodedBlock { offsets, entries })
}

fn read_u32_tail(raw: &[u8]) -> Result<u32> {
    if raw.len() < U32_SIZE {
        bail!("{} bytes left, expected at least {}", raw.len(), U32_SIZE);
    }

    Ok((&raw[raw.len() - U32_SIZE..]).get_u32())
}
