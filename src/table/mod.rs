pub mod block;
pub mod build_data;
pub mod checksum;
pub mod compression;
pub mod filter;
pub mod index;

use crate::arena::Arena;
use crate::key;
use crate::options::{Compression, Options};
use crate::value::ValueStruct;
use anyhow::Result;
use block::{Block, KeyDiff, PADDING};
use build_data::{BuildData, BuiltBlock};
use bytes::{Bytes, BytesMut};
use checksum::Checksum;
use compression::{Pipeline, StreamSize};
use index::{BlockOffset, TableIndex};
use std::mem;
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Upper bound for the arena a single build asks for up front.
const MAX_ARENA_SIZE: u64 = 256 << 20; // 256 MB.

const ARENA_TAG: &str = "table-builder";

/// Index length field closing the index.
const INDEX_LEN_SIZE: u64 = std::mem::size_of::<u32>() as u64; // 4.

/// Bytes of a finished block, still in the hands of a compression worker or not.
enum PendingData {
    Ready(BytesMut),
    Compressing(oneshot::Receiver<BytesMut>),
}

/// Block that left the producer. Its place in the table is fixed here, compression
/// only swaps its bytes.
struct FinishedBlock {
    id: u32,
    base_key: Bytes,
    max_key: Bytes,
    data: PendingData,
}

impl FinishedBlock {
    /// Must only be called once the compression pipeline is drained.
    fn resolve(self) -> BuiltBlock {
        let data = match self.data {
            PendingData::Ready(data) => data,
            PendingData::Compressing(mut rx) => match rx.try_recv() {
                Ok(data) => data,
                Err(e) => panic!("compressed block {} was lost: {}", self.id, e),
            },
        };

        BuiltBlock {
            id: self.id,
            base_key: self.base_key,
            max_key: self.max_key,
            data: data.freeze(),
        }
    }
}

/// Builds one table out of keys added in non-decreasing order. Typical lifecycle:
/// new -> add ... add (until reached_capacity) -> done, then the build data is
/// written to a sink.
pub struct Builder {
    opts: Options,
    table_capacity: u64,
    arena: Option<Arena>,
    cur_block: Block,
    last_key: KeyDiff,
    blocks: Vec<FinishedBlock>,
    key_hashes: Vec<u32>,
    filter: Option<JoinHandle<Vec<u8>>>,
    pipeline: Option<Pipeline>,
    /// Updated by compression workers.
    stream_size: Arc<StreamSize>,
    /// Set once `reached_capacity` answered true.
    reached: AtomicBool,
    uncompressed_size: u32,
    /// Estimate of what block descriptors take in the index.
    len_offsets: u32,
    max_version: u64,
    on_disk_size: u32,
    stale_data_size: u32,
    finalized: bool,
    started: Instant,
}

impl Builder {
    /// Fails on invalid options, nothing is spawned or allocated in that case.
    pub fn new(opts: Options) -> Result<Self> {
        opts.validate()?;

        let stream_size = Arc::new(StreamSize::default());
        let pipeline = match opts.compression {
            Compression::None => None,
            mode => {
                let workers = opts
                    .compression_workers
                    .unwrap_or_else(compression::default_workers);
                Some(Pipeline::start(
                    mode,
                    opts.zstd_level,
                    workers,
                    Arc::clone(&stream_size),
                )?)
            }
        };

        let arena_size = opts.table_size.saturating_mul(2).min(MAX_ARENA_SIZE) as usize;
        let mut arena = opts.alloc_pool.acquire(arena_size, ARENA_TAG);
        let cur_block = Block::new(0, arena.allocate(opts.block_size + PADDING));

        debug!(
            "table builder created: block size {}, table size {}, {} compression",
            opts.block_size, opts.table_size, opts.compression
        );

        Ok(Self {
            table_capacity: opts.table_capacity(),
            opts,
            arena: Some(arena),
            cur_block,
            last_key: KeyDiff::default(),
            blocks: Vec::new(),
            key_hashes: Vec::new(),
            filter: None,
            pipeline,
            stream_size,
            reached: AtomicBool::new(false),
            uncompressed_size: 0,
            len_offsets: 0,
            max_version: 0,
            on_disk_size: 0,
            stale_data_size: 0,
            finalized: false,
            started: Instant::now(),
        })
    }

    pub fn options(&self) -> &Options {
        &self.opts
    }

    pub fn is_empty(&self) -> bool {
        self.key_hashes.is_empty() && self.blocks.is_empty()
    }

    /// Adds an entry. `value_len` is the size the value takes outside of the table
    /// (e.g. in a value log), it only feeds the on-disk size.
    pub fn add(&mut self, key: &[u8], value: &ValueStruct, value_len: u32) {
        self.add_internal(key, value, value_len, false);
    }

    /// Same as `add` for an entry known to be stale. Stale bytes make the table
    /// a better compaction candidate.
    pub fn add_stale(&mut self, key: &[u8], value: &ValueStruct, value_len: u32) {
        // Entry offset + header.
        self.stale_data_size = checked_add(
            self.stale_data_size,
            key.len() + value.value.len() + 4 + 4,
            "stale data size",
        );
        self.add_internal(key, value, value_len, true);
    }

    fn add_internal(&mut self, key: &[u8], value: &ValueStruct, value_len: u32, is_stale: bool) {
        assert!(!self.finalized, "entry added to a finalized table");

        if self.should_finish_block(key, value) {
            if is_stale {
                // The key becomes the next block's base key in the index.
                self.stale_data_size =
                    checked_add(self.stale_data_size, key.len() + 4 + 4, "stale data size");
            }

            self.finish_block();

            let data = arena_mut(&mut self.arena).allocate(self.opts.block_size + PADDING);
            self.cur_block = Block::new(self.blocks.len() as u32, data);
        }

        self.key_hashes.push(key::hash(key));
        self.max_version = self.max_version.max(key::parse_ts(key));

        self.last_key = self.cur_block.add(arena_mut(&mut self.arena), key, value);
        self.on_disk_size = checked_add(self.on_disk_size, value_len as usize, "on-disk size");
    }

    /// An empty block always takes the entry, a single oversized entry gets a block of its own.
    fn should_finish_block(&self, key: &[u8], value: &ValueStruct) -> bool {
        if self.cur_block.is_empty() {
            return false;
        }

        self.cur_block.projected_size(key.len(), value.encoded_size()) as usize
            > self.opts.block_size
    }

    fn finish_block(&mut self) {
        if self.cur_block.is_empty() {
            return;
        }

        let mut block = mem::take(&mut self.cur_block);
        let max_key = block.finish(arena_mut(&mut self.arena), &self.last_key);

        self.uncompressed_size =
            checked_add(self.uncompressed_size, block.end(), "uncompressed size");
        self.len_offsets = self
            .len_offsets
            .checked_add(index::estimated_block_offset_size(block.base_key.len()))
            .unwrap_or_else(|| panic!("index size estimate overflows 32 bits"));

        debug!(
            "block {} finished: {} entries, {} bytes",
            block.id,
            block.entry_offsets.len(),
            block.end()
        );

        let data = match self.pipeline.as_mut() {
            Some(pipeline) => PendingData::Compressing(pipeline.submit(block.id, block.data)),
            None => PendingData::Ready(block.data),
        };

        self.blocks.push(FinishedBlock {
            id: block.id,
            base_key: block.base_key,
            max_key,
            data,
        });
    }

    /// Advisory: true once the table built so far takes 95% of the configured table size.
    /// Stays true from then on, even if compression shrinks the blocks counted so far.
    pub fn reached_capacity(&self) -> bool {
        if self.reached.load(Ordering::Relaxed) {
            return true;
        }

        let blocks_size = match self.opts.compression {
            Compression::None => self.uncompressed_size as u64,
            _ => self.stream_size.estimate(),
        };

        let estimate = blocks_size
            + self.cur_block.pending_overhead() as u64
            + INDEX_LEN_SIZE
            + self.len_offsets as u64;

        let reached = estimate >= self.table_capacity;
        if reached {
            self.reached.store(true, Ordering::Relaxed);
        }
        reached
    }

    /// Closes the open block and starts building the filter. Calling it again does nothing.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;

        self.finish_block();

        let hashes = mem::take(&mut self.key_hashes);
        if self.opts.bloom_false_positive <= 0.0 || hashes.is_empty() {
            return;
        }

        match filter::spawn(hashes, self.opts.bloom_false_positive) {
            Ok(handle) => self.filter = Some(handle),
            Err(e) => panic!("starting the filter builder failed: {}", e),
        }
    }

    /// Finalizes the table, waits for the compression workers and the filter and
    /// assembles the index.
    pub fn done(mut self) -> BuildData {
        self.finalize();

        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.close();
        }

        let filter = self.filter.take().map(|handle| match handle.join() {
            Ok(filter) => Bytes::from(filter),
            Err(e) => panic::resume_unwind(e),
        });

        let pool = Arc::clone(&self.opts.alloc_pool);
        if self.blocks.is_empty() {
            return BuildData::empty(self.arena.take(), pool);
        }

        let blocks: Vec<BuiltBlock> = mem::take(&mut self.blocks)
            .into_iter()
            .map(FinishedBlock::resolve)
            .collect();

        let index = self.build_index(&blocks, filter.clone());
        let checksum = Bytes::copy_from_slice(&Checksum::calculate(&index).encode());

        let data = BuildData::new(
            blocks,
            filter,
            Bytes::from(index),
            checksum,
            self.arena.take(),
            pool,
        );

        info!(
            "table built: {} blocks, {} bytes, took {:?}",
            data.blocks.len(),
            data.size,
            self.started.elapsed()
        );

        data
    }

    /// Builds the table and copies it into one buffer.
    pub fn finish(self) -> Vec<u8> {
        let data = self.done();
        let mut buf = vec![0u8; data.size];
        let written = data.copy_to(&mut buf);
        assert_eq!(written, buf.len(), "table copied partially");

        buf
    }

    fn build_index(&mut self, blocks: &[BuiltBlock], filter: Option<Bytes>) -> Vec<u8> {
        let mut offsets = Vec::with_capacity(blocks.len());
        let mut data_size: u32 = 0;
        for block in blocks {
            let len = checked_add(0, block.data.len(), "block length");
            offsets.push(BlockOffset {
                base_key: block.base_key.clone(),
                max_key: block.max_key.clone(),
                id: block.id,
                offset: data_size,
                len,
            });
            data_size = checked_add(data_size, block.data.len(), "block stream size");
        }

        let filter_size = filter.as_ref().map_or(0, |f| f.len());
        self.on_disk_size = checked_add(self.on_disk_size, filter_size, "on-disk size");
        self.on_disk_size = checked_add(self.on_disk_size, data_size as usize, "on-disk size");

        TableIndex {
            offsets,
            filter,
            max_version: self.max_version,
            uncompressed_size: self.uncompressed_size,
            on_disk_size: self.on_disk_size,
            stale_data_size: self.stale_data_size,
        }
        .encode()
    }
}

impl Drop for Builder {
    fn drop(&mut self) {
        if let Some(arena) = self.arena.take() {
            self.opts.alloc_pool.release(arena);
        }
    }
}

/// The arena only leaves the builder in `done`, which consumes it.
fn arena_mut(arena: &mut Option<Arena>) -> &mut Arena {
    match arena {
        Some(arena) => arena,
        None => panic!("table builder used after its arena was handed over"),
    }
}

fn checked_add(acc: u32, n: usize, what: &str) -> u32 {
    u32::try_from(n)
        .ok()
        .and_then(|n| acc.checked_add(n))
        .unwrap_or_else(|| panic!("{} overflows 32 bits", what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::SharedArenaPool;
    use crate::storage::mem;
    use bloomfilter::Bloom;
    use block::DecodedBlock;
    use tracing_test::traced_test;

    fn options(block_size: usize, table_size: u64, compression: Compression) -> Options {
        Options {
            block_size,
            table_size,
            compression,
            compression_workers: Some(2),
            ..Default::default()
        }
    }

    fn read_u32(raw: &[u8]) -> usize {
        u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize
    }

    /// Splits a written table into its index and decoded blocks.
    fn decode_table(raw: &[u8], compression: Compression) -> (TableIndex, Vec<DecodedBlock>) {
        let end = raw.len() - 4;
        let checksum_start = end - read_u32(&raw[end..]);
        let checksum = Checksum::decode(&raw[checksum_start..end]).unwrap();

        let index_end = checksum_start - 4;
        let index_start = index_end - read_u32(&raw[index_end..]);
        let index_raw = &raw[index_start..index_end];
        assert!(checksum.verify(index_raw), "index checksum mismatch");

        let index = TableIndex::decode(index_raw).unwrap();
        let blocks = index
            .offsets
            .iter()
            .map(|bo| {
                let start = bo.offset as usize;
                let data = &raw[start..start + bo.len as usize];
                let data = compression::decompress(data, compression).unwrap();
                block::decode(&data).unwrap()
            })
            .collect();

        (index, blocks)
    }

    fn entries(n: u64) -> Vec<(Bytes, ValueStruct)> {
        (0..n)
            .map(|i| {
                let key = key::key_with_ts(format!("key{:05}", i / 2).as_bytes(), 100 - i % 2);
                let value = ValueStruct {
                    meta: (i % 3) as u8,
                    user_meta: 1,
                    expires_at: i,
                    value: Bytes::from(format!("value-{}", i).repeat(i as usize % 5 + 1)),
                };
                (key, value)
            })
            .collect()
    }

    fn build(opts: Options, entries: &[(Bytes, ValueStruct)]) -> Vec<u8> {
        let mut builder = Builder::new(opts).unwrap();
        for (key, value) in entries {
            builder.add(key, value, 0);
        }
        builder.finish()
    }

    fn keys(blocks: &[DecodedBlock]) -> Vec<Bytes> {
        blocks
            .iter()
            .flat_map(|b| b.entries.iter().map(|e| e.key.clone()))
            .collect()
    }

    #[test]
    fn test_single_block() {
        let mut builder = Builder::new(options(4096, 1 << 20, Compression::None)).unwrap();
        for key in ["a1", "a2", "b1"] {
            builder.add(key.as_bytes(), &ValueStruct::new("x"), 0);
        }

        let (index, blocks) = decode_table(&builder.finish(), Compression::None);
        assert_eq!(index.offsets.len(), 1);
        assert_eq!(index.offsets[0].base_key, Bytes::from("a1"));
        assert_eq!(index.offsets[0].max_key, Bytes::from("b1"));
        assert_eq!(blocks[0].offsets.len(), 3);
        assert_eq!(keys(&blocks), vec!["a1", "a2", "b1"]);
    }

    #[test]
    fn test_block_split() {
        let mut builder = Builder::new(options(64, 1 << 20, Compression::None)).unwrap();
        for key in ["a1", "a2", "b1"] {
            builder.add(key.as_bytes(), &ValueStruct::new("x"), 0);
        }

        let (index, blocks) = decode_table(&builder.finish(), Compression::None);
        let bounds: Vec<(Bytes, Bytes, u32, u32, u32)> = index
            .offsets
            .iter()
            .map(|bo| (bo.base_key.clone(), bo.max_key.clone(), bo.id, bo.offset, bo.len))
            .collect();
        assert_eq!(
            bounds,
            vec![
                (Bytes::from("a1"), Bytes::from("a2"), 0, 0, 58),
                (Bytes::from("b1"), Bytes::from("b1"), 1, 58, 38),
            ]
        );
        assert_eq!(blocks[0].entries.len(), 2);
        assert_eq!(blocks[1].entries.len(), 1);
        assert_eq!(index.uncompressed_size, 96);
    }

    #[test]
    fn test_reproducible() {
        let entries = entries(500);
        for compression in [Compression::None, Compression::Snappy, Compression::Zstd] {
            let first = build(options(256, 1 << 20, compression), &entries);
            let second = build(options(256, 1 << 20, compression), &entries);
            assert_eq!(first, second, "{} builds differ", compression);
        }
    }

    #[test]
    fn test_reached_capacity() {
        let mut builder = Builder::new(options(1 << 20, 100, Compression::None)).unwrap();
        assert!(!builder.reached_capacity());

        // Open block overhead is 4 bytes per entry plus the 21 byte trailer and index length.
        let mut reached = Vec::new();
        for i in 1..=30 {
            builder.add(format!("key{:03}", i).as_bytes(), &ValueStruct::new("x"), 0);
            reached.push(builder.reached_capacity());
        }

        assert!(reached[..18].iter().all(|r| !r));
        assert!(reached[18..].iter().all(|r| *r));
    }

    #[test]
    fn test_reached_capacity_monotonic() {
        let mut builder = Builder::new(options(128, 4096, Compression::None)).unwrap();
        let mut last = false;
        for (key, value) in entries(200) {
            builder.add(&key, &value, 0);
            let reached = builder.reached_capacity();
            assert!(reached || !last, "capacity went back after {:?}", key);
            last = reached;
        }
        assert!(last);
    }

    #[test]
    fn test_reached_capacity_monotonic_compressed() {
        for compression in [Compression::Snappy, Compression::Zstd] {
            let mut builder = Builder::new(options(8192, 1400, compression)).unwrap();
            let mut first = None;
            for i in 0..600 {
                builder.add(format!("k{:06}", i).as_bytes(), &ValueStruct::new(""), 0);
                // Gives the workers time to shrink finished blocks.
                std::thread::sleep(std::time::Duration::from_micros(200));

                let reached = builder.reached_capacity();
                match first {
                    Some(at) => assert!(
                        reached,
                        "{}: capacity reached at {} went back at {}",
                        compression, at, i
                    ),
                    None if reached => first = Some(i),
                    None => {}
                }
            }
            assert!(first.is_some(), "{}: capacity never reached", compression);
        }
    }

    #[test]
    fn test_round_trip() {
        let entries = entries(1000);
        for compression in [Compression::None, Compression::Snappy, Compression::Zstd] {
            let raw = build(options(512, 1 << 20, compression), &entries);
            let (index, blocks) = decode_table(&raw, compression);
            assert!(index.offsets.len() > 1);

            let decoded: Vec<(Bytes, ValueStruct)> = blocks
                .iter()
                .flat_map(|b| b.entries.iter().map(|e| (e.key.clone(), e.value.clone())))
                .collect();
            assert_eq!(decoded, entries, "{} round trip", compression);
        }
    }

    #[test]
    fn test_prefix_headers() {
        let raw = build(options(512, 1 << 20, Compression::None), &entries(300));
        let (_, blocks) = decode_table(&raw, Compression::None);

        for block in blocks {
            let base = block.entries[0].key.clone();
            assert_eq!(block.entries[0].header.overlap, 0);
            assert_eq!(block.entries[0].header.diff as usize, base.len());

            for entry in &block.entries[1..] {
                let common = base
                    .iter()
                    .zip(entry.key.iter())
                    .take_while(|(a, b)| a == b)
                    .count();
                assert_eq!(entry.header.overlap as usize, common);
                assert_eq!(entry.header.diff as usize, entry.key.len() - common);
            }
        }
    }

    #[test]
    fn test_block_size_bound() {
        let mut entries = entries(300);
        entries.insert(
            100,
            (
                key::key_with_ts(b"key00050", 101),
                ValueStruct::new(vec![b'v'; 2000]),
            ),
        );

        let mut builder = Builder::new(options(512, 1 << 20, Compression::None)).unwrap();
        for (key, value) in &entries {
            builder.add(key, value, 0);
        }
        let data = builder.done();

        let mut oversized = 0;
        for block in &data.blocks {
            let decoded = block::decode(&block.data).unwrap();
            if block.data.len() > 512 {
                assert_eq!(decoded.entries.len(), 1);
                oversized += 1;
            }
        }
        assert_eq!(oversized, 1);
    }

    #[test]
    fn test_compressed_blocks_match() {
        let entries = entries(2000);
        let mut builder = Builder::new(options(1024, 1 << 20, Compression::None)).unwrap();
        for (key, value) in &entries {
            builder.add(key, value, 0);
        }
        let plain = builder.done();

        for (compression, workers) in [
            (Compression::Snappy, 1),
            (Compression::Snappy, 4),
            (Compression::Zstd, 1),
            (Compression::Zstd, 4),
        ] {
            let opts = Options {
                compression_workers: Some(workers),
                ..options(1024, 1 << 20, compression)
            };
            let mut builder = Builder::new(opts).unwrap();
            for (key, value) in &entries {
                builder.add(key, value, 0);
            }
            let compressed = builder.done();

            assert_eq!(compressed.blocks.len(), plain.blocks.len());
            for (c, p) in compressed.blocks.iter().zip(plain.blocks.iter()) {
                assert_eq!(c.id, p.id);
                assert_eq!(c.base_key, p.base_key);
                assert_eq!(
                    compression::decompress(&c.data, compression).unwrap(),
                    p.data.to_vec()
                );
            }
        }
    }

    #[test]
    fn test_compressed_capacity() {
        let mut builder = Builder::new(options(256, 4096, Compression::Snappy)).unwrap();
        for (key, value) in entries(100) {
            builder.add(&key, &value, 0);
        }
        builder.finalize();
        let stream_size = builder.stream_size.clone();

        let data = builder.done();
        assert_eq!(stream_size.compressed() as usize, data.data_size);
        assert_eq!(stream_size.estimate() as usize, data.data_size);
    }

    #[test]
    fn test_filter() {
        let entries = entries(400);
        let mut builder = Builder::new(options(512, 1 << 20, Compression::None)).unwrap();
        for (key, value) in &entries {
            builder.add(key, value, 0);
        }
        let data = builder.done();

        let filter = data.filter.clone().unwrap();
        let index = TableIndex::decode(&data.index).unwrap();
        assert_eq!(index.filter, Some(filter.clone()));

        let bloom = Bloom::<u32>::from_bytes(filter.to_vec()).unwrap();
        for (key, _) in &entries {
            assert!(bloom.check(&key::hash(key)));
        }
    }

    #[test]
    fn test_no_filter() {
        let opts = Options {
            bloom_false_positive: 0.0,
            ..options(512, 1 << 20, Compression::None)
        };
        let mut builder = Builder::new(opts).unwrap();
        for (key, value) in entries(10) {
            builder.add(&key, &value, 0);
        }
        let data = builder.done();

        assert!(data.filter.is_none());
        assert_eq!(TableIndex::decode(&data.index).unwrap().filter, None);
    }

    #[test]
    fn test_empty() {
        let builder = Builder::new(options(512, 1 << 20, Compression::Snappy)).unwrap();
        assert!(builder.is_empty());
        let data = builder.done();
        assert!(data.is_empty());
        assert!(data.filter.is_none());
        assert_eq!(data.size, 0);

        let builder = Builder::new(options(512, 1 << 20, Compression::None)).unwrap();
        assert!(builder.finish().is_empty());
    }

    #[test]
    fn test_accounting() {
        let mut builder = Builder::new(options(80, 1 << 20, Compression::None)).unwrap();
        builder.add(&key::key_with_ts(b"a", 7), &ValueStruct::new("x"), 100);
        builder.add(&key::key_with_ts(b"a", 3), &ValueStruct::new("x"), 100);
        assert!(!builder.is_empty());
        builder.add_stale(&key::key_with_ts(b"b", 12), &ValueStruct::new("x"), 50);

        let data = builder.done();
        let index = TableIndex::decode(&data.index).unwrap();

        assert_eq!(data.blocks.len(), 2);
        assert_eq!(index.max_version, 12);
        // Stale entry: 9 + 1 + 8, its key opening a new block adds 9 + 8.
        assert_eq!(index.stale_data_size, 35);
        assert_eq!(index.uncompressed_size as usize, data.data_size);

        let filter_size = data.filter.as_ref().map_or(0, |f| f.len());
        assert_eq!(
            index.on_disk_size as usize,
            250 + data.data_size + filter_size + data.index.len()
        );
    }

    #[test]
    fn test_invalid_options() {
        let opts = Options {
            zstd_level: 100,
            ..options(512, 1 << 20, Compression::Zstd)
        };
        assert!(Builder::new(opts).is_err());

        let opts = Options {
            compression_workers: Some(0),
            ..options(512, 1 << 20, Compression::Snappy)
        };
        assert!(Builder::new(opts).is_err());

        assert!(Builder::new(options(0, 1 << 20, Compression::None)).is_err());
    }

    #[test]
    fn test_finalize_twice() {
        let mut builder = Builder::new(options(512, 1 << 20, Compression::Snappy)).unwrap();
        for (key, value) in entries(50) {
            builder.add(&key, &value, 0);
        }
        builder.finalize();
        builder.finalize();

        let (_, blocks) = decode_table(&builder.finish(), Compression::Snappy);
        assert_eq!(keys(&blocks).len(), 50);
    }

    #[test]
    #[should_panic(expected = "entry added to a finalized table")]
    fn test_add_after_finalize() {
        let mut builder = Builder::new(options(512, 1 << 20, Compression::None)).unwrap();
        builder.add(b"a", &ValueStruct::new("x"), 0);
        builder.finalize();
        builder.add(b"b", &ValueStruct::new("x"), 0);
    }

    #[test]
    fn test_write_to_sink() {
        let entries = entries(100);
        let expected = build(options(512, 1 << 20, Compression::Zstd), &entries);

        let mut builder = Builder::new(options(512, 1 << 20, Compression::Zstd)).unwrap();
        for (key, value) in &entries {
            builder.add(key, value, 0);
        }

        let sink = mem::new();
        builder.done().write_to("000042.sst", &sink).unwrap();
        assert_eq!(sink.get("000042.sst").unwrap(), expected);
    }

    #[test]
    fn test_arena_returned() {
        let pool = SharedArenaPool::new();
        let opts = Options {
            alloc_pool: Arc::new(pool.clone()),
            ..options(512, 1 << 20, Compression::None)
        };

        let mut builder = Builder::new(opts.clone()).unwrap();
        builder.add(b"a", &ValueStruct::new("x"), 0);
        let data = builder.done();
        assert_eq!(pool.free_len(), 0);
        drop(data);
        assert_eq!(pool.free_len(), 1);

        let builder = Builder::new(opts).unwrap();
        assert_eq!(pool.free_len(), 0);
        drop(builder);
        assert_eq!(pool.free_len(), 1);
    }

    #[traced_test]
    #[test]
    fn test_logs() {
        let raw = build(options(512, 1 << 20, Compression::Snappy), &entries(100));
        assert!(!raw.is_empty());
        assert!(logs_contain("compression pipeline started"));
        assert!(logs_contain("table built"));
    }
}
