use crate::arena::{Arena, ArenaPool};
use crate::{Sink, SinkFile};
use anyhow::{Context, Result};
use bytes::Bytes;
use std::convert::Infallible;
use std::io;
use std::sync::Arc;
use tracing::info;

/*
Table layout schema.
-----------------------------------------------------------------------------------------------
| Block #1 | ... | Block #N | Index | Index len (4B) | Checksum | Checksum len (4B) |
-----------------------------------------------------------------------------------------------
Block and index layouts are given where they are built.
*/

/// Finished block, possibly compressed.
#[derive(Debug, Clone)]
pub struct BuiltBlock {
    pub id: u32,
    pub base_key: Bytes,
    pub max_key: Bytes,
    pub data: Bytes,
}

/// Finished table. Block bytes are carved from the build's arena, the arena goes
/// back to the pool once this is dropped.
#[derive(Debug)]
pub struct BuildData {
    pub blocks: Vec<BuiltBlock>,
    pub filter: Option<Bytes>,
    pub index: Bytes,
    pub checksum: Bytes,
    /// Bytes taken by the block stream.
    pub data_size: usize,
    /// Bytes the whole table takes once written.
    pub size: usize,
    arena: Option<Arena>,
    pool: Arc<dyn ArenaPool>,
}

impl BuildData {
    pub(crate) fn new(
        blocks: Vec<BuiltBlock>,
        filter: Option<Bytes>,
        index: Bytes,
        checksum: Bytes,
        arena: Option<Arena>,
        pool: Arc<dyn ArenaPool>,
    ) -> Self {
        let data_size = blocks.iter().map(|b| b.data.len()).sum();
        let size = data_size + index.len() + 4 + checksum.len() + 4;

        Self {
            blocks,
            filter,
            index,
            checksum,
            data_size,
            size,
            arena,
            pool,
        }
    }

    /// Artifact of a build that never produced a block.
    pub(crate) fn empty(arena: Option<Arena>, pool: Arc<dyn ArenaPool>) -> Self {
        Self {
            blocks: Vec::new(),
            filter: None,
            index: Bytes::new(),
            checksum: Bytes::new(),
            data_size: 0,
            size: 0,
            arena,
            pool,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Copies the whole table into `dst`, which has to hold at least `size` bytes.
    /// Returns the number of bytes written.
    pub fn copy_to(&self, dst: &mut [u8]) -> usize {
        assert!(
            dst.len() >= self.size,
            "destination of {} bytes can not hold a table of {} bytes",
            dst.len(),
            self.size
        );

        let mut written = 0;
        let copied = self.for_each_part(|part| {
            dst[written..written + part.len()].copy_from_slice(part);
            written += part.len();
            Ok::<(), Infallible>(())
        });
        match copied {
            Ok(()) => written,
            Err(never) => match never {},
        }
    }

    /// Streams the table into an already opened file, block by block.
    pub fn write_to_file<F: SinkFile>(&self, file: &mut F) -> io::Result<()> {
        self.for_each_part(|part| file.write(part))
    }

    /// Creates the table file `name` in the sink, streams the table into it and syncs it.
    pub fn write_to<S: Sink>(&self, name: &str, sink: &S) -> Result<S::File> {
        let mut file = sink
            .open_new_file(name, self.size)
            .with_context(|| format!("while creating table: {}", name))?;

        self.write_to_file(&mut file)
            .with_context(|| format!("while writing table: {}", name))?;

        file.sync()
            .with_context(|| format!("while syncing table: {}", name))?;

        info!(
            "table {} written: {} blocks, {} bytes",
            name,
            self.blocks.len(),
            self.size
        );

        Ok(file)
    }

    fn for_each_part<F, E>(&self, mut f: F) -> Result<(), E>
    where
        F: FnMut(&[u8]) -> Result<(), E>,
    {
        if self.is_empty() {
            return Ok(());
        }

        for block in &self.blocks {
            f(&block.data)?;
        }

        f(&self.index)?;
        f(&(self.index.len() as u32).to_be_bytes())?;
        f(&self.checksum)?;
        f(&(self.checksum.len() as u32).to_be_bytes())
    }
}

impl Drop for BuildData {
    fn drop(&mut self) {
        if let Some(arena) = self.arena.take() {
            self.pool.release(arena);
        }
    }
}
