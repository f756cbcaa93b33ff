use bytes::BytesMut;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// How many released arenas a shared pool keeps around for reuse.
const MAX_FREE_ARENAS: usize = 8;

/// Arena hands out byte regions carved from one large chunk. Regions are never freed
/// one by one, they go away together with the build that requested them. When the
/// chunk runs out a new one is started, regions already handed out stay valid.
pub struct Arena {
    tag: &'static str,
    chunk: BytesMut,
    chunk_size: usize,
    allocated: usize,
}

impl Arena {
    pub fn new(size_hint: usize, tag: &'static str) -> Self {
        Self {
            tag,
            chunk: BytesMut::with_capacity(size_hint),
            chunk_size: size_hint,
            allocated: 0,
        }
    }

    /// Returns an empty region with exactly `n` bytes of capacity. Writing past
    /// the capacity is the caller's problem: it has to allocate a larger region.
    pub fn allocate(&mut self, n: usize) -> BytesMut {
        if self.chunk.capacity() < n {
            self.chunk = BytesMut::with_capacity(n.max(self.chunk_size));
        }

        // Splitting off the front of the chunk shares its allocation.
        self.chunk.resize(n, 0);
        let mut region = self.chunk.split_to(n);
        region.clear();

        self.allocated += n;
        region
    }

    /// Total bytes handed out since the arena was acquired.
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    pub fn tag(&self) -> &'static str {
        self.tag
    }

    /// Prepares a released arena for the next build. The old chunk is reclaimed
    /// when every region carved out of it has been dropped already.
    fn reset(&mut self, size_hint: usize, tag: &'static str) {
        self.tag = tag;
        self.allocated = 0;
        self.chunk_size = size_hint;
        self.chunk.clear();
        self.chunk.reserve(size_hint);
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("tag", &self.tag)
            .field("chunk_size", &self.chunk_size)
            .field("allocated", &self.allocated)
            .finish()
    }
}

/// Source of arenas. An arena is owned by a single table build and goes back
/// to the pool only once the build output has been consumed.
pub trait ArenaPool: Send + Sync + fmt::Debug {
    fn acquire(&self, size_hint: usize, tag: &'static str) -> Arena;

    fn release(&self, arena: Arena);
}

/// Pool keeping a bounded free list of arenas shared between builders.
#[derive(Debug, Clone, Default)]
pub struct SharedArenaPool {
    free: Arc<Mutex<Vec<Arena>>>,
}

impl SharedArenaPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of arenas waiting for reuse.
    pub fn free_len(&self) -> usize {
        self.free.lock().len()
    }
}

impl ArenaPool for SharedArenaPool {
    fn acquire(&self, size_hint: usize, tag: &'static str) -> Arena {
        match self.free.lock().pop() {
            Some(mut arena) => {
                arena.reset(size_hint, tag);
                arena
            }
            None => Arena::new(size_hint, tag),
        }
    }

    fn release(&self, arena: Arena) {
        trace!("arena {} released, {} bytes allocated", arena.tag, arena.allocated);

        let mut free = self.free.lock();
        if free.len() < MAX_FREE_ARENAS {
            free.push(arena);
        }
    }
}
