use crate::options::Compression;
use anyhow::{bail, Result};
use bytes::BytesMut;
use futures::channel::mpsc;
use futures::executor::{block_on, ThreadPool};
use futures::future::{join_all, RemoteHandle};
use futures::lock::Mutex;
use futures::task::SpawnExt;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, trace};

pub fn compress(data: &[u8], compression: Compression, level: i32) -> Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Snappy => Ok(snap::raw::Encoder::new().compress_vec(data)?),
        Compression::Zstd => Ok(zstd::encode_all(data, level)?),
    }
}

pub fn decompress(data: &[u8], compression: Compression) -> Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Snappy => Ok(snap::raw::Decoder::new().decompress_vec(data)?),
        Compression::Zstd => Ok(zstd::decode_all(data)?),
    }
}

/// Number of workers used when the options leave it open.
pub fn default_workers() -> usize {
    2 * std::thread::available_parallelism().map_or(1, |n| n.get())
}

/// Size of the block stream while blocks are still being compressed. A block
/// waiting for a worker counts with its uncompressed length until the worker
/// swaps in the compressed one.
#[derive(Debug, Default)]
pub(crate) struct StreamSize {
    compressed: AtomicU32,
    in_flight: AtomicU32,
}

impl StreamSize {
    /// Bytes of the blocks the workers are done with.
    pub fn compressed(&self) -> u32 {
        self.compressed.load(Ordering::SeqCst)
    }

    /// Never below the size the stream has at the moment of the call: `in_flight`
    /// only shrinks after `compressed` has grown.
    pub fn estimate(&self) -> u64 {
        let in_flight = self.in_flight.load(Ordering::SeqCst);
        in_flight as u64 + self.compressed.load(Ordering::SeqCst) as u64
    }

    fn submitted(&self, len: usize) {
        add_checked(&self.in_flight, len, "in-flight block size");
    }

    fn finished(&self, uncompressed: usize, compressed: usize) {
        add_checked(&self.compressed, compressed, "compressed size");
        self.in_flight.fetch_sub(uncompressed as u32, Ordering::SeqCst);
    }
}

fn add_checked(counter: &AtomicU32, n: usize, what: &str) {
    let updated = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |acc| {
        u32::try_from(n).ok().and_then(|n| acc.checked_add(n))
    });
    if updated.is_err() {
        panic!("{} overflows 32 bits", what);
    }
}

/// A finished block on its way through a worker. The buffer comes back through
/// `done` holding the compressed bytes.
struct Job {
    id: u32,
    data: BytesMut,
    done: oneshot::Sender<BytesMut>,
}

/// Fixed pool of workers compressing finished blocks off the producer's path.
/// The queue is bounded, so a producer running ahead of the workers waits in `submit`.
pub(crate) struct Pipeline {
    tx: Option<mpsc::Sender<Job>>,
    workers: Vec<RemoteHandle<()>>,
    size: Arc<StreamSize>,
    _pool: ThreadPool,
}

impl Pipeline {
    /// Checks the compression settings and spawns the workers. Nothing is spawned
    /// when the settings are rejected.
    pub fn start(
        compression: Compression,
        level: i32,
        workers: usize,
        size: Arc<StreamSize>,
    ) -> Result<Self> {
        match compression {
            Compression::None => bail!("compression pipeline needs a compression mode"),
            Compression::Snappy => {}
            Compression::Zstd => {
                if !zstd::compression_level_range().contains(&level) {
                    bail!("unsupported zstd compression level {}", level);
                }
            }
        }

        if workers == 0 {
            bail!("compression pipeline needs at least one worker");
        }

        let pool = ThreadPool::builder()
            .pool_size(workers)
            .name_prefix("tablet-compress-")
            .create()?;

        let (tx, rx) = mpsc::channel::<Job>(workers * 2);
        let rx = Arc::new(Mutex::new(rx));

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let handle = pool.spawn_with_handle(run_worker(
                Arc::clone(&rx),
                compression,
                level,
                Arc::clone(&size),
            ))?;
            handles.push(handle);
        }

        debug!(
            "compression pipeline started: {} workers, {} compression",
            workers, compression
        );

        Ok(Self {
            tx: Some(tx),
            workers: handles,
            size,
            _pool: pool,
        })
    }

    /// Hands a finished block over to the workers. The returned receiver yields the
    /// same buffer once it holds compressed bytes.
    pub fn submit(&mut self, id: u32, data: BytesMut) -> oneshot::Receiver<BytesMut> {
        let (done, rx) = oneshot::channel();

        let Some(tx) = self.tx.as_mut() else {
            panic!("block {} submitted after the compression queue was closed", id);
        };

        self.size.submitted(data.len());

        if block_on(tx.send(Job { id, data, done })).is_err() {
            panic!("compression workers are gone, block {} can not be compressed", id);
        }

        rx
    }

    /// Closes the queue and waits for every worker to drain it. A worker that
    /// panicked re-raises its panic here.
    pub fn close(&mut self) {
        if self.tx.take().is_none() {
            return;
        }

        block_on(join_all(self.workers.drain(..)));
        debug!("compression pipeline drained");
    }
}

async fn run_worker(
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    compression: Compression,
    level: i32,
    size: Arc<StreamSize>,
) {
    loop {
        let job = rx.lock().await.next().await;
        let Some(Job { id, mut data, done }) = job else {
            break;
        };

        let uncompressed = data.len();
        compress_in_place(id, &mut data, compression, level);
        size.finished(uncompressed, data.len());

        // The receiver only goes away when the builder is dropped mid-build.
        let _ = done.send(data);
    }
}

/// Replaces the block bytes with their compressed form. The output has to fit the
/// buffer the block was built in, padding included.
fn compress_in_place(id: u32, data: &mut BytesMut, compression: Compression, level: i32) {
    let end = data.len();
    let compressed = match compress(&data[..], compression, level) {
        Ok(compressed) => compressed,
        Err(e) => panic!("compressing block {} failed: {}", id, e),
    };

    let reserved = data.capacity();
    assert!(
        compressed.len() <= reserved,
        "compressed block {} takes {} bytes, only {} are reserved",
        id,
        compressed.len(),
        reserved
    );

    trace!("block {} compressed {} -> {} bytes", id, end, compressed.len());

    data.clear();
    data.extend_from_slice(&compressed);
}
