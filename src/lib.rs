pub mod arena;
pub mod key;
pub mod options;
pub mod storage;
pub mod table;
pub mod value;

pub use arena::{Arena, ArenaPool, SharedArenaPool};
pub use options::{Compression, Options};
pub use table::build_data::BuildData;
pub use table::Builder;
pub use value::ValueStruct;

use std::io;

pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;

/// Durable target finished tables are written to.
pub trait Sink: Clone + Send + 'static {
    type File: SinkFile;

    /// Includes any setup required by the sink to function. For file system it could be creating
    /// directories for data, for network blob storage it could register a bucket and so on.
    fn bootstrap(&self) -> io::Result<()>;

    /// Creates a new table file. `expected_size` is the exact number of bytes that will be
    /// written, sinks may use it to preallocate.
    fn open_new_file(&self, name: &str, expected_size: usize) -> io::Result<Self::File>;
}

pub trait SinkFile {
    /// Appends data to the file.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Makes everything written so far durable.
    fn sync(&mut self) -> io::Result<()>;
}
