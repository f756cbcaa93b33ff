pub mod mem;

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DATA_PATH: &str = "/var/lib/tablet"; // Used when no directory is given.

#[derive(Clone, Debug)]
pub struct FsStorage {
    data_path: PathBuf,
}

pub enum DataPath {
    Default,
    Is(String),
}

pub fn new(path: DataPath) -> FsStorage {
    match path {
        DataPath::Default => FsStorage {
            data_path: PathBuf::from(DATA_PATH),
        },
        DataPath::Is(path_str) => FsStorage {
            data_path: PathBuf::from(path_str),
        },
    }
}

impl FsStorage {
    pub fn path(&self) -> &Path {
        self.data_path.as_path()
    }
}

impl crate::Sink for FsStorage {
    type File = FsFile;

    fn bootstrap(&self) -> io::Result<()> {
        if !self.data_path.exists() {
            fs::create_dir_all(self.data_path.as_path())?;
        }

        Ok(())
    }

    fn open_new_file(&self, name: &str, expected_size: usize) -> io::Result<Self::File> {
        let path = self.data_path.join(name);
        let file = File::options().write(true).create_new(true).open(&path)?;
        file.set_len(expected_size as u64)?;

        debug!("table file {} created, {} bytes", path.display(), expected_size);

        Ok(FsFile {
            dir: self.data_path.clone(),
            writer: BufWriter::new(file),
        })
    }
}

/// Table file being written sequentially from the start.
#[derive(Debug)]
pub struct FsFile {
    dir: PathBuf,
    writer: BufWriter<File>,
}

impl crate::SinkFile for FsFile {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        // New directory entry has to be durable too.
        File::open(self.dir.as_path())?.sync_all()
    }
}
