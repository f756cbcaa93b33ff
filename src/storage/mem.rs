use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;

/// A dummy persistance layer that keeps tables in memory. Exists for test.
/// Files become visible once synced.
#[derive(Clone, Debug, Default)]
pub struct MemStorage {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

pub fn new() -> MemStorage {
    MemStorage::default()
}

impl MemStorage {
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.entries.lock().get(name).cloned()
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.lock().keys().cloned().collect();
        names.sort();

        names
    }
}

impl crate::Sink for MemStorage {
    type File = MemFile;

    fn bootstrap(&self) -> io::Result<()> {
        Ok(())
    }

    fn open_new_file(&self, name: &str, expected_size: usize) -> io::Result<Self::File> {
        if self.entries.lock().contains_key(name) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("table {} already exists", name),
            ));
        }

        Ok(MemFile {
            name: name.to_string(),
            data: Vec::with_capacity(expected_size),
            entries: Arc::clone(&self.entries),
        })
    }
}

#[derive(Debug)]
pub struct MemFile {
    name: String,
    data: Vec<u8>,
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl crate::SinkFile for MemFile {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.data.extend_from_slice(data);

        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.entries
            .lock()
            .insert(self.name.clone(), self.data.clone());

        Ok(())
    }
}
