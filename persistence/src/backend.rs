use thiserror::Error;

/// Errors that can bubble out of a [`DbBackend`]. Per the engine's error
/// handling design, storage errors always propagate rather than being
/// logged and swallowed.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend I/O failure: {0}")]
    Io(String),
}

/// A pluggable byte-keyed key-value backend. All persistent collections in
/// this crate are built on top of this single trait, so a node can swap a
/// durable `sled` tree in for an in-memory map (e.g. in tests) without any
/// other code changing.
pub trait DbBackend: Send + Sync + 'static {
    /// Inserts a key-value pair, returning the previous value if it existed.
    fn insert(&self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>, BackendError>;
    /// Removes a key-value pair, returning the previous value if it existed.
    fn remove(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError>;
    /// Gets a value by key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError>;
    /// Flushes any buffered writes to durable storage. Called once per tick.
    fn flush(&self) -> Result<(), BackendError>;
}

/// An in-memory backend, mainly for tests and for nodes that do not need
/// state to survive a restart.
#[derive(Default)]
pub struct InMemoryBackend {
    inner: parking_lot::RwLock<im::OrdMap<Vec<u8>, Vec<u8>>>,
}

impl DbBackend for InMemoryBackend {
    fn insert(&self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(self.inner.write().insert(key.to_vec(), value.to_vec()))
    }

    fn remove(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(self.inner.write().remove(key))
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(self.inner.read().get(key).cloned())
    }

    fn flush(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// A `sled`-backed durable backend.
pub struct SledBackend {
    tree: sled::Tree,
}

impl SledBackend {
    pub fn new(tree: sled::Tree) -> Self {
        Self { tree }
    }
}

impl DbBackend for SledBackend {
    fn insert(&self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>, BackendError> {
        self.tree
            .insert(key, value)
            .map(|old| old.map(|v| v.to_vec()))
            .map_err(|e| BackendError::Io(e.to_string()))
    }

    fn remove(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError> {
        self.tree
            .remove(key)
            .map(|old| old.map(|v| v.to_vec()))
            .map_err(|e| BackendError::Io(e.to_string()))
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError> {
        self.tree
            .get(key)
            .map(|v| v.map(|v| v.to_vec()))
            .map_err(|e| BackendError::Io(e.to_string()))
    }

    fn flush(&self) -> Result<(), BackendError> {
        self.tree
            .flush()
            .map(|_| ())
            .map_err(|e| BackendError::Io(e.to_string()))
    }
}
