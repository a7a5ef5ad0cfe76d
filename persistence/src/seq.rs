use std::marker::PhantomData;
use std::sync::Arc;

use crate::backend::DbBackend;
use crate::codec::{unwrap_slot, wrap_nil, wrap_present, Codec, CodecError};
use crate::error::PersistError;

fn encode_scalar<T: serde::Serialize>(v: &T) -> Vec<u8> {
    stdcode::serialize(v).expect("scalar counters always serialize")
}

fn decode_scalar<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, PersistError> {
    stdcode::deserialize(bytes)
        .map_err(|e| PersistError::Codec(CodecError::Decode(e.to_string())))
}

fn len_key(ns: &str) -> Vec<u8> {
    format!("{ns}:__len__").into_bytes()
}

fn elem_key(ns: &str, index: u64) -> Vec<u8> {
    let mut key = format!("{ns}:").into_bytes();
    key.extend_from_slice(&stdcode::serialize(&index).expect("u64 always serializes"));
    key
}

/// A durable, append-only-by-default sequence over a [`DbBackend`], with
/// holes (`None`) distinguishable from absent/out-of-range slots. Mirrors
/// the `LDBList` keyspace convention: one key per index plus a `__len__`
/// scalar.
pub struct PersistentSeq<T, C: Codec<T>> {
    backend: Arc<dyn DbBackend>,
    ns: String,
    codec: C,
    _value: PhantomData<T>,
}

impl<T, C: Codec<T>> PersistentSeq<T, C> {
    pub fn new(backend: Arc<dyn DbBackend>, ns: impl Into<String>, codec: C) -> Self {
        Self {
            backend,
            ns: ns.into(),
            codec,
            _value: PhantomData,
        }
    }

    pub fn len(&self) -> Result<u64, PersistError> {
        match self.backend.get(&len_key(&self.ns))? {
            Some(bytes) => decode_scalar(&bytes),
            None => Ok(0),
        }
    }

    pub fn is_empty(&self) -> Result<bool, PersistError> {
        Ok(self.len()? == 0)
    }

    fn set_len(&self, new_len: u64) -> Result<(), PersistError> {
        self.backend
            .insert(&len_key(&self.ns), &encode_scalar(&new_len))?;
        Ok(())
    }

    /// Resolves a possibly-negative index (Python-style modulo) against the
    /// current length, failing with `OutOfRange` if it doesn't land inside
    /// `0..len`.
    fn resolve_index(&self, index: i64, len: u64) -> Result<u64, PersistError> {
        let len_i = len as i64;
        let resolved = if index < 0 { index + len_i } else { index };
        if resolved < 0 || resolved >= len_i {
            return Err(PersistError::OutOfRange {
                index,
                length: len,
            });
        }
        Ok(resolved as u64)
    }

    /// Gets the element at `index`, or `Ok(None)` if the slot is a hole.
    /// Fails with `OutOfRange` if the index itself is outside `0..len`.
    pub fn get(&self, index: i64) -> Result<Option<T>, PersistError> {
        let len = self.len()?;
        let idx = self.resolve_index(index, len)?;
        self.get_raw(idx)
    }

    fn get_raw(&self, idx: u64) -> Result<Option<T>, PersistError> {
        match self.backend.get(&elem_key(&self.ns, idx))? {
            None => Ok(None),
            Some(bytes) => match unwrap_slot(&bytes)? {
                None => Ok(None),
                Some(inner) => Ok(Some(self.codec.decode(inner)?)),
            },
        }
    }

    /// Overwrites the element at `index`. The index must already be within
    /// `0..len` — use [`Self::append`] to grow the sequence.
    pub fn set(&self, index: i64, value: Option<T>) -> Result<(), PersistError> {
        let len = self.len()?;
        let idx = self.resolve_index(index, len)?;
        self.set_raw(idx, value)
    }

    fn set_raw(&self, idx: u64, value: Option<T>) -> Result<(), PersistError> {
        let encoded = match value {
            None => wrap_nil(),
            Some(v) => wrap_present(&self.codec.encode(&v)),
        };
        self.backend.insert(&elem_key(&self.ns, idx), &encoded)?;
        Ok(())
    }

    /// Appends a new element (possibly a hole), growing the length by one.
    pub fn append(&self, value: Option<T>) -> Result<(), PersistError> {
        let len = self.len()?;
        self.set_raw(len, value)?;
        self.set_len(len + 1)
    }

    /// Grows the sequence with holes until it reaches `target_len`. A no-op
    /// if already at or past that length.
    pub fn extend_with_nil_to(&self, target_len: u64) -> Result<(), PersistError> {
        let mut len = self.len()?;
        while len < target_len {
            self.set_raw(len, None)?;
            len += 1;
            self.set_len(len)?;
        }
        Ok(())
    }

    /// Directly shrinks the recorded length, without touching any element
    /// keys. Used only by [`crate::map::PersistentMap::delete`] once it has
    /// already rewritten the surviving keys into a dense prefix.
    pub(crate) fn set_len_for_delete(&self, new_len: u64) -> Result<(), PersistError> {
        self.set_len(new_len)
    }

    /// Returns a contiguous slice `[start, end)`, clamped to the current
    /// length.
    pub fn slice(&self, start: u64, end: u64) -> Result<Vec<Option<T>>, PersistError> {
        let len = self.len()?;
        let end = end.min(len);
        let mut out = Vec::new();
        for idx in start..end {
            out.push(self.get_raw(idx)?);
        }
        Ok(out)
    }
}
