use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};

use crate::backend::DbBackend;
use crate::codec::{unwrap_slot, wrap_present, Codec};
use crate::error::PersistError;
use crate::seq::PersistentSeq;

fn entry_key<K: Serialize>(ns: &str, key: &K) -> Result<Vec<u8>, PersistError> {
    let mut out = format!("{ns}:").into_bytes();
    out.extend_from_slice(&stdcode::serialize(key).map_err(|e| {
        crate::codec::CodecError::Decode(format!("cannot encode map key: {e}"))
    })?);
    Ok(out)
}

/// A durable keyed map over a [`DbBackend`], with a companion ordered
/// sequence (`{ns}:__keys__`) tracking insertion order so the whole map can
/// be enumerated without a backend range scan. Mirrors `LDBDict`.
pub struct PersistentMap<K, V, C: Codec<V>> {
    backend: Arc<dyn DbBackend>,
    ns: String,
    codec: C,
    keys: PersistentSeq<K, crate::codec::StdcodeCodec>,
    _value: std::marker::PhantomData<V>,
}

impl<K, V, C> PersistentMap<K, V, C>
where
    K: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static,
    C: Codec<V>,
{
    pub fn new(backend: Arc<dyn DbBackend>, ns: impl Into<String>, codec: C) -> Self {
        let ns = ns.into();
        let keys = PersistentSeq::new(
            backend.clone(),
            format!("{ns}:__keys__"),
            crate::codec::StdcodeCodec,
        );
        Self {
            backend,
            ns,
            codec,
            keys,
            _value: std::marker::PhantomData,
        }
    }

    pub fn len(&self) -> Result<u64, PersistError> {
        self.keys.len()
    }

    pub fn is_empty(&self) -> Result<bool, PersistError> {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &K) -> Result<bool, PersistError> {
        Ok(self.backend.get(&entry_key(&self.ns, key)?)?.is_some())
    }

    pub fn get(&self, key: &K) -> Result<Option<V>, PersistError> {
        match self.backend.get(&entry_key(&self.ns, key)?)? {
            None => Ok(None),
            Some(bytes) => match unwrap_slot(&bytes)? {
                None => Ok(None),
                Some(inner) => Ok(Some(self.codec.decode(inner)?)),
            },
        }
    }

    /// Inserts or overwrites `key`. Bumps the key-order sequence only the
    /// first time a key is seen, so the length stays in sync with the
    /// number of distinct keys.
    pub fn set(&self, key: K, value: V) -> Result<(), PersistError> {
        let is_new = !self.contains(&key)?;
        let encoded = wrap_present(&self.codec.encode(&value));
        self.backend.insert(&entry_key(&self.ns, &key)?, &encoded)?;
        if is_new {
            self.keys.append(Some(key))?;
        }
        Ok(())
    }

    /// Removes `key`, then rewrites the key-order sequence so it stays
    /// dense (no holes), matching `LDBDict.__delitem__`.
    pub fn delete(&self, key: &K) -> Result<(), PersistError> {
        if !self.contains(key)? {
            return Ok(());
        }
        self.backend.remove(&entry_key(&self.ns, key)?)?;
        let remaining: Vec<K> = self
            .keys
            .slice(0, self.keys.len()?)?
            .into_iter()
            .flatten()
            .filter(|k| k != key)
            .collect();
        for (idx, k) in remaining.iter().enumerate() {
            self.keys.set(idx as i64, Some(k.clone()))?;
        }
        // truncate any trailing holes left over from the shrink by
        // recreating the length counter directly (the underlying elements
        // beyond the new length are simply never read again).
        self.keys.set_len_for_delete(remaining.len() as u64)
    }

    pub fn keys(&self) -> Result<Vec<K>, PersistError> {
        Ok(self
            .keys
            .slice(0, self.keys.len()?)?
            .into_iter()
            .flatten()
            .collect())
    }

    pub fn values(&self) -> Result<Vec<V>, PersistError> {
        self.keys()?
            .into_iter()
            .map(|k| {
                self.get(&k)?
                    .ok_or(PersistError::NotFound)
            })
            .collect()
    }

    pub fn items(&self) -> Result<Vec<(K, V)>, PersistError> {
        self.keys()?
            .into_iter()
            .map(|k| {
                let v = self.get(&k)?.ok_or(PersistError::NotFound)?;
                Ok((k, v))
            })
            .collect()
    }
}
