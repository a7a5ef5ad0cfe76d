use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("cannot decode value: {0}")]
    Decode(String),
}

/// A pluggable codec for one container's value type. Kept separate from the
/// nil-wrapping the collections do themselves, so a hole (absent element)
/// is always distinguishable from any value a codec can produce, including
/// an all-zero hash.
pub trait Codec<T>: Send + Sync + 'static {
    fn encode(&self, value: &T) -> Vec<u8>;
    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// The default codec, built on `stdcode` (the same varint-bincode wrapper
/// used for wire and KV encoding everywhere else in the engine).
#[derive(Default, Clone, Copy)]
pub struct StdcodeCodec;

impl<T: Serialize + DeserializeOwned + Send + Sync + 'static> Codec<T> for StdcodeCodec {
    fn encode(&self, value: &T) -> Vec<u8> {
        stdcode::serialize(value).expect("value must be serializable")
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        stdcode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

const NIL_MARKER: u8 = 0x00;
const SOME_MARKER: u8 = 0x01;

/// Wraps a value with a one-byte marker so a hole (`None`, absent) can never
/// be confused with a legitimately-encoded value, including a present value
/// that happens to encode to an empty byte string.
pub(crate) fn wrap_present(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 1);
    out.push(SOME_MARKER);
    out.extend_from_slice(bytes);
    out
}

pub(crate) fn wrap_nil() -> Vec<u8> {
    vec![NIL_MARKER]
}

pub(crate) fn unwrap_slot(bytes: &[u8]) -> Result<Option<&[u8]>, CodecError> {
    match bytes.first() {
        Some(&NIL_MARKER) => Ok(None),
        Some(&SOME_MARKER) => Ok(Some(&bytes[1..])),
        _ => Err(CodecError::Decode("missing slot marker byte".into())),
    }
}
