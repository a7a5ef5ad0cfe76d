use thiserror::Error;

use crate::backend::BackendError;
use crate::codec::CodecError;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("index {index} out of range (length {length})")]
    OutOfRange { index: i64, length: u64 },
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("key not found")]
    NotFound,
}
