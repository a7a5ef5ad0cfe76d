pub mod backend;
pub mod codec;
pub mod error;
pub mod map;
pub mod seq;

pub use backend::{BackendError, DbBackend, InMemoryBackend, SledBackend};
pub use codec::{Codec, StdcodeCodec};
pub use error::PersistError;
pub use map::PersistentMap;
pub use seq::PersistentSeq;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn seq() -> PersistentSeq<u64, StdcodeCodec> {
        PersistentSeq::new(Arc::new(InMemoryBackend::default()), "heights", StdcodeCodec)
    }

    #[test]
    fn append_and_get() {
        let s = seq();
        s.append(Some(10)).unwrap();
        s.append(None).unwrap();
        s.append(Some(30)).unwrap();
        assert_eq!(s.len().unwrap(), 3);
        assert_eq!(s.get(0).unwrap(), Some(10));
        assert_eq!(s.get(1).unwrap(), None);
        assert_eq!(s.get(2).unwrap(), Some(30));
        assert_eq!(s.get(-1).unwrap(), Some(30));
    }

    #[test]
    fn out_of_range_fails() {
        let s = seq();
        s.append(Some(1)).unwrap();
        assert!(matches!(
            s.get(5),
            Err(PersistError::OutOfRange { .. })
        ));
        assert!(matches!(
            s.get(-5),
            Err(PersistError::OutOfRange { .. })
        ));
    }

    #[test]
    fn hole_distinguishable_from_zero_value() {
        let s: PersistentSeq<u64, StdcodeCodec> =
            PersistentSeq::new(Arc::new(InMemoryBackend::default()), "zeros", StdcodeCodec);
        s.append(Some(0)).unwrap();
        s.append(None).unwrap();
        assert_eq!(s.get(0).unwrap(), Some(0));
        assert_eq!(s.get(1).unwrap(), None);
    }

    #[test]
    fn map_preserves_density_after_delete() {
        let m: PersistentMap<u64, String, StdcodeCodec> =
            PersistentMap::new(Arc::new(InMemoryBackend::default()), "guardians", StdcodeCodec);
        m.set(0, "alice".into()).unwrap();
        m.set(1, "bob".into()).unwrap();
        m.set(2, "carol".into()).unwrap();
        m.delete(&1).unwrap();
        assert_eq!(m.len().unwrap(), 2);
        assert_eq!(m.keys().unwrap(), vec![0, 2]);
        assert!(!m.contains(&1).unwrap());
        assert_eq!(m.get(&2).unwrap(), Some("carol".into()));
    }

    #[test]
    fn map_set_is_idempotent_on_length() {
        let m: PersistentMap<u64, u64, StdcodeCodec> =
            PersistentMap::new(Arc::new(InMemoryBackend::default()), "m", StdcodeCodec);
        m.set(5, 100).unwrap();
        m.set(5, 200).unwrap();
        assert_eq!(m.len().unwrap(), 1);
        assert_eq!(m.get(&5).unwrap(), Some(200));
    }
}
