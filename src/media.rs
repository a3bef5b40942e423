//! The media seam: how payloads move between buffers and slow storage.
//!
//! The cache is device-agnostic. It never performs I/O itself and never
//! calls the backend from inside its critical section; the backend is
//! stored at initialization and invoked by the object's current owner —
//! directly, or through the [`read_through`](crate::cache::ObjectCache::read_through)
//! and [`write_back`](crate::cache::ObjectLease::write_back) conveniences,
//! which run strictly outside the lock.
//!
//! A failed read or write is an ordinary error value. The holder reports it
//! to the cache by marking the lease erroneous before release (done
//! automatically by the conveniences); the release protocol then discards
//! the object's identity so a later acquisition retries from a clean miss.
//! The cache itself never retries — retry policy belongs to the backend or
//! its caller.

/// Storage backend for cached objects.
///
/// `group` and `key` identify the object the same way the cache does — for
/// a disk cache, typically drive and sector. `buf` is the object's payload
/// buffer, always exactly the configured buffer size.
pub trait MediaBackend {
    /// Backend error type, surfaced unchanged by the conveniences.
    type Error;

    /// Populates `buf` with the object's content from slow media.
    fn read(&self, group: u32, key: u32, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Flushes `buf` as the object's content to slow media.
    fn write(&self, group: u32, key: u32, buf: &[u8]) -> Result<(), Self::Error>;
}

/// Backend for caches whose payloads never touch media — scratch-buffer
/// pools, tests, callers doing their own I/O. Reads and writes succeed
/// without doing anything.
#[derive(Clone, Copy, Default, Debug)]
pub struct NullMedia;

impl MediaBackend for NullMedia {
    type Error = core::convert::Infallible;

    fn read(&self, _group: u32, _key: u32, _buf: &mut [u8]) -> Result<(), Self::Error> {
        Ok(())
    }

    fn write(&self, _group: u32, _key: u32, _buf: &[u8]) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl<M: MediaBackend + ?Sized> MediaBackend for &M {
    type Error = M::Error;

    fn read(&self, group: u32, key: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        (**self).read(group, key, buf)
    }

    fn write(&self, group: u32, key: u32, buf: &[u8]) -> Result<(), Self::Error> {
        (**self).write(group, key, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_media_is_a_no_op() {
        let media = NullMedia;
        let mut buf = [7u8; 4];
        assert!(media.read(1, 2, &mut buf).is_ok());
        assert_eq!(buf, [7, 7, 7, 7]);
        assert!(media.write(1, 2, &buf).is_ok());
    }

    #[test]
    fn test_backend_by_reference() {
        fn takes_backend<M: MediaBackend>(m: M, buf: &mut [u8]) {
            let _ = m.read(0, 0, buf);
        }
        let media = NullMedia;
        let mut buf = [0u8; 2];
        takes_backend(&media, &mut buf);
        takes_backend(media, &mut buf);
    }
}
