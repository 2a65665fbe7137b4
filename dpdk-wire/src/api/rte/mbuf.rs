// Mbuf API
// A packet buffer borrowed from a mempool slot.

use std::slice;
use std::sync::Arc;

use super::pktmbuf::{PKTMBUF_HEADROOM, PoolShared};

/// Port value of an mbuf that has not been received on any port.
pub const MBUF_NO_PORT: u16 = u16::MAX;

/// A packet buffer.
///
/// This provides a safe, buffer-like interface for packet data.
/// The mbuf owns its slot exclusively and returns it to the pool when dropped.
pub struct Mbuf {
    pool: Arc<PoolShared>,
    index: u32,
    data_off: u16,
    data_len: u16,
    port: u16,
}

impl Mbuf {
    pub(crate) fn from_slot(pool: Arc<PoolShared>, index: u32) -> Self {
        let data_off = PKTMBUF_HEADROOM.min(pool.data_room());
        Mbuf {
            pool,
            index,
            data_off,
            data_len: 0,
            port: MBUF_NO_PORT,
        }
    }

    #[inline]
    fn buf_ptr(&self) -> *mut u8 {
        self.pool.slot_ptr(self.index)
    }

    #[inline]
    fn buf_len(&self) -> usize {
        self.pool.data_room() as usize
    }

    /// Get the current data length (bytes of valid data).
    #[inline]
    pub fn data_len(&self) -> usize {
        self.data_len as usize
    }

    /// Get the total packet length. Mbufs are never chained, so this
    /// equals `data_len`.
    #[inline]
    pub fn pkt_len(&self) -> usize {
        self.data_len as usize
    }

    /// Get the headroom (unused space at the front of the buffer).
    #[inline]
    pub fn headroom(&self) -> usize {
        self.data_off as usize
    }

    /// Get the tailroom (unused space at the end of the buffer).
    #[inline]
    pub fn tailroom(&self) -> usize {
        self.buf_len() - self.data_off as usize - self.data_len as usize
    }

    /// Get the total capacity (data_len + tailroom).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data_len() + self.tailroom()
    }

    /// Input port of a received mbuf, `MBUF_NO_PORT` otherwise.
    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[inline]
    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    /// Get an immutable slice of the packet data.
    #[inline]
    pub fn data(&self) -> &[u8] {
        // SAFETY: the slot belongs to this mbuf alone and
        // data_off + data_len <= data room.
        unsafe {
            slice::from_raw_parts(
                self.buf_ptr().add(self.data_off as usize),
                self.data_len as usize,
            )
        }
    }

    /// Get a mutable slice of the packet data.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `data`, and &mut self gives exclusive access.
        unsafe {
            slice::from_raw_parts_mut(
                self.buf_ptr().add(self.data_off as usize),
                self.data_len as usize,
            )
        }
    }

    /// Append space to the end of the packet data.
    ///
    /// Returns a mutable slice to the newly appended region,
    /// or `None` if there's not enough tailroom.
    #[inline]
    pub fn append(&mut self, len: usize) -> Option<&mut [u8]> {
        if len > self.tailroom() {
            return None;
        }
        let start = self.data_off as usize + self.data_len as usize;
        self.data_len += len as u16;
        // SAFETY: [start, start + len) was tailroom inside the slot.
        Some(unsafe { slice::from_raw_parts_mut(self.buf_ptr().add(start), len) })
    }

    /// Reset the mbuf to its initial state (empty, with default headroom).
    #[inline]
    pub fn reset(&mut self) {
        self.data_off = PKTMBUF_HEADROOM.min(self.pool.data_room());
        self.data_len = 0;
        self.port = MBUF_NO_PORT;
    }

    /// Copy data from a slice, resetting the mbuf first.
    pub fn copy_from_slice(&mut self, data: &[u8]) -> bool {
        self.reset();
        if let Some(buf) = self.append(data.len()) {
            buf.copy_from_slice(data);
            true
        } else {
            false
        }
    }
}

impl Drop for Mbuf {
    fn drop(&mut self) {
        self.pool.put(self.index);
    }
}

impl AsRef<[u8]> for Mbuf {
    fn as_ref(&self) -> &[u8] {
        self.data()
    }
}

impl AsMut<[u8]> for Mbuf {
    fn as_mut(&mut self) -> &mut [u8] {
        self.data_mut()
    }
}

impl std::fmt::Debug for Mbuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mbuf")
            .field("data_len", &self.data_len())
            .field("headroom", &self.headroom())
            .field("tailroom", &self.tailroom())
            .field("port", &self.port)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::api::rte::pktmbuf::{MBUF_DEFAULT_DATAROOM, MemPool, MemPoolConfig};

    use super::*;

    fn pool(name: &str) -> MemPool {
        MemPool::create(name, &MemPoolConfig::new().num_mbufs(4).cache_size(0)).unwrap()
    }

    #[test]
    fn test_fresh_mbuf_layout() {
        let pool = pool("mbuf_layout");
        let m = pool.try_alloc().unwrap();
        assert_eq!(m.data_len(), 0);
        assert_eq!(m.headroom(), PKTMBUF_HEADROOM as usize);
        assert_eq!(m.tailroom(), MBUF_DEFAULT_DATAROOM as usize);
        assert_eq!(m.port(), MBUF_NO_PORT);
    }

    #[test]
    fn test_append_within_tailroom() {
        let pool = pool("mbuf_edit");
        let mut m = pool.try_alloc().unwrap();

        m.append(4).unwrap().copy_from_slice(&[1, 2, 3, 4]);
        m.append(2).unwrap().copy_from_slice(&[9, 9]);
        assert_eq!(m.data(), &[1, 2, 3, 4, 9, 9]);
        assert_eq!(m.tailroom(), MBUF_DEFAULT_DATAROOM as usize - 6);

        assert!(m.append(m.tailroom() + 1).is_none());
        assert_eq!(m.data_len(), 6);
        m.data_mut()[0] = 7;
        assert_eq!(m.data()[0], 7);
    }

    #[test]
    fn test_copy_from_slice_resets() {
        let pool = pool("mbuf_copy");
        let mut m = pool.try_alloc().unwrap();
        m.set_port(3);
        assert!(m.copy_from_slice(b"first frame"));
        assert!(m.copy_from_slice(b"second"));
        assert_eq!(m.data(), b"second");
        assert_eq!(m.port(), MBUF_NO_PORT);

        let too_big = vec![0u8; m.capacity() + m.headroom() + 1];
        assert!(!m.copy_from_slice(&too_big));
    }

    #[test]
    fn test_slots_are_independent() {
        let pool = pool("mbuf_slots");
        let mut a = pool.try_alloc().unwrap();
        let mut b = pool.try_alloc().unwrap();
        a.copy_from_slice(&[0xaa; 64]);
        b.copy_from_slice(&[0xbb; 64]);
        assert!(a.data().iter().all(|&x| x == 0xaa));
        assert!(b.data().iter().all(|&x| x == 0xbb));
    }

    #[test]
    fn test_mbuf_outlives_pool_handle() {
        let pool = pool("mbuf_outlive");
        let mut m = pool.try_alloc().unwrap();
        drop(pool);
        m.copy_from_slice(b"still valid");
        assert_eq!(m.data(), b"still valid");
    }
}
