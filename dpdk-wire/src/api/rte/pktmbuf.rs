// pktmbuf API
// Packet mempools: a fixed set of equally sized buffer slots carved out of
// socket memory, handed out through a shared ring and per-lcore caches.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError, Weak};

use crossbeam::queue::ArrayQueue;
use crossbeam::utils::CachePadded;
use tracing::{debug, error};

use super::eth::PortId;
use super::lcore::{self, Lcore, RTE_MAX_LCORE};
use super::mbuf::Mbuf;
use super::memory::{self, Reservation};
use crate::api::Errno;

/// Bytes of per-buffer metadata accounted against socket memory.
pub const MBUF_HEADER_SIZE: u64 = 128;

/// Headroom reserved at the front of every buffer.
pub const PKTMBUF_HEADROOM: u16 = 128;

/// Default payload room, large enough for a standard ethernet frame.
pub const MBUF_DEFAULT_DATAROOM: u16 = 2048;

/// Default data room size including headroom.
pub const MBUF_DEFAULT_BUF_SIZE: u16 = MBUF_DEFAULT_DATAROOM + PKTMBUF_HEADROOM;

/// Largest per-lcore cache a pool accepts.
pub const MEMPOOL_CACHE_MAX_SIZE: u32 = 512;

static POOLS: LazyLock<Mutex<HashMap<String, Weak<PoolShared>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Errors from mempool creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemPoolError {
    /// Not enough socket memory for the requested pool.
    NoMemory { required: u64, available: u64 },
    /// A pool with this name already exists.
    NameExists(String),
    /// Pool parameters were rejected.
    InvalidConfig(Errno),
}

impl MemPoolError {
    /// The errno equivalent of this error.
    pub fn errno(&self) -> Errno {
        match self {
            MemPoolError::NoMemory { .. } => Errno::ENOMEM,
            MemPoolError::NameExists(_) => Errno::EEXIST,
            MemPoolError::InvalidConfig(e) => *e,
        }
    }
}

impl fmt::Display for MemPoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemPoolError::NoMemory {
                required,
                available,
            } => write!(
                f,
                "cannot allocate mbuf pool: {required} bytes required, {available} bytes available"
            ),
            MemPoolError::NameExists(name) => write!(f, "mempool '{name}' already exists"),
            MemPoolError::InvalidConfig(e) => write!(f, "invalid mempool configuration: {e}"),
        }
    }
}

impl std::error::Error for MemPoolError {}

/// Configuration for creating a MemPool
#[derive(Debug, Clone)]
pub struct MemPoolConfig {
    /// Number of mbufs in the pool (optimum: 2^q - 1)
    pub num_mbufs: u32,
    /// Per-core cache size (0 to disable caching)
    pub cache_size: u32,
    /// Private area size in front of each data buffer
    pub priv_size: u16,
    /// Data room size including PKTMBUF_HEADROOM
    pub data_room_size: u16,
    /// NUMA socket ID (-1 for any socket)
    pub socket_id: i32,
}

impl Default for MemPoolConfig {
    fn default() -> Self {
        Self {
            num_mbufs: 8191, // 2^13 - 1
            cache_size: 250,
            priv_size: 0,
            data_room_size: MBUF_DEFAULT_BUF_SIZE,
            socket_id: -1,
        }
    }
}

impl MemPoolConfig {
    /// Create a new MemPoolConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of mbufs in the pool.
    ///
    /// Optimum value is 2^q - 1 (e.g., 8191, 16383, 32767).
    pub fn num_mbufs(mut self, n: u32) -> Self {
        self.num_mbufs = n;
        self
    }

    /// Set the per-core cache size.
    ///
    /// Set to 0 to disable caching. Must not exceed num_mbufs / 1.5.
    pub fn cache_size(mut self, size: u32) -> Self {
        self.cache_size = size;
        self
    }

    /// Set the private area size.
    pub fn priv_size(mut self, size: u16) -> Self {
        self.priv_size = size;
        self
    }

    /// Set the data room size (including PKTMBUF_HEADROOM).
    ///
    /// The usable data capacity is `data_room_size - PKTMBUF_HEADROOM`.
    pub fn data_room_size(mut self, size: u16) -> Self {
        self.data_room_size = size;
        self
    }

    /// Set the NUMA socket ID.
    pub fn socket_id(mut self, id: i32) -> Self {
        self.socket_id = id;
        self
    }

    /// Socket memory needed by a pool with this configuration.
    ///
    /// Covers every buffer (metadata, private area, data room) plus the
    /// per-lcore cache metadata.
    pub fn required_bytes(&self) -> u64 {
        let per_mbuf = MBUF_HEADER_SIZE + self.priv_size as u64 + self.data_room_size as u64;
        let lcores = (Lcore::count() as u64).max(1);
        self.num_mbufs as u64 * per_mbuf + self.cache_size as u64 * MBUF_HEADER_SIZE * lcores
    }

    fn validate(&self, name: &str) -> Result<(), MemPoolError> {
        if name.is_empty() || self.num_mbufs == 0 || self.data_room_size < PKTMBUF_HEADROOM {
            return Err(MemPoolError::InvalidConfig(Errno::EINVAL));
        }
        // cache * 1.5 <= n, same bound DPDK enforces
        if self.cache_size > MEMPOOL_CACHE_MAX_SIZE
            || self.cache_size as u64 * 3 > self.num_mbufs as u64 * 2
        {
            return Err(MemPoolError::InvalidConfig(Errno::EINVAL));
        }
        Ok(())
    }
}

/// Backing store for all slots of a pool.
struct Region {
    ptr: NonNull<u8>,
    len: usize,
}

impl Region {
    fn alloc(len: usize) -> Option<Self> {
        let mut buf: Vec<u8> = Vec::new();
        buf.try_reserve_exact(len).ok()?;
        buf.resize(len, 0);
        let raw = Box::into_raw(buf.into_boxed_slice());
        NonNull::new(raw as *mut u8).map(|ptr| Region { ptr, len })
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        let slice = std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
        // SAFETY: built from Box<[u8]> of exactly this length in Region::alloc.
        drop(unsafe { Box::from_raw(slice) });
    }
}

/// State shared between a pool, its handles and every outstanding mbuf.
pub(crate) struct PoolShared {
    name: String,
    region: Region,
    elt_size: usize,
    num: u32,
    cache_size: u32,
    priv_size: u16,
    data_room: u16,
    ring: ArrayQueue<u32>,
    caches: Box<[CachePadded<Mutex<Vec<u32>>>]>,
    /// Buffers set aside for the descriptor rings of each port on this pool.
    ring_slots: Mutex<HashMap<PortId, u64>>,
    _reservation: Reservation,
}

// Slot bytes are only reached through the Mbuf that owns the slot index.
unsafe impl Send for PoolShared {}
unsafe impl Sync for PoolShared {}

impl PoolShared {
    fn flush_threshold(&self) -> usize {
        (self.cache_size as usize * 3) / 2
    }

    fn lcore_cache(&self) -> Option<MutexGuard<'_, Vec<u32>>> {
        if self.cache_size == 0 {
            return None;
        }
        let id = lcore::current_id()?;
        self.caches.get(id as usize).map(|c| lock(&**c))
    }

    /// Take a free slot index.
    pub(crate) fn get(&self) -> Option<u32> {
        if let Some(mut cache) = self.lcore_cache() {
            if cache.is_empty() {
                let want = self.cache_size as usize;
                while cache.len() < want {
                    match self.ring.pop() {
                        Some(idx) => cache.push(idx),
                        None => break,
                    }
                }
            }
            return cache.pop();
        }
        self.ring.pop()
    }

    /// Return a slot index to the pool.
    pub(crate) fn put(&self, idx: u32) {
        if let Some(mut cache) = self.lcore_cache() {
            cache.push(idx);
            if cache.len() >= self.flush_threshold() {
                let keep = self.cache_size as usize;
                for spill in cache.drain(keep..) {
                    self.push_ring(spill);
                }
            }
            return;
        }
        self.push_ring(idx);
    }

    fn push_ring(&self, idx: u32) {
        if self.ring.push(idx).is_err() {
            error!(pool = %self.name, idx, "Mempool ring overflow, slot leaked");
        }
    }

    /// Pointer to the start of a slot's data room.
    pub(crate) fn slot_ptr(&self, idx: u32) -> *mut u8 {
        let offset = idx as usize * self.elt_size + self.priv_size as usize;
        debug_assert!(offset + self.data_room as usize <= self.region.len);
        // SAFETY: idx < num, so the data room lies inside the region.
        unsafe { self.region.ptr.as_ptr().add(offset) }
    }

    pub(crate) fn data_room(&self) -> u16 {
        self.data_room
    }

    fn avail(&self) -> u32 {
        let cached: usize = self.caches.iter().map(|c| lock(&**c).len()).sum();
        (self.ring.len() + cached) as u32
    }
}

/// Shared handle to a packet mempool.
///
/// Returned by `MemPool::lookup()`; dropping it does NOT destroy the pool.
/// Use this when you need to share a mempool across threads.
#[derive(Clone)]
pub struct MemPoolRef {
    shared: Arc<PoolShared>,
}

impl MemPoolRef {
    /// Pool name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Total number of mbufs in the pool.
    pub fn size(&self) -> u32 {
        self.shared.num
    }

    /// Per-lcore cache size.
    pub fn cache_size(&self) -> u32 {
        self.shared.cache_size
    }

    /// Get the number of available (free) objects in the pool,
    /// including those parked in lcore caches.
    pub fn avail_count(&self) -> u32 {
        self.shared.avail()
    }

    /// Number of mbufs currently handed out.
    pub fn in_use_count(&self) -> u32 {
        self.size().saturating_sub(self.avail_count())
    }

    /// Get the data room size for mbufs in this pool.
    #[inline]
    pub fn data_room_size(&self) -> u16 {
        self.shared.data_room
    }

    /// Buffers the per-lcore caches may hold back: `cache_size` per lcore.
    pub fn cache_reserve(&self) -> u64 {
        self.shared.cache_size as u64 * (Lcore::count() as u64).max(1)
    }

    /// Buffers set aside for descriptor rings, summed over every port.
    pub fn ring_slots_reserved(&self) -> u64 {
        lock(&self.shared.ring_slots).values().sum()
    }

    /// Set aside `count` buffers for the descriptor rings of `port`,
    /// replacing whatever that port held before.
    ///
    /// The rings of every port plus the lcore caches must fit in the pool.
    /// Returns `ENOMEM` otherwise, leaving the reservations untouched.
    pub fn reserve_ring_slots(&self, port: PortId, count: u64) -> crate::api::Result<()> {
        let mut slots = lock(&self.shared.ring_slots);
        let others: u64 = slots
            .iter()
            .filter(|&(&p, _)| p != port)
            .map(|(_, &n)| n)
            .sum();
        if others + count + self.cache_reserve() > self.size() as u64 {
            return Err(Errno::ENOMEM);
        }
        slots.insert(port, count);
        Ok(())
    }

    /// Return the buffers `port` had set aside.
    pub fn release_ring_slots(&self, port: PortId) {
        lock(&self.shared.ring_slots).remove(&port);
    }

    /// Try to allocate an mbuf from this pool.
    ///
    /// Returns `None` if the pool is exhausted.
    #[inline]
    pub fn try_alloc(&self) -> Option<Mbuf> {
        let idx = self.shared.get()?;
        Some(Mbuf::from_slot(self.shared.clone(), idx))
    }

    /// Fill a batch of mbufs up to the remaining capacity of the ArrayVec.
    ///
    /// Allocates as many mbufs as possible until either:
    /// - The ArrayVec is full
    /// - The pool is exhausted
    ///
    /// Returns the number of mbufs allocated.
    #[inline]
    pub fn fill_batch<const N: usize>(&self, batch: &mut arrayvec::ArrayVec<Mbuf, N>) -> usize {
        let mut count = 0;
        while batch.len() < batch.capacity() {
            if let Some(mbuf) = self.try_alloc() {
                batch.push(mbuf);
                count += 1;
            } else {
                break;
            }
        }
        count
    }

    pub(crate) fn shared(&self) -> &Arc<PoolShared> {
        &self.shared
    }
}

impl fmt::Debug for MemPoolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemPool")
            .field("name", &self.shared.name)
            .field("size", &self.shared.num)
            .field("cache_size", &self.shared.cache_size)
            .field("avail", &self.avail_count())
            .finish()
    }
}

/// Packet mempool (owning).
///
/// Dropping it removes the name from the registry; the memory is returned
/// once the last outstanding mbuf is freed.
#[derive(Debug)]
pub struct MemPool {
    handle: MemPoolRef,
}

impl MemPool {
    /// Create a new pktmbuf mempool.
    ///
    /// The whole region is reserved up front; nothing is created on failure.
    pub fn create(name: impl Into<String>, config: &MemPoolConfig) -> Result<Self, MemPoolError> {
        let name = name.into();
        config.validate(&name)?;

        let mut pools = lock(&POOLS);
        if pools.get(&name).is_some_and(|w| w.strong_count() > 0) {
            return Err(MemPoolError::NameExists(name));
        }

        let required = config.required_bytes();
        let reservation = memory::reserve(required).map_err(|available| {
            MemPoolError::NoMemory {
                required,
                available,
            }
        })?;

        let elt_size = config.priv_size as usize + config.data_room_size as usize;
        let region_len = elt_size * config.num_mbufs as usize;
        let region = Region::alloc(region_len).ok_or_else(|| MemPoolError::NoMemory {
            required,
            available: memory::available(),
        })?;

        let ring = ArrayQueue::new(config.num_mbufs as usize);
        for idx in 0..config.num_mbufs {
            let _ = ring.push(idx);
        }
        let caches = (0..RTE_MAX_LCORE)
            .map(|_| CachePadded::new(Mutex::new(Vec::new())))
            .collect();

        let shared = Arc::new(PoolShared {
            name: name.clone(),
            region,
            elt_size,
            num: config.num_mbufs,
            cache_size: config.cache_size,
            priv_size: config.priv_size,
            data_room: config.data_room_size,
            ring,
            caches,
            ring_slots: Mutex::new(HashMap::new()),
            _reservation: reservation,
        });
        pools.insert(name.clone(), Arc::downgrade(&shared));

        debug!(
            pool = %name,
            num_mbufs = config.num_mbufs,
            cache_size = config.cache_size,
            bytes = required,
            "Created mempool"
        );
        Ok(MemPool {
            handle: MemPoolRef { shared },
        })
    }

    /// Lookup an existing mempool by name.
    ///
    /// Returns `ENOENT` if no live pool has this name.
    pub fn lookup(name: &str) -> crate::api::Result<MemPoolRef> {
        lock(&POOLS)
            .get(name)
            .and_then(Weak::upgrade)
            .map(|shared| MemPoolRef { shared })
            .ok_or(Errno::ENOENT)
    }

    /// A shared handle to this pool.
    pub fn handle(&self) -> MemPoolRef {
        self.handle.clone()
    }
}

impl Deref for MemPool {
    type Target = MemPoolRef;

    fn deref(&self) -> &MemPoolRef {
        &self.handle
    }
}

impl Drop for MemPool {
    fn drop(&mut self) {
        let mut pools = lock(&POOLS);
        let ours = pools
            .get(self.handle.name())
            .is_some_and(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(&self.handle.shared)));
        if ours {
            pools.remove(self.handle.name());
        }
    }
}
