// Socket memory accounting
// Mempools carve their backing store out of a process-wide budget, the way
// DPDK mempools come out of the hugepage memory reserved at EAL init.

use std::sync::atomic::{AtomicU64, Ordering};

/// Budget used when the EAL was not given `--socket-mem` / `-m`.
pub const DEFAULT_SOCKET_MEM_MB: u64 = 1024;

const MB: u64 = 1024 * 1024;

static LIMIT: AtomicU64 = AtomicU64::new(DEFAULT_SOCKET_MEM_MB * MB);
static RESERVED: AtomicU64 = AtomicU64::new(0);

/// Set the budget in megabytes.
///
/// Existing reservations are kept even if they exceed the new limit.
pub fn set_limit_mb(mb: u64) {
    LIMIT.store(mb.saturating_mul(MB), Ordering::SeqCst);
}

/// Restore the default budget.
pub fn reset_limit() {
    set_limit_mb(DEFAULT_SOCKET_MEM_MB);
}

/// Total budget in bytes.
pub fn limit() -> u64 {
    LIMIT.load(Ordering::SeqCst)
}

/// Bytes currently reserved by live mempools.
pub fn reserved() -> u64 {
    RESERVED.load(Ordering::SeqCst)
}

/// Bytes still available for new reservations.
pub fn available() -> u64 {
    limit().saturating_sub(reserved())
}

/// A reservation against the budget, released on drop.
#[derive(Debug)]
pub struct Reservation {
    bytes: u64,
}

impl Reservation {
    /// Size of the reservation in bytes.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        RESERVED.fetch_sub(self.bytes, Ordering::SeqCst);
    }
}

/// Reserve `bytes` from the budget.
///
/// On failure returns the number of bytes that were available.
pub fn reserve(bytes: u64) -> Result<Reservation, u64> {
    let limit = limit();
    let mut current = RESERVED.load(Ordering::SeqCst);
    loop {
        let available = limit.saturating_sub(current);
        if bytes > available {
            return Err(available);
        }
        match RESERVED.compare_exchange_weak(
            current,
            current + bytes,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => return Ok(Reservation { bytes }),
            Err(actual) => current = actual,
        }
    }
}
