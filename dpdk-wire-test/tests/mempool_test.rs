//! Mempool tests under a 64 MB socket memory budget.

use std::sync::OnceLock;

use dpdk_wire::api::Errno;
use dpdk_wire::api::rte::eal::{Eal, EalBuilder};
use dpdk_wire::api::rte::lcore::Lcore;
use dpdk_wire::api::rte::memory;
use dpdk_wire::api::rte::pktmbuf::{
    MBUF_DEFAULT_BUF_SIZE, MBUF_HEADER_SIZE, MemPool, MemPoolConfig, MemPoolError,
};
use dpdk_wire_test::util::init_tracing;

static GLOBAL_EAL: OnceLock<Eal> = OnceLock::new();

fn init_eal() -> &'static Eal {
    GLOBAL_EAL.get_or_init(|| {
        init_tracing();
        EalBuilder::new()
            .core_list("0-2")
            .memory_mb(64)
            .init()
            .expect("Failed to initialize EAL")
    })
}

#[test]
#[serial_test::serial]
fn test_budget_comes_from_eal() {
    let _eal = init_eal();
    assert_eq!(memory::limit(), 64 * 1024 * 1024);
}

#[test]
#[serial_test::serial]
fn test_oversized_pool_fails_cleanly() {
    let _eal = init_eal();
    let reserved = memory::reserved();

    let config = MemPoolConfig::new().num_mbufs(65535);
    let err = MemPool::create("oversized_pool", &config).unwrap_err();
    match err {
        MemPoolError::NoMemory {
            required,
            available,
        } => {
            assert_eq!(required, config.required_bytes());
            assert!(required >= 65535 * (MBUF_HEADER_SIZE + MBUF_DEFAULT_BUF_SIZE as u64));
            assert!(available <= memory::limit());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.errno(), Errno::ENOMEM);

    // nothing was created or reserved
    assert_eq!(MemPool::lookup("oversized_pool").unwrap_err(), Errno::ENOENT);
    assert_eq!(memory::reserved(), reserved);
}

#[test]
#[serial_test::serial]
fn test_budget_is_returned_on_drop() {
    let _eal = init_eal();
    // ~37 MB each, two do not fit in 64 MB
    let config = MemPoolConfig::new().num_mbufs(16383);

    let first = MemPool::create("budget_a", &config).unwrap();
    let err = MemPool::create("budget_b", &config).unwrap_err();
    assert!(matches!(err, MemPoolError::NoMemory { .. }));

    drop(first);
    let second = MemPool::create("budget_b", &config).unwrap();
    assert_eq!(second.size(), 16383);
}

#[test]
#[serial_test::serial]
fn test_name_is_unique_while_pool_lives() {
    let _eal = init_eal();
    let config = MemPoolConfig::new().num_mbufs(255).cache_size(0);

    let pool = MemPool::create("unique_pool", &config).unwrap();
    assert_eq!(
        MemPool::create("unique_pool", &config).unwrap_err(),
        MemPoolError::NameExists("unique_pool".to_string())
    );

    let found = MemPool::lookup("unique_pool").unwrap();
    assert_eq!(found.name(), "unique_pool");
    assert_eq!(found.size(), 255);

    drop(pool);
    assert_eq!(MemPool::lookup("unique_pool").unwrap_err(), Errno::ENOENT);
    let _again = MemPool::create("unique_pool", &config).unwrap();
}

#[test]
#[serial_test::serial]
fn test_worker_cache_counts_as_available() {
    let _eal = init_eal();
    let config = MemPoolConfig::new().num_mbufs(511).cache_size(32);
    let pool = MemPool::create("cached_pool", &config).unwrap();
    let handle = pool.handle();

    let worker = Lcore::workers().next().expect("Need a worker");
    let in_use = worker
        .run(move || {
            let mbufs: Vec<_> = (0..10).filter_map(|_| handle.try_alloc()).collect();
            let in_use = handle.in_use_count();
            drop(mbufs);
            in_use as i32
        })
        .unwrap();
    assert_eq!(in_use, 10);

    // freed buffers parked in the worker's cache are still free
    assert_eq!(pool.avail_count(), 511);
    assert_eq!(pool.in_use_count(), 0);
}

#[test]
#[serial_test::serial]
fn test_mbuf_outlives_its_pool() {
    let _eal = init_eal();
    let reserved = memory::reserved();
    let config = MemPoolConfig::new().num_mbufs(63).cache_size(0);

    let pool = MemPool::create("short_lived_pool", &config).unwrap();
    let mut mbuf = pool.try_alloc().unwrap();
    drop(pool);

    assert_eq!(MemPool::lookup("short_lived_pool").unwrap_err(), Errno::ENOENT);
    assert!(mbuf.copy_from_slice(b"still backed"));
    assert_eq!(mbuf.data(), b"still backed");
    assert_eq!(memory::reserved(), reserved + config.required_bytes());

    drop(mbuf);
    assert_eq!(memory::reserved(), reserved);
}

#[test]
#[serial_test::serial]
fn test_invalid_config_is_rejected() {
    let _eal = init_eal();

    let err = MemPool::create("", &MemPoolConfig::new().num_mbufs(63)).unwrap_err();
    assert_eq!(err.errno(), Errno::EINVAL);

    // cache larger than two thirds of the pool
    let err = MemPool::create(
        "cache_heavy_pool",
        &MemPoolConfig::new().num_mbufs(63).cache_size(64),
    )
    .unwrap_err();
    assert_eq!(err, MemPoolError::InvalidConfig(Errno::EINVAL));
}
