//! WorkerDispatcher tests: launch rules and task lifecycles on worker lcores.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dpdk_wire::api::Errno;
use dpdk_wire::api::rte::eal::Eal;
use dpdk_wire::api::rte::lcore::Lcore;
use dpdk_wire::api::rte::pktmbuf::{MemPool, MemPoolConfig};
use dpdk_wire::pmd::RingPort;
use dpdk_wire_test::frames::FrameSpec;
use dpdk_wire_test::traffic::inject_n;
use dpdk_wire_test::util::{
    TEST_MBUF_CACHE_SIZE, TEST_MBUF_COUNT, TEST_RING_DEPTH, init_tracing, ring_eal, wait_until,
};
use dpdk_wire_util::{
    ConfiguredPort, Error, PortManager, PortSettings, WorkerDispatcher, WorkerTask,
};

static GLOBAL_EAL: OnceLock<Eal> = OnceLock::new();

/// 1 main + 2 workers, ports 0 and 1
fn init_eal() -> &'static Eal {
    GLOBAL_EAL.get_or_init(|| {
        init_tracing();
        ring_eal("0-2", 2).init().expect("Failed to initialize EAL")
    })
}

static PORT0: OnceLock<(MemPool, ConfiguredPort)> = OnceLock::new();

/// Port 0, configured once and shared by every test in this file.
fn port0() -> &'static ConfiguredPort {
    let eal = init_eal();
    let (_, port) = PORT0.get_or_init(|| {
        let pool = MemPool::create(
            "dispatch_pool",
            &MemPoolConfig::new()
                .num_mbufs(TEST_MBUF_COUNT)
                .cache_size(TEST_MBUF_CACHE_SIZE),
        )
        .expect("Failed to create mempool");
        let settings = PortSettings::new().ring_depths(TEST_RING_DEPTH, TEST_RING_DEPTH);
        let port = PortManager::configure_with(eal.ports()[0], &settings, &pool)
            .expect("Failed to configure port 0");
        (pool, port)
    });
    port
}

fn all_workers_available() -> bool {
    Lcore::workers().all(|l| l.is_available())
}

#[test]
#[serial_test::serial]
fn test_more_tasks_than_workers_launches_nothing() {
    let port = port0().port_id();

    let tasks = (0..3)
        .map(|i| WorkerTask::count(format!("count {i}"), port))
        .collect();
    let Err(err) = WorkerDispatcher::new().launch(tasks) else {
        panic!("launch should fail");
    };
    assert!(matches!(
        err,
        Error::InsufficientWorkers {
            requested: 3,
            available: 2
        }
    ));
    assert!(err.to_string().contains("--cores"));
    assert!(all_workers_available());
}

#[test]
#[serial_test::serial]
fn test_unopenable_task_launches_nothing() {
    let port = port0().port_id();

    let tasks = vec![
        WorkerTask::count("good", port),
        WorkerTask::count("bad", 30),
    ];
    let Err(err) = WorkerDispatcher::new().launch(tasks) else {
        panic!("launch should fail");
    };
    match err {
        Error::Task { ref name, errno } => {
            assert_eq!(name, "bad");
            assert_eq!(errno, Errno::ENODEV);
        }
        ref other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.code(), -(Errno::ENODEV as i32));
    assert!(all_workers_available());
}

#[test]
#[serial_test::serial]
fn test_busy_worker_is_reported() {
    let port = port0().port_id();
    let worker = Lcore::workers().next().expect("Need a worker");

    let release = Arc::new(AtomicBool::new(false));
    worker
        .launch({
            let release = release.clone();
            move || {
                while !release.load(Ordering::Acquire) {
                    std::thread::sleep(Duration::from_millis(1));
                }
                0
            }
        })
        .unwrap();

    let Err(err) = WorkerDispatcher::new().launch(vec![WorkerTask::count("count", port)]) else {
        panic!("launch should fail");
    };
    match err {
        Error::Launch { lcore, errno } => {
            assert_eq!(lcore, worker.id());
            assert_eq!(errno, Errno::EBUSY);
        }
        other => panic!("unexpected error: {other}"),
    }

    release.store(true, Ordering::Release);
    assert_eq!(worker.wait(), 0);
}

#[test]
#[serial_test::serial]
fn test_count_task_on_worker() {
    let port = port0();
    let wire = RingPort::from_port(port.port_id()).unwrap();
    let pool = MemPool::lookup("dispatch_pool").unwrap();

    let dispatch = WorkerDispatcher::new()
        .launch(vec![WorkerTask::count("count 0", port.port_id())])
        .unwrap();
    let worker = dispatch.lcores()[0];
    assert!(!worker.is_main());
    assert!(!worker.is_available());

    let frame = FrameSpec::default().udp(b"counted");
    let mut queued = 0;
    for _ in 0..5 {
        queued += inject_n(&wire, &frame, 50).queued;
        assert!(wait_until(Duration::from_secs(5), || wire.rx_pending(0) == 0));
    }
    assert_eq!(queued, 250);
    assert!(wait_until(Duration::from_secs(5), || {
        dispatch.stats()[0].1.received == 250
    }));
    assert!(!dispatch.is_done());

    dispatch.cancel_all();
    let reports = dispatch.finish();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.name, "count 0");
    assert_eq!(report.lcore, worker);
    assert_eq!(report.ret, 0);
    assert_eq!(report.stats.received, 250);
    assert_eq!(report.stats.forwarded, 0);
    assert_eq!(report.stats.dropped, 0);

    // every counted buffer went back to the pool
    assert_eq!(pool.in_use_count(), 0);
    assert_eq!(port.stats().unwrap().ipackets, 250);
    assert!(all_workers_available());
}

#[test]
#[serial_test::serial]
fn test_assign_and_run_returns_after_cancel() {
    let port = port0().port_id();
    let task = WorkerTask::count("count", port);
    let cancel = task.cancel.clone();
    cancel.cancel();

    // an already cancelled task returns on its first check
    let results = WorkerDispatcher::new().assign_and_run(vec![task]).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].1, 0);
    assert!(all_workers_available());
}
