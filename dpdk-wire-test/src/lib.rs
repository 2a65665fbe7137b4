//! Shared helpers for the dpdk-wire integration tests.

pub mod frames;
pub mod traffic;

pub mod util {
    use std::time::{Duration, Instant};

    use dpdk_wire::api::rte::eal::EalBuilder;
    use tracing_subscriber::EnvFilter;

    pub const TEST_MBUF_COUNT: u32 = 1024;
    pub const TEST_MBUF_CACHE_SIZE: u32 = 32;
    pub const TEST_RING_DEPTH: u16 = 128;

    /// Install a fmt subscriber filtered by `RUST_LOG`. Safe to call from
    /// every test.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// An EAL builder with `cores` and one `net_ring<i>` vdev per index.
    pub fn ring_eal(cores: &str, rings: u8) -> EalBuilder {
        (0..rings).fold(EalBuilder::new().core_list(cores), |builder, i| {
            builder.vdev(format!("net_ring{i}"))
        })
    }

    /// Poll `condition` until it holds or `timeout` passes.
    pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        condition()
    }
}
