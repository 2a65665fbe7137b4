// rte EAL (Environment Abstraction Layer) API
// Owns the process-wide runtime: lcore threads, socket memory budget and
// the virtual devices given on the command line.

use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use super::eth::{self, PortId};
use super::lcore::{self, RTE_MAX_LCORE};
use super::memory;
use crate::api::{Errno, Result};
use crate::pmd;

/// Global flag to track if EAL has been initialized
static EAL_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Well-known EAL options as strongly-typed enum variants.
#[derive(Debug, Clone)]
pub enum EalOption {
    /// Program name (required as first argument)
    ProgramName(String),
    /// Add a virtual device (--vdev=<device>)
    Vdev(String),
    /// Core mask in hex (e.g., "0xf" for cores 0-3)
    CoreMask(String),
    /// Core list (e.g., "0-3" or "0,2,4")
    CoreList(String),
    /// Memory per socket in MB (--socket-mem=<amounts>)
    SocketMem(String),
    /// Total memory in MB (-m <mb>)
    Memory(u64),
    /// Custom argument (pass-through)
    Custom(String),
}

impl EalOption {
    /// Convert to command-line argument strings
    fn to_args(&self) -> Vec<String> {
        match self {
            EalOption::ProgramName(name) => vec![name.clone()],
            EalOption::Vdev(dev) => vec![format!("--vdev={}", dev)],
            EalOption::CoreMask(mask) => vec!["-c".to_string(), mask.clone()],
            EalOption::CoreList(list) => vec!["-l".to_string(), list.clone()],
            EalOption::SocketMem(mem) => vec![format!("--socket-mem={}", mem)],
            EalOption::Memory(mb) => vec!["-m".to_string(), mb.to_string()],
            EalOption::Custom(arg) => vec![arg.clone()],
        }
    }
}

/// Builder for EAL initialization options.
///
/// # Example
/// ```no_run
/// use dpdk_wire::api::rte::eal::EalBuilder;
///
/// fn main() -> Result<(), nix::errno::Errno> {
///     let _eal = EalBuilder::new()
///         .core_list("0-2")
///         .vdev("net_ring0")
///         .memory_mb(256)
///         .init()?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct EalBuilder {
    program_name: Option<String>,
    options: Vec<EalOption>,
}

impl EalBuilder {
    /// Create a new EAL builder.
    ///
    /// Program name is auto-detected from `std::env::args()`.
    pub fn new() -> Self {
        Self {
            program_name: None,
            options: Vec::new(),
        }
    }

    /// Set the program name (first argument)
    pub fn program_name(mut self, name: impl Into<String>) -> Self {
        self.program_name = Some(name.into());
        self
    }

    /// Add a virtual device (--vdev=<device>)
    pub fn vdev(mut self, device: impl Into<String>) -> Self {
        self.options.push(EalOption::Vdev(device.into()));
        self
    }

    /// Set core mask in hex (-c <mask>)
    pub fn core_mask(mut self, mask: impl Into<String>) -> Self {
        self.options.push(EalOption::CoreMask(mask.into()));
        self
    }

    /// Set core list (-l <list>)
    pub fn core_list(mut self, list: impl Into<String>) -> Self {
        self.options.push(EalOption::CoreList(list.into()));
        self
    }

    /// Set memory per socket in MB (--socket-mem=<amounts>)
    pub fn socket_mem(mut self, mem: impl Into<String>) -> Self {
        self.options.push(EalOption::SocketMem(mem.into()));
        self
    }

    /// Set total memory in MB (-m <mb>)
    pub fn memory_mb(mut self, mb: u64) -> Self {
        self.options.push(EalOption::Memory(mb));
        self
    }

    /// Add a custom option
    pub fn option(mut self, opt: EalOption) -> Self {
        self.options.push(opt);
        self
    }

    /// Add a custom raw argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.options.push(EalOption::Custom(arg.into()));
        self
    }

    /// Build the argument list
    fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        // Program name first - use provided, or auto-detect from env
        let program_name = self.program_name.clone().unwrap_or_else(|| {
            std::env::args()
                .next()
                .unwrap_or_else(|| "dpdk-wire".to_string())
        });
        args.push(program_name);

        // Add all options
        for opt in &self.options {
            args.extend(opt.to_args());
        }

        args
    }

    /// Initialize EAL with the configured options.
    ///
    /// Returns an RAII guard that cleans up EAL on drop.
    pub fn init(self) -> Result<Eal> {
        let args = self.build_args();
        info!(args = ?args, "Initializing EAL");
        Eal::init(args)
    }
}

/// Parse a core list such as `"0-3,6,8-9"` into sorted lcore IDs.
pub fn parse_core_list(list: &str) -> Result<Vec<u32>> {
    let mut ids = BTreeSet::new();
    for part in list.split(',').map(str::trim) {
        let (lo, hi) = match part.split_once('-') {
            Some((lo, hi)) => (lo.trim(), hi.trim()),
            None => (part, part),
        };
        let lo: u32 = lo.parse().map_err(|_| Errno::EINVAL)?;
        let hi: u32 = hi.parse().map_err(|_| Errno::EINVAL)?;
        if lo > hi || hi >= RTE_MAX_LCORE {
            return Err(Errno::EINVAL);
        }
        ids.extend(lo..=hi);
    }
    Ok(ids.into_iter().collect())
}

/// Parse a hex core mask such as `"0xf"` into sorted lcore IDs.
pub fn parse_core_mask(mask: &str) -> Result<Vec<u32>> {
    let digits = mask
        .strip_prefix("0x")
        .or_else(|| mask.strip_prefix("0X"))
        .unwrap_or(mask);
    let value = u128::from_str_radix(digits, 16).map_err(|_| Errno::EINVAL)?;
    let ids: Vec<u32> = (0..RTE_MAX_LCORE).filter(|i| value & (1u128 << i) != 0).collect();
    if ids.is_empty() {
        return Err(Errno::EINVAL);
    }
    Ok(ids)
}

fn parse_socket_mem(mem: &str) -> Result<u64> {
    mem.split(',')
        .map(|s| s.trim().parse::<u64>().map_err(|_| Errno::EINVAL))
        .sum()
}

fn default_core_list() -> Vec<u32> {
    let n = std::thread::available_parallelism().map_or(1, |n| n.get());
    (0..(n as u32).min(RTE_MAX_LCORE)).collect()
}

/// Parsed EAL command line.
#[derive(Debug, Default, PartialEq)]
struct EalArgs {
    cores: Option<Vec<u32>>,
    vdevs: Vec<String>,
    memory_mb: Option<u64>,
}

impl EalArgs {
    fn parse(args: &[String]) -> Result<Self> {
        let mut parsed = EalArgs::default();
        // argv[0] is the program name
        let mut it = args.iter().skip(1);
        while let Some(arg) = it.next() {
            let arg = arg.as_str();
            let mut value = || it.next().map(String::as_str).ok_or(Errno::EINVAL);
            match arg {
                "-l" => parsed.cores = Some(parse_core_list(value()?)?),
                "-c" => parsed.cores = Some(parse_core_mask(value()?)?),
                "-m" => parsed.memory_mb = Some(value()?.parse().map_err(|_| Errno::EINVAL)?),
                "-n" | "-a" | "--no-huge" | "--no-pci" | "--in-memory" => {
                    warn!(arg, "Unsupported EAL argument");
                    return Err(Errno::ENOTSUP);
                }
                _ => {
                    let Some((key, val)) = arg.split_once('=') else {
                        warn!(arg, "Unknown EAL argument");
                        return Err(Errno::EINVAL);
                    };
                    match key {
                        "--vdev" => parsed.vdevs.push(val.to_string()),
                        "--socket-mem" => parsed.memory_mb = Some(parse_socket_mem(val)?),
                        // this process is always the primary
                        "--proc-type" if val == "primary" || val == "auto" => {}
                        "--proc-type" | "--file-prefix" | "--log-level" | "--base-virtaddr" => {
                            warn!(arg, "Unsupported EAL argument");
                            return Err(Errno::ENOTSUP);
                        }
                        _ => {
                            warn!(arg, "Unknown EAL argument");
                            return Err(Errno::EINVAL);
                        }
                    }
                }
            }
        }
        Ok(parsed)
    }
}

/// RAII guard for the EAL environment.
///
/// When dropped, releases the vdev ports, stops the worker lcores and
/// restores the default memory budget.
///
/// # Example
/// ```no_run
/// use dpdk_wire::api::rte::eal::{Eal, EalBuilder};
///
/// fn main() -> Result<(), nix::errno::Errno> {
///     // Using builder (recommended)
///     let _eal = EalBuilder::new()
///         .vdev("net_ring0")
///         .init()?;
///
///     // Or using init directly
///     // let _eal = Eal::init(["prog", "-l", "0-2", "--vdev=net_ring0"])?;
///     Ok(())
/// }
/// ```
pub struct Eal {
    ports: Vec<PortId>,
    // EAL is global state; the guard only ties its lifetime to a value.
    _marker: PhantomData<()>,
}

impl Eal {
    /// Initialize the EAL environment and return an RAII guard.
    ///
    /// The first argument should be the program name (can be anything).
    /// The calling thread becomes the main lcore.
    ///
    /// # Errors
    /// `EALREADY` if EAL is already initialized, `EINVAL` for malformed
    /// arguments, or the error of the failing vdev probe.
    pub fn init<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        // Check if already initialized
        if EAL_INITIALIZED.swap(true, Ordering::SeqCst) {
            return Err(Errno::EALREADY);
        }

        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();
        match Self::bring_up(&args) {
            Ok(eal) => Ok(eal),
            Err(e) => {
                // Reset flag on failure so user can retry
                EAL_INITIALIZED.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn bring_up(args: &[String]) -> Result<Self> {
        let parsed = EalArgs::parse(args)?;
        let cores = parsed.cores.unwrap_or_else(default_core_list);

        if let Some(mb) = parsed.memory_mb {
            memory::set_limit_mb(mb);
        }
        if let Err(e) = lcore::start(&cores) {
            memory::reset_limit();
            return Err(e);
        }

        let mut ports = Vec::with_capacity(parsed.vdevs.len());
        for vdev in &parsed.vdevs {
            match pmd::probe_vdev(vdev) {
                Ok(port_id) => ports.push(port_id),
                Err(e) => {
                    warn!(vdev = %vdev, error = %e, "Failed to probe vdev");
                    Self::teardown(&ports);
                    return Err(e);
                }
            }
        }

        info!(
            lcores = cores.len(),
            ports = ports.len(),
            socket_mem = memory::limit(),
            "EAL initialized"
        );
        Ok(Eal {
            ports,
            _marker: PhantomData,
        })
    }

    fn teardown(ports: &[PortId]) {
        for &port_id in ports {
            eth::detach(port_id);
        }
        lcore::shutdown();
        memory::reset_limit();
    }

    /// Ports created from `--vdev` arguments, in argument order.
    pub fn ports(&self) -> &[PortId] {
        &self.ports
    }

    /// Check if EAL has been initialized.
    pub fn is_initialized() -> bool {
        EAL_INITIALIZED.load(Ordering::SeqCst)
    }
}

impl Drop for Eal {
    fn drop(&mut self) {
        Self::teardown(&self.ports);
        EAL_INITIALIZED.store(false, Ordering::SeqCst);
    }
}
