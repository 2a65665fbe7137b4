//! Lcore (logical core) APIs.
//!
//! # Overview
//!
//! Lcores are EAL-managed threads pinned to specific CPU cores. The EAL
//! creates one thread per worker lcore during init; the thread that called
//! init becomes the main lcore. This module provides:
//! - Querying lcore information (ID, socket, role, state)
//! - Launching closures on worker lcores
//! - Waiting for lcore completion
//!
//! # Example
//!
//! ```no_run
//! use dpdk_wire::api::rte::lcore::Lcore;
//!
//! // Get the main lcore
//! let main = Lcore::main().expect("EAL initialized");
//! println!("Main lcore {} on socket {}", main.id(), main.socket_id());
//!
//! // Launch work on all workers
//! for worker in Lcore::workers() {
//!     worker.launch(|| {
//!         println!("Hello from worker!");
//!         0
//!     }).unwrap();
//! }
//!
//! // Wait for all workers
//! Lcore::wait_all_workers();
//! ```

use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use nix::sched::{CpuSet, sched_setaffinity};
use nix::unistd::Pid;
use tracing::{debug, error, warn};

use crate::api::{Errno, Result};

/// Special value indicating "any lcore" or "not an lcore thread"
pub const LCORE_ID_ANY: u32 = u32::MAX;

/// Highest lcore ID + 1 accepted by the EAL.
pub const RTE_MAX_LCORE: u32 = 128;

thread_local! {
    static CURRENT_LCORE: Cell<u32> = const { Cell::new(LCORE_ID_ANY) };
}

static LCORES: Mutex<Option<Arc<LcoreTable>>> = Mutex::new(None);

/// Role of an lcore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Regular EAL thread (RTE role)
    Rte,
    /// Off - lcore is not used
    Off,
}

/// State of an lcore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    /// Lcore is waiting for new command
    #[default]
    Wait,
    /// Lcore is running a function
    Running,
    /// Lcore has finished, waiting for ack
    Finished,
}

type Job = Box<dyn FnOnce() -> i32 + Send + 'static>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct MailboxState {
    state: State,
    job: Option<Job>,
    ret: i32,
    shutdown: bool,
}

/// Command channel between the launcher and one worker thread.
#[derive(Default)]
struct Mailbox {
    inner: Mutex<MailboxState>,
    cond: Condvar,
}

impl Mailbox {
    fn post(&self, job: Job) -> Result<()> {
        let mut st = lock(&self.inner);
        if st.shutdown {
            return Err(Errno::ESHUTDOWN);
        }
        if st.state != State::Wait {
            return Err(Errno::EBUSY);
        }
        st.job = Some(job);
        st.state = State::Running;
        self.cond.notify_all();
        Ok(())
    }

    fn next_job(&self) -> Option<Job> {
        let mut st = lock(&self.inner);
        loop {
            if let Some(job) = st.job.take() {
                return Some(job);
            }
            if st.shutdown {
                return None;
            }
            st = self.cond.wait(st).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn finish(&self, ret: i32) {
        let mut st = lock(&self.inner);
        st.ret = ret;
        st.state = State::Finished;
        self.cond.notify_all();
    }

    fn wait(&self) -> i32 {
        let mut st = lock(&self.inner);
        loop {
            match st.state {
                State::Running => {
                    st = self.cond.wait(st).unwrap_or_else(PoisonError::into_inner);
                }
                State::Finished => {
                    st.state = State::Wait;
                    return st.ret;
                }
                State::Wait => return 0,
            }
        }
    }

    fn state(&self) -> State {
        lock(&self.inner).state
    }

    fn shutdown(&self) {
        let mut st = lock(&self.inner);
        st.shutdown = true;
        self.cond.notify_all();
    }
}

struct LcoreSlot {
    id: u32,
    cpu: usize,
    socket: u32,
    /// `None` for the main lcore, which never accepts remote launches.
    mailbox: Option<Arc<Mailbox>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// The lcore set created by the EAL.
struct LcoreTable {
    main: u32,
    slots: Vec<LcoreSlot>,
}

impl LcoreTable {
    fn slot(&self, id: u32) -> Option<&LcoreSlot> {
        self.slots.iter().find(|s| s.id == id)
    }

    fn ids(&self, skip_main: bool) -> Vec<u32> {
        self.slots
            .iter()
            .filter(|s| !(skip_main && s.id == self.main))
            .map(|s| s.id)
            .collect()
    }
}

fn table() -> Option<Arc<LcoreTable>> {
    lock(&LCORES).clone()
}

/// The lcore ID of the calling thread, if it is an lcore.
#[inline]
pub(crate) fn current_id() -> Option<u32> {
    let id = CURRENT_LCORE.with(|c| c.get());
    if id == LCORE_ID_ANY { None } else { Some(id) }
}

fn cpu_socket(cpu: usize) -> u32 {
    let path = format!("/sys/devices/system/cpu/cpu{cpu}/topology/physical_package_id");
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

fn pin_to_cpu(cpu: usize) -> nix::Result<()> {
    let mut set = CpuSet::new();
    set.set(cpu)?;
    sched_setaffinity(Pid::from_raw(0), &set)
}

fn worker_main(id: u32, cpu: usize, mailbox: Arc<Mailbox>) {
    CURRENT_LCORE.with(|c| c.set(id));
    if let Err(e) = pin_to_cpu(cpu) {
        warn!(lcore = id, cpu, error = %e, "Could not pin lcore thread, running unpinned");
    }
    debug!(lcore = id, cpu, "Worker lcore ready");

    while let Some(job) = mailbox.next_job() {
        let ret = match catch_unwind(AssertUnwindSafe(job)) {
            Ok(ret) => ret,
            Err(_) => {
                error!(lcore = id, "Job panicked on worker lcore");
                -1
            }
        };
        mailbox.finish(ret);
    }
    debug!(lcore = id, "Worker lcore exiting");
}

/// Create the lcore set. The calling thread becomes the main lcore
/// (the first ID in `core_ids`); one pinned thread is spawned per other ID.
pub(crate) fn start(core_ids: &[u32]) -> Result<()> {
    let mut guard = lock(&LCORES);
    if guard.is_some() {
        return Err(Errno::EALREADY);
    }
    let Some(&main) = core_ids.first() else {
        return Err(Errno::EINVAL);
    };
    if core_ids.iter().any(|&id| id >= RTE_MAX_LCORE) {
        return Err(Errno::EINVAL);
    }

    let mut slots = Vec::with_capacity(core_ids.len());
    for &id in core_ids {
        let cpu = id as usize;
        let socket = cpu_socket(cpu);
        if id == main {
            slots.push(LcoreSlot {
                id,
                cpu,
                socket,
                mailbox: None,
                thread: Mutex::new(None),
            });
            continue;
        }
        let mailbox = Arc::new(Mailbox::default());
        let worker_mailbox = mailbox.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("lcore-worker-{id}"))
            .spawn(move || worker_main(id, cpu, worker_mailbox));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                error!(lcore = id, error = %e, "Failed to spawn lcore thread");
                stop_workers(&slots);
                return Err(Errno::EAGAIN);
            }
        };
        slots.push(LcoreSlot {
            id,
            cpu,
            socket,
            mailbox: Some(mailbox),
            thread: Mutex::new(Some(handle)),
        });
    }
    slots.sort_by_key(|s| s.id);

    CURRENT_LCORE.with(|c| c.set(main));
    if let Err(e) = pin_to_cpu(main as usize) {
        warn!(lcore = main, error = %e, "Could not pin main lcore");
    }
    *guard = Some(Arc::new(LcoreTable { main, slots }));
    Ok(())
}

/// Tear down the lcore set. Idle workers are joined; workers still running a
/// job are signalled and detached.
pub(crate) fn shutdown() {
    let Some(table) = lock(&LCORES).take() else {
        return;
    };
    stop_workers(&table.slots);
    CURRENT_LCORE.with(|c| {
        if c.get() == table.main {
            c.set(LCORE_ID_ANY);
        }
    });
}

fn stop_workers(slots: &[LcoreSlot]) {
    for slot in slots {
        let Some(mailbox) = &slot.mailbox else {
            continue;
        };
        let busy = mailbox.state() == State::Running;
        mailbox.shutdown();
        let handle = lock(&slot.thread).take();
        match handle {
            Some(handle) if !busy => {
                let _ = handle.join();
            }
            Some(_) => warn!(lcore = slot.id, "Lcore still running at shutdown, detaching"),
            None => {}
        }
    }
}

/// A handle to a logical core (lcore).
///
/// Lcores are EAL-managed threads created during EAL init.
/// Each lcore is pinned to a specific CPU core and can execute
/// functions launched via [`Lcore::launch()`].
///
/// This type is `Copy`, `Send`, and `Sync` - it's just a lightweight
/// handle to an lcore, not the lcore itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lcore {
    id: u32,
}

impl Lcore {
    // ==================== Constructors ====================

    /// Create an Lcore handle from an ID.
    ///
    /// Returns `None` if the lcore ID is invalid or not enabled.
    pub fn from_id(id: u32) -> Option<Self> {
        table()?.slot(id).map(|_| Self { id })
    }

    /// Get the current thread's lcore.
    ///
    /// Returns `None` if called from a thread that is not an lcore.
    pub fn current() -> Option<Self> {
        current_id().map(|id| Self { id })
    }

    /// Get the main (initial) lcore.
    ///
    /// This is the lcore of the thread that initialized the EAL.
    /// Returns `None` before EAL init.
    pub fn main() -> Option<Self> {
        table().map(|t| Self { id: t.main })
    }

    // ==================== Iterators ====================

    /// Iterate over all enabled lcores (including main), in ID order.
    pub fn all() -> LcoreIter {
        LcoreIter::new(false)
    }

    /// Iterate over worker lcores (excluding main), in ID order.
    pub fn workers() -> LcoreIter {
        LcoreIter::new(true)
    }

    /// Get the total number of enabled lcores.
    pub fn count() -> u32 {
        table().map_or(0, |t| t.slots.len() as u32)
    }

    // ==================== Properties ====================

    /// Get this lcore's ID.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Check if this is the main lcore.
    #[inline]
    pub fn is_main(&self) -> bool {
        table().is_some_and(|t| t.main == self.id)
    }

    /// Get the role of this lcore.
    pub fn role(&self) -> Role {
        match table() {
            Some(t) if t.slot(self.id).is_some() => Role::Rte,
            _ => Role::Off,
        }
    }

    /// Get the NUMA socket ID for this lcore.
    pub fn socket_id(&self) -> u32 {
        table()
            .and_then(|t| t.slot(self.id).map(|s| s.socket))
            .unwrap_or(0)
    }

    /// Get the current state of this lcore.
    pub fn state(&self) -> State {
        self.mailbox().map_or(State::Wait, |m| m.state())
    }

    /// Check if this lcore is currently available (in Wait state).
    #[inline]
    pub fn is_available(&self) -> bool {
        self.state() == State::Wait
    }

    fn mailbox(&self) -> Option<Arc<Mailbox>> {
        table().and_then(|t| t.slot(self.id).and_then(|s| s.mailbox.clone()))
    }

    // ==================== Launch & Wait ====================

    /// Launch a closure on this lcore.
    ///
    /// The closure will be executed on this lcore's thread. The lcore must be
    /// in the `Wait` state (not currently running another task).
    ///
    /// # Returns
    ///
    /// * `Ok(())` if the launch was successful
    /// * `Err(EBUSY)` if the lcore is busy
    /// * `Err(EINVAL)` for the main lcore or a disabled lcore
    pub fn launch<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        let mailbox = self.mailbox().ok_or(Errno::EINVAL)?;
        mailbox.post(Box::new(f))
    }

    /// Wait for this lcore to finish its current task.
    ///
    /// Blocks until the lcore enters the `Wait` state and returns the
    /// return value of the function that was launched on it.
    pub fn wait(&self) -> i32 {
        self.mailbox().map_or(0, |m| m.wait())
    }

    /// Launch a closure and wait for it to complete.
    pub fn run<F>(&self, f: F) -> Result<i32>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        self.launch(f)?;
        Ok(self.wait())
    }

    // ==================== Bulk Operations ====================

    /// Wait for all worker lcores to finish.
    ///
    /// Note: Does NOT return the individual return values.
    pub fn wait_all_workers() {
        for worker in Self::workers() {
            worker.wait();
        }
    }

    /// Launch a closure on all worker lcores.
    pub fn launch_on_workers<F>(f: F) -> Result<()>
    where
        F: Fn(Lcore) -> i32 + Send + Sync + 'static,
    {
        let f = Arc::new(f);

        for worker in Self::workers() {
            let f = f.clone();
            worker.launch(move || f(worker))?;
        }

        Ok(())
    }
}

/// Iterator over lcores.
pub struct LcoreIter {
    ids: std::vec::IntoIter<u32>,
}

impl LcoreIter {
    fn new(skip_main: bool) -> Self {
        let ids = table().map(|t| t.ids(skip_main)).unwrap_or_default();
        Self {
            ids: ids.into_iter(),
        }
    }
}

impl Iterator for LcoreIter {
    type Item = Lcore;

    fn next(&mut self) -> Option<Self::Item> {
        self.ids.next().map(|id| Lcore { id })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ids.size_hint()
    }
}

impl ExactSizeIterator for LcoreIter {}

/// Builder for launching work on multiple lcores with filtering.
pub struct LaunchBuilder {
    lcores: Vec<Lcore>,
}

impl LaunchBuilder {
    /// Create a builder targeting all workers.
    pub fn workers() -> Self {
        Self {
            lcores: Lcore::workers().collect(),
        }
    }

    /// Keep only the first N lcores.
    pub fn take(mut self, n: usize) -> Self {
        self.lcores.truncate(n);
        self
    }

    /// Get the targeted lcores.
    pub fn lcores(&self) -> &[Lcore] {
        &self.lcores
    }

    /// Launch on all targeted lcores (non-blocking).
    pub fn launch<F>(self, f: F) -> Result<LaunchHandle>
    where
        F: Fn(Lcore) -> i32 + Send + Sync + 'static,
    {
        let f = Arc::new(f);

        for &lcore in &self.lcores {
            let f = f.clone();
            lcore.launch(move || f(lcore))?;
        }

        Ok(LaunchHandle {
            lcores: self.lcores,
        })
    }

    /// Launch and wait for all to complete.
    ///
    /// Returns (Lcore, return_value) pairs.
    pub fn run<F>(self, f: F) -> Result<Vec<(Lcore, i32)>>
    where
        F: Fn(Lcore) -> i32 + Send + Sync + 'static,
    {
        let handle = self.launch(f)?;
        Ok(handle.wait())
    }
}

/// Handle to a set of launched lcores.
///
/// Allows waiting for completion and collecting results.
pub struct LaunchHandle {
    lcores: Vec<Lcore>,
}

impl LaunchHandle {
    /// Track lcores that were launched individually.
    pub fn new(lcores: Vec<Lcore>) -> Self {
        Self { lcores }
    }

    /// Wait for all launched lcores to complete.
    ///
    /// Returns (Lcore, return_value) pairs.
    pub fn wait(self) -> Vec<(Lcore, i32)> {
        self.lcores
            .into_iter()
            .map(|lcore| {
                let result = lcore.wait();
                (lcore, result)
            })
            .collect()
    }

    /// Check if all lcores have finished.
    pub fn is_done(&self) -> bool {
        self.lcores
            .iter()
            .all(|lcore| lcore.state() != State::Running)
    }

    /// Get the lcores being tracked.
    pub fn lcores(&self) -> &[Lcore] {
        &self.lcores
    }
}
