//! One burst task per worker lcore.

use dpdk_wire::api::Errno;
use dpdk_wire::api::rte::eth::PortId;
use dpdk_wire::api::rte::lcore::{LaunchHandle, Lcore};
use dpdk_wire::burst::{
    BurstStats, BurstTask, CancelToken, CountTask, ForwardTask, StatsHandle, TxPolicy,
};
use tracing::{debug, info, warn};

use crate::context::WorkerContext;
use crate::error::Error;

/// What a task does with the packets it receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// RX queue 0 of `from` to TX queue 0 of `to`
    Forward { from: PortId, to: PortId },
    /// Count and free everything on RX queue 0 of `port`
    Count { port: PortId },
}

/// A task waiting to be assigned to a worker lcore.
#[derive(Debug, Clone)]
pub struct WorkerTask {
    pub name: String,
    pub behavior: Behavior,
    pub policy: TxPolicy,
    pub cancel: CancelToken,
}

impl WorkerTask {
    pub fn forward(name: impl Into<String>, from: PortId, to: PortId) -> Self {
        Self {
            name: name.into(),
            behavior: Behavior::Forward { from, to },
            policy: TxPolicy::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn count(name: impl Into<String>, port: PortId) -> Self {
        Self {
            name: name.into(),
            behavior: Behavior::Count { port },
            policy: TxPolicy::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn policy(mut self, policy: TxPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Share a stop flag with other tasks or a signal handler.
    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn open(&self) -> Result<BurstTask, Error> {
        let task = match self.behavior {
            Behavior::Forward { from, to } => {
                ForwardTask::new(from, to, self.policy).map(BurstTask::from)
            }
            Behavior::Count { port } => CountTask::new(port).map(BurstTask::from),
        };
        task.map_err(|errno| Error::Task {
            name: self.name.clone(),
            errno,
        })
    }
}

/// Final state of one task.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub name: String,
    pub lcore: Lcore,
    /// Value returned on the lcore, 0 on a clean stop
    pub ret: i32,
    pub stats: BurstStats,
}

/// Running tasks.
pub struct Dispatch {
    handle: LaunchHandle,
    names: Vec<String>,
    stats: Vec<StatsHandle>,
    cancels: Vec<CancelToken>,
}

impl Dispatch {
    /// Lcores in task order.
    pub fn lcores(&self) -> &[Lcore] {
        self.handle.lcores()
    }

    pub fn is_done(&self) -> bool {
        self.handle.is_done()
    }

    /// Current counters of every task, by name.
    pub fn stats(&self) -> Vec<(&str, BurstStats)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.stats.iter().map(StatsHandle::snapshot))
            .collect()
    }

    /// Set every task's cancel token.
    pub fn cancel_all(&self) {
        for cancel in &self.cancels {
            cancel.cancel();
        }
    }

    /// Block until every task has returned.
    pub fn wait(self) -> Vec<(Lcore, i32)> {
        self.handle.wait()
    }

    /// Block until every task has returned and collect their final counters.
    pub fn finish(self) -> Vec<TaskReport> {
        let results = self.handle.wait();
        results
            .into_iter()
            .zip(self.names)
            .zip(self.stats)
            .map(|(((lcore, ret), name), stats)| TaskReport {
                name,
                lcore,
                ret,
                stats: stats.snapshot(),
            })
            .collect()
    }
}

/// Assigns task `i` to the `i`-th worker lcore.
pub struct WorkerDispatcher {
    workers: Vec<Lcore>,
}

impl Default for WorkerDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerDispatcher {
    /// Dispatch over every worker lcore, main lcore excluded.
    pub fn new() -> Self {
        Self {
            workers: Lcore::workers().collect(),
        }
    }

    pub fn with_workers(workers: Vec<Lcore>) -> Self {
        Self { workers }
    }

    pub fn workers(&self) -> &[Lcore] {
        &self.workers
    }

    /// Launch every task and wait for all of them.
    pub fn assign_and_run(&self, tasks: Vec<WorkerTask>) -> Result<Vec<(Lcore, i32)>, Error> {
        Ok(self.launch(tasks)?.wait())
    }

    /// Launch every task without waiting.
    ///
    /// Nothing is launched unless every task has a free worker and could
    /// open its queues.
    pub fn launch(&self, tasks: Vec<WorkerTask>) -> Result<Dispatch, Error> {
        if tasks.len() > self.workers.len() {
            return Err(Error::InsufficientWorkers {
                requested: tasks.len(),
                available: self.workers.len(),
            });
        }
        let lcores = &self.workers[..tasks.len()];
        if let Some(busy) = lcores.iter().find(|l| !l.is_available()) {
            return Err(Error::Launch {
                lcore: busy.id(),
                errno: Errno::EBUSY,
            });
        }

        let opened = tasks
            .iter()
            .map(WorkerTask::open)
            .collect::<Result<Vec<_>, _>>()?;

        let mut launched = Vec::with_capacity(tasks.len());
        let mut names = Vec::with_capacity(tasks.len());
        let mut stats = Vec::with_capacity(tasks.len());
        let mut cancels: Vec<CancelToken> = Vec::with_capacity(tasks.len());

        for ((task, mut burst), &lcore) in tasks.into_iter().zip(opened).zip(lcores) {
            let ctx = WorkerContext::new(lcore);
            let handle = burst.stats_handle();
            let cancel = task.cancel.clone();
            let name = task.name.clone();

            let result = lcore.launch(move || {
                debug!(
                    lcore = ctx.lcore.id(),
                    socket = ctx.socket_id,
                    task = %name,
                    "Task started"
                );
                let stats = burst.run(&cancel);
                info!(lcore = ctx.lcore.id(), task = %name, %stats, "Task finished");
                0
            });
            if let Err(errno) = result {
                warn!(lcore = lcore.id(), task = %task.name, %errno, "Launch failed");
                // cancel and reap whatever was launched before the failure
                for cancel in &cancels {
                    cancel.cancel();
                }
                LaunchHandle::new(launched).wait();
                return Err(Error::Launch {
                    lcore: lcore.id(),
                    errno,
                });
            }

            info!(
                lcore = lcore.id(),
                task = %task.name,
                behavior = ?task.behavior,
                "Task launched"
            );
            launched.push(lcore);
            names.push(task.name);
            stats.push(handle);
            cancels.push(task.cancel);
        }

        Ok(Dispatch {
            handle: LaunchHandle::new(launched),
            names,
            stats,
            cancels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_more_tasks_than_workers() {
        let dispatcher = WorkerDispatcher::with_workers(Vec::new());
        let err = dispatcher
            .launch(vec![WorkerTask::count("count", 0)])
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::InsufficientWorkers {
                requested: 1,
                available: 0
            }
        ));
    }

    #[test]
    fn test_task_builders() {
        let cancel = CancelToken::new();
        let task = WorkerTask::forward("a->b", 0, 1)
            .policy(TxPolicy::Retry { attempts: 2 })
            .cancel_token(cancel.clone());
        assert_eq!(task.behavior, Behavior::Forward { from: 0, to: 1 });
        assert_eq!(task.policy, TxPolicy::Retry { attempts: 2 });
        cancel.cancel();
        assert!(task.cancel.is_cancelled());
    }

    #[test]
    fn test_open_fails_on_unknown_port() {
        let err = WorkerTask::count("lost", 29).open().err().unwrap();
        match err {
            Error::Task { name, errno } => {
                assert_eq!(name, "lost");
                assert_eq!(errno, Errno::ENODEV);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
