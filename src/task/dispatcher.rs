//! Static-partition thread dispatcher.
//!
//! Files are dealt round-robin into one queue per thread as they are added;
//! nothing is rebalanced once the threads start. Workers share only the
//! read-only [`RunParams`] and the interrupt flag, and report back through
//! their join handles.
//!
//! ```text
//! Created ──start()──▶ Dispatched ──wait_for_completion()──▶ Completed
//!                                                       └──▶ Interrupted
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{error, info};

use super::worker::{RegionWorker, WorkerOutcome};
use super::{PeelResult, RunParams};
use crate::error::{PeelError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Created,
    Dispatched,
    Completed,
    Interrupted,
}

/// Asks a running dispatch to stop. Workers finish the file they are on
/// (including any backup restore) before exiting.
#[derive(Debug, Clone)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct TaskDispatcher {
    params:    Arc<RunParams>,
    queues:    Vec<Vec<PathBuf>>,
    next:      usize,
    state:     DispatchState,
    interrupt: Arc<AtomicBool>,
    handles:   Vec<JoinHandle<WorkerOutcome>>,
    result:    Option<PeelResult>,
}

impl TaskDispatcher {
    /// A dispatcher with `threads` queues (at least one).
    pub fn new(threads: usize, params: RunParams) -> Self {
        Self {
            params:    Arc::new(params),
            queues:    vec![Vec::new(); threads.max(1)],
            next:      0,
            state:     DispatchState::Created,
            interrupt: Arc::new(AtomicBool::new(false)),
            handles:   Vec::new(),
            result:    None,
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle(Arc::clone(&self.interrupt))
    }

    /// Queue one region file. Only legal before [`start`](Self::start).
    pub fn add_task(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        if self.state != DispatchState::Created {
            return Err(PeelError::NotAccepted);
        }
        let slot = self.next % self.queues.len();
        self.queues[slot].push(path.into());
        self.next += 1;
        Ok(())
    }

    pub fn add_tasks<I, P>(&mut self, paths: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        paths.into_iter().try_for_each(|p| self.add_task(p))
    }

    pub fn task_count(&self) -> usize {
        self.next
    }

    /// Spawn one thread per non-empty queue.
    pub fn start(&mut self) -> Result<()> {
        if self.state != DispatchState::Created {
            return Err(PeelError::AlreadyStarted);
        }
        self.state = DispatchState::Dispatched;
        info!(
            "dispatching {} region file(s) over {} thread(s)",
            self.next,
            self.queues.iter().filter(|q| !q.is_empty()).count()
        );

        for (id, queue) in self.queues.drain(..).enumerate() {
            if queue.is_empty() {
                continue;
            }
            let worker = RegionWorker::new(id, queue, Arc::clone(&self.params), Arc::clone(&self.interrupt));
            let spawned = thread::Builder::new()
                .name(format!("peeler-worker-{id}"))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => self.handles.push(handle),
                Err(e) => {
                    error!("failed to spawn worker {id}: {e}");
                    self.interrupt.store(true, Ordering::SeqCst);
                    for handle in self.handles.drain(..) {
                        let _ = handle.join();
                    }
                    self.state = DispatchState::Interrupted;
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// Block until every worker has stopped and return the merged result.
    ///
    /// Fails with [`PeelError::TaskInterrupted`] if any worker was stopped
    /// before draining its queue or panicked.
    pub fn wait_for_completion(&mut self) -> Result<PeelResult> {
        match self.state {
            DispatchState::Created => return Err(PeelError::NotAccepted),
            DispatchState::Completed => return Ok(self.result.unwrap_or_default()),
            DispatchState::Interrupted => return Err(PeelError::TaskInterrupted),
            DispatchState::Dispatched => {}
        }

        let mut total = PeelResult::default();
        let mut interrupted = false;
        for handle in self.handles.drain(..) {
            match handle.join() {
                Ok(outcome) => {
                    interrupted |= outcome.interrupted;
                    total += outcome.result;
                }
                Err(_) => {
                    error!("a region worker panicked");
                    interrupted = true;
                }
            }
        }

        if interrupted {
            self.state = DispatchState::Interrupted;
            return Err(PeelError::TaskInterrupted);
        }
        self.state = DispatchState::Completed;
        self.result = Some(total);
        Ok(total)
    }

    /// `start` followed by `wait_for_completion`.
    pub fn run(&mut self) -> Result<PeelResult> {
        self.start()?;
        self.wait_for_completion()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protection::ProtectionIndex;

    fn dispatcher(threads: usize) -> TaskDispatcher {
        TaskDispatcher::new(threads, RunParams::new("/nonexistent", ProtectionIndex::new()))
    }

    #[test]
    fn round_robin_partition() {
        let mut d = dispatcher(3);
        d.add_tasks((0..7).map(|i| format!("/nonexistent/r.{i}.0.mca"))).unwrap();
        let sizes: Vec<usize> = d.queues.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 2, 2]);
        assert_eq!(d.queues[1][0], PathBuf::from("/nonexistent/r.1.0.mca"));
    }

    #[test]
    fn zero_threads_means_one_queue() {
        assert_eq!(dispatcher(0).queues.len(), 1);
    }

    #[test]
    fn lifecycle_and_misuse() {
        let mut d = dispatcher(2);
        assert!(matches!(d.wait_for_completion(), Err(PeelError::NotAccepted)));
        d.start().unwrap();
        assert_eq!(d.state(), DispatchState::Dispatched);
        assert!(matches!(d.start(), Err(PeelError::AlreadyStarted)));
        assert!(matches!(d.add_task("/nonexistent/r.0.0.mca"), Err(PeelError::NotAccepted)));
        assert_eq!(d.wait_for_completion().unwrap(), PeelResult::default());
        assert_eq!(d.state(), DispatchState::Completed);
    }

    #[test]
    fn interrupt_before_start_reports_interrupted() {
        let mut d = dispatcher(2);
        d.add_tasks(["/nonexistent/r.0.0.mca", "/nonexistent/r.1.0.mca"]).unwrap();
        d.interrupt_handle().interrupt();
        assert!(matches!(d.run(), Err(PeelError::TaskInterrupted)));
        assert_eq!(d.state(), DispatchState::Interrupted);
    }
}
