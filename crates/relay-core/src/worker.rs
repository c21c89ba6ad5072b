//! Grow-only pool of incoming-call workers.
//!
//! Each worker is one OS thread with its own command channel. A call goes to
//! the first idle worker; when every worker is busy a new one is spawned.
//! Workers are never retired while the pool runs, so the pool only grows.
//!
//! # Thread Safety
//!
//! The slot list is guarded by one mutex. Worker state is an atomic so a
//! worker can mark itself idle without taking the pool lock.

use crate::config::RpcConfig;
use crate::{RelayError, Result};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Lifecycle of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Active,
    Stopping,
    Stopped,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Idle,
            1 => WorkerState::Active,
            2 => WorkerState::Stopping,
            _ => WorkerState::Stopped,
        }
    }
}

/// Runs one job on a worker thread.
pub trait JobProcessor<J>: Send + Sync {
    fn process(&self, job: J);
}

enum WorkerCommand<J> {
    Run(J),
    Stop,
}

struct WorkerSlot<J> {
    state: Arc<AtomicU8>,
    commands: Sender<WorkerCommand<J>>,
    handle: Option<JoinHandle<()>>,
}

struct Slots<J> {
    workers: Vec<WorkerSlot<J>>,
    stopped: bool,
}

pub struct WorkerPool<J: Send + 'static> {
    name: String,
    processor: Weak<dyn JobProcessor<J>>,
    slots: Mutex<Slots<J>>,
}

impl<J: Send + 'static> WorkerPool<J> {
    /// Threads are named `<prefix>-<name>-<index>`. The pool holds the
    /// processor weakly so that it can be owned by it.
    pub fn new(name: impl Into<String>, processor: Weak<dyn JobProcessor<J>>) -> Self {
        Self {
            name: name.into(),
            processor,
            slots: Mutex::new(Slots {
                workers: Vec::new(),
                stopped: false,
            }),
        }
    }

    /// Hand a job to an idle worker, spawning one if none is idle.
    pub fn dispatch(&self, job: J) -> Result<()> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.stopped {
            return Err(RelayError::disconnected("worker pool is shut down"));
        }

        let idle = slots.workers.iter().position(|worker| {
            worker
                .state
                .compare_exchange(
                    WorkerState::Idle as u8,
                    WorkerState::Active as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        });

        let index = match idle {
            Some(index) => index,
            None => {
                let worker = self.spawn_worker(slots.workers.len())?;
                slots.workers.push(worker);
                slots.workers.len() - 1
            }
        };

        let worker = &slots.workers[index];
        if let Err(err) = worker.commands.send(WorkerCommand::Run(job)) {
            worker
                .state
                .store(WorkerState::Stopped as u8, Ordering::Release);
            return Err(RelayError::disconnected(format!(
                "worker {index} exited unexpectedly: {err}"
            )));
        }
        Ok(())
    }

    fn spawn_worker(&self, index: usize) -> Result<WorkerSlot<J>> {
        let state = Arc::new(AtomicU8::new(WorkerState::Active as u8));
        let (commands, inbox) = channel::<WorkerCommand<J>>();
        let processor = self.processor.clone();
        let thread_state = state.clone();
        let thread_name = format!("{}-{}-{}", RpcConfig::WORKER_THREAD_PREFIX, self.name, index);
        debug!("Spawning worker {}", thread_name);

        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                while let Ok(WorkerCommand::Run(job)) = inbox.recv() {
                    match processor.upgrade() {
                        Some(processor) => processor.process(job),
                        None => break,
                    }
                    // Stop may have been requested while the job ran.
                    let _ = thread_state.compare_exchange(
                        WorkerState::Active as u8,
                        WorkerState::Idle as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                }
                thread_state.store(WorkerState::Stopped as u8, Ordering::Release);
            })?;

        Ok(WorkerSlot {
            state,
            commands,
            handle: Some(handle),
        })
    }

    /// Stop every worker and join their threads.
    ///
    /// A worker calling this (a handler tearing down its own session) is not
    /// joined; it finishes on its own once its job returns.
    pub fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            if slots.stopped {
                return;
            }
            slots.stopped = true;
            slots
                .workers
                .iter_mut()
                .filter_map(|worker| {
                    let _ = worker.state.compare_exchange(
                        WorkerState::Idle as u8,
                        WorkerState::Stopping as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                    let _ = worker.state.compare_exchange(
                        WorkerState::Active as u8,
                        WorkerState::Stopping as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                    let _ = worker.commands.send(WorkerCommand::Stop);
                    worker.handle.take()
                })
                .collect()
        };

        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("Worker thread panicked during shutdown");
            }
        }
        debug!("Worker pool {} shut down", self.name);
    }

    pub fn worker_count(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .workers
            .len()
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .workers
            .iter()
            .map(|worker| WorkerState::from_u8(worker.state.load(Ordering::Acquire)))
            .collect()
    }

    pub fn is_shut_down(&self) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
    use std::time::Duration;

    /// Each job blocks until the test releases it.
    struct GatedProcessor {
        started: Mutex<SyncSender<u32>>,
        gate: Mutex<Receiver<()>>,
    }

    impl JobProcessor<u32> for GatedProcessor {
        fn process(&self, job: u32) {
            self.started.lock().unwrap().send(job).unwrap();
            self.gate
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(5))
                .unwrap();
        }
    }

    fn gated() -> (Arc<GatedProcessor>, Receiver<u32>, SyncSender<()>) {
        let (started_tx, started_rx) = sync_channel(16);
        let (gate_tx, gate_rx) = sync_channel(16);
        let processor = Arc::new(GatedProcessor {
            started: Mutex::new(started_tx),
            gate: Mutex::new(gate_rx),
        });
        (processor, started_rx, gate_tx)
    }

    fn pool_for(processor: &Arc<GatedProcessor>) -> WorkerPool<u32> {
        let as_dyn: Arc<dyn JobProcessor<u32>> = processor.clone();
        WorkerPool::new("test", Arc::downgrade(&as_dyn))
    }

    fn wait_for_state(pool: &WorkerPool<u32>, index: usize, state: WorkerState) {
        for _ in 0..500 {
            if pool.worker_states()[index] == state {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("worker {index} never reached {state:?}");
    }

    #[test]
    fn test_busy_pool_grows() {
        let (processor, started, gate) = gated();
        let pool = pool_for(&processor);

        pool.dispatch(1).unwrap();
        started.recv_timeout(Duration::from_secs(5)).unwrap();
        pool.dispatch(2).unwrap();
        started.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(pool.worker_count(), 2);

        gate.send(()).unwrap();
        gate.send(()).unwrap();
        pool.shutdown();
    }

    #[test]
    fn test_idle_worker_is_reused() {
        let (processor, started, gate) = gated();
        let pool = pool_for(&processor);

        gate.send(()).unwrap();
        pool.dispatch(1).unwrap();
        started.recv_timeout(Duration::from_secs(5)).unwrap();
        wait_for_state(&pool, 0, WorkerState::Idle);

        gate.send(()).unwrap();
        pool.dispatch(2).unwrap();
        assert_eq!(started.recv_timeout(Duration::from_secs(5)).unwrap(), 2);
        assert_eq!(pool.worker_count(), 1);
        pool.shutdown();
    }

    #[test]
    fn test_shutdown_joins_and_refuses_work() {
        let (processor, started, gate) = gated();
        let pool = pool_for(&processor);

        gate.send(()).unwrap();
        pool.dispatch(1).unwrap();
        started.recv_timeout(Duration::from_secs(5)).unwrap();

        pool.shutdown();
        assert!(pool.is_shut_down());
        assert_eq!(pool.worker_states(), vec![WorkerState::Stopped]);
        assert!(pool.dispatch(2).unwrap_err().is_disconnect());
    }
}
