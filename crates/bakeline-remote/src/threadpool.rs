use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, warn};

/// Opaque payload a worker job hands back to the resuming transform.
pub type JobPayload = Box<dyn Any + Send>;

type Job = Box<dyn FnOnce() -> JobPayload + Send>;

/// Handle identifying a submitted work item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WorkItemHandle(u64);

impl WorkItemHandle {
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// A small fixed-size worker pool with non-blocking completion probes.
///
/// Submitted closures run on worker threads; the scheduler polls
/// [`ThreadPool::try_take`] from its wait loop. A panicking job is caught
/// on the worker and surfaces as an `Err` with the panic message, never as
/// a poisoned pool.
pub struct ThreadPool {
    sender: Option<Sender<(WorkItemHandle, Job)>>,
    completed: Arc<Mutex<HashMap<WorkItemHandle, Result<JobPayload, String>>>>,
    workers: Vec<JoinHandle<()>>,
    next_handle: u64,
}

impl ThreadPool {
    #[must_use]
    pub fn new(num_workers: usize) -> Self {
        let num_workers = num_workers.max(1);
        let (sender, receiver) = channel::<(WorkItemHandle, Job)>();
        let receiver = Arc::new(Mutex::new(receiver));
        let completed = Arc::new(Mutex::new(HashMap::new()));

        let workers = (0..num_workers)
            .map(|index| {
                let receiver = Arc::clone(&receiver);
                let completed = Arc::clone(&completed);
                std::thread::Builder::new()
                    .name(format!("bakeline-worker-{index}"))
                    .spawn(move || worker_loop(&receiver, &completed))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        ThreadPool {
            sender: Some(sender),
            completed,
            workers,
            next_handle: 1,
        }
    }

    /// Queue a job, returning the handle to poll for its completion.
    pub fn submit(&mut self, job: impl FnOnce() -> JobPayload + Send + 'static) -> WorkItemHandle {
        let handle = WorkItemHandle(self.next_handle);
        self.next_handle += 1;
        if let Some(sender) = &self.sender {
            let _ = sender.send((handle, Box::new(job)));
        }
        debug!(handle = handle.as_u64(), "queued thread pool work item");
        handle
    }

    /// Non-blocking completion probe. Returns the job's payload exactly
    /// once, after which the handle is forgotten.
    pub fn try_take(&self, handle: WorkItemHandle) -> Option<Result<JobPayload, String>> {
        self.completed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&handle)
    }
}

fn worker_loop(
    receiver: &Arc<Mutex<Receiver<(WorkItemHandle, Job)>>>,
    completed: &Arc<Mutex<HashMap<WorkItemHandle, Result<JobPayload, String>>>>,
) {
    loop {
        let next = {
            let guard = receiver
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.recv()
        };
        let Ok((handle, job)) = next else {
            return;
        };

        let result = catch_unwind(AssertUnwindSafe(job)).map_err(|panic| {
            let message = panic_message(panic.as_ref());
            warn!(handle = handle.as_u64(), message = %message, "thread pool job panicked");
            message
        });

        completed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(handle, result);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "worker job panicked".to_string()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn take_blocking(pool: &ThreadPool, handle: WorkItemHandle) -> Result<JobPayload, String> {
        for _ in 0..500 {
            if let Some(result) = pool.try_take(handle) {
                return result;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        panic!("work item never completed");
    }

    #[test]
    fn payload_round_trip() {
        let mut pool = ThreadPool::new(2);
        let handle = pool.submit(|| Box::new(41i32 + 1) as JobPayload);
        let payload = take_blocking(&pool, handle).unwrap();
        assert_eq!(*payload.downcast::<i32>().unwrap(), 42);
    }

    #[test]
    fn try_take_is_single_shot() {
        let mut pool = ThreadPool::new(1);
        let handle = pool.submit(|| Box::new(()) as JobPayload);
        take_blocking(&pool, handle).unwrap();
        assert!(pool.try_take(handle).is_none());
    }

    #[test]
    fn panic_is_contained() {
        let mut pool = ThreadPool::new(1);
        let handle = pool.submit(|| panic!("bad texture header"));
        let err = take_blocking(&pool, handle).unwrap_err();
        assert!(err.contains("bad texture header"));

        // The pool keeps working after a panic.
        let handle = pool.submit(|| Box::new(7u8) as JobPayload);
        assert!(take_blocking(&pool, handle).is_ok());
    }

    #[test]
    fn unknown_handle_is_none() {
        let pool = ThreadPool::new(1);
        assert!(pool.try_take(WorkItemHandle(999)).is_none());
    }
}
