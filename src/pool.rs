use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use log::{debug, error};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::error::PoolError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of worker threads fed through a bounded queue.
///
/// Encode and detect are CPU bound, so the pool is sized to the machine and
/// refuses new work once `queue_depth` jobs are already waiting rather than
/// letting requests pile up.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    queue_depth: usize,
}

/// Caller side of a submitted job.
pub struct JobHandle<T> {
    id: Uuid,
    cancel: CancelToken,
    result: Receiver<T>,
}

impl<T> JobHandle<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Ask the job to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Block until the job finishes.
    pub fn wait(self) -> Result<T, PoolError> {
        self.result.recv().map_err(|_| PoolError::ShutDown)
    }

    /// The result if the job has finished, `None` while it is still queued
    /// or running.
    pub fn try_result(&self) -> Result<Option<T>, PoolError> {
        match self.result.try_recv() {
            Ok(value) => Ok(Some(value)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(PoolError::ShutDown),
        }
    }
}

impl WorkerPool {
    pub fn new(workers: usize, queue_depth: usize) -> std::io::Result<Self> {
        let workers = workers.max(1);
        let queue_depth = queue_depth.max(1);
        let (sender, receiver): (Sender<Job>, Receiver<Job>) = bounded(queue_depth);

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("sonic-worker-{}", index))
                .spawn(move || worker_loop(index, receiver))?;
            handles.push(handle);
        }
        debug!("Started {} worker(s), queue depth {}", workers, queue_depth);

        Ok(Self {
            sender: Some(sender),
            workers: handles,
            queue_depth,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.sender.as_ref().map(|s| s.len()).unwrap_or(0)
    }

    /// Queue `job` without blocking.
    ///
    /// The closure receives the job's cancel token and should poll it. A
    /// full queue is reported as `Saturated` and the job is dropped.
    pub fn submit<T, F>(&self, job: F) -> Result<JobHandle<T>, PoolError>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> T + Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or(PoolError::ShutDown)?;
        let id = Uuid::new_v4();
        let cancel = CancelToken::new();
        let (result_tx, result_rx) = bounded(1);

        let token = cancel.clone();
        let boxed: Job = Box::new(move || {
            let value = job(&token);
            // The caller may have dropped its handle.
            let _ = result_tx.send(value);
        });

        match sender.try_send(boxed) {
            Ok(()) => {
                debug!("Queued job {}", id);
                Ok(JobHandle {
                    id,
                    cancel,
                    result: result_rx,
                })
            }
            Err(TrySendError::Full(_)) => Err(PoolError::Saturated {
                queued: sender.len(),
            }),
            Err(TrySendError::Disconnected(_)) => Err(PoolError::ShutDown),
        }
    }
}

fn worker_loop(index: usize, receiver: Receiver<Job>) {
    while let Ok(job) = receiver.recv() {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!("Job on worker {} panicked", index);
        }
    }
    debug!("Worker {} exiting", index);
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the queue lets workers drain what is left and exit.
        self.sender.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
