use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, SendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Bounded worker pool. Threads are spawned on demand, up to `max_workers`,
/// and live until the pool is dropped.
pub struct WorkerPool {
    max_workers: usize,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    idle: Arc<AtomicUsize>,
    pending: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        Self {
            max_workers: max_workers.max(1),
            sender: Mutex::new(Some(tx)),
            receiver: Arc::new(Mutex::new(rx)),
            workers: Mutex::new(Vec::new()),
            idle: Arc::new(AtomicUsize::new(0)),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of worker threads spawned so far.
    pub fn spawned(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Queue `job` for execution on a worker thread.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.maybe_spawn_worker();

        let job: Job = Box::new(job);
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let unsent = match sender.as_ref() {
            Some(tx) => tx.send(job).err().map(|SendError(job)| job),
            None => Some(job),
        };
        drop(sender);

        // Only reachable while shutting down; run inline so the job still
        // completes exactly once.
        if let Some(job) = unsent {
            log::warn!("Worker pool unavailable, running job on the calling thread");
            run_job(job);
        }
    }

    /// Account for one more queued job and spawn a worker if the idle ones
    /// cannot absorb the backlog.
    fn maybe_spawn_worker(&self) {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        let pending = self.pending.fetch_add(1, Ordering::AcqRel) + 1;
        if pending <= self.idle.load(Ordering::Acquire) || workers.len() >= self.max_workers {
            return;
        }

        let index = workers.len();
        let receiver = Arc::clone(&self.receiver);
        let idle = Arc::clone(&self.idle);
        let pending = Arc::clone(&self.pending);
        let spawned = std::thread::Builder::new()
            .name(format!("vidthumb-worker-{}", index))
            .spawn(move || worker_loop(receiver, idle, pending));

        match spawned {
            Ok(handle) => {
                log::debug!("Spawned worker {} of {}", index + 1, self.max_workers);
                workers.push(handle);
            }
            // Existing workers (if any) will still drain the queue.
            Err(e) => log::warn!("Failed to spawn worker thread: {}", e),
        }
    }
}

fn worker_loop(
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    idle: Arc<AtomicUsize>,
    pending: Arc<AtomicUsize>,
) {
    loop {
        idle.fetch_add(1, Ordering::AcqRel);
        let next = receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv();
        idle.fetch_sub(1, Ordering::AcqRel);

        match next {
            Ok(job) => {
                pending.fetch_sub(1, Ordering::AcqRel);
                run_job(job);
            }
            Err(_) => break,
        }
    }
}

fn run_job(job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        log::error!("Worker job panicked");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets workers exit once the queue is drained.
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let current = std::thread::current().id();
        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in workers {
            // A job may hold the last reference to the pool.
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::time::Duration;

    #[test]
    fn runs_every_job_once() {
        let pool = WorkerPool::new(3);
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        for _ in 0..50 {
            let counter = Arc::clone(&counter);
            let tx = tx.clone();
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                tx.send(()).unwrap();
            });
        }
        for _ in 0..50 {
            rx.recv_timeout(Duration::from_secs(10)).unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 50);
        assert!(pool.spawned() <= 3);
    }

    #[test]
    fn jobs_run_concurrently_up_to_bound() {
        let pool = WorkerPool::new(2);
        let barrier = Arc::new(Barrier::new(2));
        let (tx, rx) = mpsc::channel();

        // Both jobs must be in flight at once or the barrier never releases.
        for _ in 0..2 {
            let barrier = Arc::clone(&barrier);
            let tx = tx.clone();
            pool.execute(move || {
                barrier.wait();
                tx.send(()).unwrap();
            });
        }
        for _ in 0..2 {
            rx.recv_timeout(Duration::from_secs(10)).unwrap();
        }
        assert_eq!(pool.spawned(), 2);
    }

    #[test]
    fn panicking_job_does_not_kill_pool() {
        let pool = WorkerPool::new(1);
        pool.execute(|| panic!("boom"));

        let (tx, rx) = mpsc::channel();
        pool.execute(move || tx.send(42).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), 42);
        assert_eq!(pool.spawned(), 1);
    }

    #[test]
    fn drop_drains_queue() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = WorkerPool::new(1);
            for _ in 0..10 {
                let counter = Arc::clone(&counter);
                pool.execute(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
}
