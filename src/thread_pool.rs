//! A small fixed-size worker pool the driver uses to fan the per-part plan search out
//! across cores (§5).
//!
//! `submit` hands back a [`futures::channel::oneshot::Receiver`] rather than blocking,
//! so the driver can queue work for every start part before waiting on any of it.
//! Constructing the pool with `num_workers == 0` runs every submitted task inline on the
//! caller's thread instead of spawning anything, which keeps single-threaded callers and
//! tests free of any thread-pool overhead or nondeterminism.
//!
//! Tasks must never submit further work to the same pool and block on the result: with
//! a fixed worker count that can deadlock if all workers are waiting on tasks still
//! sitting in the queue. The pool does not detect this; it is the caller's
//! responsibility, exactly as in a typical bounded thread pool.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use futures::channel::oneshot;

type Task = Box<dyn FnOnce(usize) + Send + 'static>;

struct Shared {
    queue: Mutex<VecDeque<Task>>,
    condvar: Condvar,
    shutting_down: Mutex<bool>,
}

/// A fixed-size pool of worker threads, or a synchronous stand-in when constructed with
/// zero workers.
pub struct ThreadPool {
    shared: Option<Arc<Shared>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// `num_workers == 0` makes every `submit` run synchronously on the calling thread.
    pub fn new(num_workers: usize) -> Self {
        if num_workers == 0 {
            return Self {
                shared: None,
                workers: Vec::new(),
            };
        }
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            shutting_down: Mutex::new(false),
        });
        let workers = (0..num_workers)
            .map(|worker_id| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("npu-combiner-worker-{worker_id}"))
                    .spawn(move || Self::worker_loop(worker_id, shared))
                    .expect("failed to spawn combiner worker thread")
            })
            .collect();
        Self {
            shared: Some(shared),
            workers,
        }
    }

    fn worker_loop(worker_id: usize, shared: Arc<Shared>) {
        loop {
            let mut queue = shared.queue.lock().unwrap_or_else(|e| e.into_inner());
            loop {
                if let Some(task) = queue.pop_front() {
                    drop(queue);
                    task(worker_id);
                    break;
                }
                if *shared.shutting_down.lock().unwrap_or_else(|e| e.into_inner()) {
                    return;
                }
                queue = shared
                    .condvar
                    .wait(queue)
                    .unwrap_or_else(|e| e.into_inner());
            }
        }
    }

    /// Queue `task` and return a future that resolves to its result once a worker (or,
    /// for a zero-worker pool, the calling thread) has run it.
    pub fn submit<F, T>(&self, task: F) -> oneshot::Receiver<T>
    where
        F: FnOnce(usize) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let wrapped: Task = Box::new(move |worker_id| {
            let result = task(worker_id);
            // The receiver may have been dropped by a caller uninterested in the
            // result; that is not an error for the pool.
            let _ = sender.send(result);
        });

        match &self.shared {
            None => wrapped(0),
            Some(shared) => {
                shared.queue.lock().unwrap_or_else(|e| e.into_inner()).push_back(wrapped);
                shared.condvar.notify_one();
            }
        }
        receiver
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if let Some(shared) = &self.shared {
            *shared.shutting_down.lock().unwrap_or_else(|e| e.into_inner()) = true;
            shared.condvar.notify_all();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn synchronous_pool_runs_inline() {
        let pool = ThreadPool::new(0);
        let receiver = pool.submit(|_worker_id| 2 + 2);
        assert_eq!(futures::executor::block_on(receiver).unwrap(), 4);
    }

    #[test]
    fn worker_pool_runs_many_tasks() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        let receivers: Vec<_> = (0..64)
            .map(|_| {
                let counter = Arc::clone(&counter);
                pool.submit(move |_worker_id| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    counter.load(Ordering::SeqCst)
                })
            })
            .collect();
        for receiver in receivers {
            futures::executor::block_on(receiver).unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }
}
