//! Bounded background pool for one-off blocking operations.
//!
//! Used by the job coordinator to run the worker's blocking `stop()` off the
//! coordinator thread. A fixed number of threads pull from one bounded queue;
//! the reply continuation is posted back to the caller's message loop.

use crate::error::{Result, SpoolError};
use crate::message_loop::{LoopHandle, Task};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

/// Runs a blocking operation off the calling thread, then replies on a loop.
pub trait BlockingPool: Send + Sync {
    /// Queue `op` on the pool. When it returns, `reply` is posted to
    /// `reply_loop`. Never blocks: fails if the pool no longer accepts work
    /// or its queue is full.
    fn post_and_reply(&self, op: Task, reply_loop: &LoopHandle, reply: Task) -> Result<()>;
}

pub struct WorkerPool {
    name: String,
    sender: Mutex<Option<SyncSender<Task>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, threads: usize, queue_capacity: usize) -> Result<Self> {
        let name = name.into();
        let (sender, receiver) = mpsc::sync_channel::<Task>(queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let mut handles = Vec::with_capacity(threads.max(1));
        for index in 0..threads.max(1) {
            let thread_name = format!("{}-{}", name, index);
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || run_pool_thread(receiver))
                .map_err(|source| SpoolError::ThreadSpawn {
                    name: thread_name,
                    source,
                })?;
            handles.push(handle);
        }
        debug!("Background pool '{}' started with {} thread(s)", name, handles.len());

        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            threads: Mutex::new(handles),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop accepting work, let queued operations finish, join the threads.
    pub fn shutdown(&self) {
        let sender = self.sender.lock().expect("pool sender lock poisoned").take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let handles: Vec<JoinHandle<()>> = self
            .threads
            .lock()
            .expect("pool threads lock poisoned")
            .drain(..)
            .collect();
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("Background pool '{}' thread panicked", self.name);
            }
        }
        debug!("Background pool '{}' shut down", self.name);
    }
}

impl BlockingPool for WorkerPool {
    fn post_and_reply(&self, op: Task, reply_loop: &LoopHandle, reply: Task) -> Result<()> {
        let sender = self
            .sender
            .lock()
            .expect("pool sender lock poisoned")
            .clone()
            .ok_or_else(|| SpoolError::PoolClosed {
                name: self.name.clone(),
            })?;

        let reply_loop = reply_loop.clone();
        let job: Task = Box::new(move || {
            op();
            if reply_loop.post_task(reply).is_err() {
                warn!("Dropping pool reply: the originating message loop is gone");
            }
        });
        sender.try_send(job).map_err(|err| match err {
            TrySendError::Full(_) => SpoolError::PoolFull {
                name: self.name.clone(),
            },
            TrySendError::Disconnected(_) => SpoolError::PoolClosed {
                name: self.name.clone(),
            },
        })
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("channel", &"<std::sync::mpsc::SyncSender>")
            .finish()
    }
}

fn run_pool_thread(receiver: Arc<Mutex<Receiver<Task>>>) {
    loop {
        let next = match receiver.lock() {
            Ok(guard) => guard.recv(),
            Err(_) => {
                error!("Background pool queue lock poisoned; thread exiting");
                return;
            }
        };
        match next {
            Ok(task) => task(),
            Err(_) => break,
        }
    }
}
