//! Bounded-concurrency dispatch queue
//!
//! An unbounded buffer drained by a fixed pool of workers. Producers may keep
//! enqueuing while earlier items are already running.

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Dispatch queue is closed")]
    Closed,
}

/// Resolve a requested degree of parallelism; unset or non-positive means one per core
pub fn resolve_parallelism(requested: Option<i64>) -> usize {
    match requested {
        Some(n) if n > 0 => n as usize,
        _ => num_cpus::get(),
    }
}

/// Cloneable handle for enqueuing from another task
pub struct DispatchProducer<T> {
    sender: async_channel::Sender<T>,
}

impl<T> Clone for DispatchProducer<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T> DispatchProducer<T> {
    pub fn enqueue(&self, item: T) -> Result<(), DispatchError> {
        self.sender
            .try_send(item)
            .map_err(|_| DispatchError::Closed)
    }

    pub fn complete(&self) {
        self.sender.close();
    }
}

pub struct DispatchQueue<T> {
    sender: async_channel::Sender<T>,
    receiver: async_channel::Receiver<T>,
    degree_of_parallelism: usize,
}

impl<T: Send + 'static> DispatchQueue<T> {
    pub fn new(degree_of_parallelism: Option<i64>) -> Self {
        let (sender, receiver) = async_channel::unbounded();
        Self {
            sender,
            receiver,
            degree_of_parallelism: resolve_parallelism(degree_of_parallelism),
        }
    }

    pub fn degree_of_parallelism(&self) -> usize {
        self.degree_of_parallelism
    }

    pub fn producer(&self) -> DispatchProducer<T> {
        DispatchProducer {
            sender: self.sender.clone(),
        }
    }

    /// Fails once `complete` has been called
    pub fn enqueue(&self, item: T) -> Result<(), DispatchError> {
        self.sender
            .try_send(item)
            .map_err(|_| DispatchError::Closed)
    }

    /// No more items will be enqueued; workers exit once the buffer is empty
    pub fn complete(&self) {
        if self.sender.close() {
            debug!(pending = self.sender.len(), "dispatch queue completed");
        }
    }

    pub fn is_completed(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Run every item exactly once on the worker pool
    ///
    /// Returns whether any item reported a non-zero exit code. An `Err` from
    /// `execute` stops all workers from pulling more work and is returned after
    /// in-flight items finish. Cancellation likewise stops new pulls.
    pub async fn run_to_completion<F, Fut, E>(
        &self,
        cancel: &CancellationToken,
        execute: F,
    ) -> Result<bool, E>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<i32, E>> + Send + 'static,
        E: Send + 'static,
    {
        let execute = Arc::new(execute);
        let stop = cancel.child_token();
        let mut workers = JoinSet::new();

        for worker in 0..self.degree_of_parallelism {
            let receiver = self.receiver.clone();
            let execute = execute.clone();
            let stop = stop.clone();

            workers.spawn(async move {
                let mut failed = false;
                loop {
                    let item = tokio::select! {
                        biased;
                        _ = stop.cancelled() => break,
                        item = receiver.recv() => match item {
                            Ok(item) => item,
                            Err(_) => break,
                        },
                    };
                    match execute(item).await {
                        Ok(code) => failed |= code != 0,
                        Err(e) => {
                            stop.cancel();
                            return Err(e);
                        }
                    }
                }
                debug!(worker, "dispatch worker finished");
                Ok(failed)
            });
        }

        let mut any_failed = false;
        let mut fatal = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(failed)) => any_failed |= failed,
                Ok(Err(e)) => {
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
                Err(e) => {
                    error!("dispatch worker panicked: {e}");
                    any_failed = true;
                }
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(any_failed),
        }
    }
}
