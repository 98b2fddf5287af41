//! One-shot rendezvous between exactly one signaler and one waiter.
//!
//! The network unit calls `signal` once its link is usable, the bootstrap
//! sequencer blocks in `wait`. A second `signal` or a second `wait` is an
//! error rather than a silent no-op.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignalError {
    #[error("ready signal was already raised")]
    AlreadySignaled,
    #[error("ready signal was already consumed by a waiter")]
    AlreadyConsumed,
    #[error("timed out waiting for ready signal")]
    Timeout,
}

#[derive(Debug)]
enum Slot<T> {
    Empty,
    Raised(T),
    Consumed,
}

#[derive(Debug)]
struct Inner<T> {
    slot: Slot<T>,
    signaled: bool,
    waiting: bool,
}

#[derive(Debug)]
pub struct ReadySignal<T> {
    inner: Mutex<Inner<T>>,
    condvar: Condvar,
}

impl<T> ReadySignal<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                slot: Slot::Empty,
                signaled: false,
                waiting: false,
            }),
            condvar: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Raise the signal with a payload, waking the waiter.
    pub fn signal(&self, value: T) -> Result<(), SignalError> {
        let mut inner = self.lock();
        if inner.signaled {
            return Err(SignalError::AlreadySignaled);
        }
        inner.signaled = true;
        inner.slot = Slot::Raised(value);
        self.condvar.notify_one();
        Ok(())
    }

    /// Block until signaled and take the payload.
    pub fn wait(&self) -> Result<T, SignalError> {
        self.wait_inner(None)
    }

    /// Like `wait`, but gives up after `timeout`. A timed-out waiter may wait
    /// again.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, SignalError> {
        self.wait_inner(Some(Instant::now() + timeout))
    }

    fn wait_inner(&self, deadline: Option<Instant>) -> Result<T, SignalError> {
        let mut inner = self.lock();
        if inner.waiting || matches!(inner.slot, Slot::Consumed) {
            return Err(SignalError::AlreadyConsumed);
        }
        inner.waiting = true;
        loop {
            if let Slot::Raised(_) = inner.slot {
                inner.waiting = false;
                return match std::mem::replace(&mut inner.slot, Slot::Consumed) {
                    Slot::Raised(value) => Ok(value),
                    _ => Err(SignalError::AlreadyConsumed),
                };
            }
            inner = match deadline {
                None => self.condvar.wait(inner).unwrap_or_else(|p| p.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        inner.waiting = false;
                        return Err(SignalError::Timeout);
                    }
                    self.condvar
                        .wait_timeout(inner, deadline - now)
                        .unwrap_or_else(|p| p.into_inner())
                        .0
                }
            };
        }
    }

    pub fn is_signaled(&self) -> bool {
        self.lock().signaled
    }
}

impl<T> Default for ReadySignal<T> {
    fn default() -> Self {
        Self::new()
    }
}
