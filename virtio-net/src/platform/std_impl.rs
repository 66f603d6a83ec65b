//! Hosted platform: `std::thread` workers and condvar parkers.

use alloc::boxed::Box;
use std::sync::{Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;

use super::{Parker, Scheduler, Worker};
use crate::error::SpawnError;

/// Mutex + condvar parker with a single wake token.
#[derive(Default)]
pub struct StdParker {
    token: Mutex<bool>,
    cond: Condvar,
}

impl StdParker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Parker for StdParker {
    fn park(&self) {
        let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        while !*token {
            token = self.cond.wait(token).unwrap_or_else(PoisonError::into_inner);
        }
        *token = false;
    }

    fn unpark(&self) {
        let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        *token = true;
        self.cond.notify_one();
    }
}

struct StdWorker(JoinHandle<()>);

impl Worker for StdWorker {
    fn join(self: Box<Self>) {
        if self.0.join().is_err() {
            log::error!("worker panicked");
        }
    }
}

/// Spawns each worker on its own OS thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdScheduler;

impl Scheduler for StdScheduler {
    fn spawn(&self, name: &'static str, body: Box<dyn FnOnce() + Send>) -> Result<Box<dyn Worker>, SpawnError> {
        std::thread::Builder::new()
            .name(name.into())
            .spawn(body)
            .map(|handle| Box::new(StdWorker(handle)) as Box<dyn Worker>)
            .map_err(|_| SpawnError { name })
    }

    fn parker(&self) -> Box<dyn Parker> {
        Box::new(StdParker::new())
    }
}
