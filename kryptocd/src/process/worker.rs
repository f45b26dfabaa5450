// SPDX-License-Identifier: AGPL-3.0-only

//! A joinable task that runs a single supplied procedure once.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    thread::{self, JoinHandle},
};

/// [`Worker::start`] was called a second time.
#[derive(Debug, thiserror::Error)]
#[error("worker thread was already started")]
pub struct AlreadyStarted;

/// Runs a single caller-supplied procedure in its own OS thread, exactly
/// once, and joins that thread when dropped.
///
/// The procedure publishes its result through the [`Mutex`] handed to it —
/// this is the "one mutex available to subclasses for publishing results"
/// from the original design: [`crate::filters::tar::TarLister`]'s reader
/// thread sets its accumulated file list and a `finished` marker through
/// exactly this mechanism.
pub struct Worker<T>
{
    handle:    Mutex<Option<JoinHandle<()>>>,
    published: Arc<Mutex<Option<T>>>,
}

impl<T> Worker<T>
    where T: Send + 'static
{
    /// Create a worker that has not yet been started.
    pub fn new() -> Self
    {
        Self{handle: Mutex::new(None), published: Arc::new(Mutex::new(None))}
    }

    /// Start the worker thread. A second call returns
    /// [`AlreadyStarted`] without spawning another thread.
    pub fn start<F>(&self, f: F) -> Result<(), AlreadyStarted>
        where F: FnOnce(&Mutex<Option<T>>) + Send + 'static
    {
        let mut handle = self.handle.lock().expect("worker mutex poisoned");
        if handle.is_some() {
            return Err(AlreadyStarted);
        }
        let published = Arc::clone(&self.published);
        *handle = Some(thread::spawn(move || f(&published)));
        Ok(())
    }

    /// Lock the published-result slot.
    pub fn published(&self) -> MutexGuard<'_, Option<T>>
    {
        self.published.lock().expect("worker mutex poisoned")
    }

}

impl<T> Worker<T>
{
    /// Block until the worker thread, if any, has finished.
    pub fn join(&self)
    {
        if let Some(handle) = self.handle.lock().expect("worker mutex poisoned").take() {
            let _ = handle.join();
        }
    }
}

impl<T> Drop for Worker<T>
{
    fn drop(&mut self)
    {
        self.join();
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn publishes_result_and_joins_on_drop()
    {
        let worker: Worker<u32> = Worker::new();
        worker.start(|published| {
            *published.lock().unwrap() = Some(42);
        }).unwrap();
        worker.join();
        assert_eq!(*worker.published(), Some(42));
    }

    #[test]
    fn second_start_is_rejected()
    {
        let worker: Worker<u32> = Worker::new();
        worker.start(|_| {}).unwrap();
        let second = worker.start(|_| {});
        assert!(second.is_err());
    }
}
