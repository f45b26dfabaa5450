// SPDX-License-Identifier: AGPL-3.0-only

//! A shared disk-space budget, allocated opportunistically across
//! concurrently running [`crate::image`] attempts.

use {
    crate::error::DiskspaceError,
    log::debug,
    std::{
        io,
        path::{Path, PathBuf},
        sync::{Condvar, Mutex},
    },
};

#[derive(Debug)]
struct Budget
{
    usable: u64,
    free:   u64,
}

/// A megabyte-denominated disk-space arbiter rooted at one directory.
///
/// The only mutable shared state is the free-space counter, guarded by a
/// mutex; waiters for more space block on a condition variable that every
/// [`Diskspace::release`] broadcasts. There is no FIFO ordering among
/// waiters — allocations are opportunistic and partial fulfilment is legal,
/// so starvation is bounded by the largest single request in the workload.
#[derive(Debug)]
pub struct Diskspace
{
    directory: PathBuf,
    budget:    Mutex<Budget>,
    available: Condvar,
}

impl Diskspace
{
    /// Validate that `usable` megabytes is a positive budget and that
    /// `directory` is writable (by creating and removing a test
    /// subdirectory inside it).
    pub fn new(directory: impl Into<PathBuf>, usable: u64) -> Result<Self, DiskspaceError>
    {
        if usable == 0 {
            return Err(DiskspaceError::NoSpaceAvailable);
        }
        let directory = directory.into();
        check_directory_writable(&directory).map_err(DiskspaceError::DirectoryError)?;

        Ok(Self{
            directory,
            budget:    Mutex::new(Budget{usable, free: usable}),
            available: Condvar::new(),
        })
    }

    /// Allocate up to `n` megabytes (`n` must be positive). Blocks while the
    /// free budget is zero; returns as soon as any positive amount (possibly
    /// less than `n`) becomes available.
    pub fn allocate(&self, n: u64) -> u64
    {
        assert!(n > 0, "Diskspace::allocate requires a positive request");
        let mut budget = self.budget.lock().expect("diskspace mutex poisoned");
        while budget.free == 0 {
            budget = self.available.wait(budget).expect("diskspace mutex poisoned");
        }
        let granted = budget.free.min(n);
        budget.free -= granted;
        debug!("diskspace: allocated {granted}MB of {n}MB requested, {}MB free remains", budget.free);
        granted
    }

    /// Release `n` megabytes (`n` must be positive) back to the budget. The
    /// new free amount must not exceed `usable`.
    pub fn release(&self, n: u64)
    {
        assert!(n > 0, "Diskspace::release requires a positive amount");
        let mut budget = self.budget.lock().expect("diskspace mutex poisoned");
        budget.free += n;
        assert!(budget.free <= budget.usable, "released more than was ever allocated");
        debug!("diskspace: released {n}MB, {}MB free remains", budget.free);
        drop(budget);
        self.available.notify_all();
    }

    /// Snapshot of the currently free megabytes.
    pub fn get_free(&self) -> u64
    {
        self.budget.lock().expect("diskspace mutex poisoned").free
    }

    /// The total usable megabytes this arbiter was constructed with.
    pub fn get_usable(&self) -> u64
    {
        self.budget.lock().expect("diskspace mutex poisoned").usable
    }

    /// The root directory this arbiter manages space under.
    pub fn get_directory(&self) -> &Path
    {
        &self.directory
    }
}

fn check_directory_writable(directory: &Path) -> io::Result<()>
{
    let probe = directory.join(".kryptocd-diskspace-probe");
    std::fs::create_dir(&probe)?;
    std::fs::remove_dir(&probe)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn rejects_zero_usable_megabytes()
    {
        let dir = tempfile::tempdir().unwrap();
        let err = Diskspace::new(dir.path(), 0).unwrap_err();
        assert!(matches!(err, DiskspaceError::NoSpaceAvailable));
    }

    #[test]
    fn rejects_unwritable_directory()
    {
        let err = Diskspace::new("/nonexistent/kryptocd-test-dir", 10).unwrap_err();
        assert!(matches!(err, DiskspaceError::DirectoryError(_)));
    }

    #[test]
    fn allocate_grants_at_most_the_request()
    {
        let dir = tempfile::tempdir().unwrap();
        let diskspace = Diskspace::new(dir.path(), 100).unwrap();
        assert_eq!(diskspace.allocate(30), 30);
        assert_eq!(diskspace.get_free(), 70);
    }

    #[test]
    fn allocate_grants_less_than_requested_when_budget_is_short()
    {
        let dir = tempfile::tempdir().unwrap();
        let diskspace = Diskspace::new(dir.path(), 10).unwrap();
        assert_eq!(diskspace.allocate(30), 10);
        assert_eq!(diskspace.get_free(), 0);
    }

    #[test]
    fn release_restores_free_budget()
    {
        let dir = tempfile::tempdir().unwrap();
        let diskspace = Diskspace::new(dir.path(), 50).unwrap();
        diskspace.allocate(50);
        diskspace.release(20);
        assert_eq!(diskspace.get_free(), 20);
    }

    #[test]
    fn outstanding_allocations_always_sum_to_usable_minus_free()
    {
        let dir = tempfile::tempdir().unwrap();
        let diskspace = Diskspace::new(dir.path(), 40).unwrap();
        let a = diskspace.allocate(15);
        let b = diskspace.allocate(15);
        assert_eq!(a + b, diskspace.get_usable() - diskspace.get_free());
        diskspace.release(a);
        assert_eq!(b, diskspace.get_usable() - diskspace.get_free());
    }

    #[test]
    fn blocked_allocation_wakes_on_release()
    {
        use std::{sync::Arc, thread, time::Duration};

        let dir = tempfile::tempdir().unwrap();
        let diskspace = Arc::new(Diskspace::new(dir.path(), 10).unwrap());
        assert_eq!(diskspace.allocate(10), 10);

        let waiter = {
            let diskspace = Arc::clone(&diskspace);
            thread::spawn(move || diskspace.allocate(5))
        };

        thread::sleep(Duration::from_millis(50));
        diskspace.release(10);

        assert_eq!(waiter.join().unwrap(), 5);
    }
}
