//! Per-domain mutexes with runtime lock-order validation.
//!
//! Every data domain of the shared model, plus the popup stack, the
//! subprocess path and the pseudo-terminal, has its own [`DomainMutex`].
//! The global lock order is the derived `Ord` of [`Domain`] (lexicographic by
//! name). A thread may only acquire a domain strictly greater than every
//! domain it already holds; anything else is a [`GuiError::LockOrder`]
//! violation, logged and raised as a panic whose payload is the typed error,
//! so worker boundaries can tell it apart from ordinary panics and re-raise it.
//! Re-acquiring a held domain is caught the same way instead of self-deadlocking.
//!
//! Locks outside the domain set are covered by the parking_lot deadlock
//! watchdog started with [`spawn_deadlock_watchdog`].

use std::{
    cell::RefCell,
    fmt,
    ops::{Deref, DerefMut},
    panic, thread,
    time::Duration,
};

use parking_lot::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::error::GuiError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Domain {
    Authors,
    Branches,
    Files,
    LocalCommits,
    Popup,
    Pty,
    Status,
    SubCommits,
    Subprocess,
}

impl Domain {
    pub fn name(self) -> &'static str {
        match self {
            Domain::Authors => "authors",
            Domain::Branches => "branches",
            Domain::Files => "files",
            Domain::LocalCommits => "local_commits",
            Domain::Popup => "popup",
            Domain::Pty => "pty",
            Domain::Status => "status",
            Domain::SubCommits => "sub_commits",
            Domain::Subprocess => "subprocess",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

thread_local! {
    static HELD: RefCell<Vec<Domain>> = const { RefCell::new(Vec::new()) };
}

/// Domains currently held by the calling thread, in acquisition order.
#[cfg(test)]
pub fn held_domains() -> Vec<Domain> {
    HELD.with(|held| held.borrow().clone())
}

/// Check that `requested` may be acquired given what this thread holds.
pub fn check_order(requested: Domain) -> Result<(), GuiError> {
    HELD.with(|held| {
        let held = held.borrow();
        if held.iter().any(|d| *d >= requested) {
            return Err(GuiError::LockOrder {
                held: held.clone(),
                requested,
            });
        }
        Ok(())
    })
}

fn enforce_order(requested: Domain) {
    if let Err(violation) = check_order(requested) {
        tracing::error!(%violation, "lock order violation");
        panic::panic_any(violation);
    }
}

fn mark_acquired(domain: Domain) {
    HELD.with(|held| held.borrow_mut().push(domain));
}

fn mark_released(domain: Domain) {
    HELD.with(|held| {
        let mut held = held.borrow_mut();
        if let Some(pos) = held.iter().rposition(|d| *d == domain) {
            held.remove(pos);
        }
    });
}

/// A mutex tagged with the domain it guards.
pub struct DomainMutex<T> {
    domain: Domain,
    inner: Mutex<T>,
}

impl<T> DomainMutex<T> {
    pub fn new(domain: Domain, value: T) -> Self {
        Self {
            domain,
            inner: Mutex::new(value),
        }
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// Acquire the domain. Released when the guard drops, on every exit path.
    pub fn lock(&self) -> DomainGuard<'_, T> {
        enforce_order(self.domain);
        let guard = self.inner.lock();
        mark_acquired(self.domain);
        DomainGuard {
            domain: self.domain,
            guard,
        }
    }

    /// Acquire the domain if it is free. Order is still enforced.
    pub fn try_lock(&self) -> Option<DomainGuard<'_, T>> {
        enforce_order(self.domain);
        let guard = self.inner.try_lock()?;
        mark_acquired(self.domain);
        Some(DomainGuard {
            domain: self.domain,
            guard,
        })
    }

    /// Run `f` inside the critical section.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl<T: Default> DomainMutex<T> {
    pub fn with_default(domain: Domain) -> Self {
        Self::new(domain, T::default())
    }
}

pub struct DomainGuard<'a, T> {
    domain: Domain,
    guard: MutexGuard<'a, T>,
}

impl<T> Deref for DomainGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for DomainGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for DomainGuard<'_, T> {
    fn drop(&mut self) {
        mark_released(self.domain);
    }
}

/// Locks for resources that are not model data.
pub struct ProcessLocks {
    /// Held while an interactive subprocess owns the terminal.
    pub subprocess: DomainMutex<()>,
    /// Held while a command streams through the pseudo-terminal.
    pub pty: DomainMutex<()>,
}

impl ProcessLocks {
    pub fn new() -> Self {
        Self {
            subprocess: DomainMutex::new(Domain::Subprocess, ()),
            pty: DomainMutex::new(Domain::Pty, ()),
        }
    }
}

impl Default for ProcessLocks {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodically ask parking_lot for deadlocked threads and report them.
pub fn spawn_deadlock_watchdog(interval: Duration, cancel: CancellationToken) {
    let spawned = thread::Builder::new()
        .name("deadlock-watchdog".to_string())
        .spawn(move || {
            while !cancel.is_cancelled() {
                thread::sleep(interval);
                let deadlocks = parking_lot::deadlock::check_deadlock();
                if deadlocks.is_empty() {
                    continue;
                }
                for (i, threads) in deadlocks.iter().enumerate() {
                    let ids: Vec<String> = threads
                        .iter()
                        .map(|t| format!("{:?}", t.thread_id()))
                        .collect();
                    tracing::error!(cycle = i, threads = ?ids, "deadlock detected");
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("failed to start deadlock watchdog: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_acquisition_is_allowed() {
        let authors = DomainMutex::new(Domain::Authors, 1);
        let commits = DomainMutex::new(Domain::LocalCommits, 2);

        let a = authors.lock();
        let c = commits.lock();
        assert_eq!(held_domains(), vec![Domain::Authors, Domain::LocalCommits]);
        assert_eq!(*a + *c, 3);
        drop(c);
        drop(a);
        assert!(held_domains().is_empty());
    }

    fn violation_raised_by(f: impl FnOnce()) -> (Vec<Domain>, Domain) {
        let payload = panic::catch_unwind(panic::AssertUnwindSafe(f))
            .expect_err("acquisition should have panicked");
        match payload.downcast::<GuiError>().map(|e| *e) {
            Ok(GuiError::LockOrder { held, requested }) => (held, requested),
            Ok(other) => panic!("unexpected error payload: {other}"),
            Err(_) => panic!("panic payload was not a GuiError"),
        }
    }

    #[test]
    fn inverted_acquisition_panics() {
        let authors = DomainMutex::new(Domain::Authors, ());
        let commits = DomainMutex::new(Domain::LocalCommits, ());

        let (held, requested) = violation_raised_by(|| {
            let _c = commits.lock();
            let _a = authors.lock();
        });
        assert_eq!(held, vec![Domain::LocalCommits]);
        assert_eq!(requested, Domain::Authors);
        // The guard taken before the panic was released during unwinding.
        assert!(held_domains().is_empty());
    }

    #[test]
    fn reentrant_acquisition_panics_instead_of_deadlocking() {
        let files = DomainMutex::new(Domain::Files, ());
        let (held, requested) = violation_raised_by(|| {
            let _outer = files.lock();
            let _inner = files.lock();
        });
        assert_eq!(held, vec![Domain::Files]);
        assert_eq!(requested, Domain::Files);
    }

    #[test]
    fn check_order_reports_held_domains() {
        let status = DomainMutex::new(Domain::Status, ());
        let _s = status.lock();
        match check_order(Domain::Branches) {
            Err(GuiError::LockOrder { held, requested }) => {
                assert_eq!(held, vec![Domain::Status]);
                assert_eq!(requested, Domain::Branches);
            }
            other => panic!("expected violation, got {:?}", other),
        }
        assert!(check_order(Domain::Subprocess).is_ok());
    }

    #[test]
    fn release_out_of_order_keeps_stack_consistent() {
        let a = DomainMutex::new(Domain::Authors, ());
        let b = DomainMutex::new(Domain::Branches, ());
        let ga = a.lock();
        let gb = b.lock();
        drop(ga);
        assert_eq!(held_domains(), vec![Domain::Branches]);
        drop(gb);
        assert!(held_domains().is_empty());
    }

    #[test]
    fn guard_is_released_on_error_paths() {
        let files = DomainMutex::new(Domain::Files, vec![1, 2, 3]);
        let result: Result<(), &str> = files.with(|v| {
            v.push(4);
            Err("bail")
        });
        assert!(result.is_err());
        assert!(!files.is_locked());
        assert!(held_domains().is_empty());
        assert_eq!(files.lock().len(), 4);
    }

    #[test]
    fn domains_on_other_threads_do_not_interact() {
        let branches = std::sync::Arc::new(DomainMutex::new(Domain::Branches, 0u32));
        let _status = DomainMutex::new(Domain::Status, ());
        let guard = _status.lock();

        let b = branches.clone();
        std::thread::spawn(move || {
            *b.lock() += 1;
        })
        .join()
        .unwrap();

        drop(guard);
        assert_eq!(*branches.lock(), 1);
    }
}
