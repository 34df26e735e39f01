//! Teardown callbacks and their composition.
//!
//! A [`Teardown`] releases one or more open subscriptions. It runs at most
//! once: the first call takes the callback out, later calls are no-ops.
//! Clones share the same underlying callback.

use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

type TeardownFn = Box<dyn FnOnce() + Send>;

/// Idempotent release callback.
#[derive(Clone)]
pub struct Teardown {
    inner: Arc<Mutex<Option<TeardownFn>>>,
}

impl Teardown {
    /// Wrap a callback.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Some(Box::new(f)))),
        }
    }

    /// A teardown with nothing to release.
    pub fn noop() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }

    /// Run the callback if it has not run yet.
    pub fn call(&self) {
        // Take it out first so the lock is not held while the callback runs.
        let f = self.inner.lock().take();
        if let Some(f) = f {
            f();
        }
    }

    /// True once the callback has run (or if there never was one).
    pub fn is_spent(&self) -> bool {
        self.inner.lock().is_none()
    }

    /// True if both handles share the same callback.
    pub fn ptr_eq(&self, other: &Teardown) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Teardown")
            .field("spent", &self.is_spent())
            .finish()
    }
}

impl Default for Teardown {
    fn default() -> Self {
        Self::noop()
    }
}

/// Fold `additional` into `existing`.
///
/// The result calls `existing` and then each of `additional` in order, once.
/// Every part is attempted even if an earlier one panics; the first panic
/// is resumed after the rest have run.
pub fn compose(existing: Teardown, additional: Vec<Teardown>) -> Teardown {
    if additional.is_empty() {
        return existing;
    }

    Teardown::new(move || {
        let mut first_panic = None;
        for part in std::iter::once(existing).chain(additional) {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| part.call())) {
                first_panic.get_or_insert(payload);
            }
        }
        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> Teardown {
        let counter = Arc::clone(counter);
        Teardown::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn recording(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Teardown {
        let log = Arc::clone(log);
        Teardown::new(move || log.lock().push(name))
    }

    #[test]
    fn test_call_is_idempotent() {
        let counter = Arc::new(AtomicUsize::new(0));
        let teardown = counting(&counter);

        teardown.call();
        teardown.call();
        teardown.clone().call();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(teardown.is_spent());
    }

    #[test]
    fn test_compose_runs_existing_then_additional_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let composed = compose(
            recording(&log, "existing"),
            vec![recording(&log, "lower"), recording(&log, "upper")],
        );

        composed.call();
        composed.call();

        assert_eq!(*log.lock(), vec!["existing", "lower", "upper"]);
    }

    #[test]
    fn test_compose_preserves_previous_composition() {
        let counter = Arc::new(AtomicUsize::new(0));
        let first = compose(counting(&counter), vec![counting(&counter)]);
        let second = compose(first, vec![counting(&counter)]);

        second.call();

        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_compose_with_nothing_returns_existing() {
        let existing = Teardown::noop();
        let composed = compose(existing.clone(), Vec::new());
        assert!(composed.ptr_eq(&existing));
    }

    #[test]
    fn test_compose_runs_remaining_parts_after_panic() {
        let counter = Arc::new(AtomicUsize::new(0));
        let composed = compose(
            counting(&counter),
            vec![Teardown::new(|| panic!("release failed")), counting(&counter)],
        );

        let result = panic::catch_unwind(AssertUnwindSafe(|| composed.call()));

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        // Already spent, a retry does nothing.
        composed.call();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
