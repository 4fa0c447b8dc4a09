use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::CustodyError;

/// Non-reentrant call guard. One guarded operation at a time; a second entry
/// while the first is in flight is refused rather than queued.
#[derive(Debug, Default)]
pub struct CallGuard {
    entered: AtomicBool,
}

impl CallGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) -> Result<GuardToken<'_>, CustodyError> {
        self.entered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| {
                tracing::error!("re-entrant call into guarded operation");
                CustodyError::ReentrantCall
            })?;
        Ok(GuardToken { guard: self })
    }

    pub fn is_held(&self) -> bool {
        self.entered.load(Ordering::Acquire)
    }
}

/// Releases the guard when dropped.
#[must_use = "the guard is released as soon as the token is dropped"]
#[derive(Debug)]
pub struct GuardToken<'a> {
    guard: &'a CallGuard,
}

impl Drop for GuardToken<'_> {
    fn drop(&mut self) {
        self.guard.entered.store(false, Ordering::Release);
    }
}
