/// Runs a closure when dropped, unless disarmed first.
///
/// Used for cleanup that must also happen when a task is cancelled mid-await.
pub struct ScopeGuard<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> ScopeGuard<F> {
    pub fn new(f: F) -> Self {
        Self(Some(f))
    }

    /// Cancel the pending closure. Call after the cleanup has run explicitly.
    pub fn disarm(mut self) {
        self.0 = None;
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_runs_on_drop() {
        let ran = Cell::new(false);
        {
            let _guard = ScopeGuard::new(|| ran.set(true));
        }
        assert!(ran.get());
    }

    #[test]
    fn test_disarmed_guard_does_nothing() {
        let ran = Cell::new(false);
        ScopeGuard::new(|| ran.set(true)).disarm();
        assert!(!ran.get());
    }
}
