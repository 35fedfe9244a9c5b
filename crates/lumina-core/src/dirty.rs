//! Lazily recomputed values.
//!
//! A [`Dirty`] holds a derived value together with a staleness flag. Writers
//! invalidate it, readers recompute it only when stale. Transform model
//! matrices, shader pipeline objects and settings change sets all follow
//! this contract.

/// A cached value that is recomputed on read only when stale.
#[derive(Debug, Clone)]
pub struct Dirty<T> {
    value: T,
    dirty: bool,
}

impl<T> Dirty<T> {
    /// Wrap a value that must be recomputed before first use.
    pub const fn new(value: T) -> Self {
        Self { value, dirty: true }
    }

    /// Wrap a value that is already up to date.
    pub const fn clean(value: T) -> Self {
        Self {
            value,
            dirty: false,
        }
    }

    /// Returns `true` if the cached value is stale.
    #[inline]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark the cached value as stale.
    #[inline]
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    /// Get the cached value without recomputing it.
    #[inline]
    pub const fn peek(&self) -> &T {
        &self.value
    }

    /// Get the value, recomputing it first if stale.
    pub fn get_or_update(&mut self, update: impl FnOnce() -> T) -> &T {
        if self.dirty {
            self.value = update();
            self.dirty = false;
        }
        &self.value
    }

    /// Like [`Dirty::get_or_update`] but the recomputation may fail.
    ///
    /// On failure the value stays stale and the previous value is kept.
    pub fn try_get_or_update<E>(
        &mut self,
        update: impl FnOnce(&T) -> Result<T, E>,
    ) -> Result<&T, E> {
        if self.dirty {
            self.value = update(&self.value)?;
            self.dirty = false;
        }
        Ok(&self.value)
    }

    /// Replace the value and mark it clean.
    pub fn set_clean(&mut self, value: T) {
        self.value = value;
        self.dirty = false;
    }
}

impl<T: Default> Default for Dirty<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Assign `value` to `slot` only if it differs.
///
/// Returns `true` if the slot changed. Setters use this so that writing an
/// unchanged value never invalidates dependent caches.
#[inline]
pub fn set_if_changed<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recomputes_only_when_stale() {
        let mut calls = 0;
        let mut cached = Dirty::new(0);

        assert_eq!(*cached.get_or_update(|| { calls += 1; 7 }), 7);
        assert_eq!(*cached.get_or_update(|| { calls += 1; 8 }), 7);
        assert_eq!(calls, 1);

        cached.invalidate();
        assert_eq!(*cached.get_or_update(|| { calls += 1; 9 }), 9);
        assert_eq!(calls, 2);
    }

    #[test]
    fn failed_update_keeps_previous_value() {
        let mut cached = Dirty::clean(3);
        cached.invalidate();
        let result: Result<&i32, &str> = cached.try_get_or_update(|_| Err("boom"));
        assert!(result.is_err());
        assert!(cached.is_dirty());
        assert_eq!(*cached.peek(), 3);
    }

    #[test]
    fn unchanged_write_is_not_a_change() {
        let mut depth_test = true;
        assert!(!set_if_changed(&mut depth_test, true));
        assert!(set_if_changed(&mut depth_test, false));
        assert!(!depth_test);
    }
}
