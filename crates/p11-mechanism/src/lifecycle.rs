//! Active/released state machine shared by every owner of native data.
//!
//! The owned value lives inside the `Active` state, so once an owner moves to
//! `Released` there is nothing left to touch: every accessor goes through
//! [`Lifecycle::active`] and gets an error instead of stale memory.

use crate::error::{MarshalError, Result};

/// Owner state: the value while active, nothing once released.
#[derive(Debug)]
pub enum Lifecycle<T> {
    Active(T),
    Released,
}

impl<T> Lifecycle<T> {
    pub fn new(value: T) -> Self {
        Self::Active(value)
    }

    pub fn is_released(&self) -> bool {
        matches!(self, Self::Released)
    }

    /// The owned value, or `None` after release.
    pub fn active(&self) -> Option<&T> {
        match self {
            Self::Active(value) => Some(value),
            Self::Released => None,
        }
    }

    pub fn active_mut(&mut self) -> Option<&mut T> {
        match self {
            Self::Active(value) => Some(value),
            Self::Released => None,
        }
    }

    /// Borrow the value of a disposable parameter, failing with
    /// [`MarshalError::ObjectDisposed`] once disposed.
    pub fn undisposed(&self, object: &'static str, operation: &'static str) -> Result<&T> {
        self.active()
            .ok_or(MarshalError::ObjectDisposed { object, operation })
    }

    /// Move to `Released`, handing back the value exactly once.
    pub fn release(&mut self) -> Option<T> {
        match std::mem::replace(self, Self::Released) {
            Self::Active(value) => Some(value),
            Self::Released => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_hands_value_back_once() {
        let mut state = Lifecycle::new(5);
        assert!(!state.is_released());
        assert_eq!(state.active(), Some(&5));
        assert_eq!(state.release(), Some(5));
        assert_eq!(state.release(), None);
        assert!(state.is_released());
    }

    #[test]
    fn disposed_access_is_an_error() {
        let mut state = Lifecycle::new("value");
        assert_eq!(*state.undisposed("Thing", "get").unwrap(), "value");
        state.release();
        let err = state.undisposed("Thing", "get").unwrap_err();
        assert!(matches!(
            err,
            MarshalError::ObjectDisposed {
                object: "Thing",
                operation: "get"
            }
        ));
        assert_eq!(err.to_string(), "get called on disposed Thing");
    }
}
