//! Trigger predicates.
//!
//! A trigger decides whether a candidate new value counts as a real change
//! worth notifying. It is consulted on every `set` with the container's
//! `initial` flag (true until the first accepted set), the candidate value,
//! and the current value if one exists. Triggers must be pure.
//!
//! The predefined predicates are plain generic functions, so they can be
//! passed directly wherever a trigger is expected:
//!
//! ```rust,ignore
//! let count = writable(trigger_strict_not_equal, 0);
//! ```

/// Always report a change, even when the value compares equal.
pub fn trigger_always<T>(_initial: bool, _new_value: &T, _old_value: Option<&T>) -> bool {
    true
}

/// Report a change whenever the new value differs from the current one.
///
/// The first accepted set always fires, as does a set on a container with
/// no current value.
pub fn trigger_strict_not_equal<T: PartialEq>(
    initial: bool,
    new_value: &T,
    old_value: Option<&T>,
) -> bool {
    initial || old_value.map_or(true, |old| new_value != old)
}

/// Like [`trigger_strict_not_equal`], but two values that each compare
/// unequal to themselves (IEEE NaN) are treated as equal, so overwriting a
/// NaN with another NaN does not fire.
pub fn trigger_safe_not_equal<T: PartialEq>(
    initial: bool,
    new_value: &T,
    old_value: Option<&T>,
) -> bool {
    if initial {
        return true;
    }
    match old_value {
        None => true,
        Some(old) => {
            if new_value != new_value && old != old {
                false
            } else {
                new_value != old
            }
        }
    }
}
