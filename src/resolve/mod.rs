//! Work out the observation time, the observer's location and the target
//! from a dataset's global partition.
//!
//! None of the resolvers fail. When metadata is absent or unusable they fall
//! back to a default, and the result says so (see [`Resolved`]); every
//! fallback is also logged as a warning.

mod location;
mod target;
mod time;

pub use location::reference_location;
pub use target::{target_location, TargetLocation};
pub use time::{epoch_from_mjd_seconds, reference_time, wall_clock_now};

use log::warn;

/// A value derived from dataset metadata, supplied by the caller, or a
/// substituted default.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved<T> {
    /// The value came from the metadata entry `key`.
    Found { value: T, key: &'static str },

    /// The caller supplied the value, overriding any metadata.
    Given { value: T },

    /// The metadata didn't provide a usable value; `reason` says why.
    Defaulted { value: T, reason: String },
}

impl<T> Resolved<T> {
    pub fn found(value: T, key: &'static str) -> Resolved<T> {
        Resolved::Found { value, key }
    }

    pub fn given(value: T) -> Resolved<T> {
        Resolved::Given { value }
    }

    /// Use a default, logging `reason` against `what` was being resolved.
    pub fn defaulted(value: T, what: &str, reason: String) -> Resolved<T> {
        warn!("Using a default {what}: {reason}");
        Resolved::Defaulted { value, reason }
    }

    pub fn value(&self) -> &T {
        match self {
            Resolved::Found { value, .. }
            | Resolved::Given { value }
            | Resolved::Defaulted { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Resolved::Found { value, .. }
            | Resolved::Given { value }
            | Resolved::Defaulted { value, .. } => value,
        }
    }

    pub fn is_defaulted(&self) -> bool {
        matches!(self, Resolved::Defaulted { .. })
    }

    pub fn is_given(&self) -> bool {
        matches!(self, Resolved::Given { .. })
    }

    /// The metadata key the value came from, if it came from the metadata.
    pub fn key(&self) -> Option<&'static str> {
        match self {
            Resolved::Found { key, .. } => Some(key),
            Resolved::Given { .. } | Resolved::Defaulted { .. } => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Resolved<U> {
        match self {
            Resolved::Found { value, key } => Resolved::Found {
                value: f(value),
                key,
            },
            Resolved::Given { value } => Resolved::Given { value: f(value) },
            Resolved::Defaulted { value, reason } => Resolved::Defaulted {
                value: f(value),
                reason,
            },
        }
    }
}

/// Reasons that earlier candidates in a priority list were rejected.
#[derive(Debug, Default)]
struct Rejections(Vec<String>);

impl Rejections {
    fn push(&mut self, reason: String) {
        self.0.push(reason);
    }

    /// All the rejections, or `missing` if there weren't any candidates.
    fn into_reason(self, missing: &str) -> String {
        if self.0.is_empty() {
            missing.to_string()
        } else {
            self.0.join("; ")
        }
    }
}
