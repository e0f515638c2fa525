//! Core alarm lifecycle logic for the wakeup backend.

pub mod services;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use services::*;
