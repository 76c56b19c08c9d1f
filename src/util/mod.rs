//! Utility modules: retry, timeout, lock helpers.

pub mod retry;
pub mod sync;
pub mod timeout;
