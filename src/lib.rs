//! Chain callback relayer.
//!
//! Takes transactions discovered on EVM chains and Tron, waits for enough
//! confirmations, and dispatches each one once per delivery window to the
//! business handler registered for its contract. Failed dispatches land in
//! an error sink for offline replay.

pub mod app;
pub mod config;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
