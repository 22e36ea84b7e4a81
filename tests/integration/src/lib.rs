//! End-to-end tests for the marker registry
//!
//! This test suite validates:
//! - Full command flows against file-backed stores
//! - Serialization of concurrent commands on the same area
//! - Erasure of an actor across vault, vote ledger and credibility

pub mod test_utils;

#[cfg(test)]
mod marker_lifecycle_tests;

#[cfg(test)]
mod concurrency_tests;

#[cfg(test)]
mod erasure_tests;
