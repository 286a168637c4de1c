//! End-to-end test harness for the ContextMatch pipeline.
//!
//! Provides taxonomy fixtures, content fixtures, and pipeline factories
//! shared across the e2e test suites.

pub mod harness;
