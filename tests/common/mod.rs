//! Shared helpers for the integration tests

#![allow(dead_code)]

pub mod fake_tools;
pub mod test_helpers;
