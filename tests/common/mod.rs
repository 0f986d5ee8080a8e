#![allow(dead_code)]
//! Shared test utilities for integration tests.
//!
//! - `fixtures`: unit sources used across test files
//! - assertion helpers with better failure messages than `unwrap`

pub mod fixtures;

use hotload::{script_engine, Engine, EngineConfig};

/// Engine with default limits and the unit script compiler.
pub fn engine() -> Engine {
    script_engine(EngineConfig::default())
}

/// Assert that a result is Ok and return the inner value.
pub fn assert_ok<T, E: std::fmt::Debug>(result: Result<T, E>, context: &str) -> T {
    match result {
        Ok(v) => v,
        Err(e) => panic!("{} failed: {:?}", context, e),
    }
}

/// Assert that an error's message contains `expected_text`.
pub fn assert_error_contains<E: std::fmt::Display>(error: &E, expected_text: &str) {
    let message = error.to_string();
    assert!(
        message.contains(expected_text),
        "expected error containing {:?}, got: {}",
        expected_text,
        message
    );
}
