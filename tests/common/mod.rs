//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod recorder;

/// Budget large enough that no test node is squeezed
pub const BUDGET: u64 = 64 * 1024 * 1024;

/// Index of the first event equal to `needle`
pub fn position(events: &[String], needle: &str) -> usize {
    events
        .iter()
        .position(|e| e == needle)
        .unwrap_or_else(|| panic!("event {:?} not recorded in {:?}", needle, events))
}

/// Assert that `first` was recorded before `second`
pub fn assert_before(events: &[String], first: &str, second: &str) {
    assert!(
        position(events, first) < position(events, second),
        "Expected {:?} before {:?} in {:?}",
        first,
        second,
        events
    );
}
