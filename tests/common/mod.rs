#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```ignore
//! mod common;
//! use common::*;
//! ```

use deferlab::config::HarnessConfig;
use deferlab::time::{Scheduler, VirtualClock};
use deferlab::unittest::{Runner, SinkRef, TestResult};
use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;
use std::cell::RefCell;
use std::rc::Rc;

pub use deferlab::test_utils::{init_test_logging, init_test_logging_with_level};
pub use deferlab::{
    assert_failed_with, assert_fired_with, assert_with_log, test_complete, test_phase, test_section,
};

/// Default seed for property tests when running under CI.
pub const DEFAULT_PROPTEST_SEED: u64 = 0x5EED_5EED;

const PROPTEST_SEED_ENV: &str = "PROPTEST_SEED";

/// Build a ProptestConfig with deterministic seed support for CI.
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    let mut config = ProptestConfig::with_cases(cases);
    if matches!(config.rng_seed, RngSeed::Random) {
        if let Some(seed) = read_proptest_seed() {
            config.rng_seed = RngSeed::Fixed(seed);
        }
    }
    config
}

fn read_proptest_seed() -> Option<u64> {
    if let Ok(value) = std::env::var(PROPTEST_SEED_ENV) {
        return value.parse::<u64>().ok();
    }
    if std::env::var("CI").is_ok() {
        return Some(DEFAULT_PROPTEST_SEED);
    }
    None
}

/// A virtual clock, a runner on it, and a fresh result to report into.
pub struct Harness {
    pub clock: VirtualClock,
    pub runner: Runner,
    pub result: Rc<RefCell<TestResult>>,
}

impl Harness {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HarnessConfig::default())
    }

    #[must_use]
    pub fn with_config(config: HarnessConfig) -> Self {
        let clock = VirtualClock::new();
        let scheduler: Rc<dyn Scheduler> = Rc::new(clock.clone());
        Self {
            runner: Runner::new(scheduler, config),
            clock,
            result: Rc::new(RefCell::new(TestResult::new())),
        }
    }

    /// The result as a sink for `Runner::run`.
    #[must_use]
    pub fn sink(&self) -> SinkRef {
        self.result.clone()
    }
}
