//! Shared test utilities for flyerscan integration tests.
//!
//! - `fakes`: browser, image host, vision model and review store stand-ins
//! - `harness`: `TestHarness` wiring the real services to those fakes

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::*;
