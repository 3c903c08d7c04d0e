//! Classification orchestrator: downloads and classifies harvested images on
//! a bounded pool of workers.

pub mod fetch;
pub mod pool;
pub mod unit;

pub use fetch::{resolve_mime, FetchedImage, HttpImageFetcher, ImageFetcher};
pub use pool::{ClassificationPool, PoolReport};
pub use unit::{process_unit, RetryPolicy, SkipReason, UnitOutcome, UnitResult};
