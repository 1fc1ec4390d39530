//! Producer side: generate, accumulate and publish readings
//!
//! This module provides:
//! - A size-triggered batch accumulator
//! - A single-attempt publisher over an upstream [`Connection`](crate::sinks::Connection)
//! - The driver that owns the tick loop, retry policy and graceful stop

mod accumulator;
mod driver;
mod publisher;

#[cfg(test)]
mod tests;

pub use accumulator::BatchAccumulator;
pub use driver::{
    Driver, DriverBuilder, DriverConfig, DriverHandle, DriverReport, DriverState, RetryPolicy,
};
pub use publisher::Publisher;
