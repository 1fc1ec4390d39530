//! Synthetic reading generator
//!
//! Produces temperature and humidity values with a bounded random walk:
//! each step moves the previous value by at most `variance` of itself,
//! in either direction.

use crate::models::Reading;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Default variance fraction for both series
pub const DEFAULT_VARIANCE: f64 = 0.03;

/// Default starting value for both series
pub const DEFAULT_INITIAL_VALUE: f64 = 50.0;

/// Apply one symmetric bounded perturbation to `previous`.
///
/// The result always lies in `[previous * (1 - variance), previous * (1 + variance)]`
/// for a non-negative base.
pub fn perturb<R: Rng>(rng: &mut R, previous: f64, variance: f64) -> f64 {
    let rnd: f64 = rng.gen();
    let mut cp = 2.0 * variance * rnd;

    if cp > variance {
        cp -= 2.0 * variance;
    }

    previous + previous * cp
}

/// One random-walk series
#[derive(Debug, Clone)]
pub struct RandomWalk {
    value: f64,
    variance: f64,
}

impl RandomWalk {
    pub fn new(initial: f64, variance: f64) -> Self {
        Self {
            value: initial,
            variance,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Advance the walk and return the new value
    pub fn step<R: Rng>(&mut self, rng: &mut R) -> f64 {
        self.value = perturb(rng, self.value, self.variance);
        self.value
    }
}

/// Configuration for the reading generator
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub initial_temp: f64,
    pub initial_humidity: f64,
    pub variance_temp: f64,
    pub variance_humidity: f64,
    /// Fixed RNG seed; OS entropy when unset
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            initial_temp: DEFAULT_INITIAL_VALUE,
            initial_humidity: DEFAULT_INITIAL_VALUE,
            variance_temp: DEFAULT_VARIANCE,
            variance_humidity: DEFAULT_VARIANCE,
            seed: None,
        }
    }
}

/// Produces one [`Reading`] per call from two independent walks
pub struct ReadingGenerator {
    temperature: RandomWalk,
    humidity: RandomWalk,
    rng: StdRng,
}

impl ReadingGenerator {
    pub fn new(config: &GeneratorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            temperature: RandomWalk::new(config.initial_temp, config.variance_temp),
            humidity: RandomWalk::new(config.initial_humidity, config.variance_humidity),
            rng,
        }
    }

    /// Generate a reading stamped with the current time
    pub fn next_reading(&mut self) -> Reading {
        self.next_reading_at(Utc::now())
    }

    pub fn next_reading_at(&mut self, timestamp: DateTime<Utc>) -> Reading {
        let temperature = self.temperature.step(&mut self.rng);
        let humidity = self.humidity.step(&mut self.rng);
        Reading::new(timestamp, temperature, humidity)
    }
}
