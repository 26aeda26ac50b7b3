//! Reservoir sampling.
//!
//! Several places need an unbiased fixed-size subset of a stream whose
//! length is unknown up front: the unfiltered output subset, the
//! calibration-training set, and the phase-fit sample. Algorithm R keeps
//! every offered item in the reservoir with probability `capacity / seen`
//! regardless of arrival order, which is exactly the guarantee the
//! downstream consumers rely on.

use parking_lot::Mutex;
use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::simulate::create_rng;

/// A configured sample size: an absolute count or a fraction of the
/// eligible population.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleSize {
    Count(u64),
    Fraction(f64),
}

impl SampleSize {
    /// Resolves to an absolute count against the eligible population.
    /// Fractions round to the nearest whole item and never exceed the
    /// population.
    #[must_use]
    pub fn resolve(self, population: usize) -> usize {
        match self {
            SampleSize::Count(count) => count as usize,
            SampleSize::Fraction(fraction) => {
                let scaled = (fraction.clamp(0.0, 1.0) * population as f64).round();
                (scaled as usize).min(population)
            }
        }
    }
}

/// Fixed-capacity uniform sample over a stream (Algorithm R).
#[derive(Debug)]
pub struct ReservoirSampler<T> {
    capacity: usize,
    seen: u64,
    reservoir: Vec<T>,
    rng: StdRng,
}

impl<T> ReservoirSampler<T> {
    /// Creates a sampler. `None` seeds from OS entropy.
    #[must_use]
    pub fn new(capacity: usize, seed: Option<u64>) -> Self {
        Self { capacity, seen: 0, reservoir: Vec::with_capacity(capacity), rng: create_rng(seed) }
    }

    /// Offers one item. Returns true when the item entered the reservoir
    /// (possibly displacing an earlier one).
    pub fn offer(&mut self, item: T) -> bool {
        self.seen += 1;
        if self.reservoir.len() < self.capacity {
            self.reservoir.push(item);
            return true;
        }
        if self.capacity == 0 {
            return false;
        }
        let slot = self.rng.random_range(0..self.seen);
        if (slot as usize) < self.capacity {
            self.reservoir[slot as usize] = item;
            true
        } else {
            false
        }
    }

    /// Items offered so far.
    #[must_use]
    pub fn seen(&self) -> u64 {
        self.seen
    }

    /// Items currently retained; never exceeds capacity.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reservoir.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reservoir.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The retained items, in reservoir (not arrival) order.
    #[must_use]
    pub fn items(&self) -> &[T] {
        &self.reservoir
    }

    /// Consumes the sampler and returns the retained items.
    #[must_use]
    pub fn into_items(self) -> Vec<T> {
        self.reservoir
    }
}

/// A reservoir shared by concurrent workers. The mutex is held only for the
/// duration of a single offer.
#[derive(Debug)]
pub struct SharedSampler<T> {
    inner: Mutex<ReservoirSampler<T>>,
}

impl<T> SharedSampler<T> {
    #[must_use]
    pub fn new(sampler: ReservoirSampler<T>) -> Self {
        Self { inner: Mutex::new(sampler) }
    }

    /// Offers one item under the lock.
    pub fn offer(&self, item: T) -> bool {
        self.inner.lock().offer(item)
    }

    /// Items offered so far.
    #[must_use]
    pub fn seen(&self) -> u64 {
        self.inner.lock().seen()
    }

    /// Items currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Consumes the wrapper and returns the sampler.
    #[must_use]
    pub fn into_inner(self) -> ReservoirSampler<T> {
        self.inner.into_inner()
    }
}
