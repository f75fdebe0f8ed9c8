use std::sync::atomic::AtomicI64;

#[cfg(not(target_has_atomic = "64"))]
compile_error!("The search statistics need 64-bit atomics on the target platform.");

pub use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

/// Scale applied to every value accumulated in a [`FixedPointQ`].
///
/// Large enough that one rollout outcome keeps twelve fractional bits, small
/// enough that millions of accumulations stay far from `i64::MAX`.
pub const Q_BASE: i64 = 4096;

/// A real-valued accumulator that can be updated with a single atomic add.
///
/// There is no atomic floating-point addition, so values are stored as
/// integers scaled by [`Q_BASE`].
#[derive(Debug, Default)]
pub struct FixedPointQ {
    raw: AtomicI64,
}

impl FixedPointQ {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `value`, truncated toward zero to `1 / Q_BASE` precision.
    pub fn add(&self, value: f64) {
        let delta = (value * Q_BASE as f64) as i64;
        self.raw.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        self.raw.load(Ordering::Relaxed) as f64 / Q_BASE as f64
    }

    pub fn raw(&self) -> i64 {
        self.raw.load(Ordering::Relaxed)
    }
}
