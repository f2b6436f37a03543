//! Per-block fundamental frequency estimation.
//!
//! Two estimators share one outcome type: the difference-based estimator in
//! [`yin`] analyses every block, while [`autocorrelation`] accumulates a
//! larger window across blocks and analyses it once per hop.

pub mod autocorrelation;
pub mod yin;

use anyhow::Result;

pub use autocorrelation::{NoteFinder, WindowedEstimator, WindowedSettings};
pub use yin::{DifferenceEstimator, DifferenceSettings};

/// Scalar used by hosts that cannot carry an `Option`.
pub const NO_PITCH: f32 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PitchOutcome {
    /// A fresh estimate was accepted; carries the smoothed frequency.
    Pitched(f32),
    /// The raw estimate was implausible and the previous value was held.
    Held(f32),
    SilenceGated,
    NoPitch,
    WindowNotYetFull,
}

impl PitchOutcome {
    pub fn frequency(self) -> Option<f32> {
        match self {
            PitchOutcome::Pitched(hz) | PitchOutcome::Held(hz) => Some(hz),
            _ => None,
        }
    }

    pub fn to_scalar(self) -> f32 {
        self.frequency().unwrap_or(NO_PITCH)
    }
}

/// The estimator a [`crate::suppressor::Suppressor`] runs on channel 0.
pub enum Estimator {
    Difference(DifferenceEstimator),
    Windowed(WindowedEstimator),
}

impl Estimator {
    pub fn prepare(&mut self, sample_rate: u32, block_size: usize) -> Result<()> {
        match self {
            Estimator::Difference(e) => e.prepare(sample_rate, block_size),
            Estimator::Windowed(e) => e.prepare(sample_rate, block_size),
        }
    }

    pub fn process(&mut self, samples: &[f32]) -> PitchOutcome {
        match self {
            Estimator::Difference(e) => e.estimate(samples),
            Estimator::Windowed(e) => e.process(samples),
        }
    }

    /// Note of the last accepted pass, if the estimator reports one.
    pub fn last_note(&self) -> Option<u8> {
        match self {
            Estimator::Difference(e) => e.last_note(),
            Estimator::Windowed(e) => e.last_note(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Estimator::Difference(_) => "yin",
            Estimator::Windowed(e) => e.finder().name(),
        }
    }
}
