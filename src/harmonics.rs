use log::debug;

use crate::filter::{BiquadStage, FilterResponse};
use crate::ProcessSpec;

#[derive(Debug, Clone, PartialEq)]
pub struct BankSettings {
    pub harmonic_count: usize,
    /// Fundamentals above this are not filtered at all.
    pub ceiling_hz: f32,
    pub base_q: f32,
    pub harmonic_q: f32,
    pub harmonic_response: FilterResponse,
}

impl Default for BankSettings {
    fn default() -> Self {
        Self {
            harmonic_count: 20,
            ceiling_hz: 8000.0,
            base_q: 1.88,
            harmonic_q: 1.0,
            harmonic_response: FilterResponse::Notch,
        }
    }
}

/// Multiplier of the fundamental for auxiliary filter `index`:
/// 1.5, 2.0, 2.5, ... so the first auxiliary sits above the base notch.
pub fn harmonic_multiplier(index: usize) -> f32 {
    (index + 3) as f32 * 0.5
}

/// A base notch on the fundamental followed by a cascade of auxiliary
/// filters on half-harmonic steps above it.
pub struct HarmonicFilterBank {
    settings: BankSettings,
    sample_rate: f32,
    base: BiquadStage,
    harmonics: Vec<BiquadStage>,
    active: usize,
}

impl HarmonicFilterBank {
    pub fn new(settings: BankSettings) -> Self {
        Self {
            settings,
            sample_rate: 0.0,
            base: BiquadStage::new(FilterResponse::Notch),
            harmonics: Vec::new(),
            active: 0,
        }
    }

    /// Creates every stage up front; nothing is allocated while processing.
    pub fn prepare(&mut self, spec: &ProcessSpec, harmonic_count: usize) {
        self.sample_rate = spec.sample_rate as f32;
        self.settings.harmonic_count = harmonic_count;
        self.base = BiquadStage::new(FilterResponse::Notch);
        self.base.prepare(spec.sample_rate, spec.channels, spec.max_block_size);
        self.harmonics = (0..harmonic_count)
            .map(|_| {
                let mut stage = BiquadStage::new(self.settings.harmonic_response);
                stage.prepare(spec.sample_rate, spec.channels, spec.max_block_size);
                stage
            })
            .collect();
        self.active = 0;

        debug!(
            "Harmonic bank prepared: {} auxiliary stages, ceiling={}Hz, base Q={}, harmonic Q={}",
            harmonic_count, self.settings.ceiling_hz, self.settings.base_q, self.settings.harmonic_q
        );
    }

    /// Retunes the bank to `fundamental` and filters `block` in place.
    ///
    /// Returns `None` without touching the audio when the fundamental is not
    /// usable; the previous tuning stays in place. Otherwise returns how many
    /// auxiliary stages ran before the first one at or above Nyquist.
    pub fn retune_and_process<C: AsMut<[f32]>>(&mut self, block: &mut [C], fundamental: f32) -> Option<usize> {
        if !fundamental.is_finite() || fundamental <= 0.0 || fundamental > self.settings.ceiling_hz {
            return None;
        }
        self.base.set_parameters(fundamental, self.settings.base_q).ok()?;
        self.base.process(block);

        let nyquist = self.sample_rate / 2.0;
        let mut applied = 0;
        for (i, stage) in self.harmonics.iter_mut().enumerate() {
            let target = fundamental * harmonic_multiplier(i);
            if target >= nyquist {
                break;
            }
            if stage.set_parameters(target, self.settings.harmonic_q).is_err() {
                break;
            }
            stage.process(block);
            applied += 1;
        }
        self.active = applied;
        Some(applied)
    }

    pub fn base_frequency(&self) -> f32 {
        self.base.frequency()
    }

    /// Stages applied during the last successful retune.
    pub fn active_harmonics(&self) -> &[BiquadStage] {
        &self.harmonics[..self.active]
    }

    pub fn harmonic_count(&self) -> usize {
        self.harmonics.len()
    }

    pub fn settings(&self) -> &BankSettings {
        &self.settings
    }

    /// Clears every delay line; tuning is kept.
    pub fn reset(&mut self) {
        self.base.reset();
        self.harmonics.iter_mut().for_each(BiquadStage::reset);
    }
}
