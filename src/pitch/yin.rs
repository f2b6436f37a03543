use anyhow::{bail, Result};
use log::debug;

use super::PitchOutcome;
use crate::util::{hz_to_note, mean_abs};

/// Value the smoothing window starts from, so its mean is always defined.
const DEFAULT_PITCH: f32 = 440.0;

#[derive(Debug, Clone, PartialEq)]
pub struct DifferenceSettings {
    /// Blocks whose mean absolute level is below this (dBFS) are not analysed.
    pub silence_db: f32,
    /// Absolute threshold on the cumulative mean normalised difference.
    pub threshold: f32,
    pub relaxation_ms: f32,
    pub min_hz: f32,
    pub max_hz: f32,
}

impl Default for DifferenceSettings {
    fn default() -> Self {
        Self {
            silence_db: -60.0,
            threshold: 0.20,
            relaxation_ms: 50.0,
            min_hz: 20.0,
            max_hz: 3000.0,
        }
    }
}

/// YIN-style estimator working on one processing block at a time.
///
/// The incoming block is the analysed frame. Every lag compares it against a
/// full block of signal delayed by `τ`, so the previous block is kept in
/// front of it and no lag reads past the end of the history.
pub struct DifferenceEstimator {
    settings: DifferenceSettings,
    sample_rate: f32,
    block_size: usize,
    history: Vec<f32>,
    difference: Vec<f64>,
    smoothing: Vec<f32>,
    smoothing_pos: usize,
    last_note: Option<u8>,
}

impl DifferenceEstimator {
    pub fn new(settings: DifferenceSettings) -> Self {
        Self {
            settings,
            sample_rate: 0.0,
            block_size: 0,
            history: Vec::new(),
            difference: Vec::new(),
            smoothing: vec![DEFAULT_PITCH],
            smoothing_pos: 0,
            last_note: None,
        }
    }

    pub fn prepare(&mut self, sample_rate: u32, block_size: usize) -> Result<()> {
        if sample_rate == 0 {
            bail!("Sample rate must be positive");
        }
        if block_size < 4 {
            bail!("Block size must be at least 4 samples, got {}", block_size);
        }
        self.sample_rate = sample_rate as f32;
        self.block_size = block_size;
        self.history = vec![0.0; 2 * block_size];
        self.difference = vec![0.0; block_size];

        let block_ms = block_size as f32 / self.sample_rate * 1000.0;
        let relaxation = ((self.settings.relaxation_ms / block_ms) as usize).max(1);
        self.smoothing = vec![DEFAULT_PITCH; relaxation];
        self.smoothing_pos = 0;
        self.last_note = None;

        debug!(
            "Difference estimator prepared: rate={}Hz, block={}, smoothing={} blocks",
            sample_rate, block_size, relaxation
        );
        Ok(())
    }

    /// Consumes one block (shorter blocks are zero padded, longer ones truncated).
    pub fn estimate(&mut self, samples: &[f32]) -> PitchOutcome {
        let n = self.block_size;
        if n == 0 {
            return PitchOutcome::NoPitch;
        }
        let len = samples.len().min(n);
        self.history.copy_within(n.., 0);
        self.history[n..n + len].copy_from_slice(&samples[..len]);
        self.history[n + len..].fill(0.0);

        let level_db = 20.0 * mean_abs(&self.history[n..]).log10();
        if !(level_db >= self.settings.silence_db) {
            return PitchOutcome::SilenceGated;
        }

        if !self.difference_function() {
            return PitchOutcome::NoPitch;
        }
        if !self.cumulative_mean_normalized_difference() {
            return PitchOutcome::NoPitch;
        }
        let tau = match absolute_threshold(&self.difference, self.settings.threshold as f64) {
            Some(tau) => tau,
            None => return PitchOutcome::NoPitch,
        };

        let lag = parabolic_interpolation(&self.difference, tau);
        let freq = (self.sample_rate as f64 / lag) as f32;

        if freq.is_finite() && freq >= self.settings.min_hz && freq <= self.settings.max_hz {
            self.push(freq);
            let smoothed = self.smoothed();
            self.last_note = hz_to_note(smoothed);
            PitchOutcome::Pitched(smoothed)
        } else {
            let held = self.smoothed();
            self.push(held);
            PitchOutcome::Held(held)
        }
    }

    /// Fills `difference` with `d(τ) = Σ (x[j] - x[j-τ])²`, the frame energy
    /// plus the delayed segment's energy minus twice their correlation.
    /// Never negative. Returns false when the analysed frame is silent.
    fn difference_function(&mut self) -> bool {
        let n = self.block_size;
        let frame = &self.history[n..];
        if frame.iter().all(|&x| x == 0.0) {
            return false;
        }
        for (tau, d) in self.difference.iter_mut().enumerate() {
            *d = frame
                .iter()
                .zip(&self.history[n - tau..2 * n - tau])
                .map(|(&a, &b)| {
                    let delta = a as f64 - b as f64;
                    delta * delta
                })
                .sum();
        }
        true
    }

    /// Returns false when the difference function is flat (no periodicity at all).
    fn cumulative_mean_normalized_difference(&mut self) -> bool {
        let mut running_sum = 0.0;
        self.difference[0] = 1.0;
        for tau in 1..self.difference.len() {
            running_sum += self.difference[tau];
            if running_sum > 0.0 {
                self.difference[tau] *= tau as f64 / running_sum;
            } else if tau >= 2 {
                // no energy yet, so this lag cannot be a period
                self.difference[tau] = 1.0;
            }
        }
        running_sum > 0.0
    }

    fn push(&mut self, freq: f32) {
        self.smoothing[self.smoothing_pos] = freq;
        self.smoothing_pos = (self.smoothing_pos + 1) % self.smoothing.len();
    }

    pub fn smoothed(&self) -> f32 {
        self.smoothing.iter().sum::<f32>() / self.smoothing.len() as f32
    }

    pub fn smoothing_window(&self) -> &[f32] {
        &self.smoothing
    }

    pub fn relaxation_len(&self) -> usize {
        self.smoothing.len()
    }

    pub fn normalized_difference(&self) -> &[f64] {
        &self.difference
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn last_note(&self) -> Option<u8> {
        self.last_note
    }
}

/// First lag below `threshold`, walked forward to its local minimum.
/// A descent that runs into the last lag is not a confirmed minimum.
fn absolute_threshold(buffer: &[f64], threshold: f64) -> Option<usize> {
    let size = buffer.len();
    let mut tau = 2;
    while tau < size {
        if buffer[tau] < threshold {
            while tau + 1 < size && buffer[tau + 1] < buffer[tau] {
                tau += 1;
            }
            return (tau + 1 < size).then_some(tau);
        }
        tau += 1;
    }
    None
}

fn parabolic_interpolation(buffer: &[f64], x: usize) -> f64 {
    if x < 1 {
        return if buffer[x] <= buffer[x + 1] { x as f64 } else { (x + 1) as f64 };
    }
    if x + 1 >= buffer.len() {
        return if buffer[x] <= buffer[x - 1] { x as f64 } else { (x - 1) as f64 };
    }
    let den = buffer[x + 1] + buffer[x - 1] - 2.0 * buffer[x];
    let delta = buffer[x - 1] - buffer[x + 1];
    if den == 0.0 {
        x as f64
    } else {
        x as f64 + delta / (2.0 * den)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    struct Sine {
        freq: f32,
        sample_rate: f32,
        pos: usize,
    }

    impl Sine {
        fn new(freq: f32, sample_rate: f32) -> Self {
            Self { freq, sample_rate, pos: 0 }
        }

        fn block(&mut self, len: usize) -> Vec<f32> {
            let block = (self.pos..self.pos + len)
                .map(|i| 0.5 * (2.0 * std::f64::consts::PI * self.freq as f64 * i as f64 / self.sample_rate as f64).sin() as f32)
                .collect();
            self.pos += len;
            block
        }
    }

    fn estimator(sample_rate: u32, block_size: usize) -> DifferenceEstimator {
        let mut yin = DifferenceEstimator::new(DifferenceSettings::default());
        yin.prepare(sample_rate, block_size).unwrap();
        yin
    }

    fn settle(yin: &mut DifferenceEstimator, sine: &mut Sine, blocks: usize) -> PitchOutcome {
        let mut outcome = PitchOutcome::NoPitch;
        for _ in 0..blocks {
            outcome = yin.estimate(&sine.block(yin.block_size()));
        }
        outcome
    }

    #[test]
    fn test_sine_within_two_percent() {
        for &freq in &[55.0, 110.0, 220.0, 440.0, 1000.0, 2000.0] {
            let mut yin = estimator(48000, 2048);
            let mut sine = Sine::new(freq, 48000.0);
            let blocks = yin.relaxation_len() + 2;
            let outcome = settle(&mut yin, &mut sine, blocks);
            let detected = outcome.frequency().expect("sine should be pitched");
            assert!(
                (detected - freq).abs() / freq < 0.02,
                "expected {}Hz, got {}Hz",
                freq,
                detected
            );
        }
    }

    #[test]
    fn test_low_sine_within_two_percent() {
        for &freq in &[20.0, 40.0] {
            let mut yin = estimator(48000, 8192);
            let mut sine = Sine::new(freq, 48000.0);
            let outcome = settle(&mut yin, &mut sine, 3);
            let detected = outcome.frequency().expect("sine should be pitched");
            assert!((detected - freq).abs() / freq < 0.02, "expected {}Hz, got {}Hz", freq, detected);
        }
    }

    #[test]
    fn test_silence_is_gated_and_window_kept() {
        let mut yin = estimator(48000, 512);
        let mut sine = Sine::new(220.0, 48000.0);
        settle(&mut yin, &mut sine, 10);
        let before = yin.smoothing_window().to_vec();

        let outcome = yin.estimate(&vec![0.0; 512]);
        assert_eq!(outcome, PitchOutcome::SilenceGated);
        assert_eq!(outcome.to_scalar(), crate::pitch::NO_PITCH);
        assert_eq!(before, yin.smoothing_window());
    }

    #[test]
    fn test_quiet_block_below_gate() {
        let mut yin = estimator(48000, 512);
        let mut sine = Sine::new(220.0, 48000.0);
        let quiet: Vec<f32> = sine.block(512).iter().map(|x| x * 1e-4).collect();
        assert_eq!(yin.estimate(&quiet), PitchOutcome::SilenceGated);
    }

    #[test]
    fn test_normalized_difference_starts_at_one() {
        let mut yin = estimator(48000, 1024);
        let mut sine = Sine::new(330.0, 48000.0);
        settle(&mut yin, &mut sine, 3);
        assert_eq!(yin.normalized_difference()[0], 1.0);
        assert!(yin.normalized_difference().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_constant_signal_has_no_pitch() {
        let mut yin = estimator(48000, 512);
        let flat = vec![0.9; 512];
        assert_eq!(yin.estimate(&flat), PitchOutcome::NoPitch);
        assert_eq!(yin.estimate(&flat), PitchOutcome::NoPitch);
        assert!(yin.smoothing_window().iter().all(|&f| f == DEFAULT_PITCH));
    }

    #[test]
    fn test_out_of_range_estimate_is_held() {
        let mut yin = estimator(48000, 512);
        let mut sine = Sine::new(4000.0, 48000.0);
        let outcome = settle(&mut yin, &mut sine, 3);
        assert_eq!(outcome, PitchOutcome::Held(DEFAULT_PITCH));
        assert!(yin.smoothing_window().iter().all(|&f| f == DEFAULT_PITCH));
    }

    #[test]
    fn test_relaxation_length() {
        let yin = estimator(48000, 512);
        assert_eq!(yin.relaxation_len(), 4);
        let yin = estimator(48000, 8192);
        assert_eq!(yin.relaxation_len(), 1);
        assert!(yin.smoothing_window().iter().all(|&f| f == DEFAULT_PITCH));
    }

    #[test]
    fn test_prepare_rejects_bad_spec() {
        let mut yin = DifferenceEstimator::new(DifferenceSettings::default());
        assert!(yin.prepare(0, 512).is_err());
        assert!(yin.prepare(48000, 2).is_err());
        assert_eq!(yin.estimate(&[0.5; 64]), PitchOutcome::NoPitch);
    }

    #[test]
    fn test_threshold_walks_to_local_minimum() {
        let buffer = [1.0, 3.0, 2.0, 0.15, 0.1, 0.05, 0.2, 0.01];
        assert_eq!(absolute_threshold(&buffer, 0.2), Some(5));
        assert_eq!(absolute_threshold(&[1.0, 0.5, 0.9, 0.8], 0.2), None);
        assert_eq!(absolute_threshold(&[1.0, 2.0, 0.5, 0.1, 0.05], 0.2), None);
    }

    #[test]
    fn test_parabolic_interpolation() {
        let buffer = [1.0, 0.5, 0.0, 0.5, 1.0];
        assert_eq!(parabolic_interpolation(&buffer, 2), 2.0);
        let skewed = [1.0, 0.2, 0.0, 0.6, 1.0];
        assert!(parabolic_interpolation(&skewed, 2) < 2.0);
        assert_eq!(parabolic_interpolation(&buffer, 4), 3.0);
        assert_eq!(parabolic_interpolation(&buffer, 0), 1.0);
    }

    #[test]
    fn test_white_noise_has_no_pitch() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut yin = estimator(48000, 2048);
        for _ in 0..4 {
            let noise: Vec<f32> = (0..2048).map(|_| rng.gen_range(-0.5..0.5)).collect();
            assert_eq!(yin.estimate(&noise).frequency(), None);
        }
    }

    #[test]
    fn test_period_longer_than_block_is_not_pitched() {
        for &freq in &[60.0, 70.0, 80.0, 90.0] {
            let mut yin = estimator(48000, 512);
            let mut sine = Sine::new(freq, 48000.0);
            for block in 0..12 {
                let outcome = yin.estimate(&sine.block(512));
                assert!(
                    !matches!(outcome, PitchOutcome::Pitched(_)),
                    "{}Hz block {}: {:?}",
                    freq,
                    block,
                    outcome
                );
            }
            assert!(yin.smoothing_window().iter().all(|&f| f == DEFAULT_PITCH));
        }
    }

    #[test]
    fn test_difference_is_never_negative() {
        let mut yin = estimator(48000, 512);
        let mut sine = Sine::new(60.0, 48000.0);
        for _ in 0..4 {
            yin.estimate(&sine.block(512));
            assert!(yin.normalized_difference().iter().all(|&v| v >= 0.0));
        }
    }

    #[test]
    fn test_gate_measures_analysed_block() {
        let mut yin = estimator(48000, 2048);
        let mut sine = Sine::new(220.0, 48000.0);
        let quiet: Vec<f32> = sine.block(2048).iter().map(|x| x * 1e-4).collect();
        assert_eq!(yin.estimate(&quiet), PitchOutcome::SilenceGated);
        assert_eq!(yin.smoothing_window(), &[DEFAULT_PITCH]);

        let detected = yin.estimate(&sine.block(2048)).frequency().expect("loud block should be pitched");
        assert!((detected - 220.0).abs() / 220.0 < 0.02, "got {}Hz", detected);
    }

    #[test]
    fn test_voiced_block_before_silence_is_used() {
        let mut yin = estimator(48000, 2048);
        let mut sine = Sine::new(330.0, 48000.0);
        settle(&mut yin, &mut sine, 2);
        let voiced = yin.estimate(&sine.block(2048));
        assert!(matches!(voiced, PitchOutcome::Pitched(_)), "{:?}", voiced);
        assert_eq!(yin.estimate(&vec![0.0; 2048]), PitchOutcome::SilenceGated);
        assert!((yin.smoothed() - 330.0).abs() / 330.0 < 0.02);
    }
}
