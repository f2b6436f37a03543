use anyhow::Result;
use log::info;

use crate::config::{EstimatorKind, Settings};
use crate::harmonics::{BankSettings, HarmonicFilterBank};
use crate::notes::{NoteEvent, NoteTracker};
use crate::pitch::{DifferenceEstimator, Estimator, PitchOutcome, WindowedEstimator, WindowedSettings};
use crate::ProcessSpec;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockReport {
    pub outcome: PitchOutcome,
    /// Frequency the bank was tuned to for this block.
    pub frequency: Option<f32>,
    /// Auxiliary stages applied, `None` when the bank passed audio through.
    pub harmonics: Option<usize>,
}

/// Per-block driver: estimate on channel 0, then retune and filter all
/// channels. When an estimator reports no pitch the last valid frequency is
/// kept so the filters do not jump.
pub struct Suppressor {
    estimator: Estimator,
    bank: HarmonicFilterBank,
    notes: NoteTracker,
    harmonic_count: usize,
    held: Option<f32>,
    position: u64,
}

impl Suppressor {
    pub fn new(estimator: Estimator, bank: BankSettings, least_note_length: u64) -> Self {
        Self {
            estimator,
            harmonic_count: bank.harmonic_count,
            bank: HarmonicFilterBank::new(bank),
            notes: NoteTracker::new(least_note_length),
            held: None,
            position: 0,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let estimator = match settings.estimator {
            EstimatorKind::Yin => Estimator::Difference(DifferenceEstimator::new(settings.yin.clone())),
            EstimatorKind::Windowed(finder) => Estimator::Windowed(WindowedEstimator::new(WindowedSettings {
                finder,
                ..settings.autocorrelation.clone()
            })),
        };
        Self::new(estimator, settings.bank.clone(), settings.least_note_length)
    }

    pub fn prepare(&mut self, spec: &ProcessSpec) -> Result<()> {
        self.estimator.prepare(spec.sample_rate, spec.max_block_size)?;
        self.bank.prepare(spec, self.harmonic_count);
        self.notes.reset();
        self.held = None;
        self.position = 0;
        info!(
            "Suppressor ready: estimator={}, rate={}Hz, block={}, channels={}, harmonics={}",
            self.estimator.name(),
            spec.sample_rate,
            spec.max_block_size,
            spec.channels,
            self.harmonic_count
        );
        Ok(())
    }

    /// Drops filter memory and the sounding note after a discontinuity in
    /// the stream. The held tuning and the estimator history are kept.
    pub fn reset(&mut self) {
        self.bank.reset();
        self.notes.reset();
    }

    pub fn process<C: AsMut<[f32]>>(&mut self, block: &mut [C]) -> BlockReport {
        self.process_with_notes(block, |_| {})
    }

    pub fn process_with_notes<C: AsMut<[f32]>>(
        &mut self,
        block: &mut [C],
        emit: impl FnMut(NoteEvent),
    ) -> BlockReport {
        let Some(first) = block.first_mut() else {
            return BlockReport { outcome: PitchOutcome::NoPitch, frequency: self.held, harmonics: None };
        };
        let input = first.as_mut();
        let len = input.len() as u64;
        let outcome = self.estimator.process(input);

        if let Some(freq) = outcome.frequency() {
            self.held = Some(freq);
        }
        let note = match outcome {
            PitchOutcome::Pitched(_) => self.estimator.last_note(),
            _ => None,
        };
        self.notes.track(note, self.position, emit);

        let harmonics = self.held.and_then(|freq| self.bank.retune_and_process(block, freq));
        self.position += len;
        BlockReport { outcome, frequency: self.held, harmonics }
    }

    pub fn bank(&self) -> &HarmonicFilterBank {
        &self.bank
    }

    pub fn estimator(&self) -> &Estimator {
        &self.estimator
    }

    pub fn held_frequency(&self) -> Option<f32> {
        self.held
    }

    pub fn active_note(&self) -> Option<u8> {
        self.notes.active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pitch::{DifferenceSettings, NoteFinder};

    struct Sine {
        freq: f64,
        pos: usize,
    }

    impl Sine {
        fn block(&mut self, len: usize) -> Vec<f32> {
            let block = (self.pos..self.pos + len)
                .map(|i| (0.5 * (2.0 * std::f64::consts::PI * self.freq * i as f64 / 48000.0).sin()) as f32)
                .collect();
            self.pos += len;
            block
        }
    }

    fn spec() -> ProcessSpec {
        ProcessSpec { sample_rate: 48000, max_block_size: 512, channels: 2 }
    }

    fn yin_suppressor() -> Suppressor {
        let estimator = Estimator::Difference(DifferenceEstimator::new(DifferenceSettings::default()));
        let mut suppressor = Suppressor::new(estimator, BankSettings { harmonic_count: 10, ..Default::default() }, 3000);
        suppressor.prepare(&spec()).unwrap();
        suppressor
    }

    fn stereo(mono: Vec<f32>) -> Vec<Vec<f32>> {
        vec![mono.clone(), mono]
    }

    #[test]
    fn test_tracks_steady_tone() {
        let mut suppressor = yin_suppressor();
        let mut sine = Sine { freq: 220.0, pos: 0 };
        for _ in 0..10 {
            suppressor.process(&mut stereo(sine.block(512)));
        }

        let mut lowest = f32::MAX;
        let mut highest = f32::MIN;
        for block in 0..100 {
            let report = suppressor.process(&mut stereo(sine.block(512)));
            let centre = suppressor.bank().base_frequency();
            assert!((centre - 220.0).abs() / 220.0 < 0.02, "block {}: notch at {}Hz", block, centre);
            assert_eq!(report.harmonics, Some(10));
            lowest = lowest.min(centre);
            highest = highest.max(centre);
        }
        assert!(highest - lowest < 0.04 * 220.0, "notch wandered {}..{}Hz", lowest, highest);
    }

    #[test]
    fn test_windowed_estimator_tracks_tone() {
        let mut suppressor = Suppressor::new(
            Estimator::Windowed(WindowedEstimator::new(WindowedSettings {
                finder: NoteFinder::Vectorized,
                ..Default::default()
            })),
            BankSettings::default(),
            3000,
        );
        suppressor.prepare(&spec()).unwrap();
        let mut sine = Sine { freq: 220.0, pos: 0 };

        let first = suppressor.process(&mut stereo(sine.block(512)));
        assert_eq!(first.outcome, PitchOutcome::WindowNotYetFull);
        assert_eq!(first.harmonics, None);

        for _ in 0..12 {
            suppressor.process(&mut stereo(sine.block(512)));
        }
        let centre = suppressor.bank().base_frequency();
        assert!((centre - 220.0).abs() / 220.0 < 0.02, "notch at {}Hz", centre);
        assert_eq!(suppressor.active_note(), Some(57));
    }

    #[test]
    fn test_silence_holds_previous_tuning() {
        let mut suppressor = yin_suppressor();
        let mut sine = Sine { freq: 220.0, pos: 0 };
        for _ in 0..10 {
            suppressor.process(&mut stereo(sine.block(512)));
        }
        let tuned = suppressor.bank().base_frequency();

        let report = suppressor.process(&mut stereo(vec![0.0; 512]));
        assert_eq!(report.outcome, PitchOutcome::SilenceGated);
        assert_eq!(report.frequency, suppressor.held_frequency());
        assert_eq!(suppressor.bank().base_frequency(), tuned);
        assert!(report.harmonics.is_some());
    }

    #[test]
    fn test_no_filtering_before_first_pitch() {
        let mut suppressor = yin_suppressor();
        let mut block = stereo(vec![0.0; 512]);
        let report = suppressor.process(&mut block);
        assert_eq!(report.frequency, None);
        assert_eq!(report.harmonics, None);
        assert_eq!(suppressor.bank().base_frequency(), 0.0);
    }

    #[test]
    fn test_emits_single_note_on() {
        let mut suppressor = yin_suppressor();
        let mut sine = Sine { freq: 220.0, pos: 0 };
        let mut events = Vec::new();
        for _ in 0..20 {
            suppressor.process_with_notes(&mut stereo(sine.block(512)), |e| events.push(e));
        }
        let ons: Vec<_> = events.iter().filter(|e| matches!(e, NoteEvent::On { .. })).collect();
        assert!(!ons.is_empty());
        assert!(matches!(events.last(), Some(NoteEvent::On { note: 57, .. })), "{:?}", events);
    }

    #[test]
    fn test_reset_keeps_tuning_and_clears_state() {
        let mut suppressor = yin_suppressor();
        let mut sine = Sine { freq: 220.0, pos: 0 };
        for _ in 0..10 {
            suppressor.process(&mut stereo(sine.block(512)));
        }
        let held = suppressor.held_frequency();
        assert!(held.is_some());
        assert_eq!(suppressor.active_note(), Some(57));

        suppressor.reset();
        assert_eq!(suppressor.active_note(), None);
        assert_eq!(suppressor.held_frequency(), held);

        let mut silent = stereo(vec![0.0; 512]);
        let report = suppressor.process(&mut silent);
        assert_eq!(report.outcome, PitchOutcome::SilenceGated);
        assert!(silent.iter().all(|c| c.iter().all(|&x| x == 0.0)));
    }

    #[test]
    fn test_empty_block_is_ignored() {
        let mut suppressor = yin_suppressor();
        let mut block: Vec<Vec<f32>> = Vec::new();
        let report = suppressor.process(&mut block);
        assert_eq!(report.outcome, PitchOutcome::NoPitch);
        assert_eq!(report.harmonics, None);
    }

    #[test]
    fn test_from_settings_selects_estimator() {
        let mut settings = Settings::default();
        settings.estimator = EstimatorKind::Windowed(NoteFinder::Spectral);
        let mut suppressor = Suppressor::from_settings(&settings);
        suppressor.prepare(&spec()).unwrap();
        assert_eq!(suppressor.estimator().name(), "spectral");
        assert_eq!(suppressor.bank().harmonic_count(), settings.bank.harmonic_count);
    }
}
