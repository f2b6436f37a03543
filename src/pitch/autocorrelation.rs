use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use log::debug;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::PitchOutcome;
use crate::util::hz_to_note;

/// Transform length of the spectral finder.
pub const SPECTRAL_SIZE: usize = 2048;
/// Samples beyond this magnitude stop the direct correlation sum.
const CLIP_LIMIT: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteFinder {
    /// Per-lag partial sums with a clipping guard.
    Direct,
    /// Every lag accumulated as scaled slice additions.
    Vectorized,
    /// Magnitude spectrum peak of a fixed 2048-point transform.
    Spectral,
}

impl NoteFinder {
    pub fn name(self) -> &'static str {
        match self {
            NoteFinder::Direct => "direct",
            NoteFinder::Vectorized => "vectorized",
            NoteFinder::Spectral => "spectral",
        }
    }
}

impl FromStr for NoteFinder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" | "acf" => Ok(NoteFinder::Direct),
            "vectorized" | "simd" => Ok(NoteFinder::Vectorized),
            "spectral" | "fft" => Ok(NoteFinder::Spectral),
            other => Err(anyhow!("Unknown note finder: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowedSettings {
    pub window_power: u32,
    pub hop_size: usize,
    pub correlation_threshold: f32,
    pub noise_threshold: f32,
    pub finder: NoteFinder,
}

impl Default for WindowedSettings {
    fn default() -> Self {
        Self {
            window_power: 12,
            hop_size: 1024,
            correlation_threshold: 0.6,
            noise_threshold: 0.05,
            finder: NoteFinder::Direct,
        }
    }
}

/// Accumulates source blocks into an overlapping analysis window and runs
/// one note finder each time the window fills.
pub struct WindowedEstimator {
    settings: WindowedSettings,
    sample_rate: f32,
    window: Vec<f32>,
    next_fill: usize,
    sums: Vec<f32>,
    fft: Option<Arc<dyn Fft<f32>>>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    passes: u64,
    last_note: Option<u8>,
}

impl WindowedEstimator {
    pub fn new(settings: WindowedSettings) -> Self {
        Self {
            settings,
            sample_rate: 0.0,
            window: Vec::new(),
            next_fill: 0,
            sums: Vec::new(),
            fft: None,
            spectrum: Vec::new(),
            scratch: Vec::new(),
            passes: 0,
            last_note: None,
        }
    }

    pub fn prepare(&mut self, sample_rate: u32, source_block_size: usize) -> Result<()> {
        if sample_rate == 0 {
            bail!("Sample rate must be positive");
        }
        if !(8..=13).contains(&self.settings.window_power) {
            bail!("Window size must be 2^8..2^13, got 2^{}", self.settings.window_power);
        }
        let window_size = 1usize << self.settings.window_power;
        let hop = self.settings.hop_size;
        if hop == 0 || hop > window_size {
            bail!("Hop size {} must be in 1..={}", hop, window_size);
        }

        self.sample_rate = sample_rate as f32;
        self.window = vec![0.0; window_size];
        self.next_fill = 0;
        self.passes = 0;
        self.last_note = None;
        self.sums = match self.settings.finder {
            NoteFinder::Vectorized => vec![0.0; window_size],
            _ => Vec::new(),
        };

        if self.settings.finder == NoteFinder::Spectral {
            if window_size < SPECTRAL_SIZE {
                bail!("Spectral finder needs a window of at least {} samples, got {}", SPECTRAL_SIZE, window_size);
            }
            let fft = FftPlanner::<f32>::new().plan_fft_forward(SPECTRAL_SIZE);
            self.scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
            self.spectrum = vec![Complex::new(0.0, 0.0); SPECTRAL_SIZE];
            self.fft = Some(fft);
        } else {
            self.fft = None;
            self.spectrum = Vec::new();
            self.scratch = Vec::new();
        }

        debug!(
            "Windowed estimator prepared: rate={}Hz, source block={}, window={}, hop={}, finder={}",
            sample_rate,
            source_block_size,
            window_size,
            hop,
            self.settings.finder.name()
        );
        Ok(())
    }

    /// Returns the outcome of the last analysis pass run while consuming
    /// `block`, or `WindowNotYetFull` if the window never filled.
    pub fn process(&mut self, block: &[f32]) -> PitchOutcome {
        let mut outcome = PitchOutcome::WindowNotYetFull;
        let window_size = self.window.len();
        if window_size == 0 {
            return outcome;
        }

        let mut rest = block;
        while !rest.is_empty() {
            let take = (window_size - self.next_fill).min(rest.len());
            self.window[self.next_fill..self.next_fill + take].copy_from_slice(&rest[..take]);
            self.next_fill += take;
            rest = &rest[take..];

            if self.next_fill == window_size {
                outcome = self.analyze();
                self.slide();
            }
        }
        outcome
    }

    fn analyze(&mut self) -> PitchOutcome {
        self.passes += 1;
        let freq = match self.settings.finder {
            NoteFinder::Direct => self.direct_frequency(),
            NoteFinder::Vectorized => self.vectorized_frequency(),
            NoteFinder::Spectral => self.spectral_frequency(),
        };
        match freq.and_then(|f| hz_to_note(f).map(|note| (f, note))) {
            Some((f, note)) => {
                self.last_note = Some(note);
                PitchOutcome::Pitched(f)
            }
            None => PitchOutcome::NoPitch,
        }
    }

    fn slide(&mut self) {
        let hop = self.settings.hop_size;
        self.window.copy_within(hop.., 0);
        self.next_fill -= hop;
    }

    fn direct_frequency(&self) -> Option<f32> {
        let w = &self.window;
        let size = w.len();
        let mut period = None;
        let mut acf = 0.0f32;
        let mut thres = 0.0f32;
        let mut rising = false;

        for k in 0..size {
            let prev = acf;
            acf = 0.0;
            for n in 0..size - k {
                let (a, b) = (w[n], w[n + k]);
                if a.abs() > CLIP_LIMIT || b.abs() > CLIP_LIMIT {
                    break;
                }
                acf += a * b;
            }

            if k == 0 {
                thres = acf * self.settings.correlation_threshold;
                continue;
            }
            if rising && acf <= prev {
                period = Some(k - 1);
                break;
            }
            if acf > prev && acf > thres {
                rising = true;
            }
        }

        if thres <= self.settings.noise_threshold {
            return None;
        }
        // a correlation that never rises and falls again has no period
        Some(self.sample_rate / period? as f32)
    }

    fn vectorized_frequency(&mut self) -> Option<f32> {
        let w = &self.window;
        let sums = &mut self.sums;
        sums.fill(0.0);
        for (k, &scale) in w.iter().enumerate() {
            for (s, &x) in sums.iter_mut().zip(&w[k..]) {
                *s += x * scale;
            }
        }

        let thres = self.settings.correlation_threshold * sums[0];
        let mut period = None;
        let mut rising = false;
        for k in 1..sums.len() {
            if rising && sums[k] <= sums[k - 1] {
                period = Some(k - 1);
                break;
            }
            if sums[k] > sums[k - 1] && sums[k] > thres {
                rising = true;
            }
        }

        if thres <= self.settings.noise_threshold {
            return None;
        }
        Some(self.sample_rate / period? as f32)
    }

    fn spectral_frequency(&mut self) -> Option<f32> {
        let fft = self.fft.as_ref()?;
        let len = self.window.len().min(SPECTRAL_SIZE);
        for (i, c) in self.spectrum.iter_mut().enumerate() {
            *c = Complex::new(if i < len { self.window[i] } else { 0.0 }, 0.0);
        }
        fft.process_with_scratch(&mut self.spectrum, &mut self.scratch);

        let (bin, magnitude) = self.spectrum[..=SPECTRAL_SIZE / 2]
            .iter()
            .map(|c| c.norm())
            .enumerate()
            .fold((0, f32::MIN), |best, (i, m)| if m > best.1 { (i, m) } else { best });

        if magnitude <= self.settings.noise_threshold {
            return None;
        }
        Some(bin as f32 / SPECTRAL_SIZE as f32 * self.sample_rate)
    }

    pub fn analysis_passes(&self) -> u64 {
        self.passes
    }

    pub fn window_size(&self) -> usize {
        self.window.len()
    }

    pub fn fill_cursor(&self) -> usize {
        self.next_fill
    }

    pub fn finder(&self) -> NoteFinder {
        self.settings.finder
    }

    pub fn last_note(&self) -> Option<u8> {
        self.last_note
    }
}
