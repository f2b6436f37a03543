use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use knuffel::Decode;
use serde::{Deserialize, Serialize};

use crate::filter::FilterResponse;
use crate::harmonics::BankSettings;
use crate::pitch::{DifferenceSettings, NoteFinder, WindowedSettings};

/// Root of the `config.kdl` file. Every node and property is optional.
#[derive(Decode, Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuppressorConfig {
    #[knuffel(child)]
    pub general: Option<GeneralConfig>,
    #[knuffel(child)]
    pub yin: Option<YinConfig>,
    #[knuffel(child)]
    pub autocorrelation: Option<AutocorrelationConfig>,
    #[knuffel(child)]
    pub bank: Option<BankConfig>,
    #[knuffel(child)]
    pub overtones: Option<OvertoneConfig>,
    #[knuffel(child)]
    pub notes: Option<NotesConfig>,
}

#[derive(Decode, Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[knuffel(property)]
    pub log: Option<bool>,
    #[knuffel(property)]
    pub estimator: Option<String>,
    #[knuffel(property)]
    pub block: Option<u32>,
}

#[derive(Decode, Debug, Clone, Default, Serialize, Deserialize)]
pub struct YinConfig {
    #[knuffel(property)]
    pub silence: Option<f64>,
    #[knuffel(property)]
    pub threshold: Option<f64>,
    #[knuffel(property)]
    pub relaxation: Option<f64>,
    #[knuffel(property)]
    pub floor: Option<f64>,
    #[knuffel(property)]
    pub ceiling: Option<f64>,
}

#[derive(Decode, Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutocorrelationConfig {
    #[knuffel(property)]
    pub window: Option<u32>,
    #[knuffel(property)]
    pub hop: Option<u32>,
    #[knuffel(property)]
    pub correlation: Option<f64>,
    #[knuffel(property)]
    pub noise: Option<f64>,
}

#[derive(Decode, Debug, Clone, Default, Serialize, Deserialize)]
pub struct BankConfig {
    #[knuffel(property)]
    pub harmonics: Option<u32>,
    #[knuffel(property)]
    pub ceiling: Option<f64>,
    #[knuffel(property)]
    pub q: Option<f64>,
}

#[derive(Decode, Debug, Clone, Default, Serialize, Deserialize)]
pub struct OvertoneConfig {
    #[knuffel(property)]
    pub q: Option<f64>,
    #[knuffel(property)]
    pub response: Option<String>,
    #[knuffel(property)]
    pub gain: Option<f64>,
}

#[derive(Decode, Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotesConfig {
    #[knuffel(property)]
    pub sustain: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimatorKind {
    Yin,
    Windowed(NoteFinder),
}

impl FromStr for EstimatorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yin" | "difference" => Ok(EstimatorKind::Yin),
            other => other
                .parse::<NoteFinder>()
                .map(EstimatorKind::Windowed)
                .map_err(|_| anyhow!("Unknown estimator: {}", other)),
        }
    }
}

/// Fully resolved settings handed to the processing components.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub log: bool,
    pub estimator: EstimatorKind,
    pub block_size: usize,
    pub yin: DifferenceSettings,
    pub autocorrelation: WindowedSettings,
    pub bank: BankSettings,
    pub least_note_length: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log: true,
            estimator: EstimatorKind::Yin,
            block_size: 512,
            yin: DifferenceSettings::default(),
            autocorrelation: WindowedSettings::default(),
            bank: BankSettings::default(),
            least_note_length: 3000,
        }
    }
}

impl SuppressorConfig {
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config = knuffel::parse("config.kdl", content)?;
        Ok(config)
    }

    pub fn settings(&self) -> Result<Settings> {
        let mut settings = Settings::default();

        if let Some(general) = &self.general {
            if let Some(log) = general.log {
                settings.log = log;
            }
            if let Some(estimator) = &general.estimator {
                settings.estimator = estimator.parse()?;
            }
            if let Some(block) = general.block {
                if block == 0 {
                    bail!("Block size must be positive");
                }
                settings.block_size = block as usize;
            }
        }

        if let Some(yin) = &self.yin {
            let s = &mut settings.yin;
            s.silence_db = yin.silence.map_or(s.silence_db, |v| v as f32);
            s.threshold = yin.threshold.map_or(s.threshold, |v| v as f32);
            s.relaxation_ms = yin.relaxation.map_or(s.relaxation_ms, |v| v as f32);
            s.min_hz = yin.floor.map_or(s.min_hz, |v| v as f32);
            s.max_hz = yin.ceiling.map_or(s.max_hz, |v| v as f32);
            if s.min_hz >= s.max_hz {
                bail!("yin floor {}Hz must be below ceiling {}Hz", s.min_hz, s.max_hz);
            }
        }

        if let Some(acf) = &self.autocorrelation {
            let s = &mut settings.autocorrelation;
            s.window_power = acf.window.unwrap_or(s.window_power);
            s.hop_size = acf.hop.map_or(s.hop_size, |v| v as usize);
            s.correlation_threshold = acf.correlation.map_or(s.correlation_threshold, |v| v as f32);
            s.noise_threshold = acf.noise.map_or(s.noise_threshold, |v| v as f32);
        }
        if let EstimatorKind::Windowed(finder) = settings.estimator {
            settings.autocorrelation.finder = finder;
        }

        if let Some(bank) = &self.bank {
            let s = &mut settings.bank;
            s.harmonic_count = bank.harmonics.map_or(s.harmonic_count, |v| v as usize);
            s.ceiling_hz = bank.ceiling.map_or(s.ceiling_hz, |v| v as f32);
            s.base_q = bank.q.map_or(s.base_q, |v| v as f32);
        }

        if let Some(overtones) = &self.overtones {
            let s = &mut settings.bank;
            s.harmonic_q = overtones.q.map_or(s.harmonic_q, |v| v as f32);
            if let Some(response) = &overtones.response {
                s.harmonic_response = response.parse()?;
            }
            if let FilterResponse::Peak { gain } = &mut s.harmonic_response {
                *gain = overtones.gain.map_or(*gain, |v| v as f32);
            }
        }

        if let Some(notes) = &self.notes {
            settings.least_note_length = notes.sustain.unwrap_or(settings.least_note_length);
        }

        Ok(settings)
    }
}
