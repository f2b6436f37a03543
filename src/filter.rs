use anyhow::{anyhow, bail, Result};
use biquad::{Biquad, Coefficients, DirectForm1, Type};

use crate::util::gain_to_db;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterResponse {
    Notch,
    /// Bell response; `gain` is the linear gain at the centre frequency.
    Peak { gain: f32 },
}

impl std::str::FromStr for FilterResponse {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "notch" => Ok(FilterResponse::Notch),
            "peak" | "bell" => Ok(FilterResponse::Peak { gain: 0.5 }),
            other => Err(anyhow!("Unknown filter response: {}", other)),
        }
    }
}

const PASSTHROUGH: Coefficients<f32> = Coefficients {
    a1: 0.0,
    a2: 0.0,
    b0: 1.0,
    b1: 0.0,
    b2: 0.0,
};

pub fn make_coefficients(response: FilterResponse, fs: f32, freq: f32, q: f32) -> Result<Coefficients<f32>> {
    if !(fs > 0.0) {
        bail!("Sample rate must be positive, got {}", fs);
    }
    if !(freq > 0.0 && freq < fs / 2.0) {
        bail!("Centre frequency {}Hz outside (0, {})", freq, fs / 2.0);
    }
    if !(q > 0.0) {
        bail!("Quality must be positive, got {}", q);
    }
    let f_type = match response {
        FilterResponse::Notch => Type::Notch,
        FilterResponse::Peak { gain } => {
            if !(gain > 0.0) {
                bail!("Peak gain must be positive, got {}", gain);
            }
            Type::PeakingEQ(gain_to_db(gain))
        }
    };
    // biquad 0.5's `from_params` halves the normalised frequency twice;
    // normalise to Nyquist here so ω = 2π·freq/fs.
    Coefficients::<f32>::from_normalized_params(f_type, 2.0 * freq / fs, q)
        .map_err(|_| anyhow!("Failed to create filter coefficients"))
}

/// Second-order section with one coefficient set shared by every channel
/// and an independent delay line per channel.
pub struct BiquadStage {
    response: FilterResponse,
    sample_rate: f32,
    frequency: f32,
    quality: f32,
    coefficients: Coefficients<f32>,
    channels: Vec<DirectForm1<f32>>,
}

impl BiquadStage {
    pub fn new(response: FilterResponse) -> Self {
        Self {
            response,
            sample_rate: 0.0,
            frequency: 0.0,
            quality: 0.0,
            coefficients: PASSTHROUGH,
            channels: Vec::new(),
        }
    }

    pub fn prepare(&mut self, sample_rate: u32, channels: usize, _max_block_size: usize) {
        self.sample_rate = sample_rate as f32;
        self.coefficients = if self.frequency > 0.0 {
            make_coefficients(self.response, self.sample_rate, self.frequency, self.quality).unwrap_or(PASSTHROUGH)
        } else {
            PASSTHROUGH
        };
        self.channels = (0..channels).map(|_| DirectForm1::<f32>::new(self.coefficients)).collect();
    }

    /// Recomputes the shared coefficients. On error the previous tuning is kept.
    pub fn set_parameters(&mut self, frequency: f32, quality: f32) -> Result<()> {
        let coefficients = make_coefficients(self.response, self.sample_rate, frequency, quality)?;
        self.frequency = frequency;
        self.quality = quality;
        self.coefficients = coefficients;
        for state in self.channels.iter_mut() {
            state.update_coefficients(coefficients);
        }
        Ok(())
    }

    pub fn set_response(&mut self, response: FilterResponse) {
        self.response = response;
    }

    pub fn process<C: AsMut<[f32]>>(&mut self, block: &mut [C]) {
        for (state, channel) in self.channels.iter_mut().zip(block.iter_mut()) {
            for x in channel.as_mut().iter_mut() {
                *x = state.run(*x);
            }
        }
    }

    pub fn reset(&mut self) {
        self.channels.iter_mut().for_each(|state| state.reset_state());
    }

    /// `(b0, b1, b2, a1, a2)`, normalised so that `a0 == 1`.
    pub fn coefficients(&self) -> (f32, f32, f32, f32, f32) {
        let c = &self.coefficients;
        (c.b0, c.b1, c.b2, c.a1, c.a2)
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn quality(&self) -> f32 {
        self.quality
    }

    pub fn response(&self) -> FilterResponse {
        self.response
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }
}
