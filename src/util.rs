pub fn midi_to_hz(midi: f32) -> f32 {
    440.0 * 2.0_f32.powf((midi - 69.0) / 12.0)
}

pub fn hz_to_midi(hz: f32) -> f32 {
    69.0 + 12.0 * (hz / 440.0).log2()
}

/// Nearest MIDI note for a frequency, or `None` outside `0..=127`.
pub fn hz_to_note(hz: f32) -> Option<u8> {
    if !hz.is_finite() || hz <= 0.0 {
        return None;
    }
    let note = hz_to_midi(hz).round();
    if (0.0..=127.0).contains(&note) {
        Some(note as u8)
    } else {
        None
    }
}

pub fn gain_to_db(gain: f32) -> f32 {
    20.0 * gain.log10()
}

pub fn mean_abs(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|x| x.abs()).sum::<f32>() / samples.len() as f32
}
