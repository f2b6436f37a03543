use anyhow::{Context, Result};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::get_codecs;
use symphonia::default::get_probe;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use log::{info, debug};

/// Decodes `path` into one `Vec` per channel.
pub fn load_audio<P: AsRef<Path>>(path: P) -> Result<(Vec<Vec<f32>>, u32)> {
    let path = path.as_ref();
    info!("Loading audio from {}", path.display());

    let file = File::open(path)
        .with_context(|| format!("Failed to open audio file: {}", path.display()))?;

    let mss = MediaSourceStream::new(Box::new(ReadOnlySource::new(BufReader::new(file))), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let meta_opts: MetadataOptions = Default::default();
    let fmt_opts: FormatOptions = Default::default();

    let probed = get_probe()
        .format(&hint, mss, &fmt_opts, &meta_opts)
        .with_context(|| "Failed to probe audio format")?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .with_context(|| "No supported audio tracks found")?;

    let track_id = track.id;
    let codec_params = &track.codec_params;
    let sample_rate = codec_params.sample_rate.unwrap_or(44100);
    info!("Audio sample rate: {}Hz", sample_rate);

    let dec_opts: DecoderOptions = Default::default();
    let mut decoder = get_codecs()
        .make(codec_params, &dec_opts)
        .with_context(|| "Failed to create decoder")?;

    let mut channels: Vec<Vec<f32>> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::ResetRequired) => {
                debug!("Decoder reset required");
                continue;
            }
            Err(_) => break,
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let duration = decoded.capacity() as u64;

                if duration == 0 {
                    continue;
                }

                let count = spec.channels.count().max(1);
                if channels.len() < count {
                    channels.resize_with(count, Vec::new);
                }

                let mut sample_buf = SampleBuffer::<f32>::new(duration, spec);
                sample_buf.copy_interleaved_ref(decoded);

                for frame in sample_buf.samples().chunks(count) {
                    for (channel, &sample) in channels.iter_mut().zip(frame) {
                        channel.push(sample);
                    }
                }
            }
            Err(symphonia::core::errors::Error::DecodeError(_)) => {
                debug!("Decode error encountered, skipping packet");
                continue;
            }
            Err(symphonia::core::errors::Error::ResetRequired) => {
                debug!("Decoder reset required during decode");
                continue;
            }
            Err(e) => {
                return Err(anyhow::anyhow!("Decode error: {}", e));
            }
        }
    }

    info!(
        "Loaded {} channel(s) of {} samples",
        channels.len(),
        channels.first().map_or(0, Vec::len)
    );
    Ok((channels, sample_rate))
}

/// Writes planar `channels` as an interleaved 16-bit PCM WAV file.
pub fn save_audio<P: AsRef<Path>>(path: P, channels: &[Vec<f32>], sample_rate: u32) -> Result<()> {
    let path = path.as_ref();
    info!("Saving audio to {}", path.display());

    let file = File::create(path)
        .with_context(|| format!("Failed to create audio file: {}", path.display()))?;
    write_wav(&mut BufWriter::new(file), channels, sample_rate)
}

fn write_wav<W: Write>(out: &mut W, channels: &[Vec<f32>], sample_rate: u32) -> Result<()> {
    let num_channels = channels.len().max(1) as u16;
    let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
    let bits_per_sample = 16u16;
    let byte_rate = sample_rate * num_channels as u32 * (bits_per_sample / 8) as u32;
    let block_align = num_channels * (bits_per_sample / 8);
    let data_size = frames * block_align as usize;

    debug!("Writing WAV: channels={}, bits={}, rate={}, size={}", num_channels, bits_per_sample, sample_rate, data_size);

    out.write_all(b"RIFF")?;
    out.write_all(&((36 + data_size) as u32).to_le_bytes())?;
    out.write_all(b"WAVE")?;

    out.write_all(b"fmt ")?;
    out.write_all(&16u32.to_le_bytes())?;
    out.write_all(&1u16.to_le_bytes())?;
    out.write_all(&num_channels.to_le_bytes())?;
    out.write_all(&sample_rate.to_le_bytes())?;
    out.write_all(&byte_rate.to_le_bytes())?;
    out.write_all(&block_align.to_le_bytes())?;
    out.write_all(&bits_per_sample.to_le_bytes())?;

    out.write_all(b"data")?;
    out.write_all(&(data_size as u32).to_le_bytes())?;

    for i in 0..frames {
        for channel in channels {
            let clamped = channel[i].clamp(-1.0, 1.0);
            let int_sample = (clamped * 32767.0) as i16;
            out.write_all(&int_sample.to_le_bytes())?;
        }
    }
    out.flush()?;

    Ok(())
}
