//! WAV encoding and decoding for pipeline audio.
//!
//! Backends hand back WAV buffers in whatever layout they like; everything
//! is decoded to mono f32 for mixing and re-encoded as 32-bit float mono.

use std::io::Cursor;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::error::{DaemonError, Result};

/// Channel count of encoded output.
pub const CHANNELS: u16 = 1;

/// Decoded mono audio.
#[derive(Debug, Clone, PartialEq)]
pub struct MonoAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl MonoAudio {
    /// Duration in seconds.
    pub fn duration(&self) -> f32 {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }
}

/// Decodes a WAV buffer and downmixes it to mono by averaging channels.
///
/// Integer PCM is scaled to [-1.0, 1.0].
pub fn decode_wav_mono(bytes: &[u8]) -> Result<MonoAudio> {
    let mut reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(DaemonError::audio_codec("WAV header declares zero channels"));
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    let channels = spec.channels as usize;
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok(MonoAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Writes mono samples to an in-memory 32-bit float WAV buffer.
pub fn write_wav_to_buffer(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: CHANNELS,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 4));
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for sample in samples {
            writer.write_sample(*sample)?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// Calculates the duration of audio in seconds from sample count.
pub fn samples_to_duration(sample_count: usize, sample_rate: u32) -> f32 {
    if sample_rate == 0 {
        return 0.0;
    }
    sample_count as f32 / sample_rate as f32
}
