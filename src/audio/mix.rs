//! Two-track mixing for composite pipelines.

use super::wav::{decode_wav_mono, write_wav_to_buffer, MonoAudio};
use crate::error::Result;

/// Gain applied to each track before summing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixWeights {
    pub instrumental: f32,
    pub vocal: f32,
}

impl Default for MixWeights {
    fn default() -> Self {
        Self {
            instrumental: 0.5,
            vocal: 0.7,
        }
    }
}

/// Resamples by linear interpolation onto a time-aligned grid.
///
/// Output sample `i` reads source position `i * src_rate / dst_rate`, clamped
/// to the last source sample. The output holds
/// `floor(len * dst_rate / src_rate)` samples.
pub fn resample_linear(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if samples.is_empty() || src_rate == dst_rate || src_rate == 0 || dst_rate == 0 {
        return samples.to_vec();
    }

    let out_len = (samples.len() as u64 * dst_rate as u64 / src_rate as u64) as usize;
    let step = src_rate as f64 / dst_rate as f64;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = (i as f64 * step).min(last as f64);
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let next = (idx + 1).min(last);
            samples[idx] + (samples[next] - samples[idx]) * frac
        })
        .collect()
}

/// Mixes two decoded tracks at the higher of their sample rates.
///
/// The lower-rate track is resampled, the shorter one zero-padded, and the
/// weighted sum normalized by its peak when the peak exceeds 1.0.
pub fn mix_tracks(instrumental: &MonoAudio, vocal: &MonoAudio, weights: MixWeights) -> MonoAudio {
    let target_rate = instrumental.sample_rate.max(vocal.sample_rate);
    let instr = resample_linear(&instrumental.samples, instrumental.sample_rate, target_rate);
    let voc = resample_linear(&vocal.samples, vocal.sample_rate, target_rate);

    let len = instr.len().max(voc.len());
    let mut mixed: Vec<f32> = (0..len)
        .map(|i| {
            let a = instr.get(i).copied().unwrap_or(0.0);
            let b = voc.get(i).copied().unwrap_or(0.0);
            a * weights.instrumental + b * weights.vocal
        })
        .collect();

    let peak = mixed.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak > 1.0 {
        for sample in mixed.iter_mut() {
            *sample /= peak;
        }
    }

    MonoAudio {
        samples: mixed,
        sample_rate: target_rate,
    }
}

/// Decodes two WAV buffers, mixes them, and re-encodes the result.
///
/// Returns the WAV bytes and their sample rate.
pub fn mix_wav(instrumental: &[u8], vocal: &[u8], weights: MixWeights) -> Result<(Vec<u8>, u32)> {
    let instr = decode_wav_mono(instrumental)?;
    let voc = decode_wav_mono(vocal)?;
    let mixed = mix_tracks(&instr, &voc, weights);
    let bytes = write_wav_to_buffer(&mixed.samples, mixed.sample_rate)?;
    Ok((bytes, mixed.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| i as f32 / len as f32 * 0.8).collect()
    }

    fn sine(len: usize, rate: u32) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn resample_same_rate_is_identity() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_linear(&samples, 48000, 48000), samples);
    }

    #[test]
    fn resample_interpolates_midpoints() {
        let out = resample_linear(&[0.0, 1.0], 1, 2);
        assert_eq!(out.len(), 4);
        assert!((out[0] - 0.0).abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-6);
        assert!((out[2] - 1.0).abs() < 1e-6);
        // clamped past the end
        assert!((out[3] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn mixes_32k_with_48k() {
        let instr_len = 64_000;
        let instrumental = MonoAudio {
            samples: ramp(instr_len),
            sample_rate: 32_000,
        };
        let vocal = MonoAudio {
            samples: sine(96_000, 48_000),
            sample_rate: 48_000,
        };

        let mixed = mix_tracks(&instrumental, &vocal, MixWeights::default());
        assert_eq!(mixed.sample_rate, 48_000);
        assert!(mixed.samples.len() >= 96_000);

        let peak = mixed.samples.iter().fold(0.0f32, |a, s| a.max(s.abs()));
        assert!(peak <= 1.0);

        // ramp stays below 0.8 and sine below 0.5, so no normalization kicks in
        for i in (0..96_000).step_by(997) {
            let pos = (i as f64 * 2.0 / 3.0).min((instr_len - 1) as f64);
            let expected_instr = pos as f32 / instr_len as f32 * 0.8;
            let expected = expected_instr * 0.5 + vocal.samples[i] * 0.7;
            assert!(
                (mixed.samples[i] - expected).abs() < 1e-3,
                "sample {} was {} expected {}",
                i,
                mixed.samples[i],
                expected
            );
        }
    }

    #[test]
    fn normalizes_when_clipping() {
        let loud = MonoAudio {
            samples: vec![1.0, -1.0, 0.5],
            sample_rate: 8000,
        };
        let weights = MixWeights {
            instrumental: 1.0,
            vocal: 1.0,
        };
        let mixed = mix_tracks(&loud, &loud, weights);
        assert!((mixed.samples[0] - 1.0).abs() < 1e-6);
        assert!((mixed.samples[1] + 1.0).abs() < 1e-6);
        assert!((mixed.samples[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn pads_shorter_track() {
        let short = MonoAudio {
            samples: vec![0.2],
            sample_rate: 8000,
        };
        let long = MonoAudio {
            samples: vec![0.1, 0.1, 0.1],
            sample_rate: 8000,
        };
        let mixed = mix_tracks(&short, &long, MixWeights::default());
        assert_eq!(mixed.samples.len(), 3);
        assert!((mixed.samples[2] - 0.07).abs() < 1e-6);
    }

    #[test]
    fn mix_wav_round_trips_through_codec() {
        let a = write_wav_to_buffer(&[0.2, 0.2], 16_000).unwrap();
        let b = write_wav_to_buffer(&[0.1, 0.1, 0.1, 0.1], 32_000).unwrap();
        let (bytes, rate) = mix_wav(&a, &b, MixWeights::default()).unwrap();
        assert_eq!(rate, 32_000);
        let decoded = decode_wav_mono(&bytes).unwrap();
        assert_eq!(decoded.samples.len(), 4);
    }
}
