//! Audio handling for composite pipelines.
//!
//! WAV decode/encode plus linear resampling and two-track mixing.

pub mod mix;
pub mod wav;

pub use mix::{mix_tracks, mix_wav, resample_linear, MixWeights};
pub use wav::{decode_wav_mono, samples_to_duration, write_wav_to_buffer, MonoAudio};
