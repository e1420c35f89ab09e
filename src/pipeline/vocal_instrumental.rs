//! Instrumental + vocal pipeline.
//!
//! Runs an accompaniment model and a vocal model concurrently, then mixes the
//! two tracks into one WAV.

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{output_bytes, require_role, Pipeline, RoleBindings};
use crate::audio::{mix_wav, MixWeights};
use crate::error::{DaemonError, Result};
use crate::providers::{AudioOutput, AudioRequest};

pub(super) const NAME: &str = "vocal_instrumental";

pub const INSTRUMENTAL_ROLE: &str = "instrumental";
pub const VOCAL_ROLE: &str = "vocal";

pub struct VocalInstrumentalPipeline {
    weights: MixWeights,
}

impl VocalInstrumentalPipeline {
    pub fn new(weights: MixWeights) -> Self {
        Self { weights }
    }
}

#[async_trait]
impl Pipeline for VocalInstrumentalPipeline {
    async fn run(&self, bindings: &RoleBindings, request: &AudioRequest) -> Result<AudioOutput> {
        let instrumental = require_role(bindings, NAME, INSTRUMENTAL_ROLE)?;
        let vocal = require_role(bindings, NAME, VOCAL_ROLE)?;

        let instrumental_request = request.instrumental_variant();

        // try_join drops the sibling future as soon as either side fails
        let (instr_out, vocal_out) = tokio::try_join!(
            instrumental.generate(&instrumental_request),
            vocal.generate(request),
        )?;

        let duration = instr_out.duration.max(vocal_out.duration);
        let instr_bytes = output_bytes(instr_out, INSTRUMENTAL_ROLE).await?;
        let vocal_bytes = output_bytes(vocal_out, VOCAL_ROLE).await?;

        let weights = self.weights;
        let (mixed, sample_rate) =
            tokio::task::spawn_blocking(move || mix_wav(&instr_bytes, &vocal_bytes, weights))
                .await
                .map_err(|e| DaemonError::audio_codec(format!("Mixing task failed: {}", e)))??;

        tracing::debug!(sample_rate, bytes = mixed.len(), "Mixed vocal and instrumental tracks");

        let mut metadata = BTreeMap::new();
        metadata.insert("pipeline".to_string(), NAME.to_string());
        metadata.insert(
            "instrumental_model".to_string(),
            instrumental.model_id().to_string(),
        );
        metadata.insert("vocal_model".to_string(), vocal.model_id().to_string());

        Ok(AudioOutput {
            audio_data: Some(mixed),
            audio_path: None,
            sample_rate,
            duration,
            format: "wav".to_string(),
            metadata,
        })
    }
}
