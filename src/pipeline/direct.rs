//! Single-backend pass-through pipeline.

use async_trait::async_trait;

use super::{require_role, Pipeline, RoleBindings};
use crate::error::{DaemonError, ErrorCode, Result};
use crate::providers::router::MODEL_ROLE;
use crate::providers::{AudioOutput, AudioRequest};

pub(super) const NAME: &str = "direct";

/// Delegates the request unchanged to the backend bound as `model`.
pub struct DirectPipeline;

#[async_trait]
impl Pipeline for DirectPipeline {
    async fn run(&self, bindings: &RoleBindings, request: &AudioRequest) -> Result<AudioOutput> {
        let backend = require_role(bindings, NAME, MODEL_ROLE)?;
        if bindings.len() != 1 {
            let mut roles: Vec<&str> = bindings.keys().map(String::as_str).collect();
            roles.sort_unstable();
            return Err(DaemonError::new(
                ErrorCode::MissingRole,
                format!(
                    "Pipeline '{}' takes exactly one '{}' backend, got roles: {}",
                    NAME,
                    MODEL_ROLE,
                    roles.join(", ")
                ),
            ));
        }
        backend.generate(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{audio_request, StubAudio};
    use std::sync::Arc;

    #[tokio::test]
    async fn delegates_to_model() {
        let stub = Arc::new(StubAudio::new("gpu:a"));
        let mut bindings = RoleBindings::new();
        bindings.insert(MODEL_ROLE.to_string(), stub.clone() as _);

        let request = audio_request();
        DirectPipeline.run(&bindings, &request).await.unwrap();
        assert_eq!(stub.calls(), 1);
        assert_eq!(stub.last_request().unwrap(), request);
    }

    #[tokio::test]
    async fn missing_model_role() {
        let err = DirectPipeline
            .run(&RoleBindings::new(), &audio_request())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingRole);
    }

    #[tokio::test]
    async fn extra_roles_rejected() {
        let model = Arc::new(StubAudio::new("gpu:a"));
        let vocal = Arc::new(StubAudio::new("gpu:v"));
        let mut bindings = RoleBindings::new();
        bindings.insert(MODEL_ROLE.to_string(), model.clone() as _);
        bindings.insert("vocal".to_string(), vocal.clone() as _);

        let err = DirectPipeline
            .run(&bindings, &audio_request())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingRole);
        assert!(err.message.contains("vocal"));
        assert_eq!(model.calls(), 0);
        assert_eq!(vocal.calls(), 0);
    }
}
