//! JSON-RPC types for the daemon protocol.

use serde::{Deserialize, Serialize};

use crate::error::DaemonError;
use crate::pipeline::PipelineInfo;
use crate::providers::BackendDescriptor;
use crate::types::GenerationJob;

/// JSON-RPC version constant.
pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC request ID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RequestId {
    Integer(i64),
    String(String),
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Integer(id)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        RequestId::String(id)
    }
}

/// A JSON-RPC request wrapper.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub id: RequestId,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A JSON-RPC response wrapper.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse<T: Serialize> {
    pub jsonrpc: &'static str,
    pub id: RequestId,
    pub result: T,
}

impl<T: Serialize> JsonRpcResponse<T> {
    pub fn new(id: RequestId, result: T) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result,
        }
    }
}

/// A JSON-RPC error response.
#[derive(Debug, Serialize)]
pub struct JsonRpcErrorResponse {
    pub jsonrpc: &'static str,
    pub id: Option<RequestId>,
    pub error: JsonRpcError,
}

impl JsonRpcErrorResponse {
    pub fn new(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            error,
        }
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonRpcErrorData>,
}

/// Extended error data for application-specific errors.
#[derive(Debug, Serialize)]
pub struct JsonRpcErrorData {
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<String>,
}

impl JsonRpcError {
    /// Creates a parse error (-32700).
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: -32700,
            message: message.into(),
            data: None,
        }
    }

    /// Creates an invalid request error (-32600).
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
            data: None,
        }
    }

    /// Creates a method not found error (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {}", method),
            data: None,
        }
    }

    /// Creates an invalid params error (-32602).
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }

    /// Creates an internal error (-32603).
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            code: -32603,
            message: message.into(),
            data: None,
        }
    }
}

impl From<DaemonError> for JsonRpcError {
    fn from(err: DaemonError) -> Self {
        Self {
            code: err.code.rpc_code(),
            message: err.code.description().to_string(),
            data: Some(JsonRpcErrorData {
                error_code: err.code.as_str().to_string(),
                details: Some(err.message),
                recovery: Some(err.code.recovery_hint().to_string()),
            }),
        }
    }
}

// ============================================================================
// Method parameters
// ============================================================================

/// Parameters addressing a job by numeric id.
#[derive(Debug, Deserialize)]
pub struct IdParams {
    pub id: i64,
}

/// Parameters addressing a job by token.
#[derive(Debug, Deserialize)]
pub struct TokenParams {
    pub token: String,
}

/// Parameters for `remix`: the parent id plus any overridden fields.
#[derive(Debug, Deserialize)]
pub struct RemixParams {
    pub parent_id: i64,
    #[serde(flatten)]
    pub overrides: crate::types::RemixOverrides,
}

/// Parameters for `generate_cover`.
#[derive(Debug, Deserialize)]
pub struct GenerateCoverParams {
    pub id: i64,
    #[serde(flatten)]
    pub overrides: crate::types::CoverOverrides,
}

// ============================================================================
// Method results
// ============================================================================

/// Response for creation methods (`generate`, `extend`, `remix`).
#[derive(Debug, Serialize)]
pub struct SubmitResult {
    pub id: i64,
    pub token: String,
    pub status: String,
    pub seed: Option<u64>,
    pub audio_provider: String,
}

impl SubmitResult {
    pub fn from_job(job: &GenerationJob) -> Self {
        Self {
            id: job.id,
            token: job.token.clone(),
            status: job.status.to_string(),
            seed: job.seed,
            audio_provider: job.audio_provider.clone(),
        }
    }
}

/// Response for `task_result`.
#[derive(Debug, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum TaskResultResponse {
    /// Job still running; poll again.
    Processing {
        status: String,
        progress: u8,
        message: String,
    },
    /// Terminal record.
    Finished { job: Box<GenerationJob> },
}

/// Response for `list_generations`.
#[derive(Debug, Serialize)]
pub struct ListResult {
    pub items: Vec<GenerationJob>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

/// Response for `get_backends`.
#[derive(Debug, Serialize)]
pub struct GetBackendsResult {
    pub backends: Vec<BackendDescriptor>,
}

/// Response for `list_pipelines`.
#[derive(Debug, Serialize)]
pub struct ListPipelinesResult {
    pub pipelines: Vec<PipelineInfo>,
    pub active: String,
}

/// Response for `generate_cover`.
#[derive(Debug, Serialize)]
pub struct CoverResult {
    pub cover_art_path: String,
    pub cover_art_prompt: String,
}

// ============================================================================
// Notifications
// ============================================================================

/// A JSON-RPC notification (no id field).
#[derive(Debug, Serialize)]
pub struct JsonRpcNotification<T: Serialize> {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: T,
}

impl<T: Serialize> JsonRpcNotification<T> {
    pub fn new(method: &'static str, params: T) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

/// Sent once when the server starts reading requests.
#[derive(Debug, Serialize)]
pub struct ReadyParams {
    pub version: &'static str,
    pub pipeline: String,
    pub backends: usize,
}
