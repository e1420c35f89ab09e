//! Error types for the songweaver daemon.
//!
//! Every fallible operation in the crate returns a [`DaemonError`] tagged with
//! an [`ErrorCode`]. The code decides how a failure is surfaced: client errors
//! are never retried, configuration errors map to "service unavailable", and
//! enrichment failures are logged and dropped by the orchestrator.

use std::fmt;

/// Maximum number of characters stored in a failed job's `error_message`.
pub const ERROR_MESSAGE_LIMIT: usize = 500;

/// Error codes returned by the daemon.
///
/// These codes are used in JSON-RPC error responses and allow clients
/// to programmatically handle specific error conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Referenced job or parent job does not exist.
    NotFound,

    /// No backend is registered for the requested capability route.
    NotConfigured,

    /// Cover art was requested but no image backend is configured.
    NoImageBackend,

    /// Backend ran out of a hard resource (typically accelerator memory).
    ResourceExhausted,

    /// Job was cancelled by the user.
    Cancelled,

    /// Job exceeded the configured wall-clock timeout.
    TimedOut,

    /// Best-effort enrichment (prompt, lyrics, cover art) failed.
    EnrichmentFailed,

    /// Requested pipeline name is not registered.
    UnknownPipeline,

    /// Pipeline was invoked without a required role binding.
    MissingRole,

    /// Prompt text is empty or too long.
    InvalidPrompt,

    /// Requested duration is outside the accepted range.
    InvalidDuration,

    /// Some other request field is invalid.
    InvalidParams,

    /// Store rejected a status transition (e.g. out of a terminal state).
    InvalidTransition,

    /// Backend call failed for a reason other than resource exhaustion.
    BackendFailed,

    /// Audio buffer could not be decoded or encoded.
    AudioCodec,

    /// Asset file could not be written, read or removed.
    StorageFailed,

    /// Configuration file is missing, unreadable or inconsistent.
    ConfigInvalid,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::NotConfigured => "NOT_CONFIGURED",
            ErrorCode::NoImageBackend => "NO_IMAGE_BACKEND",
            ErrorCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::TimedOut => "TIMED_OUT",
            ErrorCode::EnrichmentFailed => "ENRICHMENT_FAILED",
            ErrorCode::UnknownPipeline => "UNKNOWN_PIPELINE",
            ErrorCode::MissingRole => "MISSING_ROLE",
            ErrorCode::InvalidPrompt => "INVALID_PROMPT",
            ErrorCode::InvalidDuration => "INVALID_DURATION",
            ErrorCode::InvalidParams => "INVALID_PARAMS",
            ErrorCode::InvalidTransition => "INVALID_TRANSITION",
            ErrorCode::BackendFailed => "BACKEND_FAILED",
            ErrorCode::AudioCodec => "AUDIO_CODEC",
            ErrorCode::StorageFailed => "STORAGE_FAILED",
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
        }
    }

    /// Returns a human-readable description of the error.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "Referenced generation does not exist",
            ErrorCode::NotConfigured => "No backend is configured for the requested capability",
            ErrorCode::NoImageBackend => "No image generation backend is configured",
            ErrorCode::ResourceExhausted => "Backend ran out of memory during generation",
            ErrorCode::Cancelled => "Generation was cancelled",
            ErrorCode::TimedOut => "Generation exceeded the time limit",
            ErrorCode::EnrichmentFailed => "Optional enrichment step failed",
            ErrorCode::UnknownPipeline => "Audio pipeline is not registered",
            ErrorCode::MissingRole => "Audio pipeline is missing a backend role",
            ErrorCode::InvalidPrompt => "Prompt must be non-empty and at most 2000 characters",
            ErrorCode::InvalidDuration => "Duration must be between 1 and 300 seconds",
            ErrorCode::InvalidParams => "Request parameters are invalid",
            ErrorCode::InvalidTransition => "Job status transition is not allowed",
            ErrorCode::BackendFailed => "Generation backend returned an error",
            ErrorCode::AudioCodec => "Audio data could not be decoded or encoded",
            ErrorCode::StorageFailed => "Asset storage operation failed",
            ErrorCode::ConfigInvalid => "Configuration is invalid",
        }
    }

    /// Returns a recovery hint suggesting how to resolve this error.
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "Check the generation id or task token",
            ErrorCode::NotConfigured => {
                "Add a provider and a router entry for this capability to the config file, \
                 then reload the configuration"
            }
            ErrorCode::NoImageBackend => {
                "Configure an [image] provider and router entry to enable cover art"
            }
            ErrorCode::ResourceExhausted => {
                "Try reducing the duration, or wait for other generations to finish"
            }
            ErrorCode::Cancelled => "Submit a new generation to try again",
            ErrorCode::TimedOut => {
                "Try a shorter duration or raise generation.timeout_secs in the config"
            }
            ErrorCode::EnrichmentFailed => "The primary result is unaffected; retry enrichment later",
            ErrorCode::UnknownPipeline => {
                "Set generation.pipeline to a registered pipeline (see list_pipelines)"
            }
            ErrorCode::MissingRole => {
                "Bind every role the pipeline needs under [audio.pipelines.<name>.roles]"
            }
            ErrorCode::InvalidPrompt => "Provide a descriptive prompt (e.g. 'dreamy synthpop about the sea')",
            ErrorCode::InvalidDuration => "Specify a duration between 1 and 300 seconds",
            ErrorCode::InvalidParams => "Fix the offending field and resubmit",
            ErrorCode::InvalidTransition => "The job already reached a terminal state",
            ErrorCode::BackendFailed => "Check the backend logs and retry the generation",
            ErrorCode::AudioCodec => "Make sure backends return WAV audio",
            ErrorCode::StorageFailed => "Check free disk space and permissions of the storage directory",
            ErrorCode::ConfigInvalid => "Fix the configuration file and reload",
        }
    }

    /// Returns true for errors caused by the request itself.
    ///
    /// Client errors are reported back as-is and never retried.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ErrorCode::NotFound
                | ErrorCode::InvalidPrompt
                | ErrorCode::InvalidDuration
                | ErrorCode::InvalidParams
        )
    }

    /// Returns true if the user may reasonably resubmit after adjusting the request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::ResourceExhausted | ErrorCode::TimedOut | ErrorCode::BackendFailed
        )
    }

    /// JSON-RPC error code. Application codes live in the -32000 range;
    /// bad parameters use the standard -32602.
    pub fn rpc_code(&self) -> i32 {
        match self {
            ErrorCode::NotFound => -32000,
            ErrorCode::NotConfigured => -32001,
            ErrorCode::NoImageBackend => -32002,
            ErrorCode::ResourceExhausted => -32003,
            ErrorCode::Cancelled => -32004,
            ErrorCode::TimedOut => -32005,
            ErrorCode::EnrichmentFailed => -32006,
            ErrorCode::UnknownPipeline => -32007,
            ErrorCode::MissingRole => -32008,
            ErrorCode::InvalidPrompt => -32009,
            ErrorCode::InvalidDuration => -32010,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InvalidTransition => -32011,
            ErrorCode::BackendFailed => -32012,
            ErrorCode::AudioCodec => -32013,
            ErrorCode::StorageFailed => -32014,
            ErrorCode::ConfigInvalid => -32015,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for daemon operations.
#[derive(Debug)]
pub struct DaemonError {
    /// The error code identifying the type of error.
    pub code: ErrorCode,
    /// Human-readable error message with context.
    pub message: String,
    /// Optional underlying cause of the error.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DaemonError {
    /// Creates a new DaemonError with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new DaemonError with an underlying cause.
    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a NOT_FOUND error for a generation id.
    pub fn generation_not_found(id: i64) -> Self {
        Self::new(ErrorCode::NotFound, format!("Generation {} not found", id))
    }

    /// Creates a NOT_FOUND error for a task token.
    pub fn task_not_found(token: &str) -> Self {
        Self::new(ErrorCode::NotFound, format!("Task {} not found", token))
    }

    /// Creates a NOT_CONFIGURED error for a capability route.
    pub fn not_configured(capability: &str, route: &str) -> Self {
        Self::new(
            ErrorCode::NotConfigured,
            format!("No {} backend registered for route '{}'", capability, route),
        )
    }

    /// Creates a NO_IMAGE_BACKEND error.
    pub fn no_image_backend() -> Self {
        Self::new(ErrorCode::NoImageBackend, "No image backend configured")
    }

    /// Creates a RESOURCE_EXHAUSTED error.
    pub fn resource_exhausted(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::ResourceExhausted, reason)
    }

    /// Creates a CANCELLED error.
    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "Cancelled by user")
    }

    /// Creates a TIMED_OUT error.
    pub fn timed_out() -> Self {
        Self::new(ErrorCode::TimedOut, "Generation timed out")
    }

    /// Creates an ENRICHMENT_FAILED error.
    pub fn enrichment_failed(step: &str, reason: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::EnrichmentFailed,
            format!("{} failed: {}", step, reason),
        )
    }

    /// Creates an UNKNOWN_PIPELINE error.
    pub fn unknown_pipeline(name: &str, available: &[String]) -> Self {
        Self::new(
            ErrorCode::UnknownPipeline,
            format!(
                "Unknown pipeline: '{}'. Available: [{}]",
                name,
                available.join(", ")
            ),
        )
    }

    /// Creates a MISSING_ROLE error.
    pub fn missing_role(pipeline: &str, role: &str) -> Self {
        Self::new(
            ErrorCode::MissingRole,
            format!("Pipeline '{}' requires a '{}' backend", pipeline, role),
        )
    }

    /// Creates an INVALID_PROMPT error for empty prompts.
    pub fn empty_prompt() -> Self {
        Self::new(ErrorCode::InvalidPrompt, "Prompt cannot be empty")
    }

    /// Creates an INVALID_PROMPT error for prompts that are too long.
    pub fn prompt_too_long(len: usize, max: usize) -> Self {
        Self::new(
            ErrorCode::InvalidPrompt,
            format!("Prompt too long: {} characters (maximum {})", len, max),
        )
    }

    /// Creates an INVALID_DURATION error.
    pub fn invalid_duration(duration: f32) -> Self {
        Self::new(
            ErrorCode::InvalidDuration,
            format!(
                "Invalid duration: {} seconds (must be between 1 and 300)",
                duration
            ),
        )
    }

    /// Creates an INVALID_PARAMS error.
    pub fn invalid_params(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, reason)
    }

    /// Creates an INVALID_TRANSITION error.
    pub fn invalid_transition(token: &str, from: &str, to: &str) -> Self {
        Self::new(
            ErrorCode::InvalidTransition,
            format!("Job {} cannot move from {} to {}", token, from, to),
        )
    }

    /// Creates a BACKEND_FAILED error.
    pub fn backend_failed(backend: &str, reason: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::BackendFailed,
            format!("{}: {}", backend, reason),
        )
    }

    /// Creates an AUDIO_CODEC error.
    pub fn audio_codec(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::AudioCodec, reason)
    }

    /// Creates a STORAGE_FAILED error wrapping an I/O error.
    pub fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        let context = context.into();
        Self::with_source(
            ErrorCode::StorageFailed,
            format!("{}: {}", context, source),
            source,
        )
    }

    /// Creates a CONFIG_INVALID error.
    pub fn config_invalid(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigInvalid, reason)
    }

    /// Renders the text recorded on a failed job.
    ///
    /// Falls back to the code name when the message is empty and truncates
    /// to `limit` characters. Resource exhaustion carries the recovery hint
    /// so users know to shorten the request.
    pub fn job_message(&self, limit: usize) -> String {
        let text = if self.message.trim().is_empty() {
            self.code.as_str().to_string()
        } else if self.code == ErrorCode::ResourceExhausted {
            format!("{}. {}", self.message, self.code.recovery_hint())
        } else {
            self.message.clone()
        };
        truncate_chars(&text, limit)
    }
}

/// Truncates a string to at most `limit` characters on a char boundary.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}. Recovery: {}",
            self.code,
            self.message,
            self.code.recovery_hint()
        )
    }
}

impl std::error::Error for DaemonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<reqwest::Error> for DaemonError {
    fn from(err: reqwest::Error) -> Self {
        let message = match err.url() {
            Some(url) => format!("HTTP request to {} failed: {}", url, err),
            None => format!("HTTP request failed: {}", err),
        };
        Self::with_source(ErrorCode::BackendFailed, message, err)
    }
}

impl From<hound::Error> for DaemonError {
    fn from(err: hound::Error) -> Self {
        Self::with_source(ErrorCode::AudioCodec, format!("WAV error: {}", err), err)
    }
}

/// Result type alias using DaemonError.
pub type Result<T> = std::result::Result<T, DaemonError>;
