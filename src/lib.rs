//! songweaver: AI song generation daemon.
//!
//! Accepts song requests, enriches them through text backends, routes audio
//! synthesis to a configured backend or composite pipeline, and tracks each
//! job through a persisted state machine while a supervised background task
//! does the work.
//!
//! # Modules
//!
//! - [`types`]: Jobs, their state machine and request parameters
//! - [`config`]: Runtime configuration (DaemonConfig)
//! - [`error`]: Error types and codes (DaemonError, ErrorCode)
//! - [`providers`]: Text, audio and image backends plus capability routing
//! - [`pipeline`]: Strategies that turn a request into one audio track
//! - [`audio`]: WAV decoding, resampling and mixing
//! - [`store`]: Job persistence
//! - [`storage`]: Audio and cover art files
//! - [`generation`]: The orchestrator and its background tasks
//! - [`rpc`]: JSON-RPC server over stdio
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use songweaver::{
//!     config::DaemonConfig,
//!     generation::{Orchestrator, OrchestratorSettings},
//!     pipeline::PipelineRegistry,
//!     providers::ProviderRouter,
//!     storage::FsStorage,
//!     store::MemoryJobStore,
//!     types::GenerationParams,
//! };
//!
//! let config = DaemonConfig::from_env()?;
//! let orchestrator = Orchestrator::new(
//!     Arc::new(MemoryJobStore::new()),
//!     Arc::new(FsStorage::new(config.effective_storage_path())?),
//!     Arc::new(ProviderRouter::from_config(&config)?),
//!     Arc::new(PipelineRegistry::with_builtins(config.mix_weights())),
//!     OrchestratorSettings::from_config(&config),
//! );
//!
//! let job = orchestrator
//!     .create_generation(GenerationParams::new("dusty boom bap with vinyl crackle"))
//!     .await?;
//! println!("poll token {}", job.token);
//! ```

pub mod audio;
pub mod cli;
pub mod config;
pub mod error;
pub mod generation;
pub mod pipeline;
pub mod providers;
pub mod rpc;
pub mod storage;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export commonly used types at crate root for convenience
pub use config::DaemonConfig;
pub use error::{DaemonError, ErrorCode, Result};
pub use generation::Orchestrator;
pub use types::{GenerationJob, GenerationParams, JobStatus};
