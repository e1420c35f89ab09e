//! Core types for the songweaver daemon.
//!
//! - [`GenerationJob`]: a song generation tracked through its state machine
//! - [`GenerationParams`]: what a client submits to create a generation

mod job;
mod request;

pub use job::{progress, GenerationJob, JobStatus, JobUpdate, Lineage, LineageKind, NewJob};
pub use request::{
    validate_duration, validate_prompt, CoverOverrides, ExtendParams, GenerationParams,
    RemixOverrides, MAX_DURATION, MAX_PROMPT_CHARS, MAX_TEMPO, MIN_DURATION, MIN_TEMPO,
};
