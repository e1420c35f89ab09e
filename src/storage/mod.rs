//! Asset file storage for generated audio and cover art.
//!
//! Jobs only ever hold opaque basenames; [`AssetStorage`] maps them to paths.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;

mod fs;

pub use fs::FsStorage;

/// Metadata embedded in saved audio files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioTags {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub genre: Option<String>,
    pub comment: Option<String>,
}

/// Length of the prompt prefix used as a fallback title.
const TITLE_FROM_PROMPT_CHARS: usize = 50;

impl AudioTags {
    /// Tags for a song: explicit title or the start of the prompt.
    pub fn for_song(title: Option<&str>, prompt: &str, genre: Option<&str>) -> Self {
        let title = match title.map(str::trim).filter(|t| !t.is_empty()) {
            Some(title) => title.to_string(),
            None => prompt.chars().take(TITLE_FROM_PROMPT_CHARS).collect(),
        };
        Self {
            title,
            artist: "Songweaver AI".to_string(),
            album: "Songweaver Generations".to_string(),
            genre: genre.map(str::to_string),
            comment: Some(prompt.to_string()),
        }
    }
}

#[async_trait]
pub trait AssetStorage: Send + Sync {
    /// Writes audio bytes, tagging them when the format supports it, and
    /// returns the new file's basename.
    async fn save_audio_with_metadata(
        &self,
        data: &[u8],
        format: &str,
        tags: &AudioTags,
    ) -> Result<String>;

    async fn save_cover(&self, data: &[u8], format: &str) -> Result<String>;

    /// Removes an audio file; `false` if it did not exist.
    async fn delete_audio(&self, name: &str) -> Result<bool>;

    async fn delete_cover(&self, name: &str) -> Result<bool>;

    fn audio_path(&self, name: &str) -> Result<PathBuf>;

    fn cover_path(&self, name: &str) -> Result<PathBuf>;
}
