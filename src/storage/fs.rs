//! Filesystem-backed asset storage.
//!
//! Layout under the storage root:
//! - `audio/<uuid>.<format>`
//! - `covers/<uuid>.<format>`

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use id3::{Tag, TagLike, Version};

use super::{AssetStorage, AudioTags};
use crate::error::{DaemonError, Result};

const AUDIO_DIR: &str = "audio";
const COVERS_DIR: &str = "covers";

pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Creates the storage directories if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in [AUDIO_DIR, COVERS_DIR] {
            let path = root.join(dir);
            std::fs::create_dir_all(&path)
                .map_err(|e| DaemonError::storage(format!("Cannot create {}", path.display()), e))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, dir: &str, name: &str) -> Result<PathBuf> {
        let is_plain = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\'])
            && Path::new(name).file_name().is_some_and(|f| f == name);
        if !is_plain {
            return Err(DaemonError::invalid_params(format!(
                "Invalid asset name: {:?}",
                name
            )));
        }
        Ok(self.root.join(dir).join(name))
    }

    async fn write_new(&self, dir: &str, data: &[u8], format: &str) -> Result<(String, PathBuf)> {
        let extension = sanitize_extension(format);
        let name = format!("{}.{}", uuid::Uuid::new_v4().simple(), extension);
        let path = self.resolve(dir, &name)?;
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| DaemonError::storage(format!("Cannot write {}", path.display()), e))?;
        Ok((name, path))
    }

    async fn remove(&self, dir: &str, name: &str) -> Result<bool> {
        let path = self.resolve(dir, name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DaemonError::storage(
                format!("Cannot remove {}", path.display()),
                e,
            )),
        }
    }
}

fn sanitize_extension(format: &str) -> String {
    let cleaned: String = format
        .trim()
        .trim_start_matches('.')
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    if cleaned.is_empty() {
        "bin".to_string()
    } else {
        cleaned
    }
}

fn build_tag(tags: &AudioTags) -> Tag {
    let mut tag = Tag::new();
    tag.set_title(tags.title.as_str());
    tag.set_artist(tags.artist.as_str());
    tag.set_album(tags.album.as_str());
    if let Some(genre) = &tags.genre {
        tag.set_genre(genre.as_str());
    }
    if let Some(comment) = &tags.comment {
        tag.add_frame(id3::frame::Comment {
            lang: "eng".to_string(),
            description: String::new(),
            text: comment.clone(),
        });
    }
    tag
}

/// Embeds ID3 tags into a written WAV or MP3 file.
fn write_tags(path: &Path, format: &str, tags: &AudioTags) -> std::result::Result<bool, id3::Error> {
    let tag = build_tag(tags);
    match format {
        "wav" => tag.write_to_wav_path(path, Version::Id3v24).map(|_| true),
        "mp3" => tag.write_to_path(path, Version::Id3v24).map(|_| true),
        _ => Ok(false),
    }
}

#[async_trait]
impl AssetStorage for FsStorage {
    async fn save_audio_with_metadata(
        &self,
        data: &[u8],
        format: &str,
        tags: &AudioTags,
    ) -> Result<String> {
        let format = sanitize_extension(format);
        let (name, path) = self.write_new(AUDIO_DIR, data, &format).await?;

        let tag_path = path.clone();
        let tag_format = format.clone();
        let tag_values = tags.clone();
        let tagged =
            tokio::task::spawn_blocking(move || write_tags(&tag_path, &tag_format, &tag_values)).await;

        match tagged {
            Ok(Ok(true)) => tracing::debug!(file = %name, "Embedded audio tags"),
            Ok(Ok(false)) => {}
            Ok(Err(e)) => {
                tracing::warn!(file = %name, error = %e, "Tagging failed, keeping untagged audio");
                tokio::fs::write(&path, data).await.map_err(|e| {
                    DaemonError::storage(format!("Cannot rewrite {}", path.display()), e)
                })?;
            }
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "Tagging task failed, keeping untagged audio");
                tokio::fs::write(&path, data).await.map_err(|e| {
                    DaemonError::storage(format!("Cannot rewrite {}", path.display()), e)
                })?;
            }
        }

        Ok(name)
    }

    async fn save_cover(&self, data: &[u8], format: &str) -> Result<String> {
        let (name, _) = self.write_new(COVERS_DIR, data, format).await?;
        Ok(name)
    }

    async fn delete_audio(&self, name: &str) -> Result<bool> {
        self.remove(AUDIO_DIR, name).await
    }

    async fn delete_cover(&self, name: &str) -> Result<bool> {
        self.remove(COVERS_DIR, name).await
    }

    fn audio_path(&self, name: &str) -> Result<PathBuf> {
        self.resolve(AUDIO_DIR, name)
    }

    fn cover_path(&self, name: &str) -> Result<PathBuf> {
        self.resolve(COVERS_DIR, name)
    }
}
