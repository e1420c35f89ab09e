//! Fixed system prompts and message builders for text backends.

use super::{AudioRequest, ChatMessage, CoverMetadata};

pub const DEFAULT_TEMPERATURE: f32 = 0.8;
pub const COVER_TEMPERATURE: f32 = 0.8;
pub const MAX_TOKENS: u32 = 2048;

/// Lyrics excerpt length fed into cover prompts.
const COVER_LYRICS_EXCERPT: usize = 300;

pub const LYRICS_SYSTEM_PROMPT: &str = "You are a professional songwriter. \
Generate song lyrics based on the user's request. \
Output structured lyrics with clear [Verse], [Chorus], [Bridge] markers. \
Match the requested genre, mood, and language. \
Be creative but coherent.";

pub const PROMPT_ENHANCEMENT_SYSTEM_PROMPT: &str = "You are a music production assistant. \
Given a brief user description, produce a detailed music generation prompt. \
Include: genre, sub-genre, mood, tempo (BPM), key, instrumentation, \
dynamics, and production style. Format as a single descriptive paragraph \
optimized for AI music generation models.";

pub const COVER_ART_SYSTEM_PROMPT: &str = "You are an album cover art director. \
Given song metadata (title, genre, mood, lyrics keywords), generate a detailed \
image generation prompt for creating album cover art. The prompt should describe \
a visually striking image suitable for an album cover. \
Respond with ONLY the image prompt text, nothing else.";

pub fn enhancement_messages(
    prompt: &str,
    genre: Option<&str>,
    mood: Option<&str>,
) -> Vec<ChatMessage> {
    let mut user = format!("Enhance this music description: {}", prompt);
    if let Some(genre) = genre {
        user.push_str(&format!("\nGenre: {}", genre));
    }
    if let Some(mood) = mood {
        user.push_str(&format!("\nMood: {}", mood));
    }
    vec![
        ChatMessage::system(PROMPT_ENHANCEMENT_SYSTEM_PROMPT),
        ChatMessage::user(user),
    ]
}

pub fn lyrics_messages(
    prompt: &str,
    genre: Option<&str>,
    mood: Option<&str>,
    language: &str,
) -> Vec<ChatMessage> {
    let mut user = format!("Write song lyrics about: {}", prompt);
    if let Some(genre) = genre {
        user.push_str(&format!("\nGenre: {}", genre));
    }
    if let Some(mood) = mood {
        user.push_str(&format!("\nMood: {}", mood));
    }
    user.push_str(&format!("\nLanguage: {}", language));
    vec![ChatMessage::system(LYRICS_SYSTEM_PROMPT), ChatMessage::user(user)]
}

pub fn cover_prompt_messages(meta: &CoverMetadata) -> Vec<ChatMessage> {
    let mut parts = vec!["Generate an album cover art prompt for:".to_string()];
    if let Some(title) = &meta.title {
        parts.push(format!("Title: {}", title));
    }
    if let Some(genre) = &meta.genre {
        parts.push(format!("Genre: {}", genre));
    }
    if let Some(mood) = &meta.mood {
        parts.push(format!("Mood: {}", mood));
    }
    if let Some(lyrics) = &meta.lyrics {
        let excerpt: String = lyrics.chars().take(COVER_LYRICS_EXCERPT).collect();
        parts.push(format!("Lyrics excerpt:\n{}", excerpt));
    }
    vec![
        ChatMessage::system(COVER_ART_SYSTEM_PROMPT),
        ChatMessage::user(parts.join("\n")),
    ]
}

/// Composes the text prompt handed to music models from structured fields.
pub fn compose_music_prompt(request: &AudioRequest) -> String {
    let mut parts: Vec<String> = Vec::new();

    if !request.prompt.trim().is_empty() {
        parts.push(request.prompt.trim().to_string());
    }
    if let Some(genre) = &request.genre {
        parts.push(format!("{} style", genre));
    }
    if let Some(mood) = &request.mood {
        parts.push(format!("{} mood", mood));
    }
    if let Some(tempo) = request.tempo {
        parts.push(format!("{} BPM", tempo));
    }
    if let Some(key) = &request.key {
        parts.push(format!("in the key of {}", key));
    }
    if !request.instruments.is_empty() {
        parts.push(format!("featuring {}", request.instruments.join(", ")));
    }
    if request.instrumental {
        parts.push("instrumental, no vocals".to_string());
    }

    if parts.is_empty() {
        "instrumental music".to_string()
    } else {
        parts.join(", ")
    }
}
