//! Controllable stand-ins for the capability traits, shared by unit tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::audio::write_wav_to_buffer;
use crate::error::{DaemonError, Result};
use crate::providers::prompts::{COVER_ART_SYSTEM_PROMPT, LYRICS_SYSTEM_PROMPT};
use crate::providers::{
    AudioBackend, AudioOutput, AudioRequest, ChatMessage, ImageBackend, ImageOutput, ImageRequest,
    TextBackend,
};

pub fn audio_request() -> AudioRequest {
    AudioRequest {
        prompt: "warm lofi beat".to_string(),
        lyrics: None,
        duration: 2.0,
        genre: Some("lofi".to_string()),
        mood: Some("calm".to_string()),
        tempo: Some(80),
        key: None,
        instruments: vec![],
        instrumental: false,
        seed: Some(42),
        language: "en".to_string(),
    }
}

#[derive(Clone)]
enum Failure {
    None,
    Backend(String),
    Exhausted,
}

/// Audio backend returning a short sine tone.
pub struct StubAudio {
    name: String,
    sample_rate: u32,
    seconds: f32,
    amplitude: f32,
    delay: Option<Duration>,
    hang: bool,
    gate: Option<watch::Receiver<bool>>,
    failure: Failure,
    with_data: bool,
    calls: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: AtomicUsize,
    last: Mutex<Option<AudioRequest>>,
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StubAudio {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            sample_rate: 8_000,
            seconds: 0.25,
            amplitude: 0.3,
            delay: None,
            hang: false,
            gate: None,
            failure: Failure::None,
            with_data: true,
            calls: AtomicUsize::new(0),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn with_tone(mut self, sample_rate: u32, seconds: f32, amplitude: f32) -> Self {
        self.sample_rate = sample_rate;
        self.seconds = seconds;
        self.amplitude = amplitude;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Never returns.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Blocks each call until the channel carries `true`.
    pub fn with_gate(mut self, gate: watch::Receiver<bool>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Failure::Backend(message.to_string());
        self
    }

    pub fn exhausted(mut self) -> Self {
        self.failure = Failure::Exhausted;
        self
    }

    pub fn without_data(mut self) -> Self {
        self.with_data = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<AudioRequest> {
        self.last.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioBackend for StubAudio {
    fn name(&self) -> &str {
        &self.name
    }

    fn model_id(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &AudioRequest) -> Result<AudioOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(request.clone());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(Arc::clone(&self.in_flight));
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let mut gate = gate.clone();
            let _ = gate.wait_for(|open| *open).await;
        }
        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.failure {
            Failure::Backend(message) => return Err(DaemonError::backend_failed(&self.name, message)),
            Failure::Exhausted => {
                return Err(DaemonError::resource_exhausted("CUDA out of memory"))
            }
            Failure::None => {}
        }

        let len = (self.sample_rate as f32 * self.seconds) as usize;
        let samples: Vec<f32> = (0..len)
            .map(|i| {
                self.amplitude
                    * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / self.sample_rate as f32).sin()
            })
            .collect();
        let data = write_wav_to_buffer(&samples, self.sample_rate)?;

        let mut metadata = BTreeMap::new();
        metadata.insert("model".to_string(), self.name.clone());
        Ok(AudioOutput {
            audio_data: self.with_data.then_some(data),
            audio_path: None,
            sample_rate: self.sample_rate,
            duration: self.seconds,
            format: "wav".to_string(),
            metadata,
        })
    }
}

/// Text backend that answers by task, recognised from the system prompt.
pub struct StubText {
    name: String,
    models: Vec<String>,
    fail_all: bool,
    fail_cover: bool,
    calls: AtomicUsize,
}

impl StubText {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            models: vec!["stub-model".to_string()],
            fail_all: false,
            fail_cover: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail_all = true;
        self
    }

    pub fn failing_cover(mut self) -> Self {
        self.fail_cover = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextBackend for StubText {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> &[String] {
        &self.models
    }

    async fn chat(&self, _model: &str, messages: &[ChatMessage], _temperature: f32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let system = messages.first().map(|m| m.content.as_str()).unwrap_or("");
        let user = messages.last().map(|m| m.content.as_str()).unwrap_or("");

        if self.fail_all || (self.fail_cover && system == COVER_ART_SYSTEM_PROMPT) {
            return Err(DaemonError::backend_failed(&self.name, "llm unavailable"));
        }

        if system == COVER_ART_SYSTEM_PROMPT {
            Ok("  moody neon album cover  ".to_string())
        } else if system == LYRICS_SYSTEM_PROMPT {
            Ok("[Verse]\nstub lyrics".to_string())
        } else {
            Ok(format!("enhanced: {}", user))
        }
    }
}

/// Image backend returning fixed bytes.
pub struct StubImage {
    name: String,
    model: String,
    fail: bool,
    calls: AtomicUsize,
    last: Mutex<Option<ImageRequest>>,
}

impl StubImage {
    pub fn new(name: &str) -> Self {
        let model = name.split_once(':').map(|(_, m)| m).unwrap_or(name);
        Self {
            name: name.to_string(),
            model: model.to_string(),
            fail: false,
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ImageRequest> {
        self.last.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageBackend for StubImage {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn default_size(&self) -> (u32, u32) {
        (512, 512)
    }

    async fn generate(&self, request: &ImageRequest) -> Result<ImageOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(request.clone());
        if self.fail {
            return Err(DaemonError::backend_failed(&self.name, "image service down"));
        }
        Ok(ImageOutput {
            image_data: Some(b"\x89PNG\r\n\x1a\nstub".to_vec()),
            image_path: None,
            format: "png".to_string(),
        })
    }
}
