#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tts_stream_server::audio::{AudioFormat, AudioFrame};
use tts_stream_server::error::{EngineError, SynthesisError};
use tts_stream_server::event::ServerEvent;
use tts_stream_server::handler::{HandlerConfig, StreamingSession};
use tts_stream_server::info::Info;
use tts_stream_server::protocol::read_event;
use tts_stream_server::session::SessionManager;
use tts_stream_server::tts::{EngineFactory, FrameSink, SynthesisEngine};

pub const FORMAT: AudioFormat = AudioFormat {
    rate: 16000,
    width: 2,
    channels: 1,
};

/// Shared observations of every mock engine built by one factory.
#[derive(Default)]
pub struct Recorder {
    pub constructions: AtomicUsize,
    pub voices: Mutex<Vec<String>>,
    pub calls: Mutex<Vec<String>>,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl Recorder {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }
}

/// One sample per byte of text; text containing `FAIL` makes the call fail.
pub struct MockEngine {
    recorder: Arc<Recorder>,
    delay: Duration,
}

impl MockEngine {
    fn begin(&self, text: &str) -> Result<(), SynthesisError> {
        self.recorder.calls.lock().unwrap().push(text.to_string());
        if text.contains("FAIL") {
            return Err(SynthesisError::Engine(format!("cannot say {text:?}")));
        }
        Ok(())
    }

    fn track<T>(&self, f: impl FnOnce() -> T) -> T {
        let now = self.recorder.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.recorder.max_active.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        let out = f();
        self.recorder.active.fetch_sub(1, Ordering::SeqCst);
        out
    }
}

pub fn pcm_for(text: &str) -> Vec<u8> {
    vec![1u8; text.len() * 2]
}

impl SynthesisEngine for MockEngine {
    fn synthesize(&mut self, text: &str) -> Result<AudioFrame, SynthesisError> {
        self.track(|| -> Result<AudioFrame, SynthesisError> {
            self.begin(text)?;
            Ok(AudioFrame::new(FORMAT, pcm_for(text)))
        })
    }

    /// One frame per word.
    fn synthesize_incremental(
        &mut self,
        text: &str,
        sink: &mut FrameSink<'_>,
    ) -> Result<(), SynthesisError> {
        self.track(|| -> Result<(), SynthesisError> {
            self.begin(text)?;
            for word in text.split_whitespace() {
                sink(AudioFrame::new(FORMAT, pcm_for(word)))?;
            }
            Ok(())
        })
    }
}

pub struct MockFactory {
    pub recorder: Arc<Recorder>,
    pub construct_delay: Duration,
    pub synth_delay: Duration,
    pub broken_voices: Vec<String>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            recorder: Arc::new(Recorder::default()),
            construct_delay: Duration::ZERO,
            synth_delay: Duration::ZERO,
            broken_voices: vec!["broken".to_string()],
        }
    }
}

impl EngineFactory for MockFactory {
    fn create(&self, voice: &str) -> Result<Box<dyn SynthesisEngine>, EngineError> {
        std::thread::sleep(self.construct_delay);
        self.recorder.constructions.fetch_add(1, Ordering::SeqCst);
        self.recorder.voices.lock().unwrap().push(voice.to_string());
        if self.broken_voices.iter().any(|v| v == voice) {
            return Err(EngineError::Unavailable(format!("no model for {voice}")));
        }
        Ok(Box::new(MockEngine {
            recorder: Arc::clone(&self.recorder),
            delay: self.synth_delay,
        }))
    }
}

pub fn manager(factory: MockFactory) -> (Arc<SessionManager>, Arc<Recorder>) {
    let recorder = Arc::clone(&factory.recorder);
    (Arc::new(SessionManager::new(Arc::new(factory))), recorder)
}

pub fn config(streaming: bool) -> HandlerConfig {
    HandlerConfig {
        streaming,
        samples_per_chunk: 4,
        sentence_gap: Duration::ZERO,
        ..HandlerConfig::default()
    }
}

pub fn test_info(streaming: bool) -> Arc<Info> {
    Arc::new(Info::with_voices(Vec::new(), streaming))
}

pub fn session(
    config: HandlerConfig,
    sessions: Arc<SessionManager>,
) -> StreamingSession<Vec<u8>> {
    let info = test_info(config.streaming);
    StreamingSession::new(config, info, sessions, Vec::new())
}

/// Parse everything a handler wrote.
pub async fn decode_all(bytes: &[u8]) -> Vec<ServerEvent> {
    let mut reader = bytes;
    let mut events = Vec::new();
    while let Some(event) = read_event(&mut reader).await.unwrap() {
        events.push(ServerEvent::from_event(event).unwrap().unwrap());
    }
    events
}

pub fn kinds(events: &[ServerEvent]) -> Vec<&'static str> {
    events.iter().map(ServerEvent::kind).collect()
}

/// Total PCM carried by audio-chunk events.
pub fn audio_bytes(events: &[ServerEvent]) -> usize {
    events
        .iter()
        .map(|e| match e {
            ServerEvent::AudioChunk { audio, .. } => audio.len(),
            _ => 0,
        })
        .sum()
}
