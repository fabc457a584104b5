use crate::audio::{AudioFrame, concat_with_gap};
use crate::error::{SessionError, SynthesisError};
use crate::tts::{DEFAULT_VOICE, EngineFactory, SynthesisEngine};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info};

/// Frames buffered between an engine and the connection writing them out.
const FRAME_QUEUE: usize = 16;

type SharedEngine = Arc<Mutex<Box<dyn SynthesisEngine>>>;

/// One ready engine bound to a voice.
///
/// The engine sits behind an exclusive async lock: at most one synthesis call per
/// session is in flight, and callers queue in lock order.
pub struct VoiceSession {
    voice: String,
    engine: SharedEngine,
    last_used: StdMutex<Instant>,
}

impl std::fmt::Debug for VoiceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceSession")
            .field("voice", &self.voice)
            .finish_non_exhaustive()
    }
}

impl VoiceSession {
    pub fn new(voice: impl Into<String>, engine: Box<dyn SynthesisEngine>) -> Self {
        Self {
            voice: voice.into(),
            engine: Arc::new(Mutex::new(engine)),
            last_used: StdMutex::new(Instant::now()),
        }
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    pub fn last_used(&self) -> Instant {
        *self.last_used.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    /// Single-shot call: synthesize every sentence and join them with `gap` of silence.
    ///
    /// Returns `None` when the engine produced no audio at all.
    pub async fn synthesize_sentences(
        &self,
        sentences: Vec<String>,
        gap: Duration,
    ) -> Result<Option<AudioFrame>, SynthesisError> {
        let mut engine = Arc::clone(&self.engine).lock_owned().await;
        let voice = self.voice.clone();
        tokio::task::spawn_blocking(move || {
            let mut segments = Vec::with_capacity(sentences.len());
            for sentence in &sentences {
                debug!(voice = %voice, "Synthesizing: {}", sentence);
                segments.push(engine.synthesize(sentence)?);
            }
            concat_with_gap(segments, gap)
        })
        .await
        .map_err(|_| SynthesisError::Panicked)?
    }

    /// Incremental call: frames arrive on the returned channel in engine order.
    ///
    /// A failure is delivered as the last item. Dropping the receiver cancels the engine
    /// call at its next frame.
    pub fn synthesize_stream(
        &self,
        text: String,
    ) -> mpsc::Receiver<Result<AudioFrame, SynthesisError>> {
        let (tx, rx) = mpsc::channel(FRAME_QUEUE);
        let engine = Arc::clone(&self.engine);
        let voice = self.voice.clone();

        tokio::spawn(async move {
            let mut engine = engine.lock_owned().await;
            let failure_tx = tx.clone();
            let job = tokio::task::spawn_blocking(move || {
                debug!(voice = %voice, "Streaming synthesis: {}", text);
                let result = engine.synthesize_incremental(&text, &mut |frame| {
                    tx.blocking_send(Ok(frame))
                        .map_err(|_| SynthesisError::Cancelled)
                });
                match result {
                    Ok(()) | Err(SynthesisError::Cancelled) => {}
                    Err(e) => {
                        let _ = tx.blocking_send(Err(e));
                    }
                }
            });
            if job.await.is_err() {
                let _ = failure_tx.send(Err(SynthesisError::Panicked)).await;
            }
        });

        rx
    }
}

/// Maps voice identifiers to live sessions, constructing each at most once.
pub struct SessionManager {
    factory: Arc<dyn EngineFactory>,
    sessions: Mutex<HashMap<String, Arc<VoiceSession>>>,
}

impl SessionManager {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Look up or create the session for `voice` (`"default"` when absent).
    ///
    /// The whole lookup-or-create runs under one lock, so concurrent first requests for
    /// a voice construct a single engine. A failed construction inserts nothing.
    ///
    /// Construction runs on the blocking pool. If the caller is cancelled while waiting,
    /// the lock is released and the finished engine is discarded, so the next request
    /// for that voice constructs it again.
    pub async fn get_session(&self, voice: Option<&str>) -> Result<Arc<VoiceSession>, SessionError> {
        let voice = voice.filter(|v| !v.is_empty()).unwrap_or(DEFAULT_VOICE);
        let mut sessions = self.sessions.lock().await;

        if let Some(session) = sessions.get(voice) {
            session.touch();
            return Ok(Arc::clone(session));
        }

        info!("Initializing new session for voice: {}", voice);
        let factory = Arc::clone(&self.factory);
        let name = voice.to_string();
        let engine = tokio::task::spawn_blocking(move || factory.create(&name))
            .await?
            .map_err(|source| SessionError::Construction {
                voice: voice.to_string(),
                source,
            })?;

        let session = Arc::new(VoiceSession::new(voice, engine));
        sessions.insert(voice.to_string(), Arc::clone(&session));
        Ok(session)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    pub async fn voices(&self) -> Vec<String> {
        let mut voices: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        voices.sort();
        voices
    }
}
