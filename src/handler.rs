//! Per-connection state machine turning client requests into audio events.

use crate::audio::AudioFrame;
use crate::error::{HandlerError, SynthesisError};
use crate::event::{ClientEvent, ServerEvent, Synthesize, SynthesizeStart, VoiceRequest};
use crate::info::Info;
use crate::protocol::{Event, write_event};
use crate::sentence::{SentenceBoundaryDetector, prepare_text, split_sentences};
use crate::session::{SessionManager, VoiceSession};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tracing::{debug, error, warn};

pub const DEFAULT_SAMPLES_PER_CHUNK: usize = 1024;
pub const DEFAULT_SENTENCE_GAP: Duration = Duration::from_millis(250);

/// Runtime behaviour shared by every connection.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Honor `synthesize-start`/`-chunk`/`-stop`. When false only one-shot requests work.
    pub streaming: bool,
    /// Terminators for one-shot text; the first is appended when none ends the text.
    pub auto_punctuation: String,
    pub samples_per_chunk: usize,
    /// Silence between sentences of a one-shot response.
    pub sentence_gap: Duration,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            streaming: false,
            auto_punctuation: ".?!".to_string(),
            samples_per_chunk: DEFAULT_SAMPLES_PER_CHUNK,
            sentence_gap: DEFAULT_SENTENCE_GAP,
        }
    }
}

/// Writes events and tracks whether the current response has been opened.
struct AudioOutput<W> {
    writer: W,
    samples_per_chunk: usize,
    started: bool,
}

impl<W: AsyncWrite + Unpin> AudioOutput<W> {
    async fn send(&mut self, event: ServerEvent) -> Result<(), HandlerError> {
        write_event(&mut self.writer, &event.into_event()).await?;
        Ok(())
    }

    /// Open the response on the first frame, then slice the frame into chunk events.
    async fn send_frame(&mut self, frame: &AudioFrame) -> Result<(), HandlerError> {
        if frame.is_empty() {
            return Ok(());
        }
        if !self.started {
            self.send(ServerEvent::AudioStart(frame.format)).await?;
            self.started = true;
        }
        for chunk in frame.chunks(self.samples_per_chunk) {
            self.send(ServerEvent::AudioChunk {
                format: frame.format,
                audio: chunk.to_vec(),
            })
            .await?;
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), HandlerError> {
        self.started = false;
        self.send(ServerEvent::AudioStop).await
    }

    async fn error(&mut self, err: &SynthesisError) -> Result<(), HandlerError> {
        self.send(ServerEvent::error(err.to_string(), err.code())).await
    }
}

/// State of one client connection.
pub struct StreamingSession<W> {
    config: HandlerConfig,
    info: Arc<Info>,
    sessions: Arc<SessionManager>,
    output: AudioOutput<W>,
    /// `None` until the client starts its first stream.
    is_streaming: Option<bool>,
    sbd: SentenceBoundaryDetector,
    voice: Option<String>,
    /// Set after a synthesis failure; the rest of the stream is discarded until stop.
    stream_failed: bool,
}

fn voice_name(voice: Option<VoiceRequest>) -> Option<String> {
    voice.and_then(|v| v.name)
}

impl<W: AsyncWrite + Unpin + Send> StreamingSession<W> {
    pub fn new(
        config: HandlerConfig,
        info: Arc<Info>,
        sessions: Arc<SessionManager>,
        writer: W,
    ) -> Self {
        let samples_per_chunk = config.samples_per_chunk.max(1);
        Self {
            config,
            info,
            sessions,
            output: AudioOutput {
                writer,
                samples_per_chunk,
                started: false,
            },
            is_streaming: None,
            sbd: SentenceBoundaryDetector::new(),
            voice: None,
            stream_failed: false,
        }
    }

    pub fn is_streaming(&self) -> Option<bool> {
        self.is_streaming
    }

    pub fn into_writer(self) -> W {
        self.output.writer
    }

    /// Decode and handle a raw event. A malformed request is answered with an error
    /// event and does not end the connection.
    pub async fn handle_raw(&mut self, event: Event) -> Result<(), HandlerError> {
        let kind = event.kind.clone();
        match ClientEvent::from_event(event) {
            Ok(event) => self.handle_event(event).await,
            Err(e) => {
                warn!("Rejected malformed '{}' event: {}", kind, e);
                self.output
                    .send(ServerEvent::error(e.to_string(), "InvalidEvent"))
                    .await
            }
        }
    }

    pub async fn handle_event(&mut self, event: ClientEvent) -> Result<(), HandlerError> {
        match event {
            ClientEvent::Describe => {
                self.output.send(ServerEvent::Info((*self.info).clone())).await?;
                debug!("Sent info");
                Ok(())
            }
            ClientEvent::Synthesize(request) => {
                if self.is_streaming == Some(true) {
                    // Clients repeat the streamed text as a one-shot request for compatibility.
                    debug!("Ignoring synthesize during streaming");
                    return Ok(());
                }
                self.synthesize_once(request).await
            }
            ClientEvent::SynthesizeStart(start) => {
                if !self.config.streaming {
                    debug!("Streaming disabled, ignoring synthesize-start");
                    return Ok(());
                }
                self.start_stream(start).await
            }
            ClientEvent::SynthesizeChunk(chunk) => {
                if !self.config.streaming {
                    debug!("Streaming disabled, ignoring synthesize-chunk");
                    return Ok(());
                }
                self.stream_chunk(&chunk.text).await
            }
            ClientEvent::SynthesizeStop => {
                if !self.config.streaming {
                    debug!("Streaming disabled, ignoring synthesize-stop");
                    return Ok(());
                }
                self.stop_stream().await
            }
            ClientEvent::Unrecognized(kind) => {
                warn!("Unexpected event: {}", kind);
                Ok(())
            }
        }
    }

    async fn session(&mut self, voice: Option<&str>) -> Result<Arc<VoiceSession>, HandlerError> {
        match self.sessions.get_session(voice).await {
            Ok(session) => Ok(session),
            Err(e) => {
                error!("{}", e);
                if let Err(send_err) = self.output.send(ServerEvent::error(e.to_string(), e.code())).await {
                    debug!("Could not report session failure: {}", send_err);
                }
                Err(e.into())
            }
        }
    }

    async fn synthesize_once(&mut self, request: Synthesize) -> Result<(), HandlerError> {
        let text = prepare_text(&request.text, &self.config.auto_punctuation);
        debug!("Synthesize: raw_text={:?}, text={:?}", request.text, text);
        self.output.started = false;

        if text.is_empty() {
            return self.output.stop().await;
        }

        let voice = voice_name(request.voice);
        let session = self.session(voice.as_deref()).await?;
        let sentences = split_sentences(&text);

        match session
            .synthesize_sentences(sentences, self.config.sentence_gap)
            .await
        {
            Ok(Some(audio)) => {
                debug!("Sending {:.2}s of audio", audio.duration_seconds());
                self.output.send_frame(&audio).await?
            }
            Ok(None) => debug!("Engine produced no audio"),
            Err(e) => {
                error!("Synthesis failed: {}", e);
                self.output.error(&e).await?;
            }
        }
        self.output.stop().await?;
        debug!("Completed one-shot request");
        Ok(())
    }

    async fn start_stream(&mut self, start: SynthesizeStart) -> Result<(), HandlerError> {
        if self.is_streaming == Some(true) {
            warn!("synthesize-start while a stream is open, discarding it");
            if self.output.started {
                self.output.stop().await?;
            }
        }
        self.sbd = SentenceBoundaryDetector::new();
        self.voice = voice_name(start.voice);
        self.output.started = false;
        self.stream_failed = false;
        self.is_streaming = Some(true);
        debug!("Stream started (voice: {:?})", self.voice);
        Ok(())
    }

    async fn stream_chunk(&mut self, text: &str) -> Result<(), HandlerError> {
        if self.is_streaming != Some(true) {
            return Err(HandlerError::Sequence("synthesize-chunk without synthesize-start"));
        }
        // Collected first: the iterator borrows `self.sbd` and synthesis needs `&mut self`.
        let sentences: Vec<String> = self.sbd.add_chunk(text).collect();
        for sentence in sentences {
            if self.stream_failed {
                break;
            }
            self.stream_sentence(sentence).await?;
        }
        Ok(())
    }

    async fn stop_stream(&mut self) -> Result<(), HandlerError> {
        if self.is_streaming != Some(true) {
            return Err(HandlerError::Sequence("synthesize-stop without synthesize-start"));
        }
        let rest = self.sbd.finish();
        if !rest.is_empty() && !self.stream_failed {
            self.stream_sentence(rest).await?;
        }
        if self.output.started {
            self.output.stop().await?;
        }
        self.output.send(ServerEvent::SynthesizeStopped).await?;
        self.is_streaming = Some(false);
        self.stream_failed = false;
        debug!("Completed streaming response");
        Ok(())
    }

    /// Synthesize one sentence into the open stream, frame by frame.
    async fn stream_sentence(&mut self, sentence: String) -> Result<(), HandlerError> {
        let voice = self.voice.clone();
        let session = self.session(voice.as_deref()).await?;
        debug!("Streaming sentence: {:?}", sentence);

        let mut frames = session.synthesize_stream(sentence);
        while let Some(frame) = frames.recv().await {
            match frame {
                Ok(frame) => self.output.send_frame(&frame).await?,
                Err(e) => {
                    error!("Streaming synthesis failed: {}", e);
                    self.stream_failed = true;
                    self.output.error(&e).await?;
                    self.output.stop().await?;
                    break;
                }
            }
        }
        Ok(())
    }
}
