use crate::handler::HandlerConfig;
use crate::server::ServerUri;
use crate::tts::PiperEngineFactory;
use clap::Parser;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(version, about = "Streaming text to speech server")]
pub struct Args {
    /// stdio://, tcp://host:port or unix:///path
    #[clap(long, default_value = "stdio://")]
    pub uri: ServerUri,

    /// Directory holding <voice>.onnx and <voice>.onnx.json
    #[clap(long, env = "MODELS_DIR", default_value = "/usr/src/models")]
    pub models_dir: PathBuf,

    /// Model served for the "default" voice
    #[clap(long, default_value = "en_US-lessac-medium")]
    pub voice: String,

    #[clap(long, default_value = "piper")]
    pub piper_binary: PathBuf,

    /// Speaking rate passed to the engine (larger is slower)
    #[clap(long)]
    pub length_scale: Option<f32>,

    /// Terminators for one-shot text; the first is appended when missing. Empty disables.
    #[clap(long, default_value = ".?!")]
    pub auto_punctuation: String,

    #[clap(long, default_value = "1024")]
    pub samples_per_chunk: NonZeroUsize,

    /// Silence between sentences of a one-shot response
    #[clap(long, default_value_t = 250)]
    pub sentence_gap_ms: u64,

    /// Honor synthesize-start/chunk/stop
    #[clap(long)]
    pub streaming: bool,

    #[clap(long)]
    pub debug: bool,
}

impl Args {
    pub fn handler_config(&self) -> HandlerConfig {
        HandlerConfig {
            streaming: self.streaming,
            auto_punctuation: self.auto_punctuation.clone(),
            samples_per_chunk: self.samples_per_chunk.get(),
            sentence_gap: Duration::from_millis(self.sentence_gap_ms),
        }
    }

    pub fn engine_factory(&self) -> PiperEngineFactory {
        PiperEngineFactory {
            models_dir: self.models_dir.clone(),
            default_model: self.voice.clone(),
            binary: self.piper_binary.clone(),
            length_scale: self.length_scale,
        }
    }
}
