use crate::audio::{AudioFormat, AudioFrame, read_wav_file};
use crate::error::{EngineError, SynthesisError};
use serde::Deserialize;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, warn};

/// Voice identifier used when a request does not name one.
pub const DEFAULT_VOICE: &str = "default";

/// Receives frames from an incremental synthesis call. Returning an error stops the engine.
pub type FrameSink<'a> = dyn FnMut(AudioFrame) -> Result<(), SynthesisError> + 'a;

/// A loaded, stateful speech engine bound to one voice.
///
/// Calls are blocking and never overlap for one instance; the session layer guarantees
/// exclusive access.
pub trait SynthesisEngine: Send {
    /// Produce the complete audio for `text`.
    fn synthesize(&mut self, text: &str) -> Result<AudioFrame, SynthesisError>;

    /// Produce audio progressively, handing each frame to `sink` as soon as it exists.
    fn synthesize_incremental(
        &mut self,
        text: &str,
        sink: &mut FrameSink<'_>,
    ) -> Result<(), SynthesisError> {
        let frame = self.synthesize(text)?;
        if frame.is_empty() {
            return Ok(());
        }
        sink(frame)
    }
}

/// Constructs engines for voice identifiers. Construction is the expensive step.
pub trait EngineFactory: Send + Sync {
    fn create(&self, voice: &str) -> Result<Box<dyn SynthesisEngine>, EngineError>;
}

/// The `<model>.onnx.json` file that accompanies every Piper voice.
#[derive(Debug, Clone, Deserialize)]
pub struct PiperModelConfig {
    pub audio: PiperAudioConfig,
    #[serde(default)]
    pub language: Option<PiperLanguage>,
    #[serde(default)]
    pub num_speakers: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PiperAudioConfig {
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PiperLanguage {
    pub code: String,
}

impl PiperModelConfig {
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let data = std::fs::read_to_string(path).map_err(|source| EngineError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| EngineError::ConfigInvalid {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Builds [`PiperEngine`]s from a directory of `<name>.onnx` models.
#[derive(Debug, Clone)]
pub struct PiperEngineFactory {
    pub models_dir: PathBuf,
    pub default_model: String,
    pub binary: PathBuf,
    pub length_scale: Option<f32>,
}

impl PiperEngineFactory {
    fn model_name<'a>(&'a self, voice: &'a str) -> &'a str {
        if voice == DEFAULT_VOICE {
            &self.default_model
        } else {
            voice
        }
    }
}

impl EngineFactory for PiperEngineFactory {
    fn create(&self, voice: &str) -> Result<Box<dyn SynthesisEngine>, EngineError> {
        let name = self.model_name(voice);
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(EngineError::Unavailable(format!("invalid voice name '{name}'")));
        }
        let model = self.models_dir.join(format!("{name}.onnx"));
        if !model.is_file() {
            return Err(EngineError::ModelNotFound(model));
        }
        let config = PiperModelConfig::load(&model.with_extension("onnx.json"))?;
        debug!(
            "Loaded piper model {} ({} Hz)",
            model.display(),
            config.audio.sample_rate
        );
        Ok(Box::new(PiperEngine {
            binary: self.binary.clone(),
            model,
            format: AudioFormat::new(config.audio.sample_rate, 2, 1),
            length_scale: self.length_scale,
        }))
    }
}

/// Runs the `piper` executable once per call.
#[derive(Debug)]
pub struct PiperEngine {
    binary: PathBuf,
    model: PathBuf,
    format: AudioFormat,
    length_scale: Option<f32>,
}

/// Bytes read from piper's raw output per frame.
const RAW_READ_SIZE: usize = 8192;

static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

impl PiperEngine {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--model").arg(&self.model);
        if let Some(scale) = self.length_scale {
            cmd.arg("--length_scale").arg(scale.to_string());
        }
        cmd.stdin(Stdio::piped()).stderr(Stdio::inherit());
        cmd
    }

    fn scratch_path() -> PathBuf {
        let n = SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("tts-stream-{}-{n}.wav", std::process::id()))
    }
}

/// Feed stdin from a helper thread so a long text cannot deadlock against a full stdout pipe.
fn feed_stdin(child: &mut Child, text: &str) -> Result<std::thread::JoinHandle<()>, SynthesisError> {
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| SynthesisError::Engine("failed to open engine stdin".to_string()))?;
    let text = text.to_string();
    Ok(std::thread::spawn(move || {
        if let Err(e) = stdin.write_all(text.as_bytes()) {
            warn!("Failed to write text to engine: {}", e);
        }
    }))
}

fn check_status(child: &mut Child) -> Result<(), SynthesisError> {
    let status = child.wait()?;
    if !status.success() {
        error!("Piper TTS command failed: {}", status);
        return Err(SynthesisError::Engine(format!(
            "engine exited with {status}"
        )));
    }
    Ok(())
}

/// Hand raw PCM from `reader` to `sink` in frames of whole samples.
///
/// Pipe reads can end mid-sample; the odd bytes are held back for the next read. A partial
/// sample left at end of stream is dropped.
fn pump_samples<R: Read>(
    reader: &mut R,
    format: AudioFormat,
    sink: &mut FrameSink<'_>,
) -> Result<(), SynthesisError> {
    let align = format.bytes_per_sample().max(1);
    let mut buf = vec![0u8; RAW_READ_SIZE];
    let mut pending = Vec::new();
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SynthesisError::Io(e)),
        };
        pending.extend_from_slice(&buf[..n]);
        let whole = pending.len() - pending.len() % align;
        if whole == 0 {
            continue;
        }
        let rest = pending.split_off(whole);
        sink(AudioFrame::new(format, std::mem::replace(&mut pending, rest)))?;
    }
    if !pending.is_empty() {
        warn!("Dropping {} trailing bytes of a partial sample", pending.len());
    }
    Ok(())
}

impl SynthesisEngine for PiperEngine {
    fn synthesize(&mut self, text: &str) -> Result<AudioFrame, SynthesisError> {
        let out_path = Self::scratch_path();
        let mut child = self
            .command()
            .arg("--output_file")
            .arg(&out_path)
            .stdout(Stdio::null())
            .spawn()?;

        let writer = feed_stdin(&mut child, text)?;
        let status = check_status(&mut child);
        let _ = writer.join();

        let frame = status.and_then(|()| read_wav_file(&out_path));
        if let Err(e) = std::fs::remove_file(&out_path) {
            debug!("Could not remove {}: {}", out_path.display(), e);
        }
        frame
    }

    fn synthesize_incremental(
        &mut self,
        text: &str,
        sink: &mut FrameSink<'_>,
    ) -> Result<(), SynthesisError> {
        let mut child = self
            .command()
            .arg("--output_raw")
            .stdout(Stdio::piped())
            .spawn()?;

        let writer = feed_stdin(&mut child, text)?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| SynthesisError::Engine("failed to open engine stdout".to_string()))?;

        let result = pump_samples(&mut stdout, self.format, sink);

        if result.is_err() {
            let _ = child.kill();
        }
        drop(stdout);
        let status = check_status(&mut child);
        let _ = writer.join();
        result.and(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl SynthesisEngine for Fixed {
        fn synthesize(&mut self, text: &str) -> Result<AudioFrame, SynthesisError> {
            Ok(AudioFrame::new(
                AudioFormat::new(16000, 2, 1),
                text.as_bytes().to_vec(),
            ))
        }
    }

    #[test]
    fn incremental_defaults_to_one_frame() {
        let mut frames = Vec::new();
        Fixed
            .synthesize_incremental("abcd", &mut |f| {
                frames.push(f);
                Ok(())
            })
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].pcm, b"abcd");
    }

    #[test]
    fn missing_model_is_a_construction_error() {
        let factory = PiperEngineFactory {
            models_dir: std::env::temp_dir().join("tts-stream-no-such-dir"),
            default_model: "nope".to_string(),
            binary: PathBuf::from("piper"),
            length_scale: None,
        };
        match factory.create(DEFAULT_VOICE) {
            Err(EngineError::ModelNotFound(path)) => assert!(path.ends_with("nope.onnx")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("construction should fail"),
        }
    }

    #[test]
    fn model_config_parses_piper_json() {
        let json = r#"{"audio": {"sample_rate": 22050, "quality": "medium"},
                       "language": {"code": "en_US", "family": "en"},
                       "num_speakers": 1, "phoneme_map": {}}"#;
        let config: PiperModelConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.audio.sample_rate, 22050);
        assert_eq!(config.language.unwrap().code, "en_US");
    }

    /// Yields the given pieces one `read` at a time.
    struct Pieces(Vec<&'static [u8]>);

    impl Read for Pieces {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.0.is_empty() {
                return Ok(0);
            }
            let piece = self.0.remove(0);
            buf[..piece.len()].copy_from_slice(piece);
            Ok(piece.len())
        }
    }

    #[test]
    fn raw_output_is_framed_on_sample_boundaries() {
        let mut reader = Pieces(vec![b"abc", b"d", b"e", b"fgh"]);
        let mut frames = Vec::new();
        pump_samples(&mut reader, AudioFormat::new(16000, 2, 1), &mut |f| {
            frames.push(f.pcm);
            Ok(())
        })
        .unwrap();
        assert_eq!(frames, vec![b"ab".to_vec(), b"cd".to_vec(), b"efgh".to_vec()]);
    }

    #[cfg(unix)]
    #[test]
    fn piper_odd_sized_writes_become_whole_samples() {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join(format!("tts-stream-piper-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("voice.onnx"), b"").unwrap();
        std::fs::write(dir.join("voice.onnx.json"), r#"{"audio": {"sample_rate": 16000}}"#).unwrap();
        let script = dir.join("fake-piper");
        std::fs::write(
            &script,
            "#!/bin/sh\ncat > /dev/null\nprintf abc\nsleep 0.2\nprintf def\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let factory = PiperEngineFactory {
            models_dir: dir.clone(),
            default_model: "voice".to_string(),
            binary: script,
            length_scale: None,
        };
        let mut engine = factory.create(DEFAULT_VOICE).unwrap();
        let mut frames = Vec::new();
        engine
            .synthesize_incremental("Hi", &mut |f| {
                frames.push(f.pcm);
                Ok(())
            })
            .unwrap();

        assert!(frames.iter().all(|f| f.len() % 2 == 0), "{frames:?}");
        assert_eq!(frames.concat(), b"abcdef".to_vec());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
