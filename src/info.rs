use crate::tts::{DEFAULT_VOICE, PiperModelConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

const PROGRAM_NAME: &str = "piper";
const PROGRAM_DESCRIPTION: &str = "Fast, local neural text to speech";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub name: String,
    pub url: String,
}

impl Attribution {
    fn piper() -> Self {
        Self {
            name: "rhasspy".to_string(),
            url: "https://github.com/rhasspy/piper".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtsVoice {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub attribution: Attribution,
    pub installed: bool,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtsProgram {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub attribution: Attribution,
    pub installed: bool,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub voices: Vec<TtsVoice>,
    #[serde(default)]
    pub supports_synthesize_streaming: bool,
}

/// Answer to a `describe` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    #[serde(default)]
    pub tts: Vec<TtsProgram>,
}

impl Info {
    /// Describe the voices installed under `models_dir`.
    pub fn new(models_dir: &Path, streaming: bool) -> Self {
        let mut voices = discover_voices(models_dir);
        if voices.is_empty() {
            voices.push(voice(DEFAULT_VOICE, Vec::new()));
        }
        Self::with_voices(voices, streaming)
    }

    pub fn with_voices(voices: Vec<TtsVoice>, streaming: bool) -> Self {
        Self {
            tts: vec![TtsProgram {
                name: PROGRAM_NAME.to_string(),
                description: Some(PROGRAM_DESCRIPTION.to_string()),
                attribution: Attribution::piper(),
                installed: true,
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
                voices,
                supports_synthesize_streaming: streaming,
            }],
        }
    }

    pub fn supports_streaming(&self) -> bool {
        self.tts.iter().any(|p| p.supports_synthesize_streaming)
    }
}

fn voice(name: &str, languages: Vec<String>) -> TtsVoice {
    TtsVoice {
        name: name.to_string(),
        description: None,
        attribution: Attribution::piper(),
        installed: true,
        languages,
        version: None,
    }
}

/// One voice per `<name>.onnx.json` in `models_dir`, sorted by name.
pub fn discover_voices(models_dir: &Path) -> Vec<TtsVoice> {
    let entries = match std::fs::read_dir(models_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot list models in {}: {}", models_dir.display(), e);
            return Vec::new();
        }
    };

    let mut voices: Vec<TtsVoice> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let path = entry.path();
            let file_name = path.file_name()?.to_str()?;
            let name = file_name.strip_suffix(".onnx.json")?;
            match PiperModelConfig::load(&path) {
                Ok(config) => {
                    let languages = config.language.map(|l| vec![l.code]).unwrap_or_default();
                    Some(voice(name, languages))
                }
                Err(e) => {
                    debug!("Skipping {}: {}", path.display(), e);
                    None
                }
            }
        })
        .collect();
    voices.sort_by(|a, b| a.name.cmp(&b.name));
    voices
}
