//! Typed views of the wire events this server understands.

use crate::audio::AudioFormat;
use crate::error::ProtocolError;
use crate::info::Info;
use crate::protocol::Event;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DESCRIBE: &str = "describe";
pub const INFO: &str = "info";
pub const SYNTHESIZE: &str = "synthesize";
pub const SYNTHESIZE_START: &str = "synthesize-start";
pub const SYNTHESIZE_CHUNK: &str = "synthesize-chunk";
pub const SYNTHESIZE_STOP: &str = "synthesize-stop";
pub const SYNTHESIZE_STOPPED: &str = "synthesize-stopped";
pub const AUDIO_START: &str = "audio-start";
pub const AUDIO_CHUNK: &str = "audio-chunk";
pub const AUDIO_STOP: &str = "audio-stop";
pub const ERROR: &str = "error";

/// Voice selection attached to a synthesis request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Synthesize {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceRequest>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizeStart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizeChunk {
    pub text: String,
}

/// Requests a client may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Describe,
    Synthesize(Synthesize),
    SynthesizeStart(SynthesizeStart),
    SynthesizeChunk(SynthesizeChunk),
    SynthesizeStop,
    /// Any event type this server does not act on.
    Unrecognized(String),
}

/// Responses the server sends.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Info(Info),
    AudioStart(AudioFormat),
    AudioChunk { format: AudioFormat, audio: Vec<u8> },
    AudioStop,
    SynthesizeStopped,
    Error { text: String, code: Option<String> },
}

fn require(data: &Map<String, Value>, kind: &'static str, field: &'static str) -> Result<(), ProtocolError> {
    if data.contains_key(field) {
        Ok(())
    } else {
        Err(ProtocolError::MissingField { kind, field })
    }
}

fn from_data<T: DeserializeOwned>(data: Map<String, Value>) -> Result<T, ProtocolError> {
    Ok(serde_json::from_value(Value::Object(data))?)
}

fn to_data<T: Serialize>(value: &T) -> Map<String, Value> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

impl ClientEvent {
    pub fn from_event(event: Event) -> Result<Self, ProtocolError> {
        let Event { kind, data, .. } = event;
        Ok(match kind.as_str() {
            DESCRIBE => ClientEvent::Describe,
            SYNTHESIZE => {
                require(&data, SYNTHESIZE, "text")?;
                ClientEvent::Synthesize(from_data(data)?)
            }
            SYNTHESIZE_START => ClientEvent::SynthesizeStart(from_data(data)?),
            SYNTHESIZE_CHUNK => {
                require(&data, SYNTHESIZE_CHUNK, "text")?;
                ClientEvent::SynthesizeChunk(from_data(data)?)
            }
            SYNTHESIZE_STOP => ClientEvent::SynthesizeStop,
            _ => ClientEvent::Unrecognized(kind),
        })
    }

    pub fn into_event(self) -> Event {
        match self {
            ClientEvent::Describe => Event::new(DESCRIBE),
            ClientEvent::Synthesize(s) => Event::new(SYNTHESIZE).with_data(to_data(&s)),
            ClientEvent::SynthesizeStart(s) => Event::new(SYNTHESIZE_START).with_data(to_data(&s)),
            ClientEvent::SynthesizeChunk(s) => Event::new(SYNTHESIZE_CHUNK).with_data(to_data(&s)),
            ClientEvent::SynthesizeStop => Event::new(SYNTHESIZE_STOP),
            ClientEvent::Unrecognized(kind) => Event::new(kind),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ErrorData {
    text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

impl ServerEvent {
    pub fn error(text: impl Into<String>, code: impl Into<String>) -> Self {
        ServerEvent::Error {
            text: text.into(),
            code: Some(code.into()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Info(_) => INFO,
            ServerEvent::AudioStart(_) => AUDIO_START,
            ServerEvent::AudioChunk { .. } => AUDIO_CHUNK,
            ServerEvent::AudioStop => AUDIO_STOP,
            ServerEvent::SynthesizeStopped => SYNTHESIZE_STOPPED,
            ServerEvent::Error { .. } => ERROR,
        }
    }

    pub fn into_event(self) -> Event {
        let event = Event::new(self.kind());
        match self {
            ServerEvent::Info(info) => event.with_data(to_data(&info)),
            ServerEvent::AudioStart(format) => event.with_data(to_data(&format)),
            ServerEvent::AudioChunk { format, audio } => {
                event.with_data(to_data(&format)).with_payload(audio)
            }
            ServerEvent::AudioStop | ServerEvent::SynthesizeStopped => event,
            ServerEvent::Error { text, code } => event.with_data(to_data(&ErrorData { text, code })),
        }
    }

    /// Decode a server event, as a client would. Returns `Ok(None)` for other event types.
    pub fn from_event(event: Event) -> Result<Option<Self>, ProtocolError> {
        let Event {
            kind,
            data,
            payload,
        } = event;
        Ok(Some(match kind.as_str() {
            INFO => ServerEvent::Info(from_data(data)?),
            AUDIO_START => ServerEvent::AudioStart(from_data(data)?),
            AUDIO_CHUNK => ServerEvent::AudioChunk {
                format: from_data(data)?,
                audio: payload.ok_or(ProtocolError::MissingPayload(AUDIO_CHUNK))?,
            },
            AUDIO_STOP => ServerEvent::AudioStop,
            SYNTHESIZE_STOPPED => ServerEvent::SynthesizeStopped,
            ERROR => {
                let ErrorData { text, code } = from_data(data)?;
                ServerEvent::Error { text, code }
            }
            _ => return Ok(None),
        }))
    }
}
