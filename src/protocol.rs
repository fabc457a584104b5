//! Event framing.
//!
//! Every event is one JSON header line, optionally followed by `data_length` bytes of
//! JSON data and `payload_length` bytes of binary payload.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const PROTOCOL_VERSION: &str = "1.5.2";

pub const MAX_HEADER_SIZE: usize = 1024 * 1024; // 1 MB
pub const MAX_DATA_SIZE: usize = 16 * 1024 * 1024; // 16 MB
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024; // 64 MB

/// An untyped event as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Event {
    pub kind: String,
    pub data: Map<String, Value>,
    pub payload: Option<Vec<u8>>,
}

impl Event {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload_length: Option<usize>,
}

/// Read the next event. Returns `Ok(None)` on a clean end of stream.
pub async fn read_event<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Event>, ProtocolError> {
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = (&mut *reader)
            .take(MAX_HEADER_SIZE as u64 + 1)
            .read_until(b'\n', &mut line)
            .await?;
        if n == 0 {
            return Ok(None);
        }
        if line.len() > MAX_HEADER_SIZE {
            return Err(ProtocolError::TooLarge {
                what: "header",
                len: line.len(),
            });
        }
        if !line.iter().all(u8::is_ascii_whitespace) {
            break;
        }
    }

    let header: Header = serde_json::from_slice(&line)?;
    let mut data = header.data.unwrap_or_default();

    if let Some(len) = header.data_length.filter(|&len| len > 0) {
        if len > MAX_DATA_SIZE {
            return Err(ProtocolError::TooLarge { what: "data", len });
        }
        let bytes = read_exact_or_truncated(reader, len).await?;
        let extra: Map<String, Value> = serde_json::from_slice(&bytes)?;
        data.extend(extra);
    }

    let payload = match header.payload_length {
        Some(len) if len > MAX_PAYLOAD_SIZE => {
            return Err(ProtocolError::TooLarge {
                what: "payload",
                len,
            });
        }
        Some(len) if len > 0 => Some(read_exact_or_truncated(reader, len).await?),
        _ => None,
    };

    Ok(Some(Event {
        kind: header.kind,
        data,
        payload,
    }))
}

async fn read_exact_or_truncated<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    len: usize,
) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = vec![0u8; len];
    match reader.read_exact(&mut buf).await {
        Ok(_) => Ok(buf),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(ProtocolError::Truncated),
        Err(e) => Err(e.into()),
    }
}

/// Write one event and flush it.
pub async fn write_event<W: AsyncWrite + Unpin>(
    writer: &mut W,
    event: &Event,
) -> Result<(), ProtocolError> {
    let data = if event.data.is_empty() {
        None
    } else {
        Some(serde_json::to_vec(&event.data)?)
    };
    let payload = event.payload.as_deref().filter(|p| !p.is_empty());

    let header = Header {
        kind: event.kind.clone(),
        version: Some(PROTOCOL_VERSION.to_string()),
        data: None,
        data_length: data.as_ref().map(Vec::len),
        payload_length: payload.map(<[u8]>::len),
    };
    let mut line = serde_json::to_vec(&header)?;
    line.push(b'\n');

    writer.write_all(&line).await?;
    if let Some(data) = &data {
        writer.write_all(data).await?;
    }
    if let Some(payload) = payload {
        writer.write_all(payload).await?;
    }
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{BufReader, duplex};

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn reads_event_split_across_writes() {
        let (mut a, b) = duplex(1024);
        let mut reader = BufReader::new(b);

        tokio::spawn(async move {
            a.write_all(b"{\"type\": \"synthesize\", \"data_len").await.unwrap();
            a.write_all(b"gth\": 15}\n{\"text\": \"Hi!\"}").await.unwrap();
        });

        let event = read_event(&mut reader).await.unwrap().unwrap();
        assert_eq!(event.kind, "synthesize");
        assert_eq!(event.data["text"], "Hi!");
        assert!(event.payload.is_none());
        assert!(read_event(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn inline_data_merges_with_framed_data() {
        let raw = b"{\"type\":\"x\",\"data\":{\"a\":1},\"data_length\":7}\n{\"b\":2}";
        let mut reader = BufReader::new(&raw[..]);
        let event = read_event(&mut reader).await.unwrap().unwrap();
        assert_eq!(event.data["a"], 1);
        assert_eq!(event.data["b"], 2);
    }

    #[tokio::test]
    async fn writes_header_data_and_payload() {
        let event = Event::new("audio-chunk")
            .with_data(map(json!({"rate": 16000, "width": 2, "channels": 1})))
            .with_payload(vec![1, 2, 3, 4]);
        let mut out = Vec::new();
        write_event(&mut out, &event).await.unwrap();

        let newline = out.iter().position(|&b| b == b'\n').unwrap();
        let header: Value = serde_json::from_slice(&out[..newline]).unwrap();
        assert_eq!(header["type"], "audio-chunk");
        assert_eq!(header["payload_length"], 4);
        assert_eq!(header["version"], PROTOCOL_VERSION);
        assert_eq!(&out[out.len() - 4..], &[1, 2, 3, 4]);

        let mut reader = BufReader::new(&out[..]);
        assert_eq!(read_event(&mut reader).await.unwrap().unwrap(), event);
    }

    #[tokio::test]
    async fn truncated_payload_is_an_error() {
        let raw = b"{\"type\":\"audio-chunk\",\"payload_length\":10}\n1234";
        let mut reader = BufReader::new(&raw[..]);
        assert!(matches!(
            read_event(&mut reader).await,
            Err(ProtocolError::Truncated)
        ));
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let raw = format!("{{\"type\":\"x\",\"payload_length\":{}}}\n", MAX_PAYLOAD_SIZE + 1);
        let mut reader = BufReader::new(raw.as_bytes());
        assert!(matches!(
            read_event(&mut reader).await,
            Err(ProtocolError::TooLarge { what: "payload", .. })
        ));
    }

    #[tokio::test]
    async fn malformed_header_is_an_error() {
        let mut reader = BufReader::new(&b"not json\n"[..]);
        assert!(matches!(
            read_event(&mut reader).await,
            Err(ProtocolError::Json(_))
        ));
    }
}
