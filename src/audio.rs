use crate::error::SynthesisError;
use hound::{SampleFormat, WavReader};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use std::time::Duration;

/// PCM layout of a stream of audio: sample rate, bytes per sample, interleaved channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub rate: u32,
    pub width: u16,
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(rate: u32, width: u16, channels: u16) -> Self {
        Self {
            rate,
            width,
            channels,
        }
    }

    /// Bytes for one sample across all channels.
    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.width) * usize::from(self.channels)
    }

    pub fn silence(&self, duration: Duration) -> Vec<u8> {
        let samples = (u128::from(self.rate) * duration.as_millis() / 1000) as usize;
        // 8-bit PCM is unsigned, its midpoint is 0x80
        let fill = if self.width == 1 { 0x80 } else { 0 };
        vec![fill; samples * self.bytes_per_sample()]
    }
}

/// A block of raw PCM produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub format: AudioFormat,
    pub pcm: Vec<u8>,
}

impl AudioFrame {
    pub fn new(format: AudioFormat, pcm: Vec<u8>) -> Self {
        Self { format, pcm }
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }

    pub fn sample_count(&self) -> usize {
        match self.format.bytes_per_sample() {
            0 => 0,
            bps => self.pcm.len() / bps,
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.format.rate == 0 {
            return 0.0;
        }
        self.sample_count() as f64 / f64::from(self.format.rate)
    }

    /// Slice the PCM into pieces of at most `samples_per_chunk` samples.
    pub fn chunks(&self, samples_per_chunk: usize) -> std::slice::Chunks<'_, u8> {
        let size = samples_per_chunk
            .saturating_mul(self.format.bytes_per_sample())
            .max(1);
        self.pcm.chunks(size)
    }

    fn append(&mut self, other: AudioFrame) -> Result<(), SynthesisError> {
        if other.format != self.format {
            return Err(SynthesisError::FormatMismatch(format!(
                "{:?} then {:?}",
                self.format, other.format
            )));
        }
        self.pcm.extend_from_slice(&other.pcm);
        Ok(())
    }
}

/// Join per-sentence audio into one frame with `gap` of silence between sentences.
pub fn concat_with_gap(
    segments: Vec<AudioFrame>,
    gap: Duration,
) -> Result<Option<AudioFrame>, SynthesisError> {
    let mut segments = segments.into_iter().filter(|s| !s.is_empty());
    let Some(mut joined) = segments.next() else {
        return Ok(None);
    };
    let pause = joined.format.silence(gap);
    for segment in segments {
        joined.pcm.extend_from_slice(&pause);
        joined.append(segment)?;
    }
    Ok(Some(joined))
}

/// Decode an integer PCM WAV stream into a single frame.
pub fn read_wav<R: Read>(reader: R) -> Result<AudioFrame, SynthesisError> {
    let reader = WavReader::new(reader)?;
    let spec = reader.spec();
    if spec.sample_format != SampleFormat::Int {
        return Err(SynthesisError::Engine(
            "engine produced floating point wav".to_string(),
        ));
    }

    let width = spec.bits_per_sample.div_ceil(8);
    let format = AudioFormat::new(spec.sample_rate, width, spec.channels);
    let mut pcm = Vec::with_capacity(reader.len() as usize * usize::from(width));
    for sample in reader.into_samples::<i32>() {
        let sample = sample?;
        if width == 1 {
            pcm.push((sample + 128) as u8);
        } else {
            pcm.extend_from_slice(&sample.to_le_bytes()[..usize::from(width)]);
        }
    }
    Ok(AudioFrame::new(format, pcm))
}

pub fn read_wav_file(path: &Path) -> Result<AudioFrame, SynthesisError> {
    let file = std::fs::File::open(path)?;
    read_wav(std::io::BufReader::new(file))
}
