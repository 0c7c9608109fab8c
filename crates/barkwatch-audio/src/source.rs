//! Audio sources: a live microphone behind cpal and WAV file playback behind
//! hound. Both hand out fixed-size mono i16 chunks at the source's native
//! sample rate; decoding and resampling beyond that stay outside this crate.

use std::path::Path;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use thiserror::Error;

/// Samples per chunk a source hands to the capture thread.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

#[derive(Error, Debug)]
pub enum AudioError {
    /// End of file playback. A routine stop condition, not an I/O failure.
    #[error("audio source exhausted")]
    PlaybackExhausted,

    #[error("input device not found: {name:?}")]
    DeviceNotFound { name: Option<String> },

    #[error("format not supported: {format}")]
    FormatNotSupported { format: String },

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("device enumeration error: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("stream config error: {0}")]
    StreamConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("build stream error: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("play stream error: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("Fatal error, cannot recover: {0}")]
    Fatal(String),
}

/// A free-running producer of fixed-size sample chunks. `read_chunk` paces
/// the capture thread: a live device blocks until hardware delivers, file
/// playback advances immediately.
pub trait AudioSource {
    fn sample_rate(&self) -> u32;

    /// `Ok(None)` means no data is available right now; `PlaybackExhausted`
    /// means the source is done for good.
    fn read_chunk(&mut self) -> Result<Option<Vec<i16>>, AudioError>;
}

/// Averages interleaved frames down to mono.
fn downmix(interleaved: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    let channels = channels as usize;
    interleaved
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

fn f32_to_i16(s: f32) -> i16 {
    (s.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

fn u16_to_i16(s: u16) -> i16 {
    (s as i32 - 32768) as i16
}

/// Buffers downmixed samples and cuts them into fixed-size chunks, so device
/// callback buffer sizes never leak downstream.
struct ChunkAccumulator {
    buf: Vec<i16>,
    chunk_size: usize,
    channels: u16,
}

impl ChunkAccumulator {
    fn new(chunk_size: usize, channels: u16) -> Self {
        Self {
            buf: Vec::with_capacity(chunk_size * 2),
            chunk_size,
            channels,
        }
    }

    fn push(&mut self, interleaved: &[i16], out: &Sender<Vec<i16>>) {
        self.buf.extend(downmix(interleaved, self.channels));
        while self.buf.len() >= self.chunk_size {
            let rest = self.buf.split_off(self.chunk_size);
            let chunk = std::mem::replace(&mut self.buf, rest);
            if out.send(chunk).is_err() {
                // Consumer gone; the stream is shutting down.
                self.buf.clear();
                return;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct MicConfig {
    /// Device name to open, or the host default.
    pub device: Option<String>,
    pub chunk_size: usize,
}

impl Default for MicConfig {
    fn default() -> Self {
        Self {
            device: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Live microphone source. The cpal callback converts to i16, downmixes, and
/// accumulates chunks; `read_chunk` blocks on the chunk channel with a
/// bounded timeout so the capture loop can keep polling its running flag.
///
/// Not `Send` (it owns the cpal stream) — open it inside the capture thread.
pub struct MicSource {
    _stream: cpal::Stream,
    rx: Receiver<Vec<i16>>,
    sample_rate: u32,
}

fn log_stream_error(err: cpal::StreamError) {
    // Overflow/underflow and the like are warnings; capture continues.
    tracing::warn!("input stream error: {err}");
}

impl MicSource {
    pub fn open(cfg: &MicConfig) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = match &cfg.device {
            Some(name) => host
                .input_devices()?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| AudioError::DeviceNotFound {
                    name: Some(name.clone()),
                })?,
            None => host
                .default_input_device()
                .ok_or(AudioError::DeviceNotFound { name: None })?,
        };
        if let Ok(name) = device.name() {
            tracing::info!("Selected input device: {name}");
        }

        let supported = device.default_input_config()?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let stream_config: cpal::StreamConfig = supported.config();

        let (tx, rx) = crossbeam_channel::unbounded();
        let mut acc = ChunkAccumulator::new(cfg.chunk_size, channels);

        let stream = match supported.sample_format() {
            SampleFormat::I16 => device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &_| acc.push(data, &tx),
                log_stream_error,
                None,
            )?,
            SampleFormat::F32 => device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &_| {
                    let converted: Vec<i16> = data.iter().copied().map(f32_to_i16).collect();
                    acc.push(&converted, &tx);
                },
                log_stream_error,
                None,
            )?,
            SampleFormat::U16 => device.build_input_stream(
                &stream_config,
                move |data: &[u16], _: &_| {
                    let converted: Vec<i16> = data.iter().copied().map(u16_to_i16).collect();
                    acc.push(&converted, &tx);
                },
                log_stream_error,
                None,
            )?,
            other => {
                return Err(AudioError::FormatNotSupported {
                    format: format!("{other:?}"),
                });
            }
        };
        stream.play()?;

        tracing::info!(
            sample_rate,
            channels,
            chunk_size = cfg.chunk_size,
            "Microphone capture started"
        );

        Ok(Self {
            _stream: stream,
            rx,
            sample_rate,
        })
    }
}

impl AudioSource for MicSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_chunk(&mut self) -> Result<Option<Vec<i16>>, AudioError> {
        match self.rx.recv_timeout(Duration::from_millis(50)) {
            Ok(chunk) => Ok(Some(chunk)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(AudioError::Fatal("input stream closed".to_string()))
            }
        }
    }
}

/// WAV file playback source: whole-file decode up front, then immediate
/// fixed-size slice advance per read until exhausted.
pub struct FileSource {
    samples: Vec<i16>,
    sample_rate: u32,
    cursor: usize,
    chunk_size: usize,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self, AudioError> {
        let mut reader = hound::WavReader::open(path.as_ref())?;
        let spec = reader.spec();

        let interleaved: Vec<i16> = match spec.sample_format {
            hound::SampleFormat::Int => reader.samples::<i16>().collect::<Result<_, _>>()?,
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .map(|s| s.map(f32_to_i16))
                .collect::<Result<_, _>>()?,
        };
        let samples = downmix(&interleaved, spec.channels);

        tracing::info!(
            path = %path.as_ref().display(),
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            samples = samples.len(),
            "WAV source loaded"
        );

        Ok(Self {
            samples,
            sample_rate: spec.sample_rate,
            cursor: 0,
            chunk_size,
        })
    }
}

impl AudioSource for FileSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_chunk(&mut self) -> Result<Option<Vec<i16>>, AudioError> {
        if self.cursor >= self.samples.len() {
            return Err(AudioError::PlaybackExhausted);
        }
        let end = (self.cursor + self.chunk_size).min(self.samples.len());
        let chunk = self.samples[self.cursor..end].to_vec();
        self.cursor = end;
        Ok(Some(chunk))
    }
}
