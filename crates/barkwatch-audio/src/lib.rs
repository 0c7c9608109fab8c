pub mod capture;
pub mod pipeline;
pub mod source;

pub use capture::{AudioChunk, CaptureThread};
pub use pipeline::AudioIngestPipeline;
pub use source::{AudioError, AudioSource, FileSource, MicConfig, MicSource, DEFAULT_CHUNK_SIZE};
