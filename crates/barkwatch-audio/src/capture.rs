//! Free-running capture thread: reads chunks at the source's native pace and
//! pushes them onto the chunk FIFO the ingest pipeline drains per tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;

use crate::source::{AudioError, AudioSource};

/// Pause after a failed read before trying the source again.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<i16>,
    /// Monotonic arrival time, for ordering within a batch.
    pub arrival: Instant,
    /// Wall-clock arrival time; becomes the batch's `begin_timestamp`.
    pub arrival_wall: DateTime<Utc>,
}

/// Handle to the dedicated capture thread.
///
/// The source is built *inside* the thread (cpal streams are not `Send`); the
/// factory reports the negotiated sample rate back through a bounded channel
/// before the read loop starts.
pub struct CaptureThread {
    handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl CaptureThread {
    pub fn spawn<S, F>(factory: F, chunk_tx: Sender<AudioChunk>) -> Result<(Self, u32), AudioError>
    where
        S: AudioSource,
        F: FnOnce() -> Result<S, AudioError> + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let (rate_tx, rate_rx) = crossbeam_channel::bounded(1);

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let mut source = match factory() {
                    Ok(source) => {
                        let _ = rate_tx.send(Ok(source.sample_rate()));
                        source
                    }
                    Err(e) => {
                        let _ = rate_tx.send(Err(e));
                        return;
                    }
                };

                while flag.load(Ordering::SeqCst) {
                    match source.read_chunk() {
                        Ok(Some(samples)) => {
                            let chunk = AudioChunk {
                                samples,
                                arrival: Instant::now(),
                                arrival_wall: Utc::now(),
                            };
                            if chunk_tx.send(chunk).is_err() {
                                tracing::debug!("chunk queue closed, capture thread stopping");
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(AudioError::PlaybackExhausted) => {
                            tracing::info!("audio source exhausted, capture thread stopping");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!("audio read failed: {e}");
                            // A source that fails persistently must not spin
                            // the loop hot; the flag is still polled often.
                            thread::sleep(READ_ERROR_BACKOFF);
                        }
                    }
                }
                tracing::debug!("capture thread exiting");
            })
            .map_err(|e| AudioError::Fatal(format!("failed to spawn capture thread: {e}")))?;

        match rate_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(sample_rate)) => Ok((
                Self {
                    handle: Some(handle),
                    running,
                },
                sample_rate,
            )),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err(AudioError::Fatal(
                "capture thread did not report a sample rate".to_string(),
            )),
        }
    }

    /// Signals the thread to stop and joins it. Safe to call more than once.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        self.stop();
    }
}
