//! Main-thread half of the producer/consumer audio pipeline: batches whatever
//! the capture thread delivered since the last tick into one `AudioArrived`
//! event, so device timing jitter never leaks into the tick rate.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;

use barkwatch_events::{AudioArrived, Event, EventBus, SourceId};
use barkwatch_foundation::System;

use crate::capture::{AudioChunk, CaptureThread};
use crate::source::{AudioError, AudioSource};

pub struct AudioIngestPipeline {
    bus: Arc<EventBus>,
    source_id: SourceId,
    sample_rate: u32,
    chunk_rx: Receiver<AudioChunk>,
    capture: Option<CaptureThread>,
}

impl AudioIngestPipeline {
    /// Spawns the capture thread over `factory`'s source and returns the
    /// pipeline ready for tick updates.
    pub fn start<S, F>(
        bus: Arc<EventBus>,
        source_id: SourceId,
        factory: F,
    ) -> Result<Self, AudioError>
    where
        S: AudioSource,
        F: FnOnce() -> Result<S, AudioError> + Send + 'static,
    {
        let (chunk_tx, chunk_rx) = crossbeam_channel::unbounded();
        let (capture, sample_rate) = CaptureThread::spawn(factory, chunk_tx)?;
        tracing::info!(%source_id, sample_rate, "audio ingest pipeline started");
        Ok(Self {
            bus,
            source_id,
            sample_rate,
            chunk_rx,
            capture: Some(capture),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl System for AudioIngestPipeline {
    fn name(&self) -> &str {
        "audio-ingest"
    }

    fn update(&mut self, _elapsed: Duration) {
        let mut samples: Vec<i16> = Vec::new();
        let mut begin_timestamp = None;

        // Drain everything currently queued; chunks are FIFO, so the first
        // one carries the earliest arrival time.
        for chunk in self.chunk_rx.try_iter() {
            if begin_timestamp.is_none() {
                begin_timestamp = Some(chunk.arrival_wall);
            }
            samples.extend_from_slice(&chunk.samples);
        }

        // A quiet tick emits nothing; that is distinct from detected silence.
        if let Some(begin_timestamp) = begin_timestamp {
            self.bus.enqueue(Event::AudioArrived(AudioArrived {
                source_id: self.source_id.clone(),
                samples,
                sample_rate: self.sample_rate,
                begin_timestamp,
            }));
        }
    }

    fn shutdown(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
            tracing::info!(source_id = %self.source_id, "audio ingest pipeline stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barkwatch_events::EventKind;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::time::Instant;

    fn pipeline_with_channel(
        bus: Arc<EventBus>,
    ) -> (AudioIngestPipeline, crossbeam_channel::Sender<AudioChunk>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let pipeline = AudioIngestPipeline {
            bus,
            source_id: SourceId::local(),
            sample_rate: 44_100,
            chunk_rx: rx,
            capture: None,
        };
        (pipeline, tx)
    }

    fn recorded_audio(bus: &Arc<EventBus>) -> Arc<Mutex<Vec<AudioArrived>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(EventKind::AudioArrived, move |event| {
            if let Event::AudioArrived(e) = event {
                sink.lock().push(e.clone());
            }
            Ok(())
        });
        seen
    }

    #[test]
    fn batches_pending_chunks_into_one_event_with_earliest_timestamp() {
        let bus = Arc::new(EventBus::new());
        let seen = recorded_audio(&bus);
        let (mut pipeline, tx) = pipeline_with_channel(bus.clone());

        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::milliseconds(10);
        let t2 = t0 + chrono::Duration::milliseconds(20);
        for (n, wall) in [(100usize, t0), (150, t1), (200, t2)] {
            tx.send(AudioChunk {
                samples: vec![1; n],
                arrival: Instant::now(),
                arrival_wall: wall,
            })
            .unwrap();
        }

        pipeline.update(Duration::from_millis(16));
        bus.drain_queued();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].samples.len(), 450);
        assert_eq!(seen[0].begin_timestamp, t0);
        assert_eq!(seen[0].sample_rate, 44_100);
    }

    #[test]
    fn quiet_tick_emits_nothing() {
        let bus = Arc::new(EventBus::new());
        let seen = recorded_audio(&bus);
        let (mut pipeline, _tx) = pipeline_with_channel(bus.clone());

        pipeline.update(Duration::from_millis(16));
        bus.drain_queued();

        assert!(seen.lock().is_empty());
    }

    #[test]
    fn chunk_order_is_preserved_in_the_concatenation() {
        let bus = Arc::new(EventBus::new());
        let seen = recorded_audio(&bus);
        let (mut pipeline, tx) = pipeline_with_channel(bus.clone());

        for value in [1i16, 2, 3] {
            tx.send(AudioChunk {
                samples: vec![value; 2],
                arrival: Instant::now(),
                arrival_wall: Utc::now(),
            })
            .unwrap();
        }

        pipeline.update(Duration::from_millis(16));
        bus.drain_queued();

        assert_eq!(seen.lock()[0].samples, vec![1, 1, 2, 2, 3, 3]);
    }
}
