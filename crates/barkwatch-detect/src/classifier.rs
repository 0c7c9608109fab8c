//! Classifier boundary: audio batches go in, scored label frames come out.
//!
//! Inference runs on its own worker thread so a slow model never stalls the
//! tick. The worker emits a `ClassesDetected` frame for every batch it
//! processes, including frames with no classes at all; the debouncer treats
//! those as negative evidence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use barkwatch_events::{
    AudioArrived, ClassScore, ClassesDetected, Event, EventBus, EventKind, ListenerToken,
};
use barkwatch_foundation::System;

/// A scoring model over one batch of mono PCM samples.
pub trait Classifier: Send {
    fn classify(&mut self, samples: &[i16], sample_rate: u32) -> Vec<ClassScore>;
}

/// Energy-gate classifier: emits a fixed class set whenever the batch RMS
/// clears a threshold. Stands in for a real model in demos and tests.
pub struct LevelClassifier {
    rms_threshold: f64,
    classes: Vec<ClassScore>,
}

impl LevelClassifier {
    pub fn new(rms_threshold: f64, classes: Vec<ClassScore>) -> Self {
        Self {
            rms_threshold,
            classes,
        }
    }
}

impl Classifier for LevelClassifier {
    fn classify(&mut self, samples: &[i16], _sample_rate: u32) -> Vec<ClassScore> {
        if samples.is_empty() {
            return Vec::new();
        }
        let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        let rms = (sum_sq / samples.len() as f64).sqrt();
        if rms >= self.rms_threshold {
            self.classes.clone()
        } else {
            Vec::new()
        }
    }
}

/// Bridges `AudioArrived` events to a [`Classifier`] running off-thread and
/// feeds the results back onto the bus as `ClassesDetected`.
pub struct ClassifierSystem {
    bus: Arc<EventBus>,
    token: Option<ListenerToken>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ClassifierSystem {
    pub fn start<C: Classifier + 'static>(bus: Arc<EventBus>, classifier: C) -> Self {
        let (job_tx, job_rx): (Sender<AudioArrived>, Receiver<AudioArrived>) =
            crossbeam_channel::unbounded();

        let token = {
            let job_tx = job_tx.clone();
            bus.subscribe(EventKind::AudioArrived, move |event| {
                if let Event::AudioArrived(batch) = event {
                    // The worker owns its batch; drop silently if it is gone.
                    let _ = job_tx.send(batch.clone());
                }
                Ok(())
            })
        };

        let running = Arc::new(AtomicBool::new(true));
        let worker = {
            let bus = Arc::clone(&bus);
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name("classifier".to_string())
                .spawn(move || {
                    classify_loop(classifier, job_rx, bus, running);
                })
        };
        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::error!("failed to spawn classifier thread: {err}");
                None
            }
        };

        tracing::info!("classifier system started");
        Self {
            bus,
            token: Some(token),
            running,
            worker,
        }
    }
}

fn classify_loop<C: Classifier>(
    mut classifier: C,
    job_rx: Receiver<AudioArrived>,
    bus: Arc<EventBus>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        let batch = match job_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(batch) => batch,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        };
        let classes = classifier.classify(&batch.samples, batch.sample_rate);
        tracing::trace!(
            source_id = %batch.source_id,
            samples = batch.samples.len(),
            classes = classes.len(),
            "classified batch"
        );
        bus.enqueue(Event::ClassesDetected(ClassesDetected {
            source_id: batch.source_id,
            begin_timestamp: batch.begin_timestamp,
            classes,
        }));
    }
    tracing::debug!("classifier worker exiting");
}

impl System for ClassifierSystem {
    fn name(&self) -> &str {
        "classifier"
    }

    fn shutdown(&mut self) {
        if let Some(token) = self.token.take() {
            self.bus.unsubscribe(EventKind::AudioArrived, token);
        }
        self.running.store(false, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("classifier worker panicked");
            }
        }
        tracing::info!("classifier system stopped");
    }
}

impl Drop for ClassifierSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barkwatch_events::SourceId;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::time::Instant;

    fn loud(n: usize) -> Vec<i16> {
        vec![10_000; n]
    }

    fn wait_for_frames(bus: &Arc<EventBus>, seen: &Arc<Mutex<Vec<ClassesDetected>>>, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().len() < n {
            assert!(Instant::now() < deadline, "timed out waiting for frames");
            bus.drain_queued();
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn recorded_frames(bus: &Arc<EventBus>) -> Arc<Mutex<Vec<ClassesDetected>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(EventKind::ClassesDetected, move |event| {
            if let Event::ClassesDetected(e) = event {
                sink.lock().push(e.clone());
            }
            Ok(())
        });
        seen
    }

    #[test]
    fn every_audio_batch_produces_one_frame() {
        let bus = Arc::new(EventBus::new());
        let seen = recorded_frames(&bus);
        let mut system = ClassifierSystem::start(
            bus.clone(),
            LevelClassifier::new(1000.0, vec![ClassScore::new("Bark", 0.95)]),
        );

        let t0 = Utc::now();
        bus.enqueue(Event::AudioArrived(AudioArrived {
            source_id: SourceId::local(),
            samples: loud(512),
            sample_rate: 44_100,
            begin_timestamp: t0,
        }));
        bus.enqueue(Event::AudioArrived(AudioArrived {
            source_id: SourceId::local(),
            samples: vec![0; 512],
            sample_rate: 44_100,
            begin_timestamp: t0 + chrono::Duration::milliseconds(16),
        }));
        bus.drain_queued();

        wait_for_frames(&bus, &seen, 2);
        system.shutdown();

        let seen = seen.lock();
        assert_eq!(seen[0].begin_timestamp, t0);
        assert_eq!(seen[0].classes, vec![ClassScore::new("Bark", 0.95)]);
        // The quiet batch still produces a frame, with no classes.
        assert!(seen[1].classes.is_empty());
    }

    #[test]
    fn frames_keep_the_batch_source_identity() {
        let bus = Arc::new(EventBus::new());
        let seen = recorded_frames(&bus);
        let mut system = ClassifierSystem::start(
            bus.clone(),
            LevelClassifier::new(1000.0, vec![ClassScore::new("Bark", 0.95)]),
        );

        bus.enqueue(Event::AudioArrived(AudioArrived {
            source_id: SourceId::new("10.1.2.3:45000"),
            samples: loud(128),
            sample_rate: 16_000,
            begin_timestamp: Utc::now(),
        }));
        bus.drain_queued();

        wait_for_frames(&bus, &seen, 1);
        system.shutdown();

        assert_eq!(seen.lock()[0].source_id, SourceId::new("10.1.2.3:45000"));
    }

    #[test]
    fn level_classifier_gates_on_rms() {
        let mut c = LevelClassifier::new(5_000.0, vec![ClassScore::new("Bark", 0.9)]);
        assert!(c.classify(&[], 44_100).is_empty());
        assert!(c.classify(&vec![100; 1024], 44_100).is_empty());
        assert_eq!(c.classify(&vec![20_000; 1024], 44_100).len(), 1);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let bus = Arc::new(EventBus::new());
        let mut system =
            ClassifierSystem::start(bus, LevelClassifier::new(1000.0, Vec::new()));
        system.shutdown();
        system.shutdown();
    }
}
