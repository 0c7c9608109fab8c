//! Hysteresis-based debouncing of the per-frame classifier signal into
//! stable detection spans, keyed independently per audio source.
//!
//! A window opens on the first qualifying frame and closes only after a full
//! grace period of continuous non-qualification, absorbing brief classifier
//! flicker. The grace check runs on the tick (absence of frames is itself a
//! signal), so closure latency is bounded by the tick rate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use barkwatch_events::{
    ClassScore, ClassesDetected, DetectionBegan, DetectionEnded, DetectionSpan, Event, EventBus,
    EventKind, ListenerToken, SourceId,
};
use barkwatch_foundation::{SharedClock, System};

use crate::config::DebounceConfig;

#[derive(Debug, Clone, Copy)]
struct NegativeMark {
    /// Monotonic time the grace comparison runs against.
    at: Instant,
    /// Wall time reported as the span's end timestamp.
    wall: DateTime<Utc>,
}

/// One open detection window. Absence from the map is the Idle state.
#[derive(Debug, Clone)]
struct DetectionWindow {
    begin_timestamp: DateTime<Utc>,
    trigger_classes: Vec<ClassScore>,
    negative_since: Option<NegativeMark>,
}

struct DebounceState {
    cfg: DebounceConfig,
    clock: SharedClock,
    windows: HashMap<SourceId, DetectionWindow>,
}

impl DebounceState {
    /// The union of qualifying subject and signature classes, or `None` if
    /// the frame does not qualify: a frame qualifies iff it carries more
    /// than two subject classes at threshold and at least one signature
    /// class at threshold.
    fn qualify(&self, classes: &[ClassScore]) -> Option<Vec<ClassScore>> {
        let matches = |labels: &[String], threshold: f32| -> Vec<ClassScore> {
            classes
                .iter()
                .filter(|c| {
                    c.score >= threshold
                        && labels.iter().any(|label| label.eq_ignore_ascii_case(&c.label))
                })
                .cloned()
                .collect()
        };
        let subjects = matches(&self.cfg.subject_labels, self.cfg.subject_threshold);
        let signatures = matches(&self.cfg.signature_labels, self.cfg.signature_threshold);

        if subjects.len() > 2 && !signatures.is_empty() {
            let mut trigger = subjects;
            trigger.extend(signatures);
            Some(trigger)
        } else {
            None
        }
    }

    fn observe(&mut self, frame: &ClassesDetected, bus: &EventBus) {
        match self.qualify(&frame.classes) {
            Some(trigger_classes) => {
                if let Some(window) = self.windows.get_mut(&frame.source_id) {
                    // Ongoing detection; cancel any pending closure.
                    window.negative_since = None;
                } else {
                    self.windows.insert(
                        frame.source_id.clone(),
                        DetectionWindow {
                            begin_timestamp: frame.begin_timestamp,
                            trigger_classes: trigger_classes.clone(),
                            negative_since: None,
                        },
                    );
                    tracing::info!(source_id = %frame.source_id, "detection began");
                    bus.enqueue(Event::DetectionBegan(DetectionBegan {
                        source_id: frame.source_id.clone(),
                        begin_timestamp: frame.begin_timestamp,
                        trigger_classes,
                    }));
                }
            }
            None => {
                if let Some(window) = self.windows.get_mut(&frame.source_id) {
                    if window.negative_since.is_none() {
                        window.negative_since = Some(NegativeMark {
                            at: self.clock.now(),
                            wall: Utc::now(),
                        });
                    }
                }
            }
        }
    }

    /// Closes every window whose negative mark has outlived the grace
    /// period. Runs once per tick, independent of frame cadence.
    fn poll(&mut self, bus: &EventBus) {
        let now = self.clock.now();
        let grace = self.cfg.grace_period();

        let mut closed = Vec::new();
        self.windows.retain(|source_id, window| {
            let expired = matches!(
                window.negative_since,
                Some(mark) if now.duration_since(mark.at) >= grace
            );
            if expired {
                closed.push((source_id.clone(), window.clone()));
            }
            !expired
        });

        for (source_id, window) in closed {
            let Some(mark) = window.negative_since else {
                continue;
            };
            tracing::info!(%source_id, "detection ended");
            bus.enqueue(Event::DetectionSpan(DetectionSpan {
                source_id: source_id.clone(),
                begin_timestamp: window.begin_timestamp,
                end_timestamp: mark.wall,
                trigger_classes: window.trigger_classes,
            }));
            bus.enqueue(Event::DetectionEnded(DetectionEnded {
                source_id,
                end_timestamp: mark.wall,
            }));
        }
    }

    fn evict(&mut self, source_id: &SourceId) {
        if self.windows.remove(source_id).is_some() {
            tracing::debug!(%source_id, "detection window evicted");
        }
    }
}

pub struct ClassificationDebouncer {
    bus: Arc<EventBus>,
    state: Arc<Mutex<DebounceState>>,
    tokens: Vec<(EventKind, ListenerToken)>,
}

impl ClassificationDebouncer {
    pub fn new(bus: Arc<EventBus>, cfg: DebounceConfig, clock: SharedClock) -> Self {
        tracing::info!(
            subject_threshold = cfg.subject_threshold,
            signature_threshold = cfg.signature_threshold,
            grace_period_s = cfg.grace_period_s,
            "classification debouncer ready"
        );
        let state = Arc::new(Mutex::new(DebounceState {
            cfg,
            clock,
            windows: HashMap::new(),
        }));

        let mut tokens = Vec::new();
        {
            let state = Arc::clone(&state);
            let bus2 = Arc::clone(&bus);
            tokens.push((
                EventKind::ClassesDetected,
                bus.subscribe(EventKind::ClassesDetected, move |event| {
                    if let Event::ClassesDetected(frame) = event {
                        state.lock().observe(frame, &bus2);
                    }
                    Ok(())
                }),
            ));
        }
        {
            let state = Arc::clone(&state);
            tokens.push((
                EventKind::ClientCleanupRequested,
                bus.subscribe(EventKind::ClientCleanupRequested, move |event| {
                    if let Event::ClientCleanupRequested(e) = event {
                        state.lock().evict(&SourceId::from(&e.client_id));
                    }
                    Ok(())
                }),
            ));
        }

        Self { bus, state, tokens }
    }

    #[cfg(test)]
    fn open_window_count(&self) -> usize {
        self.state.lock().windows.len()
    }
}

impl System for ClassificationDebouncer {
    fn name(&self) -> &str {
        "classification-debounce"
    }

    fn update(&mut self, _elapsed: Duration) {
        self.state.lock().poll(&self.bus);
    }

    fn shutdown(&mut self) {
        for (kind, token) in self.tokens.drain(..) {
            self.bus.unsubscribe(kind, token);
        }
    }
}
