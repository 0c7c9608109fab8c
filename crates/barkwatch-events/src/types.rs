//! Event payloads and the tagged event union carried by the bus and the wire.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of an audio source: the local capture pipeline or one remote
/// client. Detection windows are keyed by this.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The single local capture source.
    pub fn local() -> Self {
        Self("local".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wire identity of a connected relay client, as observed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<ClientId> for SourceId {
    fn from(id: ClientId) -> Self {
        SourceId(id.0)
    }
}

impl From<&ClientId> for SourceId {
    fn from(id: &ClientId) -> Self {
        SourceId(id.0.clone())
    }
}

/// One scored label from the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassScore {
    pub label: String,
    pub score: f32,
}

impl ClassScore {
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

/// One batch of captured samples, emitted by the ingest pipeline per tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioArrived {
    pub source_id: SourceId,
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub begin_timestamp: DateTime<Utc>,
}

/// Classifier output for one window of audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassesDetected {
    pub source_id: SourceId,
    pub begin_timestamp: DateTime<Utc>,
    pub classes: Vec<ClassScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionBegan {
    pub source_id: SourceId,
    pub begin_timestamp: DateTime<Utc>,
    pub trigger_classes: Vec<ClassScore>,
}

/// The closed interval of one confirmed detection, emitted together with
/// `DetectionEnded` when a window closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSpan {
    pub source_id: SourceId,
    pub begin_timestamp: DateTime<Utc>,
    pub end_timestamp: DateTime<Utc>,
    pub trigger_classes: Vec<ClassScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEnded {
    pub source_id: SourceId,
    pub end_timestamp: DateTime<Utc>,
}

/// First message a relay client sends after connecting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientAnnounce {
    pub local_addr: String,
}

/// Liveness-only traffic from a relay client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientHeartbeat {}

/// Raised locally by the server relay when a client identity is evicted, so
/// dependent per-source state can be garbage-collected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientCleanupRequested {
    pub client_id: ClientId,
}

/// Every event the bus carries. The serde tag doubles as the wire envelope's
/// `event_type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "payload", rename_all = "snake_case")]
pub enum Event {
    AudioArrived(AudioArrived),
    ClassesDetected(ClassesDetected),
    DetectionBegan(DetectionBegan),
    DetectionSpan(DetectionSpan),
    DetectionEnded(DetectionEnded),
    ClientAnnounce(ClientAnnounce),
    ClientHeartbeat(ClientHeartbeat),
    ClientCleanupRequested(ClientCleanupRequested),
}

/// Field-less mirror of [`Event`], used as the listener-registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AudioArrived,
    ClassesDetected,
    DetectionBegan,
    DetectionSpan,
    DetectionEnded,
    ClientAnnounce,
    ClientHeartbeat,
    ClientCleanupRequested,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::AudioArrived(_) => EventKind::AudioArrived,
            Event::ClassesDetected(_) => EventKind::ClassesDetected,
            Event::DetectionBegan(_) => EventKind::DetectionBegan,
            Event::DetectionSpan(_) => EventKind::DetectionSpan,
            Event::DetectionEnded(_) => EventKind::DetectionEnded,
            Event::ClientAnnounce(_) => EventKind::ClientAnnounce,
            Event::ClientHeartbeat(_) => EventKind::ClientHeartbeat,
            Event::ClientCleanupRequested(_) => EventKind::ClientCleanupRequested,
        }
    }

    pub fn source_id(&self) -> Option<&SourceId> {
        match self {
            Event::AudioArrived(e) => Some(&e.source_id),
            Event::ClassesDetected(e) => Some(&e.source_id),
            Event::DetectionBegan(e) => Some(&e.source_id),
            Event::DetectionSpan(e) => Some(&e.source_id),
            Event::DetectionEnded(e) => Some(&e.source_id),
            _ => None,
        }
    }

    /// Rewrites the payload's source identity where the payload carries one.
    /// The server relay uses this to stamp inbound events with the sender's
    /// wire identity.
    pub fn set_source_id(&mut self, id: SourceId) {
        match self {
            Event::AudioArrived(e) => e.source_id = id,
            Event::ClassesDetected(e) => e.source_id = id,
            Event::DetectionBegan(e) => e.source_id = id,
            Event::DetectionSpan(e) => e.source_id = id,
            Event::DetectionEnded(e) => e.source_id = id,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(event: &Event) -> Event {
        let json = serde_json::to_string(event).expect("serialize");
        serde_json::from_str(&json).expect("deserialize")
    }

    #[test]
    fn audio_arrived_roundtrips() {
        let event = Event::AudioArrived(AudioArrived {
            source_id: SourceId::local(),
            samples: vec![0, -32768, 32767, 12],
            sample_rate: 44_100,
            begin_timestamp: Utc::now(),
        });
        assert_eq!(roundtrip(&event), event);
    }

    #[test]
    fn detection_events_roundtrip_scores_exactly() {
        let classes = vec![
            ClassScore::new("Bark", 0.937_512_3),
            ClassScore::new("Dog", 0.1),
        ];
        let began = Event::DetectionBegan(DetectionBegan {
            source_id: SourceId::new("10.0.0.7:51001"),
            begin_timestamp: Utc::now(),
            trigger_classes: classes.clone(),
        });
        let span = Event::DetectionSpan(DetectionSpan {
            source_id: SourceId::local(),
            begin_timestamp: Utc::now(),
            end_timestamp: Utc::now(),
            trigger_classes: classes,
        });
        let ended = Event::DetectionEnded(DetectionEnded {
            source_id: SourceId::local(),
            end_timestamp: Utc::now(),
        });
        assert_eq!(roundtrip(&began), began);
        assert_eq!(roundtrip(&span), span);
        assert_eq!(roundtrip(&ended), ended);
    }

    #[test]
    fn relay_lifecycle_events_roundtrip() {
        let announce = Event::ClientAnnounce(ClientAnnounce {
            local_addr: "192.168.1.4:40002".to_string(),
        });
        let heartbeat = Event::ClientHeartbeat(ClientHeartbeat {});
        let cleanup = Event::ClientCleanupRequested(ClientCleanupRequested {
            client_id: ClientId::new("192.168.1.4:40002"),
        });
        assert_eq!(roundtrip(&announce), announce);
        assert_eq!(roundtrip(&heartbeat), heartbeat);
        assert_eq!(roundtrip(&cleanup), cleanup);
    }

    #[test]
    fn envelope_tag_names_the_event_type() {
        let event = Event::ClientHeartbeat(ClientHeartbeat {});
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "client_heartbeat");
    }

    #[test]
    fn set_source_id_only_touches_payloads_that_carry_one() {
        let mut audio = Event::ClassesDetected(ClassesDetected {
            source_id: SourceId::local(),
            begin_timestamp: Utc::now(),
            classes: vec![],
        });
        audio.set_source_id(SourceId::new("peer"));
        assert_eq!(audio.source_id().unwrap().as_str(), "peer");

        let mut announce = Event::ClientAnnounce(ClientAnnounce {
            local_addr: "x".into(),
        });
        announce.set_source_id(SourceId::new("peer"));
        assert!(announce.source_id().is_none());
    }
}
