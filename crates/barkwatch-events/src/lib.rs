pub mod bus;
pub mod types;

pub use bus::{EventBus, ListenerToken};
pub use types::{
    AudioArrived, ClassScore, ClassesDetected, ClientAnnounce, ClientCleanupRequested,
    ClientHeartbeat, ClientId, DetectionBegan, DetectionEnded, DetectionSpan, Event, EventKind,
    SourceId,
};
