pub mod classifier;
pub mod config;
pub mod debounce;

pub use classifier::{Classifier, ClassifierSystem, LevelClassifier};
pub use config::DebounceConfig;
pub use debounce::ClassificationDebouncer;
