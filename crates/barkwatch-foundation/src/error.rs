use thiserror::Error;

/// Application-level failures that end the process at startup. Subsystems
/// carry their own error types; this covers what happens before they exist.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),
}
