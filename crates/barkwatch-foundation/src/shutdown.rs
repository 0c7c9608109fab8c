use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag connecting signal handlers and deadline checks to the main
/// loop. Cloning hands out another handle to the same flag.
#[derive(Clone, Default)]
pub struct ShutdownFlag {
    requested: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            tracing::info!("shutdown requested");
        }
    }

    pub fn is_set(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let flag = ShutdownFlag::new();
        let other = flag.clone();
        assert!(!other.is_set());
        flag.request();
        assert!(other.is_set());
    }
}
