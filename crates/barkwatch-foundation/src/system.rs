use std::time::Duration;

/// Update hook the main loop calls on every registered subsystem once per
/// tick, between the two event-queue drains.
///
/// Systems that do all their work on background threads only need `name` and
/// `shutdown`; the default `update` is a no-op.
pub trait System {
    fn name(&self) -> &str;

    fn update(&mut self, _elapsed: Duration) {}

    /// Called once when the main loop exits, in registration order. Must be
    /// safe against double invocation.
    fn shutdown(&mut self) {}
}
