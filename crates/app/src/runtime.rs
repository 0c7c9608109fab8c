//! Fixed-tick main loop. Each tick drains the bus, updates every system, and
//! drains again so events produced during the update land in the same tick.

use std::sync::Arc;
use std::time::Duration;

use barkwatch_events::EventBus;
use barkwatch_foundation::{SharedClock, ShutdownFlag, System};

pub struct MainLoop {
    bus: Arc<EventBus>,
    clock: SharedClock,
    tick_interval: Duration,
    shutdown: ShutdownFlag,
    systems: Vec<Box<dyn System>>,
}

impl MainLoop {
    pub fn new(
        bus: Arc<EventBus>,
        clock: SharedClock,
        tick_rate_hz: u32,
        shutdown: ShutdownFlag,
    ) -> Self {
        let tick_interval = Duration::from_secs_f64(1.0 / tick_rate_hz.max(1) as f64);
        Self {
            bus,
            clock,
            tick_interval,
            shutdown,
            systems: Vec::new(),
        }
    }

    pub fn add_system(&mut self, system: Box<dyn System>) {
        tracing::debug!(system = system.name(), "system registered");
        self.systems.push(system);
    }

    /// Runs until the shutdown flag is set or the deadline elapses, then
    /// shuts every system down in registration order.
    pub fn run(&mut self, deadline: Option<Duration>) {
        tracing::info!(
            tick_interval = ?self.tick_interval,
            systems = self.systems.len(),
            "main loop running"
        );
        let start = self.clock.now();
        let mut last_tick = start;

        while !self.shutdown.is_set() {
            let tick_start = self.clock.now();
            if let Some(deadline) = deadline {
                if tick_start.duration_since(start) >= deadline {
                    tracing::info!("run deadline reached");
                    break;
                }
            }
            let elapsed = tick_start.duration_since(last_tick);
            last_tick = tick_start;

            self.bus.drain_queued();
            for system in &mut self.systems {
                system.update(elapsed);
            }
            self.bus.drain_queued();

            let spent = self.clock.now().duration_since(tick_start);
            if spent < self.tick_interval {
                self.clock.sleep(self.tick_interval - spent);
            }
        }

        for system in &mut self.systems {
            tracing::info!(system = system.name(), "shutting down");
            system.shutdown();
        }
        tracing::info!("main loop exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barkwatch_events::{ClientHeartbeat, Event, EventKind};
    use barkwatch_foundation::test_clock;
    use parking_lot::Mutex;

    struct Probe {
        updates: Arc<Mutex<u32>>,
        shutdowns: Arc<Mutex<u32>>,
    }

    impl System for Probe {
        fn name(&self) -> &str {
            "probe"
        }

        fn update(&mut self, _elapsed: Duration) {
            *self.updates.lock() += 1;
        }

        fn shutdown(&mut self) {
            *self.shutdowns.lock() += 1;
        }
    }

    #[test]
    fn ticks_at_the_configured_rate_until_the_deadline() {
        let bus = Arc::new(EventBus::new());
        let clock = test_clock();
        let mut main_loop = MainLoop::new(bus, clock, 10, ShutdownFlag::default());

        let updates = Arc::new(Mutex::new(0));
        let shutdowns = Arc::new(Mutex::new(0));
        main_loop.add_system(Box::new(Probe {
            updates: updates.clone(),
            shutdowns: shutdowns.clone(),
        }));

        // Virtual time: each tick sleeps exactly one interval.
        main_loop.run(Some(Duration::from_secs(1)));

        assert_eq!(*updates.lock(), 10);
        assert_eq!(*shutdowns.lock(), 1);
    }

    #[test]
    fn shutdown_flag_stops_the_loop_before_the_first_tick() {
        let bus = Arc::new(EventBus::new());
        let clock = test_clock();
        let shutdown = ShutdownFlag::default();
        shutdown.request();
        let mut main_loop = MainLoop::new(bus, clock, 60, shutdown);

        let updates = Arc::new(Mutex::new(0));
        let shutdowns = Arc::new(Mutex::new(0));
        main_loop.add_system(Box::new(Probe {
            updates: updates.clone(),
            shutdowns: shutdowns.clone(),
        }));

        main_loop.run(None);
        assert_eq!(*updates.lock(), 0);
        assert_eq!(*shutdowns.lock(), 1);
    }

    struct Emitter {
        bus: Arc<EventBus>,
        fired: bool,
    }

    impl System for Emitter {
        fn name(&self) -> &str {
            "emitter"
        }

        fn update(&mut self, _elapsed: Duration) {
            if !self.fired {
                self.fired = true;
                self.bus
                    .enqueue(Event::ClientHeartbeat(ClientHeartbeat {}));
            }
        }
    }

    #[test]
    fn events_emitted_during_update_are_delivered_the_same_tick() {
        let bus = Arc::new(EventBus::new());
        let clock = test_clock();
        let shutdown = ShutdownFlag::default();

        let delivered = Arc::new(Mutex::new(0u32));
        let sink = delivered.clone();
        let stop = shutdown.clone();
        bus.subscribe(EventKind::ClientHeartbeat, move |_| {
            *sink.lock() += 1;
            stop.request();
            Ok(())
        });

        let mut main_loop = MainLoop::new(bus.clone(), clock, 60, shutdown);
        main_loop.add_system(Box::new(Emitter { bus, fired: false }));
        main_loop.run(Some(Duration::from_secs(5)));

        // Stopped by the handler, not the deadline: the second drain of the
        // first tick delivered the event.
        assert_eq!(*delivered.lock(), 1);
    }
}
