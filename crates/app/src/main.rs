mod cli;
mod config;
mod runtime;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use barkwatch_audio::{AudioIngestPipeline, FileSource, MicConfig, MicSource};
use barkwatch_detect::{ClassificationDebouncer, ClassifierSystem, LevelClassifier};
use barkwatch_events::{ClassScore, Event, EventBus, EventKind, SourceId};
use barkwatch_foundation::{real_clock, ShutdownFlag};
use barkwatch_relay::{RelayClient, RelayServer};

use crate::cli::Cli;
use crate::config::AppConfig;
use crate::runtime::MainLoop;

fn init_logging(fallback: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Class set the built-in level classifier reports when its gate opens:
/// enough of the configured labels to drive the debouncer end to end.
fn demo_classes(cfg: &AppConfig) -> Vec<ClassScore> {
    let mut classes: Vec<ClassScore> = cfg
        .debounce
        .subject_labels
        .iter()
        .take(3)
        .map(|label| ClassScore::new(label.clone(), 0.99))
        .collect();
    if let Some(signature) = cfg.debounce.signature_labels.first() {
        classes.push(ClassScore::new(signature.clone(), 0.97));
    }
    classes
}

fn install_detection_logging(bus: &Arc<EventBus>) {
    bus.subscribe(EventKind::DetectionBegan, |event| {
        if let Event::DetectionBegan(e) = event {
            let labels: Vec<&str> = e.trigger_classes.iter().map(|c| c.label.as_str()).collect();
            tracing::info!(source_id = %e.source_id, ?labels, "detection began");
        }
        Ok(())
    });
    bus.subscribe(EventKind::DetectionSpan, |event| {
        if let Event::DetectionSpan(e) = event {
            let length = e.end_timestamp - e.begin_timestamp;
            tracing::info!(
                source_id = %e.source_id,
                begin = %e.begin_timestamp,
                length_ms = length.num_milliseconds(),
                "detection span"
            );
        }
        Ok(())
    });
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let mut cfg = AppConfig::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut cfg);

    let bus = Arc::new(EventBus::new());
    let clock = real_clock();
    let shutdown = ShutdownFlag::default();
    {
        let flag = shutdown.clone();
        ctrlc::set_handler(move || {
            tracing::info!("interrupt received, shutting down");
            flag.request();
        })?;
    }

    let mut main_loop = MainLoop::new(bus.clone(), clock.clone(), cfg.tick_rate_hz, shutdown);

    let chunk_size = cfg.chunk_size;
    let pipeline = match &cli.file {
        Some(path) => {
            let path = path.clone();
            AudioIngestPipeline::start(bus.clone(), SourceId::local(), move || {
                FileSource::open(&path, chunk_size)
            })?
        }
        None => {
            let mic = MicConfig {
                device: cli.device.clone(),
                chunk_size,
            };
            AudioIngestPipeline::start(bus.clone(), SourceId::local(), move || {
                MicSource::open(&mic)
            })?
        }
    };
    main_loop.add_system(Box::new(pipeline));

    // A client that forwards raw audio leaves classification to the server.
    if !cli.forward_audio {
        let classifier = LevelClassifier::new(cfg.level_threshold, demo_classes(&cfg));
        main_loop.add_system(Box::new(ClassifierSystem::start(bus.clone(), classifier)));
        main_loop.add_system(Box::new(ClassificationDebouncer::new(
            bus.clone(),
            cfg.debounce.clone(),
            clock.clone(),
        )));
    }

    install_detection_logging(&bus);

    if cli.serve.is_some() {
        let server = RelayServer::bind(bus.clone(), cfg.relay.clone())?;
        let handle = server.handle();
        for kind in [
            EventKind::DetectionBegan,
            EventKind::DetectionSpan,
            EventKind::DetectionEnded,
        ] {
            let handle = handle.clone();
            bus.subscribe(kind, move |event| {
                handle.broadcast(event.clone());
                Ok(())
            });
        }
        main_loop.add_system(Box::new(server));
    } else if let Some(addr) = &cli.connect {
        let target = if addr.contains(':') {
            addr.clone()
        } else {
            format!("{addr}:{}", cfg.relay.port)
        };
        let client = RelayClient::connect(bus.clone(), &target, cfg.relay.clone())?;
        let handle = client.handle();

        // Only locally produced events travel upstream; anything the server
        // sent down already carries a remote identity.
        let forwarded: &[EventKind] = if cli.forward_audio {
            &[EventKind::AudioArrived]
        } else {
            &[
                EventKind::DetectionBegan,
                EventKind::DetectionSpan,
                EventKind::DetectionEnded,
            ]
        };
        for &kind in forwarded {
            let handle = handle.clone();
            bus.subscribe(kind, move |event| {
                if event.source_id() == Some(&SourceId::local()) {
                    handle.push(event.clone());
                }
                Ok(())
            });
        }
        main_loop.add_system(Box::new(client));
    }

    let deadline = cli.duration.map(Duration::from_secs_f64);
    main_loop.run(deadline);
    Ok(())
}
