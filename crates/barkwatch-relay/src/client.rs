//! Client half of the relay: connects out to a server, announces itself,
//! forwards locally produced events upstream, and re-injects whatever the
//! server sends onto the local bus unmodified.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};

use barkwatch_events::{ClientAnnounce, ClientHeartbeat, Event, EventBus};
use barkwatch_foundation::System;

use crate::codec::{encode_frame, CodecError, FrameDecoder};
use crate::config::RelayConfig;
use crate::RelayError;

/// Cheap handle for pushing local events upstream from any thread.
#[derive(Clone)]
pub struct RelayClientHandle {
    tx: Sender<Event>,
}

impl RelayClientHandle {
    pub fn push(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

pub struct RelayClient {
    handle: RelayClientHandle,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl RelayClient {
    /// Connects and starts the client thread. A connect failure is fatal by
    /// design: the operator asked for client mode against a server that is
    /// not there.
    pub fn connect(bus: Arc<EventBus>, addr: &str, cfg: RelayConfig) -> Result<Self, RelayError> {
        let stream = TcpStream::connect(addr).map_err(|source| RelayError::Connect {
            addr: addr.to_string(),
            source,
        })?;
        stream.set_nonblocking(true)?;
        let local_addr = stream.local_addr()?;
        tracing::info!(server = addr, %local_addr, "connected to relay server");

        let (tx, rx) = crossbeam_channel::unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let worker = {
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name("relay-client".to_string())
                .spawn(move || client_loop(stream, bus, cfg, rx, running, local_addr.to_string()))?
        };

        Ok(Self {
            handle: RelayClientHandle { tx },
            running,
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> RelayClientHandle {
        self.handle.clone()
    }
}

impl System for RelayClient {
    fn name(&self) -> &str {
        "relay-client"
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("relay client thread panicked");
            }
            tracing::info!("relay client stopped");
        }
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn client_loop(
    mut stream: TcpStream,
    bus: Arc<EventBus>,
    cfg: RelayConfig,
    outbound: Receiver<Event>,
    running: Arc<AtomicBool>,
    local_addr: String,
) {
    let mut decoder = FrameDecoder::new();
    let mut pending: Vec<u8> = Vec::new();
    let mut last_send = Instant::now();

    // Identity first, before any payload traffic.
    match encode_frame(&Event::ClientAnnounce(ClientAnnounce { local_addr })) {
        Ok(frame) => pending.extend_from_slice(&frame),
        Err(e) => {
            tracing::error!("failed to encode announce: {e}");
            return;
        }
    }

    let heartbeat_interval = cfg.heartbeat_interval();
    let mut buf = [0u8; 4096];

    'outer: while running.load(Ordering::Relaxed) {
        // Inbound: everything the server sends goes on the bus as-is.
        loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    tracing::warn!("server closed connection");
                    break 'outer;
                }
                Ok(n) => decoder.extend(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!("server read failed: {e}");
                    break 'outer;
                }
            }
        }
        loop {
            match decoder.next_frame() {
                Ok(Some(event)) => bus.enqueue(event),
                Ok(None) => break,
                Err(CodecError::Malformed(e)) => {
                    tracing::warn!("dropping malformed server frame: {e}");
                }
                Err(e @ CodecError::Oversized { .. }) => {
                    tracing::warn!("disconnecting: {e}");
                    break 'outer;
                }
            }
        }

        // Outbound: queued local events, then a heartbeat if we would
        // otherwise go silent. Any send resets the heartbeat timer.
        for event in outbound.try_iter() {
            match encode_frame(&event) {
                Ok(frame) => {
                    pending.extend_from_slice(&frame);
                    last_send = Instant::now();
                }
                Err(e) => tracing::error!("failed to encode outbound event: {e}"),
            }
        }
        if last_send.elapsed() >= heartbeat_interval {
            match encode_frame(&Event::ClientHeartbeat(ClientHeartbeat {})) {
                Ok(frame) => {
                    pending.extend_from_slice(&frame);
                    last_send = Instant::now();
                    tracing::trace!("heartbeat queued");
                }
                Err(e) => tracing::error!("failed to encode heartbeat: {e}"),
            }
        }

        while !pending.is_empty() {
            match stream.write(&pending) {
                Ok(0) => {
                    tracing::warn!("server write stalled");
                    break 'outer;
                }
                Ok(n) => {
                    pending.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!("server write failed: {e}");
                    break 'outer;
                }
            }
        }

        std::thread::sleep(cfg.poll_interval());
    }
    tracing::debug!("relay client loop exiting");
}
