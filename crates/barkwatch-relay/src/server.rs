//! Server half of the relay: owns the listening socket, tracks client
//! identities, stamps inbound events with the sender's identity, and fans
//! outbound events out to every live connection.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};

use barkwatch_events::{ClientCleanupRequested, ClientId, Event, EventBus, EventKind, SourceId};
use barkwatch_foundation::System;

use crate::codec::{encode_frame, CodecError, FrameDecoder};
use crate::config::RelayConfig;
use crate::registry::ClientRegistry;
use crate::RelayError;

enum Outbound {
    Broadcast(Event),
    Unicast(ClientId, Event),
}

/// Cheap handle for pushing events out through the server from any thread.
#[derive(Clone)]
pub struct RelayServerHandle {
    tx: Sender<Outbound>,
}

impl RelayServerHandle {
    /// Queues an event for every currently connected client.
    pub fn broadcast(&self, event: Event) {
        let _ = self.tx.send(Outbound::Broadcast(event));
    }

    /// Queues an event for one client. Unknown targets are dropped with a
    /// log line; the client may have been evicted since the caller saw it.
    pub fn unicast(&self, target: ClientId, event: Event) {
        let _ = self.tx.send(Outbound::Unicast(target, event));
    }
}

struct Connection {
    stream: TcpStream,
    decoder: FrameDecoder,
    pending: Vec<u8>,
}

impl Connection {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::new(),
            pending: Vec::new(),
        }
    }

    /// Reads everything currently available and decodes complete frames.
    /// `Ok(None)` means the peer closed or the stream is unframeable and the
    /// connection should be dropped.
    fn pump_read(&mut self, id: &ClientId) -> Option<Vec<Event>> {
        let mut events = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    tracing::info!(client_id = %id, "client closed connection");
                    return None;
                }
                Ok(n) => self.decoder.extend(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(client_id = %id, "client read failed: {e}");
                    return None;
                }
            }
        }
        loop {
            match self.decoder.next_frame() {
                Ok(Some(event)) => events.push(event),
                Ok(None) => break,
                Err(CodecError::Malformed(e)) => {
                    tracing::warn!(client_id = %id, "dropping malformed frame: {e}");
                }
                Err(e @ CodecError::Oversized { .. }) => {
                    tracing::warn!(client_id = %id, "dropping client: {e}");
                    return None;
                }
            }
        }
        Some(events)
    }

    fn queue(&mut self, frame: &[u8]) {
        self.pending.extend_from_slice(frame);
    }

    /// Writes as much of the pending buffer as the socket will take.
    fn flush(&mut self, id: &ClientId) -> bool {
        while !self.pending.is_empty() {
            match self.stream.write(&self.pending) {
                Ok(0) => {
                    tracing::warn!(client_id = %id, "client write stalled");
                    return false;
                }
                Ok(n) => {
                    self.pending.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(client_id = %id, "client write failed: {e}");
                    return false;
                }
            }
        }
        true
    }
}

pub struct RelayServer {
    handle: RelayServerHandle,
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl RelayServer {
    /// Binds the listener and starts the relay thread. A bind failure is
    /// fatal by design: a server that nobody can reach is misconfigured.
    pub fn bind(bus: Arc<EventBus>, cfg: RelayConfig) -> Result<Self, RelayError> {
        let addr = cfg.bind_target();
        let listener = TcpListener::bind(&addr).map_err(|source| RelayError::Bind {
            addr: addr.clone(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "relay server listening");

        let (tx, rx) = crossbeam_channel::unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let worker = {
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name("relay-server".to_string())
                .spawn(move || serve_loop(listener, bus, cfg, rx, running))?
        };

        Ok(Self {
            handle: RelayServerHandle { tx },
            local_addr,
            running,
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> RelayServerHandle {
        self.handle.clone()
    }

    /// The bound address; useful when the configured port is 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl System for RelayServer {
    fn name(&self) -> &str {
        "relay-server"
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("relay server thread panicked");
            }
            tracing::info!("relay server stopped");
        }
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn serve_loop(
    listener: TcpListener,
    bus: Arc<EventBus>,
    cfg: RelayConfig,
    outbound: Receiver<Outbound>,
    running: Arc<AtomicBool>,
) {
    let mut registry = ClientRegistry::new(cfg.client_timeout());
    let mut connections: HashMap<ClientId, Connection> = HashMap::new();

    while running.load(Ordering::Relaxed) {
        let now = Instant::now();

        // New connections.
        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        tracing::warn!(%peer, "failed to configure client socket: {e}");
                        continue;
                    }
                    let id = ClientId::new(peer.to_string());
                    tracing::info!(client_id = %id, "client connected");
                    registry.touch(id.clone(), now);
                    connections.insert(id, Connection::new(stream));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!("accept failed: {e}");
                    break;
                }
            }
        }

        // Inbound traffic. Any frame counts as liveness.
        let mut dropped = Vec::new();
        for (id, conn) in connections.iter_mut() {
            let Some(events) = conn.pump_read(id) else {
                dropped.push(id.clone());
                continue;
            };
            if !events.is_empty() {
                registry.touch(id.clone(), now);
            }
            for mut event in events {
                match event.kind() {
                    // Heartbeats are pure liveness; the touch above was all.
                    EventKind::ClientHeartbeat => {}
                    EventKind::ClientAnnounce => {
                        if let Event::ClientAnnounce(announce) = &event {
                            tracing::info!(
                                client_id = %id,
                                local_addr = %announce.local_addr,
                                "client announced"
                            );
                        }
                        bus.enqueue(event);
                    }
                    _ => {
                        event.set_source_id(SourceId::from(id));
                        bus.enqueue(event);
                    }
                }
            }
        }
        for id in dropped {
            evict(&mut connections, &mut registry, &bus, &id);
        }

        // Outbound traffic.
        for msg in outbound.try_iter() {
            match msg {
                Outbound::Broadcast(event) => match encode_frame(&event) {
                    Ok(frame) => {
                        for conn in connections.values_mut() {
                            conn.queue(&frame);
                        }
                    }
                    Err(e) => tracing::error!("failed to encode broadcast: {e}"),
                },
                Outbound::Unicast(target, event) => match connections.get_mut(&target) {
                    Some(conn) => match encode_frame(&event) {
                        Ok(frame) => conn.queue(&frame),
                        Err(e) => tracing::error!("failed to encode unicast: {e}"),
                    },
                    None => {
                        tracing::debug!(client_id = %target, "unicast target not connected");
                    }
                },
            }
        }

        let mut stalled = Vec::new();
        for (id, conn) in connections.iter_mut() {
            if !conn.flush(id) {
                stalled.push(id.clone());
            }
        }
        for id in stalled {
            evict(&mut connections, &mut registry, &bus, &id);
        }

        // Liveness sweep.
        for id in registry.sweep(Instant::now()) {
            tracing::info!(client_id = %id, "evicting silent client");
            connections.remove(&id);
            bus.enqueue(Event::ClientCleanupRequested(ClientCleanupRequested {
                client_id: id,
            }));
        }

        std::thread::sleep(cfg.poll_interval());
    }
    tracing::debug!("relay server loop exiting");
}

/// Drops a connection and raises cleanup exactly once, regardless of whether
/// the disconnect and the liveness sweep race.
fn evict(
    connections: &mut HashMap<ClientId, Connection>,
    registry: &mut ClientRegistry,
    bus: &EventBus,
    id: &ClientId,
) {
    connections.remove(id);
    if registry.remove(id) {
        bus.enqueue(Event::ClientCleanupRequested(ClientCleanupRequested {
            client_id: id.clone(),
        }));
    }
}
