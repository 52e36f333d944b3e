//! The head process: assigns disjoint global id ranges to connecting units
//! and broadcasts the frozen address map once the quorum is reached.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::entity::{IdAllocator, NodeId};
use crate::error::SNNError;
use crate::protocol::{GlobalIdMap, Message, UnitAddress, UnitKind, UnitRange, UnitRegistry};

/// Protocol state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Registrations in progress.
    Collecting,
    /// Quorum reached, the map is being sent.
    Broadcasting,
    /// Map sent; no further registrations are accepted.
    Done,
}

/// Outcome of a successful registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// Base of the assigned id range; the count is the requested one.
    pub base: NodeId,
    /// True for the registration that completed the quorum. The caller is
    /// then responsible for sending the broadcast and marking the
    /// coordinator done.
    pub quorum_reached: bool,
}

// Everything the registration critical section guards: the allocation
// counter, the id map, and the per-kind registries. Nothing else shares it.
#[derive(Debug)]
struct HeadState {
    phase: Phase,
    allocator: IdAllocator,
    map: GlobalIdMap,
    inputs: UnitRegistry,
    outputs: UnitRegistry,
    registered: usize,
}

/// Assigns disjoint id ranges to units and owns the global address map
/// until it is broadcast.
pub struct Coordinator {
    quorum: usize,
    state: Mutex<HeadState>,
}

impl Coordinator {
    /// Create a coordinator expecting the given number of units.
    /// The function returns an error for a zero quorum.
    pub fn new(quorum: usize) -> Result<Self, SNNError> {
        if quorum == 0 {
            return Err(SNNError::InvalidParameter(
                "Quorum must be at least one unit".to_string(),
            ));
        }
        Ok(Coordinator {
            quorum,
            state: Mutex::new(HeadState {
                phase: Phase::Collecting,
                allocator: IdAllocator::new(),
                map: GlobalIdMap::new(),
                inputs: UnitRegistry::new(),
                outputs: UnitRegistry::new(),
                registered: 0,
            }),
        })
    }

    /// Returns the configured quorum.
    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// Returns the current protocol phase.
    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Returns a snapshot of the id map, for inspection.
    pub fn id_map(&self) -> GlobalIdMap {
        self.state.lock().map.clone()
    }

    /// Register one unit from its observed address, assigning it a
    /// contiguous id range.
    ///
    /// This is the single critical section of the protocol: the allocation
    /// counter is read and advanced atomically with respect to other
    /// registrations, so concurrently assigned ranges never overlap.
    /// Registrations after the quorum fail with
    /// [`SNNError::LateRegistration`].
    pub fn register(
        &self,
        kind: UnitKind,
        host: &str,
        port: u16,
        count: u64,
    ) -> Result<Registration, SNNError> {
        if count == 0 {
            return Err(SNNError::InvalidParameter(
                "Registration must request at least one id".to_string(),
            ));
        }

        let mut state = self.state.lock();
        if state.phase != Phase::Collecting {
            return Err(SNNError::LateRegistration);
        }

        let base = state.allocator.reserve(count);
        let address = UnitAddress::new(host, port);
        state.map.insert_range(base, count, &address);
        let range = UnitRange {
            base,
            count,
            address,
        };
        match kind {
            UnitKind::Input => state.inputs.push(range),
            UnitKind::Output => state.outputs.push(range),
        }

        state.registered += 1;
        let quorum_reached = state.registered == self.quorum;
        if quorum_reached {
            state.phase = Phase::Broadcasting;
        }
        debug!(
            "registered {} unit at {}:{} with ids [{}, {})",
            kind.as_str(),
            host,
            port,
            base,
            base + count
        );

        Ok(Registration {
            base,
            quorum_reached,
        })
    }

    /// Build the broadcast message from the frozen map and output registry.
    pub fn broadcast_message(&self) -> Message {
        let state = self.state.lock();
        Message::Map {
            map: state.map.clone(),
            outputs: state.outputs.clone(),
        }
    }

    /// Mark the broadcast as delivered.
    pub fn mark_done(&self) {
        self.state.lock().phase = Phase::Done;
    }
}

/// Serve registrations on the given listener until the map is broadcast.
///
/// Each connection is handled on its own thread: the `CONNECT` line is read,
/// the unit is registered using the peer's observed IP and the advertised
/// port, and the assigned base id is written back. The registration that
/// completes the quorum triggers the broadcast to every registered
/// connection; per-peer send failures are logged and not retried. Offending
/// connections (late registrations, unknown kinds, malformed lines) are
/// dropped without affecting the others.
pub fn serve(coordinator: Arc<Coordinator>, listener: TcpListener) -> Result<(), SNNError> {
    let peers: Arc<Mutex<Vec<TcpStream>>> = Arc::new(Mutex::new(Vec::new()));

    for stream in listener.incoming() {
        if coordinator.phase() == Phase::Done {
            break;
        }
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!("accept failed: {}", e);
                continue;
            }
        };
        let coordinator = coordinator.clone();
        let peers = peers.clone();
        thread::spawn(move || {
            if let Err(e) = handle_registration(&coordinator, &peers, stream) {
                warn!("registration connection dropped: {}", e);
            }
        });
    }
    Ok(())
}

fn handle_registration(
    coordinator: &Coordinator,
    peers: &Mutex<Vec<TcpStream>>,
    stream: TcpStream,
) -> Result<(), SNNError> {
    let peer_host = stream
        .peer_addr()
        .map_err(|e| SNNError::IoError(e.to_string()))?
        .ip()
        .to_string();

    let mut reader = BufReader::new(
        stream
            .try_clone()
            .map_err(|e| SNNError::IoError(e.to_string()))?,
    );
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .map_err(|e| SNNError::IoError(e.to_string()))?;

    let (kind, port, count) = match Message::parse(&line)? {
        Message::Connect { kind, port, count } => (kind, port, count),
        other => {
            return Err(SNNError::MalformedMessage(format!(
                "expected CONNECT, got {}",
                other.encode()
            )))
        }
    };

    let mut writer = stream
        .try_clone()
        .map_err(|e| SNNError::IoError(e.to_string()))?;

    // Count the unit, send its base id, and enroll its connection for the
    // broadcast as one step: a counted unit must be reachable (and must have
    // its reply on the wire ahead of the map) by the time any registration
    // completes the quorum.
    let registration = {
        let mut peers = peers.lock();
        let registration = coordinator.register(kind, &peer_host, port, count)?;
        let reply = format!("{}\n", Message::Assigned { base: registration.base }.encode());
        match writer.write_all(reply.as_bytes()) {
            Ok(()) => peers.push(stream),
            // The unit keeps its assigned range but misses the broadcast;
            // delivery is not retried.
            Err(e) => warn!("failed to send base id to {}: {}", peer_host, e),
        }
        registration
    };

    if registration.quorum_reached {
        broadcast(coordinator, peers);
    }
    Ok(())
}

fn broadcast(coordinator: &Coordinator, peers: &Mutex<Vec<TcpStream>>) {
    let line = format!("{}\n", coordinator.broadcast_message().encode());
    let mut peers = peers.lock();
    info!("quorum reached, broadcasting map to {} units", peers.len());
    for peer in peers.iter_mut() {
        // The coordinator does not retry delivery to units it cannot reach.
        if let Err(e) = peer.write_all(line.as_bytes()) {
            warn!("failed to send map to a unit: {}", e);
        }
    }
    coordinator.mark_done();
}
