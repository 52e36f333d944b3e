//! A unit process: owns a local shard of the simulation, registers with the
//! coordinator, and forwards spikes addressed to ids outside its shard.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::entity::{Entity, IdAllocator, NodeId, Output, Tick};
use crate::error::SNNError;
use crate::protocol::{GlobalIdMap, Message, UnitAddress, UnitKind, UnitRegistry};
use crate::scheduler::EntityList;

/// A process owning a contiguous shard of the global id space.
///
/// The unit registers with the coordinator to obtain its id range, builds
/// its local entities against that range, and once the address map arrives
/// resolves every remote target through it. Ticking is local and never
/// blocks on the network: outputs addressed to remote ids are forwarded
/// fire-and-forget.
pub struct Unit {
    kind: UnitKind,
    /// The port this unit advertises for inbound peer connections.
    port: u16,
    requested: u64,
    base: Option<NodeId>,
    entities: EntityList,
    /// The unit's local clock: the number of completed scheduler steps.
    clock: Tick,
    map: Option<GlobalIdMap>,
    output_units: Option<UnitRegistry>,
    /// Registration connection to the coordinator, kept open for the
    /// broadcast.
    head: Option<BufReader<TcpStream>>,
    /// Cached outbound connections to peer units.
    peers: HashMap<UnitAddress, TcpStream>,
}

impl Unit {
    /// Create a unit that will advertise the given inbound port and request
    /// a block of `count` ids when registering.
    pub fn new(kind: UnitKind, port: u16, count: u64) -> Result<Self, SNNError> {
        if count == 0 {
            return Err(SNNError::InvalidParameter(
                "A unit must own at least one id".to_string(),
            ));
        }
        Ok(Unit {
            kind,
            port,
            requested: count,
            base: None,
            entities: EntityList::new(),
            clock: 0,
            map: None,
            output_units: None,
            head: None,
            peers: HashMap::new(),
        })
    }

    /// Returns the assigned base id, once registered.
    pub fn base(&self) -> Option<NodeId> {
        self.base
    }

    /// Returns the unit's local clock: the number of completed steps.
    pub fn clock(&self) -> Tick {
        self.clock
    }

    /// Returns whether the given id belongs to this unit's assigned range.
    pub fn owns(&self, id: NodeId) -> bool {
        match self.base {
            Some(base) => id >= base && id < base + self.requested,
            None => false,
        }
    }

    /// Returns an allocator over the assigned range, for building the local
    /// shard of entities. Fails before registration.
    pub fn allocator(&self) -> Result<IdAllocator, SNNError> {
        match self.base {
            Some(base) => Ok(IdAllocator::starting_at(base)),
            None => Err(SNNError::InvalidParameter(
                "Unit has no assigned id range yet".to_string(),
            )),
        }
    }

    /// Returns the unit's local scheduler.
    pub fn entities(&self) -> &EntityList {
        &self.entities
    }

    /// Returns the unit's local scheduler, mutably, for shard construction.
    pub fn entities_mut(&mut self) -> &mut EntityList {
        &mut self.entities
    }

    /// Add one entity to the local shard.
    pub fn add_entity(&mut self, entity: Box<dyn Entity>) {
        self.entities.add(entity);
    }

    /// Resolve a node id to the address of its owning unit through the
    /// frozen map. Returns None before the broadcast or for unmapped ids.
    pub fn resolve(&self, id: NodeId) -> Option<&UnitAddress> {
        self.map.as_ref().and_then(|map| map.resolve(id))
    }

    /// Returns the broadcast registry of output units, once received.
    pub fn output_units(&self) -> Option<&UnitRegistry> {
        self.output_units.as_ref()
    }

    /// Register with the coordinator at `head_addr`, returning the assigned
    /// base id. The connection stays open so the map broadcast can be
    /// received with [`Unit::await_map`].
    pub fn register(&mut self, head_addr: &str) -> Result<NodeId, SNNError> {
        let mut stream = TcpStream::connect(head_addr)
            .map_err(|e| SNNError::PeerUnreachable(format!("{}: {}", head_addr, e)))?;

        let connect = Message::Connect {
            kind: self.kind,
            port: self.port,
            count: self.requested,
        };
        stream
            .write_all(format!("{}\n", connect.encode()).as_bytes())
            .map_err(|e| SNNError::PeerUnreachable(e.to_string()))?;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        let read = reader
            .read_line(&mut line)
            .map_err(|e| SNNError::PeerUnreachable(e.to_string()))?;
        if read == 0 {
            return Err(SNNError::PeerUnreachable(
                "coordinator closed the connection before replying".to_string(),
            ));
        }

        match Message::parse(&line)? {
            Message::Assigned { base } => {
                self.base = Some(base);
                self.head = Some(reader);
                debug!(
                    "unit on port {} assigned ids [{}, {})",
                    self.port,
                    base,
                    base + self.requested
                );
                Ok(base)
            }
            other => Err(SNNError::MalformedMessage(format!(
                "expected a base id reply, got {}",
                other.encode()
            ))),
        }
    }

    /// Register with retries and a fixed backoff between attempts.
    pub fn register_with_retry(
        &mut self,
        head_addr: &str,
        attempts: usize,
        backoff: Duration,
    ) -> Result<NodeId, SNNError> {
        let mut last = SNNError::PeerUnreachable("no attempts made".to_string());
        for attempt in 0..attempts {
            match self.register(head_addr) {
                Ok(base) => return Ok(base),
                Err(e @ SNNError::PeerUnreachable(_)) => {
                    debug!("registration attempt {} failed: {}", attempt + 1, e);
                    last = e;
                    thread::sleep(backoff);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last)
    }

    /// Block on the registration connection until the map broadcast arrives
    /// and store it. Lines other than the broadcast are ignored here.
    pub fn await_map(&mut self) -> Result<(), SNNError> {
        let mut reader = self.head.take().ok_or_else(|| {
            SNNError::InvalidParameter("Unit is not registered".to_string())
        })?;

        loop {
            let mut line = String::new();
            let read = reader
                .read_line(&mut line)
                .map_err(|e| SNNError::PeerUnreachable(e.to_string()))?;
            if read == 0 {
                return Err(SNNError::PeerUnreachable(
                    "coordinator closed the connection before the broadcast".to_string(),
                ));
            }

            match Message::parse(&line)? {
                Message::Map { map, outputs } => {
                    self.apply_map(map, outputs);
                    self.head = Some(reader);
                    return Ok(());
                }
                other => {
                    warn!("ignoring {} while waiting for the map", other.encode());
                }
            }
        }
    }

    fn apply_map(&mut self, map: GlobalIdMap, outputs: UnitRegistry) {
        if self.map.is_some() {
            // The first broadcast wins; the map is immutable afterwards.
            warn!("ignoring repeated map broadcast");
            return;
        }
        debug!("received map covering {} ids", map.len());
        self.map = Some(map);
        self.output_units = Some(outputs);
    }

    /// Run one scheduler step, forwarding outputs whose targets live on
    /// other units. Forwarding is fire-and-forget: failures are logged and
    /// the affected spikes dropped, never blocking the local clock.
    pub fn step(&mut self) {
        let unrouted = self.entities.tick();
        self.clock += 1;
        for output in unrouted {
            self.forward(output);
        }
    }

    /// Handle one inbound wire line, returning the reply to send back on
    /// the same connection, if any. Parse failures propagate so the caller
    /// can drop the offending connection.
    pub fn handle_line(&mut self, line: &str) -> Result<Option<Message>, SNNError> {
        let message = Message::parse(line)?;
        self.handle_message(message)
    }

    /// Dispatch one inbound message.
    pub fn handle_message(&mut self, message: Message) -> Result<Option<Message>, SNNError> {
        match message {
            Message::Map { map, outputs } => {
                self.apply_map(map, outputs);
                Ok(None)
            }
            Message::Tick { tick } => {
                // Barrier advance: catch up to the named tick, then echo it
                // as the acknowledgment. Stale barriers are acknowledged
                // without stepping so a retrying driver cannot deadlock.
                while self.clock < tick {
                    self.step();
                }
                Ok(Some(Message::Tick { tick }))
            }
            Message::Input { target, at, value } => {
                if self.owns(target) {
                    if !self.entities.deliver(&Output::Current {
                        target,
                        at,
                        value,
                    }) {
                        warn!("input for owned id {} with no local entity", target);
                    }
                } else {
                    warn!("dropping input for id {} not owned by this unit", target);
                }
                Ok(None)
            }
            other @ (Message::Connect { .. } | Message::Assigned { .. }) => {
                Err(SNNError::MalformedMessage(format!(
                    "registration message out of band: {}",
                    other.encode()
                )))
            }
        }
    }

    fn forward(&mut self, output: Output) {
        let target = output.target();
        let address = match self.resolve(target) {
            Some(address) => address.clone(),
            None => {
                debug!("no route for id {}, dropping output", target);
                return;
            }
        };

        let line = format!(
            "{}\n",
            Message::Input {
                target,
                at: output.at(),
                value: output.value(),
            }
            .encode()
        );

        if let Err(e) = self.send_to(&address, line.as_bytes()) {
            // Fire-and-forget: the spike is lost, the simulation goes on.
            warn!("dropping spike for {}:{}: {}", address.host, address.port, e);
            self.peers.remove(&address);
        }
    }

    fn send_to(&mut self, address: &UnitAddress, bytes: &[u8]) -> Result<(), SNNError> {
        let stream = match self.peers.entry(address.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let stream = TcpStream::connect((address.host.as_str(), address.port))
                    .map_err(|e| SNNError::PeerUnreachable(e.to_string()))?;
                entry.insert(stream)
            }
        };
        stream
            .write_all(bytes)
            .map_err(|e| SNNError::IoError(e.to_string()))
    }
}

/// Serve inbound peer messages on the given listener, dispatching into the
/// shared unit.
///
/// One thread per connection reads newline-delimited messages; replies (the
/// barrier acknowledgment) are written back on the same connection. A
/// message error drops that connection only; the unit keeps running.
pub fn serve_peers(listener: TcpListener, unit: Arc<Mutex<Unit>>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("peer accept failed: {}", e);
                    continue;
                }
            };
            let unit = unit.clone();
            thread::spawn(move || {
                if let Err(e) = handle_peer(stream, &unit) {
                    warn!("peer connection dropped: {}", e);
                }
            });
        }
    })
}

fn handle_peer(stream: TcpStream, unit: &Mutex<Unit>) -> Result<(), SNNError> {
    let mut writer = stream
        .try_clone()
        .map_err(|e| SNNError::IoError(e.to_string()))?;
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        let line = line.map_err(|e| SNNError::IoError(e.to_string()))?;
        let reply = unit.lock().handle_line(&line)?;
        if let Some(reply) = reply {
            writer
                .write_all(format!("{}\n", reply.encode()).as_bytes())
                .map_err(|e| SNNError::IoError(e.to_string()))?;
        }
    }
    Ok(())
}
