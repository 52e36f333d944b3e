//! Wire messages and address schemas exchanged between the head process and
//! its units.
//!
//! Messages are single text lines over a point-to-point stream connection:
//!
//! - `CONNECT,<kind>,<port>,<count>`: unit registration request.
//! - `<base>`: registration reply carrying the assigned base id.
//! - `MAP#<id-map>#OUTPUTS#<output-registry>`: broadcast of the frozen
//!   address map, both payloads as versioned JSON schemas.
//! - `TICK#<tick>`: barrier advance notice, acknowledged by echoing it.
//! - `INPUT#<nodeId>,<tick>,<value>`: cross-unit spike delivery.
//!
//! Map payloads are parsed defensively: a version mismatch or any malformed
//! field is rejected as [`SNNError::MalformedMap`], never evaluated.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entity::{NodeId, Tick};
use crate::error::SNNError;

/// Version tag carried by every serialized id map and registry.
pub const MAP_SCHEMA_VERSION: u32 = 1;

/// The role a unit declares when registering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitKind {
    Input,
    Output,
}

impl UnitKind {
    /// Returns the wire spelling of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Input => "INPUT",
            UnitKind::Output => "OUTPUT",
        }
    }

    fn parse(s: &str) -> Result<Self, SNNError> {
        match s {
            "INPUT" => Ok(UnitKind::Input),
            "OUTPUT" => Ok(UnitKind::Output),
            other => Err(SNNError::MalformedMessage(format!(
                "unknown unit kind: {}",
                other
            ))),
        }
    }
}

/// Network address of the unit owning a node id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitAddress {
    pub host: String,
    pub port: u16,
}

impl UnitAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        UnitAddress {
            host: host.into(),
            port,
        }
    }
}

/// Mapping from node id to the address of the unit owning it.
///
/// Owned and mutated exclusively by the coordinator during the registration
/// phase; after the broadcast every unit holds an immutable copy for the
/// duration of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalIdMap {
    version: u32,
    entries: BTreeMap<NodeId, UnitAddress>,
}

impl Default for GlobalIdMap {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalIdMap {
    /// Create an empty map at the current schema version.
    pub fn new() -> Self {
        GlobalIdMap {
            version: MAP_SCHEMA_VERSION,
            entries: BTreeMap::new(),
        }
    }

    /// Record the owning address for every id in `[base, base + count)`.
    pub fn insert_range(&mut self, base: NodeId, count: u64, address: &UnitAddress) {
        for id in base..base + count {
            self.entries.insert(id, address.clone());
        }
    }

    /// Resolve a node id to the address of its owning unit.
    pub fn resolve(&self, id: NodeId) -> Option<&UnitAddress> {
        self.entries.get(&id)
    }

    /// Returns the number of mapped ids.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize for the broadcast message.
    pub fn to_wire(&self) -> String {
        // BTreeMap keys and plain fields cannot fail to serialize.
        serde_json::to_string(self).expect("id map serialization cannot fail")
    }

    /// Parse a broadcast payload, rejecting malformed or mismatched input.
    pub fn from_wire(payload: &str) -> Result<Self, SNNError> {
        let map: GlobalIdMap = serde_json::from_str(payload)
            .map_err(|e| SNNError::MalformedMap(e.to_string()))?;
        if map.version != MAP_SCHEMA_VERSION {
            return Err(SNNError::MalformedMap(format!(
                "unsupported schema version {}",
                map.version
            )));
        }
        Ok(map)
    }
}

/// A unit's assigned id range together with its address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRange {
    pub base: NodeId,
    pub count: u64,
    pub address: UnitAddress,
}

/// Registry of registered units of one kind, in registration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRegistry {
    version: u32,
    entries: Vec<UnitRange>,
}

impl Default for UnitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitRegistry {
    pub fn new() -> Self {
        UnitRegistry {
            version: MAP_SCHEMA_VERSION,
            entries: Vec::new(),
        }
    }

    /// Append a registered unit's range.
    pub fn push(&mut self, range: UnitRange) {
        self.entries.push(range);
    }

    /// Returns the registered ranges in registration order.
    pub fn ranges(&self) -> &[UnitRange] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).expect("registry serialization cannot fail")
    }

    pub fn from_wire(payload: &str) -> Result<Self, SNNError> {
        let registry: UnitRegistry = serde_json::from_str(payload)
            .map_err(|e| SNNError::MalformedMap(e.to_string()))?;
        if registry.version != MAP_SCHEMA_VERSION {
            return Err(SNNError::MalformedMap(format!(
                "unsupported schema version {}",
                registry.version
            )));
        }
        Ok(registry)
    }
}

/// A protocol message, one line on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Unit → coordinator registration request.
    Connect {
        kind: UnitKind,
        port: u16,
        count: u64,
    },
    /// Coordinator → unit registration reply: the assigned base id.
    Assigned { base: NodeId },
    /// Coordinator → unit broadcast of the frozen address map.
    Map {
        map: GlobalIdMap,
        outputs: UnitRegistry,
    },
    /// Barrier advance notice.
    Tick { tick: Tick },
    /// Spike delivery for a target owned by the receiving unit.
    Input {
        target: NodeId,
        at: Tick,
        value: f64,
    },
}

impl Message {
    /// Render the message as a wire line (without the trailing newline).
    pub fn encode(&self) -> String {
        match self {
            Message::Connect { kind, port, count } => {
                format!("CONNECT,{},{},{}", kind.as_str(), port, count)
            }
            Message::Assigned { base } => base.to_string(),
            Message::Map { map, outputs } => {
                format!("MAP#{}#OUTPUTS#{}", map.to_wire(), outputs.to_wire())
            }
            Message::Tick { tick } => format!("TICK#{}", tick),
            Message::Input { target, at, value } => {
                format!("INPUT#{},{},{}", target, at, value)
            }
        }
    }

    /// Parse one wire line, dispatching on the message kind.
    pub fn parse(line: &str) -> Result<Message, SNNError> {
        let line = line.trim_end_matches(['\r', '\n']);

        if let Some(fields) = line.strip_prefix("CONNECT,") {
            let mut parts = fields.split(',');
            let kind = UnitKind::parse(parts.next().unwrap_or_default())?;
            let port = Self::parse_field::<u16>(parts.next(), "port")?;
            let count = Self::parse_field::<u64>(parts.next(), "count")?;
            if parts.next().is_some() {
                return Err(SNNError::MalformedMessage(
                    "trailing fields after CONNECT".to_string(),
                ));
            }
            return Ok(Message::Connect { kind, port, count });
        }

        if let Some(rest) = line.strip_prefix("MAP#") {
            let (map_payload, outputs_payload) = rest
                .split_once("#OUTPUTS#")
                .ok_or_else(|| SNNError::MalformedMessage("MAP without OUTPUTS".to_string()))?;
            let map = GlobalIdMap::from_wire(map_payload)?;
            let outputs = UnitRegistry::from_wire(outputs_payload)?;
            return Ok(Message::Map { map, outputs });
        }

        if let Some(tick) = line.strip_prefix("TICK#") {
            let tick = tick
                .parse::<Tick>()
                .map_err(|e| SNNError::MalformedMessage(format!("bad tick: {}", e)))?;
            return Ok(Message::Tick { tick });
        }

        if let Some(fields) = line.strip_prefix("INPUT#") {
            let mut parts = fields.split(',');
            let target = Self::parse_field::<NodeId>(parts.next(), "node id")?;
            let at = Self::parse_field::<Tick>(parts.next(), "tick")?;
            let value = Self::parse_field::<f64>(parts.next(), "value")?;
            if parts.next().is_some() {
                return Err(SNNError::MalformedMessage(
                    "trailing fields after INPUT".to_string(),
                ));
            }
            return Ok(Message::Input { target, at, value });
        }

        // A bare integer is the registration reply.
        if let Ok(base) = line.parse::<NodeId>() {
            return Ok(Message::Assigned { base });
        }

        let kind = line.split(['#', ',']).next().unwrap_or(line);
        Err(SNNError::UnknownMessageKind(kind.to_string()))
    }

    fn parse_field<T: std::str::FromStr>(
        field: Option<&str>,
        name: &str,
    ) -> Result<T, SNNError>
    where
        T::Err: std::fmt::Display,
    {
        field
            .ok_or_else(|| SNNError::MalformedMessage(format!("missing {}", name)))?
            .parse::<T>()
            .map_err(|e| SNNError::MalformedMessage(format!("bad {}: {}", name, e)))
    }
}
