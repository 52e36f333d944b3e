//! Module implementing directed, weighted wiring between entities.

use serde::{Deserialize, Serialize};

use crate::entity::NodeId;
use crate::error::SNNError;
use crate::DEFAULT_WEIGHT;

/// Represents a directed connection from a source entity to a target.
///
/// The source exclusively owns its outbound connections; the target is
/// referenced by id only. The weight sign encodes excitatory (positive)
/// versus inhibitory (negative) influence.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Connection {
    source_id: NodeId,
    target_id: NodeId,
    weight: f64,
}

impl Connection {
    /// Create a new connection with the specified parameters.
    pub fn new(source_id: NodeId, target_id: NodeId, weight: f64) -> Self {
        Connection {
            source_id,
            target_id,
            weight,
        }
    }

    /// Returns the ID of the source entity.
    pub fn source_id(&self) -> NodeId {
        self.source_id
    }

    /// Returns the ID of the target entity.
    pub fn target_id(&self) -> NodeId {
        self.target_id
    }

    /// Returns the weight of the connection.
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Set the weight of the connection.
    pub fn set_weight(&mut self, weight: f64) {
        self.weight = weight;
    }
}

/// Wiring capability for entities with weighted outbound edges.
pub trait Connectable {
    /// Append a directed edge to `target` with the given weight.
    fn connect(&mut self, target: NodeId, weight: f64);

    /// Append a directed edge to `target` with the default weight.
    fn connect_default(&mut self, target: NodeId) {
        self.connect(target, DEFAULT_WEIGHT);
    }
}

/// Wire every source to `target` using the positionally matching weight.
///
/// The lists must have equal length; a mismatch fails with
/// [`SNNError::ArityMismatch`] before any edge is created. Wiring must be
/// complete before the affected entities are ticked.
pub fn convergent_connect(
    sources: &mut [&mut dyn Connectable],
    target: NodeId,
    weights: &[f64],
) -> Result<(), SNNError> {
    if sources.len() != weights.len() {
        return Err(SNNError::ArityMismatch {
            sources: sources.len(),
            weights: weights.len(),
        });
    }

    for (source, &weight) in sources.iter_mut().zip(weights) {
        source.connect(target, weight);
    }
    Ok(())
}
